//! Device discovery
//!
//! Probes candidate addresses with the SDK-mode string until the expected
//! number of devices has answered, then enrolls each responder: open its
//! command link, read its serial, and assign its number from the
//! configured ordering.

use crate::config::SwarmConfig;
use crate::device::DeviceHandle;
use crate::error::SwarmError;
use crate::transport::CommandLink;
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use swarmlink_shared::{command, AckOutcome};
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, info};

/// Probe until every expected device has answered "ok", or the deadline
/// lapses. Returns the responders' command endpoints.
pub(crate) async fn discover(config: &SwarmConfig) -> Result<Vec<SocketAddr>, SwarmError> {
    let expected = config.serials.len();
    if expected == 0 {
        return Err(SwarmError::Discovery("no serials configured".into()));
    }

    let candidates = candidate_addrs(config)?;
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    let deadline = Instant::now() + config.discovery.deadline;
    let mut found: Vec<SocketAddr> = Vec::new();
    let mut buf = [0u8; 64];

    while found.len() < expected {
        if Instant::now() >= deadline {
            return Err(SwarmError::Discovery(format!(
                "found {} of {} device(s) before the deadline",
                found.len(),
                expected
            )));
        }

        info!("looking for {} device(s)", expected - found.len());
        for addr in &candidates {
            if found.contains(addr) {
                continue;
            }
            socket.send_to(command::probe().wire().as_bytes(), addr).await?;
        }

        // Collect responders for one sweep window, bailing early once the
        // whole swarm has answered.
        let sweep_end = Instant::now() + config.discovery.sweep_window;
        while found.len() < expected {
            let left = sweep_end.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            match timeout(left, socket.recv_from(&mut buf)).await {
                Ok(Ok((n, peer))) => {
                    let text = String::from_utf8_lossy(&buf[..n]);
                    if text.trim().eq_ignore_ascii_case("ok") && !found.contains(&peer) {
                        info!("found device at {}", peer);
                        found.push(peer);
                    } else {
                        debug!("ignoring probe reply {:?} from {}", text.trim(), peer);
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => break,
            }
        }
    }

    Ok(found)
}

/// Open a link to each responder, read its serial, and number it from the
/// configured ordering.
pub(crate) async fn enroll(
    config: &SwarmConfig,
    found: Vec<SocketAddr>,
) -> Result<Vec<DeviceHandle>, SwarmError> {
    let mut devices = Vec::with_capacity(found.len());
    let mut assigned = HashSet::new();

    for addr in found {
        let link = CommandLink::connect(addr).await?;

        // Re-probe on the dedicated socket so the device replies to this
        // flow from now on.
        let probe = command::probe();
        match link
            .exchange(probe.wire().to_string(), probe.kind(), config.timeouts.set)
            .await?
        {
            AckOutcome::Ok => {}
            other => {
                return Err(SwarmError::Discovery(format!(
                    "device {addr} refused the probe: {other:?}"
                )))
            }
        }

        let serial_cmd = command::read_serial();
        let serial = match link
            .exchange(
                serial_cmd.wire().to_string(),
                serial_cmd.kind(),
                config.timeouts.read,
            )
            .await?
        {
            AckOutcome::Value(value) => value,
            other => {
                return Err(SwarmError::Discovery(format!(
                    "device {addr} gave an unusable serial reply: {other:?}"
                )))
            }
        };

        let Some(index) = config.serials.iter().position(|known| known == &serial) else {
            return Err(SwarmError::Discovery(format!(
                "device at {addr} reports unknown serial {serial}"
            )));
        };
        let num = index as u8 + 1;
        if !assigned.insert(num) {
            return Err(SwarmError::Discovery(format!(
                "serial {serial} answered from more than one address"
            )));
        }

        info!("device {} is {} at {}", num, serial, addr);
        devices.push(DeviceHandle::new(num, serial, link, config.timeouts));
    }

    Ok(devices)
}

fn candidate_addrs(config: &SwarmConfig) -> Result<Vec<SocketAddr>, SwarmError> {
    let discovery = &config.discovery;

    if !discovery.addresses.is_empty() {
        return Ok(discovery.addresses.clone());
    }

    let Some(network) = discovery.network else {
        return Err(SwarmError::Discovery(
            "no candidate addresses or network configured".into(),
        ));
    };

    let base = network.octets();
    Ok((discovery.first_host..=discovery.last_host)
        .map(|host| {
            SocketAddr::from((
                Ipv4Addr::new(base[0], base[1], base[2], host),
                config.control_port,
            ))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use crate::test_support::{test_timeouts, FakeDrone, Reply};
    use std::time::Duration;

    fn config_for(addresses: Vec<SocketAddr>, serials: Vec<&str>) -> SwarmConfig {
        SwarmConfig {
            serials: serials.into_iter().map(String::from).collect(),
            timeouts: test_timeouts(),
            discovery: DiscoveryConfig {
                addresses,
                sweep_window: Duration::from_millis(200),
                deadline: Duration::from_secs(2),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_discover_finds_all_responders() {
        // each fake consumes one probe during discover
        let drone_one = FakeDrone::spawn(vec![Reply::Ok]).await;
        let drone_two = FakeDrone::spawn(vec![Reply::Ok]).await;
        let config = config_for(vec![drone_one.addr, drone_two.addr], vec!["SN-A", "SN-B"]);

        let found = discover(&config).await.expect("discover");
        assert_eq!(found.len(), 2);
        assert!(found.contains(&drone_one.addr));
        assert!(found.contains(&drone_two.addr));
    }

    #[tokio::test]
    async fn test_discover_gives_up_at_deadline() {
        let silent = FakeDrone::spawn(vec![Reply::Silent, Reply::Silent, Reply::Silent]).await;
        let mut config = config_for(vec![silent.addr], vec!["SN-A"]);
        config.discovery.deadline = Duration::from_millis(300);

        let err = discover(&config).await.expect_err("deadline");
        assert!(matches!(err, SwarmError::Discovery(_)));
    }

    #[tokio::test]
    async fn test_enroll_orders_devices_by_serial_list() {
        // scripts: probe -> "ok", sn? -> serial
        let drone_b = FakeDrone::spawn(vec![Reply::Ok, Reply::Text("SN-B")]).await;
        let drone_a = FakeDrone::spawn(vec![Reply::Ok, Reply::Text("SN-A")]).await;
        let config = config_for(vec![], vec!["SN-A", "SN-B"]);

        // found order is network order; numbering must follow the config
        let devices = enroll(&config, vec![drone_b.addr, drone_a.addr])
            .await
            .expect("enroll");

        let b = devices.iter().find(|d| d.serial() == "SN-B").unwrap();
        let a = devices.iter().find(|d| d.serial() == "SN-A").unwrap();
        assert_eq!(a.num(), 1);
        assert_eq!(b.num(), 2);
    }

    #[tokio::test]
    async fn test_enroll_rejects_unknown_serial() {
        let stranger = FakeDrone::spawn(vec![Reply::Ok, Reply::Text("SN-WHO")]).await;
        let config = config_for(vec![], vec!["SN-A"]);

        let err = enroll(&config, vec![stranger.addr])
            .await
            .expect_err("unknown serial");
        assert!(matches!(err, SwarmError::Discovery(_)));
    }

    #[tokio::test]
    async fn test_candidate_sweep_expansion() {
        let config = SwarmConfig {
            serials: vec!["SN-A".into()],
            discovery: DiscoveryConfig {
                network: Some(Ipv4Addr::new(192, 168, 10, 0)),
                first_host: 51,
                last_host: 54,
                ..Default::default()
            },
            ..Default::default()
        };

        let candidates = candidate_addrs(&config).expect("candidates");
        assert_eq!(candidates.len(), 4);
        assert_eq!(candidates[0], "192.168.10.51:8889".parse().unwrap());
        assert_eq!(candidates[3], "192.168.10.54:8889".parse().unwrap());
    }
}
