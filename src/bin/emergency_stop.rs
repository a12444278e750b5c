//! Standalone blanket-stop tool
//!
//! Lands, stops, or kills every device in an address range without
//! needing a running engine - the thing to reach for when the flight
//! program is wedged and four drones are still in the air.
//!
//! Usage: emergency_stop [network-base] [first-host] [last-host]
//! e.g.   emergency_stop 192.168.10.0 51 54

use anyhow::{Context, Result};
use std::net::{Ipv4Addr, SocketAddr};
use swarmlink::shared::policy;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let mut args = std::env::args().skip(1);
    let network: Ipv4Addr = args
        .next()
        .unwrap_or_else(|| "192.168.10.0".into())
        .parse()
        .context("network base must be an IPv4 address")?;
    let first_host: u8 = args
        .next()
        .unwrap_or_else(|| "1".into())
        .parse()
        .context("first host must be 1-254")?;
    let last_host: u8 = args
        .next()
        .unwrap_or_else(|| "254".into())
        .parse()
        .context("last host must be 1-254")?;

    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    let base = network.octets();

    println!("Emergency stop ready on {network}/{first_host}-{last_host}");
    println!("L = land  |  S = stop  |  E = emergency cut-out  |  Q = quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let wire = match line.trim().to_ascii_uppercase().as_str() {
            // a bare return is the panic reflex: land
            "" | "L" => "land",
            "S" => "stop",
            "E" => "emergency",
            "Q" => break,
            _ => {
                println!("enter L(and), S(top), E(mergency cut-out) or Q(uit)");
                continue;
            }
        };

        for host in first_host..=last_host {
            let addr = SocketAddr::from((
                Ipv4Addr::new(base[0], base[1], base[2], host),
                policy::CONTROL_PORT,
            ));
            info!("sending {} to {}", wire, addr);
            if let Err(e) = socket.send_to(wire.as_bytes(), addr).await {
                warn!("send to {} failed: {}", addr, e);
            }
        }
    }

    info!("emergency stop exiting");
    Ok(())
}
