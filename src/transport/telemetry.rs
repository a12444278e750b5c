//! Telemetry listener
//!
//! Status datagrams from the whole swarm arrive on a single local port and
//! are demultiplexed by source address into each device's snapshot. This
//! path never touches command state: telemetry is advisory, and anything
//! undecodable is dropped on the floor.

use crate::device::TelemetrySink;
use crate::error::SwarmError;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use swarmlink_shared::TelemetryFrame;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Receive-only status channel for the whole swarm
pub struct TelemetryListener {
    local: SocketAddr,
    task: JoinHandle<()>,
}

impl TelemetryListener {
    /// Bind the status port and start routing datagrams into the sinks
    pub(crate) async fn spawn(
        bind: SocketAddr,
        sinks: HashMap<IpAddr, TelemetrySink>,
    ) -> Result<Self, SwarmError> {
        let socket = UdpSocket::bind(bind).await?;
        let local = socket.local_addr()?;
        info!("telemetry listener on {}", local);

        let task = tokio::spawn(listen_loop(socket, sinks));

        Ok(Self { local, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Stop listening. Telemetry is advisory; there is nothing to flush.
    pub(crate) fn stop(&self) {
        self.task.abort();
    }
}

async fn listen_loop(socket: UdpSocket, sinks: HashMap<IpAddr, TelemetrySink>) {
    let mut buf = [0u8; 2048];

    loop {
        let (n, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                debug!("status socket read error: {}", e);
                continue;
            }
        };

        let Some(frame) = TelemetryFrame::parse(&buf[..n]) else {
            continue;
        };

        match sinks.get(&peer.ip()) {
            Some(sink) => sink.write().await.apply(frame),
            None => debug!("status from unknown source {}", peer),
        }
    }
}
