//! Per-device datagram transport
//!
//! One `CommandLink` per device: a dedicated UDP socket connected to the
//! device's command endpoint, and a link loop that serialises
//! send-then-acknowledge exchanges. Because the loop handles one exchange
//! at a time and each exchange resolves through a consumed-once channel, a
//! reply can never be attributed to the wrong command and no command can
//! resolve twice.

pub mod telemetry;

use crate::error::SwarmError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use swarmlink_shared::{codec, AckOutcome, CommandKind};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};

const MAX_DATAGRAM: usize = 1024;

pub(crate) struct Exchange {
    wire: String,
    kind: CommandKind,
    window: Duration,
    reply: oneshot::Sender<Result<AckOutcome, SwarmError>>,
}

/// Bidirectional command/acknowledgment channel to one device
pub struct CommandLink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    tx: mpsc::Sender<Exchange>,
}

impl CommandLink {
    /// Open a link to the device's command endpoint
    pub(crate) async fn connect(peer: SocketAddr) -> Result<Self, SwarmError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.connect(peer).await?;
        let socket = Arc::new(socket);

        let (tx, rx) = mpsc::channel::<Exchange>(1);
        tokio::spawn(link_loop(socket.clone(), peer, rx));

        Ok(Self { socket, peer, tx })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send one command and wait for its acknowledgment, the window to
    /// lapse, or a device-reported error. Resolves exactly once.
    pub(crate) async fn exchange(
        &self,
        wire: String,
        kind: CommandKind,
        window: Duration,
    ) -> Result<AckOutcome, SwarmError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Exchange {
                wire,
                kind,
                window,
                reply,
            })
            .await
            .map_err(|_| SwarmError::LinkClosed)?;
        rx.await.map_err(|_| SwarmError::LinkClosed)?
    }

    /// Best-effort raw send, bypassing the exchange discipline. Failsafe
    /// path only; nobody waits for a reply.
    pub(crate) async fn fire(&self, wire: &str) {
        if let Err(e) = self.socket.send(wire.as_bytes()).await {
            warn!("[{}] failsafe send {:?} failed: {}", self.peer, wire, e);
        }
    }
}

async fn link_loop(socket: Arc<UdpSocket>, peer: SocketAddr, mut rx: mpsc::Receiver<Exchange>) {
    let mut buf = [0u8; MAX_DATAGRAM];

    while let Some(exchange) = rx.recv().await {
        // A reply that arrived after its command timed out must not be
        // mistaken for the next command's acknowledgment.
        while socket.try_recv(&mut buf).is_ok() {}

        if let Err(e) = socket.send(exchange.wire.as_bytes()).await {
            let _ = exchange.reply.send(Err(e.into()));
            continue;
        }
        debug!("[{}] sent: {}", peer, exchange.wire);

        let outcome = match timeout(exchange.window, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                debug!("[{}] received: {}", peer, String::from_utf8_lossy(&buf[..n]).trim());
                codec::decode_ack(exchange.kind, &buf[..n]).map_err(SwarmError::from)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(
                    "[{}] no acknowledgment for {:?} within {:?}",
                    peer, exchange.wire, exchange.window
                );
                Err(SwarmError::Timeout(exchange.window))
            }
        };

        let _ = exchange.reply.send(outcome);
    }
}
