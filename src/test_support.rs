//! Scripted fake devices for in-crate tests
//!
//! A `FakeDrone` binds a real UDP socket on localhost and answers each
//! incoming command datagram according to its script, so the engine is
//! exercised over the same socket path it uses against hardware.

use crate::config::TimeoutPolicy;
use crate::device::DeviceHandle;
use crate::transport::CommandLink;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How a fake answers one received command
#[derive(Debug, Clone, Copy)]
pub(crate) enum Reply {
    /// Immediate "ok"
    Ok,
    /// Immediate literal text (an error string, or a Read value)
    Text(&'static str),
    /// "ok" after a delay
    DelayedOk(Duration),
    /// Literal text after a delay
    DelayedText(Duration, &'static str),
    /// Never answer
    Silent,
}

pub(crate) struct FakeDrone {
    pub addr: SocketAddr,
    /// Every command datagram the fake received, in order
    pub received: mpsc::UnboundedReceiver<String>,
    received_count: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeDrone {
    /// Bind a localhost socket and answer per `script`; once the script is
    /// exhausted every further command gets a plain "ok".
    pub(crate) async fn spawn(script: Vec<Reply>) -> FakeDrone {
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind fake drone");
        let addr = socket.local_addr().expect("local addr");
        let (seen_tx, received) = mpsc::unbounded_channel();
        let received_count = Arc::new(AtomicUsize::new(0));
        let count = received_count.clone();

        let task = tokio::spawn(async move {
            let mut script = script.into_iter();
            let mut buf = [0u8; 1024];
            loop {
                let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                count.fetch_add(1, Ordering::SeqCst);
                let _ = seen_tx.send(String::from_utf8_lossy(&buf[..n]).to_string());

                match script.next().unwrap_or(Reply::Ok) {
                    Reply::Ok => {
                        let _ = socket.send_to(b"ok", peer).await;
                    }
                    Reply::Text(text) => {
                        let _ = socket.send_to(text.as_bytes(), peer).await;
                    }
                    Reply::DelayedOk(delay) => {
                        tokio::time::sleep(delay).await;
                        let _ = socket.send_to(b"ok", peer).await;
                    }
                    Reply::DelayedText(delay, text) => {
                        tokio::time::sleep(delay).await;
                        let _ = socket.send_to(text.as_bytes(), peer).await;
                    }
                    Reply::Silent => {}
                }
            }
        });

        FakeDrone {
            addr,
            received,
            received_count,
            task,
        }
    }

    /// Number of command datagrams received so far
    pub(crate) fn receive_count(&self) -> usize {
        self.received_count.load(Ordering::SeqCst)
    }
}

impl Drop for FakeDrone {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Timeout windows short enough for tests
pub(crate) fn test_timeouts() -> TimeoutPolicy {
    TimeoutPolicy {
        control: Duration::from_millis(500),
        set: Duration::from_millis(300),
        read: Duration::from_millis(300),
    }
}

/// Device handle left in the Connecting state
pub(crate) async fn connecting_device(num: u8, addr: SocketAddr) -> DeviceHandle {
    let link = CommandLink::connect(addr).await.expect("connect link");
    DeviceHandle::new(num, format!("TEST-SN-{num}"), link, test_timeouts())
}

/// Device handle marked Ready, as after enrollment
pub(crate) async fn ready_device(num: u8, addr: SocketAddr) -> DeviceHandle {
    let device = connecting_device(num, addr).await;
    device.mark_ready();
    device
}
