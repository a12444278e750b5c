//! Device handle
//!
//! Per-device identity, connection state, the pending-command slot, the
//! last command record, and the telemetry snapshot. The slot is the
//! engine's core guarantee: at most one command per device is ever in
//! flight, and a second `submit` is refused with `Busy` instead of being
//! buffered - callers serialize explicitly.

use crate::config::TimeoutPolicy;
use crate::error::SwarmError;
use crate::transport::CommandLink;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use swarmlink_shared::state_machine::link_transition_valid;
use swarmlink_shared::{policy, AckOutcome, Command, LinkState, TelemetryFrame};
use tokio::sync::{watch, RwLock, Semaphore};
use tracing::{debug, info, warn};

/// Most recent status fields reported by a device. Single writer (the
/// telemetry listener), any number of readers; most-recent-wins per field.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    fields: HashMap<String, String>,
    updated_at: Option<Instant>,
}

impl TelemetrySnapshot {
    pub(crate) fn apply(&mut self, frame: TelemetryFrame) {
        for (key, value) in frame.fields {
            self.fields.insert(key, value);
        }
        self.updated_at = Some(Instant::now());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    fn number(&self, key: &str) -> Option<i32> {
        self.get(key)?.parse().ok()
    }

    /// Battery percentage (`bat`)
    pub fn battery(&self) -> Option<i32> {
        self.number("bat")
    }

    /// Height above the takeoff point in cm (`h`)
    pub fn height(&self) -> Option<i32> {
        self.number("h")
    }

    /// Time-of-flight sensor distance in cm (`tof`)
    pub fn tof(&self) -> Option<i32> {
        self.number("tof")
    }

    /// Mission pad currently in view (`mid`), -1 when none
    pub fn pad(&self) -> Option<i32> {
        self.number("mid")
    }

    pub fn updated_at(&self) -> Option<Instant> {
        self.updated_at
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

pub(crate) type TelemetrySink = Arc<RwLock<TelemetrySnapshot>>;

/// Completion state of a device's current or last command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandState {
    Pending,
    Acknowledged { response: Option<String> },
    TimedOut,
    Failed { reason: String },
}

/// One submitted command, tracked on its device from admission to resolution
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub wire: String,
    pub submitted_at: Instant,
    pub state: CommandState,
}

/// Successful resolution of a submitted command
#[derive(Debug, Clone)]
pub struct CommandReply {
    /// Value text for Read commands, `None` for a plain "ok"
    pub response: Option<String>,
    pub elapsed: Duration,
}

/// Point-in-time view of a device, safe to hold across awaits
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub num: u8,
    pub serial: String,
    pub addr: SocketAddr,
    pub link: LinkState,
    pub last_command: Option<CommandRecord>,
    pub fault_reason: Option<String>,
    pub flight_complete: bool,
}

/// Cloneable handle to one device
#[derive(Clone)]
pub struct DeviceHandle {
    inner: Arc<DeviceInner>,
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("num", &self.inner.num)
            .field("serial", &self.inner.serial)
            .finish()
    }
}

struct DeviceInner {
    num: u8,
    serial: String,
    link: CommandLink,
    state: watch::Sender<LinkState>,
    /// The pending-command slot: one permit, never more
    slot: Semaphore,
    last_command: RwLock<Option<CommandRecord>>,
    fault_reason: RwLock<Option<String>>,
    telemetry: TelemetrySink,
    flight_complete: AtomicBool,
    timeouts: TimeoutPolicy,
}

impl DeviceHandle {
    pub(crate) fn new(num: u8, serial: String, link: CommandLink, timeouts: TimeoutPolicy) -> Self {
        let (state, _) = watch::channel(LinkState::Connecting);
        Self {
            inner: Arc::new(DeviceInner {
                num,
                serial,
                link,
                state,
                slot: Semaphore::new(1),
                last_command: RwLock::new(None),
                fault_reason: RwLock::new(None),
                telemetry: Arc::new(RwLock::new(TelemetrySnapshot::default())),
                flight_complete: AtomicBool::new(false),
                timeouts,
            }),
        }
    }

    pub fn num(&self) -> u8 {
        self.inner.num
    }

    pub fn serial(&self) -> &str {
        &self.inner.serial
    }

    pub fn addr(&self) -> SocketAddr {
        self.inner.link.peer()
    }

    pub fn link_state(&self) -> LinkState {
        *self.inner.state.borrow()
    }

    pub(crate) fn telemetry_sink(&self) -> TelemetrySink {
        self.inner.telemetry.clone()
    }

    /// Clone of the device's current telemetry snapshot
    pub async fn telemetry(&self) -> TelemetrySnapshot {
        self.inner.telemetry.read().await.clone()
    }

    /// Point-in-time view of identity, link state, and last command
    pub async fn state(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            num: self.inner.num,
            serial: self.inner.serial.clone(),
            addr: self.addr(),
            link: self.link_state(),
            last_command: self.inner.last_command.read().await.clone(),
            fault_reason: self.inner.fault_reason.read().await.clone(),
            flight_complete: self.is_flight_complete(),
        }
    }

    /// Admit commands from now on
    pub fn mark_ready(&self) {
        self.set_state(LinkState::Ready);
        info!("device {} ready ({})", self.inner.num, self.addr());
    }

    /// Remove the device from service. Fails any command currently pending
    /// with `DeviceFaulted` and refuses everything after.
    pub async fn mark_faulted(&self, reason: &str) {
        *self.inner.fault_reason.write().await = Some(reason.to_string());
        self.set_state(LinkState::Faulted);
        warn!("device {} faulted: {}", self.inner.num, reason);
    }

    fn set_state(&self, to: LinkState) {
        let from = *self.inner.state.borrow();
        if !link_transition_valid(from, to) {
            warn!("device {}: invalid transition {} -> {}", self.inner.num, from, to);
            return;
        }
        self.inner.state.send_replace(to);
    }

    /// Stop admitting commands for good; the flight is over for this device
    pub fn complete_flight(&self) {
        self.inner.flight_complete.store(true, Ordering::SeqCst);
        info!("device {} flight complete", self.inner.num);
    }

    pub fn is_flight_complete(&self) -> bool {
        self.inner.flight_complete.load(Ordering::SeqCst)
    }

    /// Resolve once no command is pending on this device
    pub async fn wait_idle(&self) {
        if let Ok(_permit) = self.inner.slot.acquire().await {
            // permit dropped immediately; we only needed the slot to be free
        }
    }

    /// Submit one command and wait for it to resolve.
    ///
    /// Fails fast with `NotReady` before the link is up, `DeviceFaulted`
    /// after removal from service, `FlightComplete` once the flight is
    /// over, and `Busy` while another command holds the slot. Otherwise
    /// blocks until acknowledgment, timeout, or device error - whichever
    /// comes first, exactly once.
    pub async fn submit(&self, command: Command) -> Result<CommandReply, SwarmError> {
        if self.is_flight_complete() {
            return Err(SwarmError::FlightComplete);
        }
        match self.link_state() {
            LinkState::Ready => {}
            LinkState::Faulted => return Err(SwarmError::DeviceFaulted),
            _ => return Err(SwarmError::NotReady),
        }

        let permit = self
            .inner
            .slot
            .try_acquire()
            .map_err(|_| SwarmError::Busy)?;

        let submitted_at = Instant::now();
        *self.inner.last_command.write().await = Some(CommandRecord {
            wire: command.wire().to_string(),
            submitted_at,
            state: CommandState::Pending,
        });

        let window = self.inner.timeouts.for_kind(command.kind());
        let mut state_rx = self.inner.state.subscribe();

        let outcome = tokio::select! {
            res = self.inner.link.exchange(command.wire().to_string(), command.kind(), window) => res,
            _ = watch_faulted(&mut state_rx) => Err(SwarmError::DeviceFaulted),
        };

        let resolved = match outcome {
            Ok(AckOutcome::Ok) => Ok(CommandReply {
                response: None,
                elapsed: submitted_at.elapsed(),
            }),
            Ok(AckOutcome::Value(value)) => Ok(CommandReply {
                response: Some(value),
                elapsed: submitted_at.elapsed(),
            }),
            Ok(AckOutcome::Error(message)) => Err(SwarmError::Device(message)),
            Err(e) => Err(e),
        };

        self.record_resolution(&resolved).await;
        drop(permit);

        match &resolved {
            Ok(reply) => debug!(
                "device {} resolved {:?} in {:?}",
                self.inner.num,
                command.wire(),
                reply.elapsed
            ),
            Err(e) => debug!("device {} failed {:?}: {}", self.inner.num, command.wire(), e),
        }

        resolved
    }

    async fn record_resolution(&self, resolved: &Result<CommandReply, SwarmError>) {
        let state = match resolved {
            Ok(reply) => CommandState::Acknowledged {
                response: reply.response.clone(),
            },
            Err(SwarmError::Timeout(_)) => CommandState::TimedOut,
            Err(e) => CommandState::Failed {
                reason: e.to_string(),
            },
        };
        if let Some(record) = self.inner.last_command.write().await.as_mut() {
            record.state = state;
        }
    }

    /// Best-effort landing, bypassing the slot. Teardown path only.
    pub(crate) async fn failsafe_land(&self) {
        if matches!(self.link_state(), LinkState::Ready | LinkState::Faulted) {
            info!("device {}: failsafe land", self.inner.num);
            self.inner.link.fire(policy::FAILSAFE_LAND).await;
        }
    }
}

async fn watch_faulted(rx: &mut watch::Receiver<LinkState>) {
    loop {
        if *rx.borrow() == LinkState::Faulted {
            return;
        }
        if rx.changed().await.is_err() {
            // sender lives as long as the handle; pend forever if it's gone
            std::future::pending::<()>().await;
        }
    }
}
