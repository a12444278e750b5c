//! Swarm coordinator
//!
//! Owns one handle per device and provides the synchronization primitives
//! everything else is built on: the group barrier (`wait_sync`), the staged
//! divergent-command block (`sync_these`), broadcast as its degenerate
//! case, and teardown with failsafe landing.

use crate::config::SwarmConfig;
use crate::context::IndividualScope;
use crate::device::{CommandReply, DeviceHandle};
use crate::discovery;
use crate::error::SwarmError;
use crate::transport::telemetry::TelemetryListener;
use futures::future::join_all;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use swarmlink_shared::{command, Command};
use tokio::time::timeout;
use tracing::{info, warn};

/// The command dispatch and synchronization engine: one handle per device,
/// one communication channel each, and the barrier bookkeeping.
pub struct Swarm {
    devices: Vec<DeviceHandle>,
    telemetry: Option<TelemetryListener>,
    config: SwarmConfig,
    /// Teardown flag observed by every independent context
    cancel_root: Arc<AtomicBool>,
}

impl Swarm {
    /// Find every configured device on the network, enroll it, and bring
    /// it to Ready.
    pub async fn connect(config: SwarmConfig) -> Result<Self, SwarmError> {
        let found = discovery::discover(&config).await?;
        let mut devices = discovery::enroll(&config, found).await?;
        devices.sort_by_key(DeviceHandle::num);

        let telemetry = if config.telemetry {
            let sinks: HashMap<IpAddr, _> = devices
                .iter()
                .map(|device| (device.addr().ip(), device.telemetry_sink()))
                .collect();
            let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.telemetry_port));
            Some(TelemetryListener::spawn(bind, sinks).await?)
        } else {
            None
        };

        for device in &devices {
            device.mark_ready();
        }

        let swarm = Self {
            devices,
            telemetry,
            config,
            cancel_root: Arc::new(AtomicBool::new(false)),
        };
        swarm.report_battery().await;
        Ok(swarm)
    }

    /// Assemble a swarm from already-enrolled devices. Used by tests and
    /// by tools that manage discovery themselves.
    pub(crate) fn assemble(devices: Vec<DeviceHandle>, config: SwarmConfig) -> Self {
        Self {
            devices,
            telemetry: None,
            config,
            cancel_root: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn devices(&self) -> &[DeviceHandle] {
        &self.devices
    }

    pub fn device(&self, num: u8) -> Result<&DeviceHandle, SwarmError> {
        self.devices
            .iter()
            .find(|device| device.num() == num)
            .ok_or(SwarmError::UnknownDevice(num))
    }

    /// Submit one command to one device and wait for it to resolve
    pub async fn submit(&self, num: u8, command: Command) -> Result<CommandReply, SwarmError> {
        self.device(num)?.submit(command).await
    }

    /// Group barrier: resolve once every device has finished its current
    /// command and received its response.
    pub async fn wait_sync(&self) {
        join_all(self.devices.iter().map(DeviceHandle::wait_idle)).await;
    }

    /// Open a staged block: one differing command per device, released
    /// together once every participant is ready.
    pub fn sync_these(&self) -> SyncBlock<'_> {
        SyncBlock {
            swarm: self,
            staged: Vec::new(),
        }
    }

    /// Send one command to every device still flying, released together
    /// and awaited together.
    pub async fn broadcast(&self, command: Command) -> Result<Vec<SyncOutcome>, SwarmError> {
        let mut block = self.sync_these();
        for device in &self.devices {
            if device.is_flight_complete() {
                continue;
            }
            block = block.stage(device.num(), command.clone());
        }
        block.run().await
    }

    /// Open a scope for per-device behaviours on their own control loops
    pub fn individual_behaviours(&self) -> IndividualScope {
        IndividualScope::new(self.devices.clone(), self.cancel_root.clone())
    }

    async fn report_battery(&self) {
        for device in &self.devices {
            match device.submit(command::read_battery()).await {
                Ok(reply) => info!(
                    "device {} battery: {}%",
                    device.num(),
                    reply.response.as_deref().unwrap_or("?")
                ),
                Err(e) => warn!("device {} battery query failed: {}", device.num(), e),
            }
        }
    }

    /// Tear the swarm down: raise the cancel flag for every independent
    /// context, give in-flight work a bounded grace to finish, then land
    /// everything best-effort before the channels close.
    pub async fn shutdown(self) {
        info!("swarm shutting down");
        self.cancel_root.store(true, Ordering::SeqCst);

        if timeout(self.config.shutdown_grace, self.wait_sync())
            .await
            .is_err()
        {
            warn!(
                "devices still busy after {:?} grace, landing anyway",
                self.config.shutdown_grace
            );
        }

        join_all(self.devices.iter().map(DeviceHandle::failsafe_land)).await;

        if let Some(listener) = &self.telemetry {
            listener.stop();
        }
    }
}

/// Per-participant result of a synchronized block
#[derive(Debug)]
pub struct SyncOutcome {
    pub num: u8,
    pub result: Result<CommandReply, SwarmError>,
}

/// Staged set of per-device commands, released together.
///
/// Nothing touches the wire while commands are staged. `run` first waits
/// for every participant to finish whatever it was doing, then releases
/// all sends as close to simultaneously as the transport allows, and
/// returns only once every participant has resolved - the block is never
/// released by a partial result.
#[must_use = "staged commands are not sent until run() is awaited"]
pub struct SyncBlock<'a> {
    swarm: &'a Swarm,
    staged: Vec<(u8, Command)>,
}

impl SyncBlock<'_> {
    /// Stage one command for one device. No wire send happens here.
    pub fn stage(mut self, num: u8, command: Command) -> Self {
        self.staged.push((num, command));
        self
    }

    /// Release every staged command at once and wait for all of them.
    ///
    /// Per-participant outcomes are returned after the slowest one
    /// resolves. A participant that faulted aborts the block as a whole
    /// with `DeviceFaulted`, since the group can no longer move together.
    pub async fn run(self) -> Result<Vec<SyncOutcome>, SwarmError> {
        let mut participants = Vec::with_capacity(self.staged.len());
        for (num, command) in self.staged {
            participants.push((self.swarm.device(num)?.clone(), command));
        }

        // Converge before any send is released
        join_all(
            participants
                .iter()
                .map(|(device, _)| device.wait_idle()),
        )
        .await;

        let outcomes = join_all(participants.into_iter().map(|(device, command)| async move {
            let num = device.num();
            let result = device.submit(command).await;
            SyncOutcome { num, result }
        }))
        .await;

        if outcomes
            .iter()
            .any(|outcome| matches!(outcome.result, Err(SwarmError::DeviceFaulted)))
        {
            return Err(SwarmError::DeviceFaulted);
        }

        Ok(outcomes)
    }
}
