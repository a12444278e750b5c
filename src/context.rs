//! Independent execution contexts
//!
//! One control loop per device running caller-supplied behaviour against
//! that device's own queue, never blocked by - and never blocking - any
//! other device. Cancellation is cooperative: it is observed before each
//! command submission, so an in-flight command is never aborted mid-air.

use crate::device::{CommandReply, DeviceHandle, TelemetrySnapshot};
use crate::error::SwarmError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swarmlink_shared::{Command, ContextState};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Caller-facing view of one device inside an independent context
pub struct DeviceContext {
    device: DeviceHandle,
    cancel: Arc<AtomicBool>,
    root_cancel: Arc<AtomicBool>,
}

impl DeviceContext {
    pub fn num(&self) -> u8 {
        self.device.num()
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// True once the scope or the whole swarm is tearing down
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst) || self.root_cancel.load(Ordering::SeqCst)
    }

    /// Submit through this device's own queue.
    ///
    /// Cancellation is checked here, before the command is admitted -
    /// never mid-command. A `Device` error does not end the context;
    /// behaviour code decides whether to substitute another command.
    pub async fn submit(&self, command: Command) -> Result<CommandReply, SwarmError> {
        if self.is_cancelled() {
            return Err(SwarmError::Cancelled);
        }
        self.device.submit(command).await
    }

    pub async fn telemetry(&self) -> TelemetrySnapshot {
        self.device.telemetry().await
    }
}

struct ContextEntry {
    num: u8,
    state: Arc<RwLock<ContextState>>,
    task: JoinHandle<Result<(), SwarmError>>,
}

/// Final state and result of one context after join
#[derive(Debug)]
pub struct ContextOutcome {
    pub num: u8,
    pub state: ContextState,
    pub result: Result<(), SwarmError>,
}

/// Scope owning a set of per-device behaviour tasks.
///
/// Behaviours started here run concurrently and independently; the scope
/// re-synchronizes the flight when it is joined.
pub struct IndividualScope {
    devices: Vec<DeviceHandle>,
    cancel: Arc<AtomicBool>,
    root_cancel: Arc<AtomicBool>,
    entries: Vec<ContextEntry>,
}

impl IndividualScope {
    pub(crate) fn new(devices: Vec<DeviceHandle>, root_cancel: Arc<AtomicBool>) -> Self {
        Self {
            devices,
            cancel: Arc::new(AtomicBool::new(false)),
            root_cancel,
            entries: Vec::new(),
        }
    }

    /// Start `behaviour` for device `num` on its own control loop
    pub fn run<F, Fut>(&mut self, num: u8, behaviour: F) -> Result<(), SwarmError>
    where
        F: FnOnce(DeviceContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), SwarmError>> + Send + 'static,
    {
        let device = self
            .devices
            .iter()
            .find(|device| device.num() == num)
            .cloned()
            .ok_or(SwarmError::UnknownDevice(num))?;

        let state = Arc::new(RwLock::new(ContextState::Created));
        let context = DeviceContext {
            device,
            cancel: self.cancel.clone(),
            root_cancel: self.root_cancel.clone(),
        };

        let state_in_task = state.clone();
        let task = tokio::spawn(async move {
            *state_in_task.write().await = ContextState::Running;
            debug!("context {} running", num);

            let result = behaviour(context).await;

            let end = match &result {
                Ok(()) => ContextState::Completed,
                Err(SwarmError::Cancelled) => ContextState::Cancelled,
                Err(_) => ContextState::Faulted,
            };
            *state_in_task.write().await = end;
            debug!("context {} {}", num, end);
            result
        });

        self.entries.push(ContextEntry { num, state, task });
        Ok(())
    }

    /// Raise the cancel flag. Running behaviours observe it at their next
    /// submission checkpoint; whatever is in flight still resolves.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Current state of one context, if it was started in this scope
    pub async fn state_of(&self, num: u8) -> Option<ContextState> {
        for entry in &self.entries {
            if entry.num == num {
                return Some(*entry.state.read().await);
            }
        }
        None
    }

    /// Wait for every behaviour to finish
    pub async fn join(self) -> Vec<ContextOutcome> {
        self.finish(None).await
    }

    /// Cancel, then wait up to `grace` for behaviours to unwind; anything
    /// still running after that is aborted.
    pub async fn cancel_and_join(self, grace: Duration) -> Vec<ContextOutcome> {
        self.cancel();
        self.finish(Some(Instant::now() + grace)).await
    }

    async fn finish(self, deadline: Option<Instant>) -> Vec<ContextOutcome> {
        let mut outcomes = Vec::with_capacity(self.entries.len());

        for mut entry in self.entries {
            let joined = match deadline {
                Some(deadline) => match timeout_at(deadline, &mut entry.task).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!("context {} exceeded shutdown grace, aborting", entry.num);
                        entry.task.abort();
                        let mut state = entry.state.write().await;
                        if !state.is_terminal() {
                            *state = ContextState::Cancelled;
                        }
                        let final_state = *state;
                        drop(state);
                        outcomes.push(ContextOutcome {
                            num: entry.num,
                            state: final_state,
                            result: Err(SwarmError::Cancelled),
                        });
                        continue;
                    }
                },
                None => (&mut entry.task).await,
            };

            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(SwarmError::Context(e.to_string())),
            };

            // A panicked task never reached its own state update
            let mut state = entry.state.write().await;
            if !state.is_terminal() {
                *state = ContextState::Faulted;
            }
            let final_state = *state;
            drop(state);

            outcomes.push(ContextOutcome {
                num: entry.num,
                state: final_state,
                result,
            });
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SwarmConfig;
    use crate::swarm::Swarm;
    use crate::test_support::{ready_device, test_timeouts, FakeDrone, Reply};
    use std::time::Instant as StdInstant;
    use swarmlink_shared::command;

    async fn swarm_of(fakes: &[&FakeDrone]) -> Swarm {
        let mut devices = Vec::new();
        for (index, fake) in fakes.iter().enumerate() {
            devices.push(ready_device(index as u8 + 1, fake.addr).await);
        }
        let config = SwarmConfig {
            timeouts: test_timeouts(),
            ..Default::default()
        };
        Swarm::assemble(devices, config)
    }

    #[tokio::test]
    async fn test_contexts_run_independently() {
        let slow = FakeDrone::spawn(vec![Reply::DelayedOk(Duration::from_millis(200))]).await;
        let fast = FakeDrone::spawn(vec![Reply::Ok]).await;
        let swarm = swarm_of(&[&slow, &fast]).await;

        let mut scope = swarm.individual_behaviours();
        let fast_done = Arc::new(RwLock::new(None::<StdInstant>));
        let fast_done_in_task = fast_done.clone();

        scope
            .run(1, |ctx| async move {
                ctx.submit(command::takeoff()).await?;
                Ok(())
            })
            .expect("start slow context");
        scope
            .run(2, move |ctx| async move {
                ctx.submit(command::takeoff()).await?;
                *fast_done_in_task.write().await = Some(StdInstant::now());
                Ok(())
            })
            .expect("start fast context");

        let started = StdInstant::now();
        let outcomes = scope.join().await;
        assert!(outcomes.iter().all(|o| o.state == ContextState::Completed));

        // the fast device finished long before the slow one's ack arrived
        let fast_at = fast_done.read().await.expect("fast context ran");
        assert!(fast_at.duration_since(started) < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_cancel_blocks_next_submit_not_inflight() {
        let drone = FakeDrone::spawn(vec![Reply::DelayedOk(Duration::from_millis(150))]).await;
        let swarm = swarm_of(&[&drone]).await;

        let mut scope = swarm.individual_behaviours();
        scope
            .run(1, |ctx| async move {
                // in flight when the cancel arrives; must still resolve ok
                ctx.submit(command::takeoff()).await?;
                // the checkpoint: refused without touching the wire
                ctx.submit(command::land()).await?;
                Ok(())
            })
            .expect("start context");

        tokio::time::sleep(Duration::from_millis(50)).await;
        scope.cancel();

        let outcomes = scope.join().await;
        assert_eq!(outcomes[0].state, ContextState::Cancelled);
        assert!(matches!(outcomes[0].result, Err(SwarmError::Cancelled)));

        // only the first command ever reached the wire
        assert_eq!(drone.receive_count(), 1);
        let record = swarm.device(1).unwrap().state().await.last_command.unwrap();
        assert_eq!(record.wire, "takeoff");
        assert!(matches!(
            record.state,
            crate::device::CommandState::Acknowledged { .. }
        ));
    }

    #[tokio::test]
    async fn test_device_error_leaves_context_running() {
        let drone = FakeDrone::spawn(vec![
            Reply::Text("error curve radius invalid"),
            Reply::Ok,
        ])
        .await;
        let swarm = swarm_of(&[&drone]).await;

        let mut scope = swarm.individual_behaviours();
        scope
            .run(1, |ctx| async move {
                match ctx.submit(command::curve(50, 50, 0, 100, 0, 0, 30)?).await {
                    Ok(_) => {}
                    Err(SwarmError::Device(_)) => {
                        // substitute a straight move for the refused curve
                        ctx.submit(command::go(100, 100, 0, 30)?).await?;
                    }
                    Err(e) => return Err(e),
                }
                Ok(())
            })
            .expect("start context");

        let outcomes = scope.join().await;
        assert_eq!(outcomes[0].state, ContextState::Completed);
        assert!(outcomes[0].result.is_ok());
    }

    #[tokio::test]
    async fn test_faulted_device_faults_context() {
        let drone = FakeDrone::spawn(vec![Reply::Silent]).await;
        let swarm = swarm_of(&[&drone]).await;

        let device = swarm.device(1).unwrap().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            device.mark_faulted("propeller strike").await;
        });

        let mut scope = swarm.individual_behaviours();
        scope
            .run(1, |ctx| async move {
                ctx.submit(command::takeoff()).await?;
                Ok(())
            })
            .expect("start context");

        let outcomes = scope.join().await;
        assert_eq!(outcomes[0].state, ContextState::Faulted);
        assert!(matches!(outcomes[0].result, Err(SwarmError::DeviceFaulted)));
    }

    #[tokio::test]
    async fn test_cancel_and_join_aborts_stragglers() {
        let drone = FakeDrone::spawn(vec![]).await;
        let swarm = swarm_of(&[&drone]).await;

        let mut scope = swarm.individual_behaviours();
        scope
            .run(1, |_ctx| async move {
                // ignores every checkpoint and sleeps far past the grace
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .expect("start context");

        let started = StdInstant::now();
        let outcomes = scope.cancel_and_join(Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(outcomes[0].state, ContextState::Cancelled);
    }

    #[tokio::test]
    async fn test_unknown_device_refused_at_start() {
        let drone = FakeDrone::spawn(vec![]).await;
        let swarm = swarm_of(&[&drone]).await;

        let mut scope = swarm.individual_behaviours();
        let err = scope
            .run(7, |_ctx| async move { Ok(()) })
            .expect_err("no such device");
        assert!(matches!(err, SwarmError::UnknownDevice(7)));
    }
}
