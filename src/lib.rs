//! swarmlink - command dispatch and synchronization engine for small
//! drone swarms.
//!
//! Each device accepts one text command at a time over an unreliable
//! datagram transport and reports acknowledgments and periodic status on
//! separate channels. The engine owns one communication channel per
//! device, enforces at-most-one-outstanding-command per device, and
//! provides the three execution modes everything else is built from:
//!
//! - broadcast to the whole group and proceed once everyone has converged
//!   ([`Swarm::broadcast`], [`Swarm::wait_sync`]),
//! - differing per-device commands executed in lockstep
//!   ([`Swarm::sync_these`]),
//! - fully independent long-lived behaviours per device
//!   ([`Swarm::individual_behaviours`]).
//!
//! [`Flight`] layers the per-command flight vocabulary on top.

pub mod config;
pub mod context;
pub mod device;
mod discovery;
pub mod error;
pub mod flight;
pub mod swarm;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::{DiscoveryConfig, SwarmConfig, TimeoutPolicy};
pub use context::{ContextOutcome, DeviceContext, IndividualScope};
pub use device::{
    CommandRecord, CommandReply, CommandState, DeviceHandle, DeviceSnapshot, TelemetrySnapshot,
};
pub use error::SwarmError;
pub use flight::{Flight, Target};
pub use swarm::{Swarm, SyncBlock, SyncOutcome};

pub use swarmlink_shared as shared;
