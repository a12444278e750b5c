//! Swarmlink Shared Protocol Types
//!
//! This crate provides the command catalogue, wire codec, and state
//! machines shared between the swarm engine and its standalone tools.
//! The wire protocol is fixed by the device firmware: UTF-8 text commands
//! over UDP, `"ok"`-or-error acknowledgments, and semicolon-delimited
//! `key:value` status datagrams on a separate port.

pub mod codec;
pub mod command;
pub mod state_machine;

pub use codec::{decode_ack, AckOutcome, CodecError, TelemetryFrame};
pub use command::{Command, CommandError, CommandKind, FlipDirection, Pad, PadDirection};
pub use state_machine::{ContextState, LinkState};

/// Protocol policy: well-known ports and default timing windows.
pub mod policy {
    use std::time::Duration;

    /// Device command/acknowledgment port (fixed by firmware)
    pub const CONTROL_PORT: u16 = 8889;

    /// Controller-side status port (fixed by firmware)
    pub const TELEMETRY_PORT: u16 = 8890;

    /// Probe string that switches a device into command mode
    pub const PROBE: &str = "command";

    /// Failsafe landing command, sent raw on teardown
    pub const FAILSAFE_LAND: &str = "land";

    /// Ack window for Control commands - a movement can take several
    /// seconds to execute before the device acknowledges
    pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

    /// Ack window for Set commands
    pub const SET_TIMEOUT: Duration = Duration::from_secs(5);

    /// Ack window for Read commands
    pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

    /// Listen window after each discovery probe sweep
    pub const SWEEP_WINDOW: Duration = Duration::from_secs(5);

    /// Overall deadline for finding a whole swarm
    pub const DISCOVERY_DEADLINE: Duration = Duration::from_secs(60);

    /// Grace given to in-flight work during teardown
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
}
