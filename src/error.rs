//! Engine error taxonomy
//!
//! `NotReady`, `Busy`, `Timeout` and `Device` are returned to the immediate
//! caller for local handling. `DeviceFaulted` propagates further: it aborts
//! any enclosing synchronized block and terminates any enclosing
//! independent context.

use std::time::Duration;
use swarmlink_shared::{CodecError, CommandError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwarmError {
    /// Device link is not in the Ready state
    #[error("device not ready")]
    NotReady,

    /// A command is already pending on this device. Callers serialize
    /// explicitly; nothing is buffered.
    #[error("command already pending")]
    Busy,

    /// No acknowledgment inside the policy window
    #[error("no acknowledgment within {0:?}")]
    Timeout(Duration),

    /// Device-reported failure, e.g. an invalid parameter
    #[error("device error: {0}")]
    Device(String),

    /// Device removed from service
    #[error("device faulted")]
    DeviceFaulted,

    /// The device's flight was marked complete; it accepts no more commands
    #[error("flight already marked complete")]
    FlightComplete,

    /// An independent context observed teardown at a submission checkpoint
    #[error("context cancelled")]
    Cancelled,

    /// The command link's loop is gone
    #[error("command link closed")]
    LinkClosed,

    #[error("no device numbered {0}")]
    UnknownDevice(u8),

    #[error("discovery failed: {0}")]
    Discovery(String),

    /// A context task died without returning, e.g. a panic in behaviour code
    #[error("context failed: {0}")]
    Context(String),

    #[error(transparent)]
    InvalidCommand(#[from] CommandError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
