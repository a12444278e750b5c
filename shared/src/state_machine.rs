//! Link and context state machines
//!
//! Defines the valid lifecycle transitions for a device's command link and
//! for an independent execution context.

use std::fmt;

/// Connection state of a device's command link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No contact yet
    Disconnected,
    /// Probed, serial being resolved
    Connecting,
    /// Accepting commands
    Ready,
    /// Removed from service; commands are refused
    Faulted,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Ready => "ready",
            LinkState::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// Check if a link transition is valid
pub fn link_transition_valid(from: LinkState, to: LinkState) -> bool {
    use LinkState::*;

    match (from, to) {
        // Same state is always valid
        (a, b) if a == b => true,

        // Faulting can happen from anywhere
        (_, Faulted) => true,

        (Disconnected, Connecting) => true,
        (Connecting, Ready) => true,
        (Connecting, Disconnected) => true, // Probe abandoned
        (Ready, Disconnected) => true,      // Orderly close

        _ => false,
    }
}

/// Lifecycle of an independent execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Spawned, control loop not yet entered
    Created,
    /// Caller behaviour executing
    Running,
    /// Behaviour returned normally
    Completed,
    /// Teardown observed at a submission checkpoint
    Cancelled,
    /// Behaviour failed, or its device was removed from service
    Faulted,
}

impl ContextState {
    /// Terminal states never transition again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ContextState::Completed | ContextState::Cancelled | ContextState::Faulted
        )
    }
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContextState::Created => "created",
            ContextState::Running => "running",
            ContextState::Completed => "completed",
            ContextState::Cancelled => "cancelled",
            ContextState::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// Check if a context transition is valid
pub fn context_transition_valid(from: ContextState, to: ContextState) -> bool {
    use ContextState::*;

    match (from, to) {
        (a, b) if a == b => true,
        (Created, Running) => true,
        (Running, Completed | Cancelled | Faulted) => true,
        // A context cancelled before its loop started never runs
        (Created, Cancelled) => true,
        _ => false,
    }
}
