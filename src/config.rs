//! Engine configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use swarmlink_shared::{policy, CommandKind};

/// Ack-wait windows per command class.
///
/// Movement commands acknowledge only once the manoeuvre finishes, so the
/// Control window is much wider than Set/Read. All three are policy, not
/// protocol: tune them per deployment.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    pub control: Duration,
    pub set: Duration,
    pub read: Duration,
}

impl TimeoutPolicy {
    pub fn for_kind(&self, kind: CommandKind) -> Duration {
        match kind {
            CommandKind::Control => self.control,
            CommandKind::Set => self.set,
            CommandKind::Read => self.read,
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            control: policy::CONTROL_TIMEOUT,
            set: policy::SET_TIMEOUT,
            read: policy::READ_TIMEOUT,
        }
    }
}

/// Where and how to look for devices
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Explicit device command endpoints. When non-empty, no sweep happens.
    pub addresses: Vec<SocketAddr>,
    /// /24 network base to sweep, e.g. 192.168.10.0
    pub network: Option<Ipv4Addr>,
    /// First host octet of the sweep range
    pub first_host: u8,
    /// Last host octet of the sweep range
    pub last_host: u8,
    /// How long to listen for responders after each probe sweep
    pub sweep_window: Duration,
    /// Overall deadline for finding the whole swarm
    pub deadline: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            network: None,
            first_host: 1,
            last_host: 254,
            sweep_window: policy::SWEEP_WINDOW,
            deadline: policy::DISCOVERY_DEADLINE,
        }
    }
}

/// Configuration for one swarm
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Device serial numbers, in the order we want to number them (1, 2, ...)
    pub serials: Vec<String>,
    /// Device command port
    pub control_port: u16,
    /// Local port the devices stream status datagrams to
    pub telemetry_port: u16,
    /// Listen for and record status datagrams
    pub telemetry: bool,
    pub timeouts: TimeoutPolicy,
    pub discovery: DiscoveryConfig,
    /// Grace given to in-flight work during shutdown
    pub shutdown_grace: Duration,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            serials: Vec::new(),
            control_port: policy::CONTROL_PORT,
            telemetry_port: policy::TELEMETRY_PORT,
            telemetry: false,
            timeouts: TimeoutPolicy::default(),
            discovery: DiscoveryConfig::default(),
            shutdown_grace: policy::SHUTDOWN_GRACE,
        }
    }
}
