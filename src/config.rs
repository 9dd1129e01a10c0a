// src/config.rs

//! Dispatcher configuration: defaults, deserialization, and validation.
//!
//! All intervals are logical ticks (milliseconds under the production
//! clock). The clock itself is not configuration; it is passed to the
//! dispatcher at construction time so tests can substitute a manual one.

use crate::core::clock::Tick;
use crate::core::errors::NetError;
use serde::{Deserialize, Serialize};

/// Configuration for one dispatcher instance.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DispatcherConfig {
    /// Ticks of inactivity after which a heartbeat is scheduled for a
    /// connection. `0` disables heartbeats.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: Tick,
    /// Ticks without real read activity after which a connection is evicted.
    /// Heartbeat traffic does not count as activity. `0` disables eviction.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: Tick,
    /// Maximum connections owned by this dispatcher; registrations beyond it
    /// fail recoverably.
    #[serde(default = "default_connection_limit")]
    pub connection_limit: usize,
    /// Capacity of the readiness event buffer for one poll pass.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Initial capacity of each connection's receive buffer, in bytes.
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            idle_timeout: default_idle_timeout(),
            connection_limit: default_connection_limit(),
            event_capacity: default_event_capacity(),
            recv_buffer_size: default_recv_buffer_size(),
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<(), NetError> {
        if self.connection_limit == 0 {
            return Err(NetError::InvalidConfig(
                "connection_limit must be greater than zero".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(NetError::InvalidConfig(
                "event_capacity must be greater than zero".into(),
            ));
        }
        if self.recv_buffer_size == 0 {
            return Err(NetError::InvalidConfig(
                "recv_buffer_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_heartbeat_interval() -> Tick {
    30_000 // 30 seconds under the production clock
}
fn default_idle_timeout() -> Tick {
    300_000 // 5 minutes
}
fn default_connection_limit() -> usize {
    10_000
}
fn default_event_capacity() -> usize {
    1024
}
fn default_recv_buffer_size() -> usize {
    16 * 1024
}
