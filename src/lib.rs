// src/lib.rs

pub mod config;
pub mod connection;
pub mod core;
pub mod dispatcher;
pub mod net;

// Re-export
pub use crate::config::DispatcherConfig;
pub use crate::connection::{
    Channel, DisconnectReason, IOContext, IOContextFactory, YieldEvent, YieldEventFactory,
};
pub use crate::core::{Clock, ManualClock, NetError, SystemClock, Tick};
pub use crate::dispatcher::{
    DispatcherHandle, IODispatcher, IOOperation, IORequestProcessor,
};
pub use crate::net::{Poller, SimNet, SimPeer, Socket};
