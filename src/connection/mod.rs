// src/connection/mod.rs

//! Per-connection state: the resource-owning channel, the context contract
//! protocol layers implement, and yield events for suspended requests.

mod channel;
mod context;
mod yield_event;

pub use channel::{Channel, DisconnectReason};
pub use context::{IOContext, IOContextFactory};
pub use yield_event::{YieldEvent, YieldEventFactory};
