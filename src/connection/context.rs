// src/connection/context.rs

//! The contract between the dispatcher and protocol-specific connection
//! contexts.

use crate::connection::channel::Channel;
use crate::dispatcher::DispatcherHandle;

/// A per-connection context owned by one dispatcher.
///
/// Protocol layers embed a [`Channel`] (the resource-owning half) in their
/// own context type and expose it through this trait; the dispatcher drives
/// scheduling entirely through the channel. The back-reference to the
/// dispatcher is non-owning (the dispatcher outlives all of its contexts)
/// and is what the request processor uses to re-register the connection.
pub trait IOContext: Sized {
    fn channel(&self) -> &Channel;

    fn channel_mut(&mut self) -> &mut Channel;

    /// The owning dispatcher, for re-registration.
    fn dispatcher(&self) -> DispatcherHandle<Self>;
}

/// Builds a context for a newly accepted connection.
///
/// The factory receives the channel wrapping the accepted socket and a handle
/// to the owning dispatcher. Implemented for closures, so a dispatcher can be
/// created with `|channel, dispatcher| MyContext { channel, dispatcher }`.
pub trait IOContextFactory<C: IOContext> {
    fn new_instance(&mut self, channel: Channel, dispatcher: DispatcherHandle<C>) -> C;
}

impl<C, F> IOContextFactory<C> for F
where
    C: IOContext,
    F: FnMut(Channel, DispatcherHandle<C>) -> C,
{
    fn new_instance(&mut self, channel: Channel, dispatcher: DispatcherHandle<C>) -> C {
        self(channel, dispatcher)
    }
}
