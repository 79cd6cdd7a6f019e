//! The listener bus is an external collaborator (spec §6): the core only needs `onEvent`/
//! `shutdown`. `ChannelEventSink` is the default implementation apps reach for, wrapping a
//! `tokio::sync::mpsc::Sender`, mirroring how `libtiny_client::Client` hands events back to its
//! caller over a channel.

use tokio::sync::mpsc;

use crate::events::Event;

/// Delivery semantics are the bus's to decide: dispatch on the read thread synchronously (the
/// default here), or hand off to worker threads. Handlers must not block indefinitely — doing so
/// stalls ingest of further server lines.
pub trait EventSink: Send {
    fn on_event(&mut self, event: Event);

    /// Called once, from outside the connection engine's state mutex, when the owning connection
    /// shuts down.
    fn shutdown(&mut self) {}
}

/// Forwards every event over an mpsc channel. Never blocks: if the receiver is gone or full
/// (callers are expected to size the channel generously, as `libtiny_client` does), the event is
/// dropped rather than stalling the read loop.
pub struct ChannelEventSink {
    sender: mpsc::Sender<Event>,
}

impl ChannelEventSink {
    pub fn new(sender: mpsc::Sender<Event>) -> ChannelEventSink {
        ChannelEventSink { sender }
    }
}

impl EventSink for ChannelEventSink {
    fn on_event(&mut self, event: Event) {
        if let Err(err) = self.sender.try_send(event) {
            debug!("event dropped, receiver lagging or closed: {:?}", err);
        }
    }
}
