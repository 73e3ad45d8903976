//! Events published by the signaling handler
//!
//! Status views and other observers subscribe to these instead of hooking
//! into plugins directly.

use crate::negotiation::AddressComparison;
use crate::types::{ConnectionState, PeerId, PluginErrorCode, PluginId};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Events emitted by the signaling handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerEvent {
    // Plugin lifecycle
    /// A plugin joined the managed set
    PluginAdded { plugin_id: PluginId },

    /// A plugin left the managed set
    PluginRemoved { plugin_id: PluginId },

    /// A plugin reached the connected state
    Connected { plugin_id: PluginId },

    /// A plugin dropped to the disconnected state
    Disconnected { plugin_id: PluginId },

    /// Any plugin state transition
    StateChanged {
        plugin_id: PluginId,
        state: ConnectionState,
    },

    /// A plugin's credentials were rejected; it will not be retried
    AuthError { plugin_id: PluginId, message: String },

    /// A plugin failed and a reconnect attempt was scheduled
    ReconnectScheduled {
        plugin_id: PluginId,
        code: PluginErrorCode,
        delay: Duration,
    },

    // Peers
    /// A peer came online on a plugin
    PeerOnline { plugin_id: PluginId, peer_id: PeerId },

    /// A peer went offline on a plugin
    PeerOffline { plugin_id: PluginId, peer_id: PeerId },

    /// A free-form message arrived
    MessageReceived {
        plugin_id: PluginId,
        from: PeerId,
        text: String,
    },

    /// This node asked the transport to connect to a peer
    ConnectionRequested {
        peer_id: PeerId,
        host: String,
        port: u16,
        comparison: AddressComparison,
    },

    /// This node offered a peer to connect to it
    OfferRegistered { peer_id: PeerId, key: String },

    /// Unclaimed offers outlived the configured TTL and were dropped
    OffersExpired { keys: Vec<String> },
}

/// Event stream type
pub type EventStream = BroadcastStream<HandlerEvent>;

/// Fan-out of handler events to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<HandlerEvent>,
}

impl EventEmitter {
    /// Create a new event emitter with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event
    pub fn emit(&self, event: HandlerEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe as a raw broadcast receiver
    pub fn subscribe(&self) -> broadcast::Receiver<HandlerEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as a stream
    pub fn stream(&self) -> EventStream {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Get the number of active receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(1000)
    }
}
