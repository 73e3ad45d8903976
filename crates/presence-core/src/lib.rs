//! # peerlink presence core
//!
//! Presence tracking and connection negotiation for peerlink nodes.
//!
//! Nodes do not find each other directly. They sit on one or more signaling
//! networks (an XMPP account, say) through *signaling plugins*, and use them
//! only to exchange a small presence advertisement: "I accept inbound
//! connections at this address; present this key when you connect". This
//! crate turns those advertisements into connection decisions:
//!
//! - answers every peer that comes online with this node's advertisement,
//!   registering a one-time connection offer when the node is reachable
//! - decides which side of a peer pair opens the connection, so each pair
//!   ends up with exactly one
//! - keeps a directory of the last presence, software version and avatar
//!   heard from every peer
//! - manages the plugin set and reconnects failed plugins after a fixed
//!   delay, except on authentication errors
//!
//! Opening connections is left to a [`Transport`] implementation.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use peerlink_presence_core::loopback::{
//!     LoopbackHub, LoopbackIdentity, LoopbackPlugin, LoopbackSources, LoopbackTransport,
//! };
//! use peerlink_presence_core::SignalingHandlerBuilder;
//!
//! #[tokio::main]
//! async fn main() -> peerlink_presence_core::Result<()> {
//!     let hub = LoopbackHub::new();
//!     let handler = SignalingHandlerBuilder::new()
//!         .transport(Arc::new(LoopbackTransport::new("203.0.113.7", 50210)))
//!         .identity(Arc::new(LoopbackIdentity::new("node-1")))
//!         .sources(Arc::new(LoopbackSources::new()))
//!         .build()?;
//!
//!     let plugin = LoopbackPlugin::new(&hub, "xmpp-1", "alice", "alice@example.org/peerlink");
//!     handler.add_plugin(Arc::new(plugin)).await?;
//!
//!     handler.shutdown().await
//! }
//! ```

pub mod builder;
pub mod config;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod events;
pub mod handler;
pub mod lifecycle;
pub mod logging;
pub mod loopback;
pub mod negotiation;
pub mod offers;
pub mod payload;
pub mod plugin;
pub mod transport;
pub mod types;

pub use builder::SignalingHandlerBuilder;
pub use config::SignalingConfig;
pub use coordinator::{InitiationDecision, PresenceCoordinator};
pub use directory::{PeerDirectory, PeerPresenceRecord};
pub use error::{Result, SignalingError};
pub use events::{EventEmitter, EventStream, HandlerEvent};
pub use handler::SignalingHandler;
pub use lifecycle::{PluginLifecycleManager, ReconnectScheduler};
pub use negotiation::{AddressComparison, should_initiate};
pub use offers::{ConnectionOfferRegistry, PendingConnection};
pub use payload::PresenceInfo;
pub use plugin::{PluginEvent, PluginEventSink, SignalingPlugin, TaggedPluginEvent};
pub use transport::{ControlConnection, LocalIdentity, PeerConnectRequest, SourceRegistry, Transport};
pub use types::{
    Avatar, ConnectionState, NodeId, PeerId, PluginErrorCode, PluginId, SignalingPluginHandle, SourceId,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
