//! Interfaces of the collaborators the presence core drives
//!
//! The core never owns connections, sources or the local identity. It talks
//! to them through these traits and refers to everything by id.

use crate::error::Result;
use crate::offers::PendingConnection;
use crate::types::{Avatar, NodeId, PeerId, SourceId};
use async_trait::async_trait;

/// Request to open an outbound connection to a visible peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnectRequest {
    pub host: String,
    pub port: u16,
    /// Offer key the peer handed out
    pub key: String,
    pub peer_id: PeerId,
    pub node_id: NodeId,
}

/// An established control connection to a peer, as known to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlConnection {
    pub peer_id: PeerId,
    /// Source the connection feeds, once the handshake produced one
    pub source: Option<SourceId>,
}

/// The data-transfer layer that actually opens connections
///
/// Implementations perform their I/O elsewhere; the async methods should only
/// hand work off and return.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether this node accepts unsolicited inbound connections
    fn is_externally_reachable(&self) -> bool;

    /// Externally visible address text, compared verbatim by the tie-break
    fn external_address(&self) -> String;

    fn external_port(&self) -> u16;

    /// Announce an offer so an inbound connection carrying `key` is accepted
    async fn register_offer(&self, key: &str, pending: &PendingConnection) -> Result<()>;

    /// Open a connection to a peer that invited us
    async fn connect_to_peer(&self, request: PeerConnectRequest) -> Result<()>;

    fn lookup_control_connection(&self, peer_id: &str) -> Option<ControlConnection>;
}

/// This node's own identity
pub trait LocalIdentity: Send + Sync {
    fn local_node_id(&self) -> NodeId;

    /// Set the avatar of the local source
    fn set_local_avatar(&self, avatar: Avatar);
}

/// Registry of logical sources (one per connected remote peer)
pub trait SourceRegistry: Send + Sync {
    fn set_source_avatar(&self, source: &str, avatar: Avatar);

    /// Forget every remote source
    fn remove_all_remote(&self);
}
