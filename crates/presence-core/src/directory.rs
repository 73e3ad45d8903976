//! Last-known presence metadata per remote peer

use crate::payload::PresenceInfo;
use crate::types::{Avatar, NodeId, PeerId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Everything this node has heard about one peer
#[derive(Debug, Clone, PartialEq)]
pub struct PeerPresenceRecord {
    pub peer_id: PeerId,
    /// Whether the peer accepts direct inbound connections
    pub visible: bool,
    pub host_name: Option<String>,
    pub port: Option<u16>,
    /// Token the peer generated for its pending connection
    pub offer_key: Option<String>,
    pub node_id: Option<NodeId>,
    pub software_version: Option<String>,
    pub avatar: Option<Avatar>,
    pub last_updated: DateTime<Utc>,
}

impl PeerPresenceRecord {
    fn empty(peer_id: &str) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            visible: false,
            host_name: None,
            port: None,
            offer_key: None,
            node_id: None,
            software_version: None,
            avatar: None,
            last_updated: Utc::now(),
        }
    }

    /// The presence portion of the record, as last advertised by the peer
    pub fn presence(&self) -> PresenceInfo {
        PresenceInfo {
            visible: self.visible,
            address: self.host_name.clone(),
            port: self.port,
            key: self.offer_key.clone(),
            node_id: self.node_id.clone(),
        }
    }
}

/// In-memory peer directory
///
/// Owned by the coordinator and only touched from the owner task, so no
/// locking is needed. Records are overwritten, never expired.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: HashMap<PeerId, PeerPresenceRecord>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, peer_id: &str) -> &mut PeerPresenceRecord {
        let record = self
            .peers
            .entry(peer_id.to_string())
            .or_insert_with(|| PeerPresenceRecord::empty(peer_id));
        record.last_updated = Utc::now();
        record
    }

    /// Replace the presence fields of a peer; version and avatar are kept
    pub fn upsert_presence(&mut self, peer_id: &str, info: &PresenceInfo) {
        let record = self.entry(peer_id);
        record.visible = info.visible;
        record.host_name = info.address.clone();
        record.port = info.port;
        record.offer_key = info.key.clone();
        record.node_id = info.node_id.clone();
    }

    pub fn upsert_software_version(&mut self, peer_id: &str, version: impl Into<String>) {
        self.entry(peer_id).software_version = Some(version.into());
    }

    /// Store an avatar for a peer. Empty images are ignored and leave any
    /// previous avatar in place; returns whether the avatar was stored.
    pub fn upsert_avatar(&mut self, peer_id: &str, avatar: Avatar) -> bool {
        if avatar.is_empty() {
            return false;
        }
        self.entry(peer_id).avatar = Some(avatar);
        true
    }

    pub fn record(&self, peer_id: &str) -> Option<&PeerPresenceRecord> {
        self.peers.get(peer_id)
    }

    pub fn presence(&self, peer_id: &str) -> Option<PresenceInfo> {
        self.peers.get(peer_id).map(PeerPresenceRecord::presence)
    }

    pub fn software_version(&self, peer_id: &str) -> Option<&str> {
        self.peers.get(peer_id)?.software_version.as_deref()
    }

    pub fn avatar(&self, peer_id: &str) -> Option<&Avatar> {
        self.peers.get(peer_id)?.avatar.as_ref()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Drop every record, returning how many were removed
    pub fn remove_all(&mut self) -> usize {
        let removed = self.peers.len();
        self.peers.clear();
        removed
    }
}
