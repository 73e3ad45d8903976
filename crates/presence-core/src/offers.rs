//! Outstanding connection offers
//!
//! When this node is reachable it answers every peer that comes online with an
//! offer: "connect to me and present key K". The offer stays here until the
//! transport reports an inbound connection carrying K and claims it.

use crate::error::{Result, SignalingError};
use crate::types::{NodeId, PeerId, PluginId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// A not-yet-established connection waiting for the peer to dial in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConnection {
    pub peer_id: PeerId,
    /// Plugin the offer was sent through
    pub plugin_id: PluginId,
    /// Display name for the eventual connection
    pub name: String,
    /// Our own node id, so the peer can recognise reconnections
    pub node_id: NodeId,
    pub created_at: Instant,
}

/// Generate a fresh, random offer key
pub fn generate_offer_key() -> String {
    Uuid::new_v4().to_string()
}

/// Registry of open offers keyed by offer key
#[derive(Debug, Default)]
pub struct ConnectionOfferRegistry {
    offers: HashMap<String, PendingConnection>,
}

impl ConnectionOfferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an offer under `key`; keys must be unique among open offers
    pub fn register(&mut self, key: impl Into<String>, pending: PendingConnection) -> Result<()> {
        let key = key.into();
        if self.offers.contains_key(&key) {
            return Err(SignalingError::DuplicateOffer { key });
        }
        tracing::debug!("Registered offer {} for {}", key, pending.peer_id);
        self.offers.insert(key, pending);
        Ok(())
    }

    /// Remove and return the offer for `key`, handing ownership to the caller
    pub fn claim(&mut self, key: &str) -> Option<PendingConnection> {
        let claimed = self.offers.remove(key);
        if let Some(pending) = &claimed {
            tracing::debug!("Offer {} claimed by {}", key, pending.peer_id);
        }
        claimed
    }

    pub fn get(&self, key: &str) -> Option<&PendingConnection> {
        self.offers.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.offers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    pub fn remove_all(&mut self) -> usize {
        let removed = self.offers.len();
        self.offers.clear();
        removed
    }

    /// Drop offers created more than `max_age` before `now`; returns their keys
    pub fn prune_older_than(&mut self, max_age: Duration, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .offers
            .iter()
            .filter(|(_, pending)| now.saturating_duration_since(pending.created_at) > max_age)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.offers.remove(key);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(peer: &str, created_at: Instant) -> PendingConnection {
        PendingConnection {
            peer_id: peer.to_string(),
            plugin_id: "xmpp-1".to_string(),
            name: peer.to_string(),
            node_id: "local-node".to_string(),
            created_at,
        }
    }

    #[test]
    fn claim_hands_out_offer_once() {
        let mut offers = ConnectionOfferRegistry::new();
        offers.register("k1", pending("bob", Instant::now())).unwrap();

        assert!(offers.contains("k1"));
        assert_eq!(offers.claim("k1").unwrap().peer_id, "bob");
        assert!(offers.claim("k1").is_none());
        assert!(offers.is_empty());
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let mut offers = ConnectionOfferRegistry::new();
        offers.register("k1", pending("bob", Instant::now())).unwrap();
        let err = offers.register("k1", pending("carol", Instant::now())).unwrap_err();

        assert!(matches!(err, SignalingError::DuplicateOffer { ref key } if key == "k1"));
        assert_eq!(offers.get("k1").unwrap().peer_id, "bob");
    }

    #[test]
    fn generated_keys_are_distinct() {
        let a = generate_offer_key();
        let b = generate_offer_key();
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }

    #[test]
    fn prune_only_drops_old_offers() {
        let start = Instant::now();
        let now = start + Duration::from_secs(120);
        let mut offers = ConnectionOfferRegistry::new();
        offers.register("old", pending("bob", start)).unwrap();
        offers
            .register("fresh", pending("carol", start + Duration::from_secs(100)))
            .unwrap();

        let expired = offers.prune_older_than(Duration::from_secs(60), now);

        assert_eq!(expired, vec!["old".to_string()]);
        assert!(offers.contains("fresh"));
        assert_eq!(offers.len(), 1);
    }
}
