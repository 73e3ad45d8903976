//! Presence coordinator
//!
//! Reacts to peer-level signaling events: answers peers coming online with
//! this node's presence advertisement, decides who opens the connection when
//! an advertisement arrives, and keeps the peer directory and the offer
//! registry current.

use crate::directory::PeerDirectory;
use crate::error::Result;
use crate::events::{EventEmitter, HandlerEvent};
use crate::negotiation::{AddressComparison, connection_display_name, should_initiate};
use crate::offers::{ConnectionOfferRegistry, PendingConnection, generate_offer_key};
use crate::payload::PresenceInfo;
use crate::plugin::SignalingPlugin;
use crate::transport::{LocalIdentity, PeerConnectRequest, SourceRegistry, Transport};
use crate::types::Avatar;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of handling a peer's presence advertisement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiationDecision {
    /// This node asked the transport to connect to the peer
    Initiate,
    /// The peer is visible but will connect to our offer instead
    AwaitInbound,
    /// The peer cannot be reached from outside
    PeerHidden,
    /// The peer claimed to be visible but left out dial details
    Incomplete,
}

/// Peer-level half of the signaling handler
pub struct PresenceCoordinator {
    directory: PeerDirectory,
    offers: ConnectionOfferRegistry,
    transport: Arc<dyn Transport>,
    identity: Arc<dyn LocalIdentity>,
    sources: Arc<dyn SourceRegistry>,
    address_comparison: AddressComparison,
    events: EventEmitter,
}

impl PresenceCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        identity: Arc<dyn LocalIdentity>,
        sources: Arc<dyn SourceRegistry>,
        address_comparison: AddressComparison,
        events: EventEmitter,
    ) -> Self {
        Self {
            directory: PeerDirectory::new(),
            offers: ConnectionOfferRegistry::new(),
            transport,
            identity,
            sources,
            address_comparison,
            events,
        }
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    pub fn offers(&self) -> &ConnectionOfferRegistry {
        &self.offers
    }

    /// A peer came online on `plugin`: send it our presence advertisement.
    ///
    /// Returns the advertisement that was sent.
    pub async fn on_peer_online(
        &mut self,
        plugin: &dyn SignalingPlugin,
        peer_id: &str,
    ) -> Result<PresenceInfo> {
        info!("Peer {} online on {}", peer_id, plugin.friendly_name());

        let advertisement = self.build_advertisement(plugin.plugin_id(), peer_id).await;
        let payload = advertisement.to_json()?;
        plugin.send_message(peer_id, &payload).await?;

        debug!("Sent presence to {}: {}", peer_id, payload);
        Ok(advertisement)
    }

    async fn build_advertisement(&mut self, plugin_id: &str, peer_id: &str) -> PresenceInfo {
        if !self.transport.is_externally_reachable() {
            debug!("Not externally reachable, advertising hidden presence to {}", peer_id);
            return PresenceInfo::hidden();
        }

        let key = generate_offer_key();
        let node_id = self.identity.local_node_id();
        let pending = PendingConnection {
            peer_id: peer_id.to_string(),
            plugin_id: plugin_id.to_string(),
            name: connection_display_name(peer_id),
            node_id: node_id.clone(),
            created_at: Instant::now(),
        };

        if let Err(e) = self.offers.register(key.clone(), pending.clone()) {
            warn!("Could not record offer for {}: {}", peer_id, e);
            return PresenceInfo::hidden();
        }
        if let Err(e) = self.transport.register_offer(&key, &pending).await {
            warn!("Transport refused offer for {}: {}", peer_id, e);
            self.offers.claim(&key);
            return PresenceInfo::hidden();
        }

        self.events.emit(HandlerEvent::OfferRegistered {
            peer_id: peer_id.to_string(),
            key: key.clone(),
        });

        PresenceInfo::offer(
            self.transport.external_address(),
            self.transport.external_port(),
            key,
            node_id,
        )
    }

    pub fn on_peer_offline(&self, plugin_id: &str, peer_id: &str) {
        info!("Peer {} offline on {}", peer_id, plugin_id);
    }

    pub fn on_message(&self, peer_id: &str, text: &str) {
        debug!("Message from {}: {}", peer_id, text);
    }

    /// A peer's presence advertisement arrived: record it and decide which
    /// side opens the connection.
    pub async fn on_presence_info(
        &mut self,
        peer_id: &str,
        info: PresenceInfo,
    ) -> Result<InitiationDecision> {
        self.directory.upsert_presence(peer_id, &info);

        if !info.visible {
            debug!("Peer {} is not visible, waiting for it to connect", peer_id);
            return Ok(InitiationDecision::PeerHidden);
        }

        let Some(target) = info.dial_target() else {
            warn!("Peer {} advertised itself visible without dial details", peer_id);
            return Ok(InitiationDecision::Incomplete);
        };

        let local_address = self
            .transport
            .is_externally_reachable()
            .then(|| self.transport.external_address());

        if !should_initiate(local_address.as_deref(), target.host, self.address_comparison) {
            debug!(
                "Local address {:?} sorts after {}, leaving the connection to {}",
                local_address, target.host, peer_id
            );
            return Ok(InitiationDecision::AwaitInbound);
        }

        let request = PeerConnectRequest {
            host: target.host.to_string(),
            port: target.port,
            key: target.key.to_string(),
            peer_id: peer_id.to_string(),
            node_id: target.node_id.to_string(),
        };

        info!("Connecting to {} at {}:{}", peer_id, request.host, request.port);
        let (host, port) = (request.host.clone(), request.port);
        self.transport.connect_to_peer(request).await?;

        self.events.emit(HandlerEvent::ConnectionRequested {
            peer_id: peer_id.to_string(),
            host,
            port,
            comparison: self.address_comparison,
        });
        Ok(InitiationDecision::Initiate)
    }

    pub fn on_software_version(&mut self, peer_id: &str, version: &str) {
        debug!("Peer {} runs {}", peer_id, version);
        self.directory.upsert_software_version(peer_id, version);
    }

    /// Store a peer's avatar and hand it to the peer's source if a control
    /// connection with a source exists.
    ///
    /// Returns whether the avatar reached a source.
    pub fn on_avatar(&mut self, peer_id: &str, avatar: Avatar) -> bool {
        if !self.directory.upsert_avatar(peer_id, avatar.clone()) {
            debug!("Ignoring empty avatar from {}", peer_id);
            return false;
        }

        let source = self
            .transport
            .lookup_control_connection(peer_id)
            .and_then(|connection| connection.source);

        match source {
            Some(source) => {
                debug!("Updating avatar of source {} for {}", source, peer_id);
                self.sources.set_source_avatar(&source, avatar);
                true
            }
            None => {
                debug!("No source for {} yet, avatar cached", peer_id);
                false
            }
        }
    }

    /// The account's own avatar changed; an empty image clears the local one
    pub fn on_own_avatar(&self, avatar: Avatar) {
        self.identity.set_local_avatar(avatar);
    }

    /// Hand an offer over to the transport's inbound connection
    pub fn claim_offer(&mut self, key: &str) -> Option<PendingConnection> {
        self.offers.claim(key)
    }

    /// Drop offers older than `ttl`, returning their keys
    pub fn prune_offers(&mut self, ttl: Duration, now: Instant) -> Vec<String> {
        let expired = self.offers.prune_older_than(ttl, now);
        if !expired.is_empty() {
            info!("Expired {} unclaimed offers", expired.len());
        }
        expired
    }

    /// Forget every peer, every outstanding offer and every remote source
    pub fn clear_peers(&mut self) -> usize {
        let removed = self.directory.remove_all();
        let withdrawn = self.offers.remove_all();
        if withdrawn > 0 {
            debug!("Withdrew {} unclaimed offers", withdrawn);
        }
        self.sources.remove_all_remote();
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackHub, LoopbackIdentity, LoopbackPlugin, LoopbackSources, LoopbackTransport};
    use pretty_assertions::assert_eq;

    struct Fixture {
        coordinator: PresenceCoordinator,
        transport: Arc<LoopbackTransport>,
        identity: Arc<LoopbackIdentity>,
        sources: Arc<LoopbackSources>,
        plugin: Arc<LoopbackPlugin>,
    }

    fn fixture(transport: LoopbackTransport) -> Fixture {
        let transport = Arc::new(transport);
        let identity = Arc::new(LoopbackIdentity::new("localNode"));
        let sources = Arc::new(LoopbackSources::new());
        let hub = LoopbackHub::new();
        let plugin = Arc::new(LoopbackPlugin::new(&hub, "xmpp-1", "me@example.org", "me@example.org/peerlink"));

        let coordinator = PresenceCoordinator::new(
            transport.clone(),
            identity.clone(),
            sources.clone(),
            AddressComparison::Literal,
            EventEmitter::new(16),
        );

        Fixture {
            coordinator,
            transport,
            identity,
            sources,
            plugin,
        }
    }

    #[tokio::test]
    async fn unreachable_node_sends_hidden_presence() {
        let mut f = fixture(LoopbackTransport::unreachable());

        let sent = f
            .coordinator
            .on_peer_online(f.plugin.as_ref(), "bob@example.org/peerlink")
            .await
            .unwrap();

        assert_eq!(sent, PresenceInfo::hidden());
        assert!(f.coordinator.offers().is_empty());
        assert_eq!(
            f.plugin.sent_messages(),
            vec![("bob@example.org/peerlink".to_string(), r#"{"visible":false}"#.to_string())]
        );
    }

    #[tokio::test]
    async fn reachable_node_registers_offer() {
        let mut f = fixture(LoopbackTransport::new("10.0.0.5", 50210));

        let sent = f
            .coordinator
            .on_peer_online(f.plugin.as_ref(), "bob@example.org/peerlink")
            .await
            .unwrap();

        assert!(sent.visible);
        assert_eq!(sent.address.as_deref(), Some("10.0.0.5"));
        assert_eq!(sent.port, Some(50210));
        assert_eq!(sent.node_id.as_deref(), Some("localNode"));
        let key = sent.key.clone().unwrap();
        assert!(!key.is_empty());

        let pending = f.coordinator.offers().get(&key).unwrap();
        assert_eq!(pending.peer_id, "bob@example.org/peerlink");
        assert_eq!(pending.name, "bob@example.org");
        assert_eq!(pending.node_id, "localNode");
        assert_eq!(pending.plugin_id, "xmpp-1");

        assert_eq!(f.transport.registered_offers(), vec![key.clone()]);
        let (_, payload) = &f.plugin.sent_messages()[0];
        assert_eq!(PresenceInfo::from_json(payload).unwrap(), sent);
    }

    #[tokio::test]
    async fn refused_offer_falls_back_to_hidden() {
        let transport = LoopbackTransport::new("10.0.0.5", 50210);
        transport.set_refuse_offers(true);
        let mut f = fixture(transport);

        let sent = f
            .coordinator
            .on_peer_online(f.plugin.as_ref(), "bob@example.org")
            .await
            .unwrap();

        assert_eq!(sent, PresenceInfo::hidden());
        assert!(f.coordinator.offers().is_empty());
    }

    #[tokio::test]
    async fn lower_address_initiates_connection() {
        let mut f = fixture(LoopbackTransport::new("10.0.0.5", 50210));

        let decision = f
            .coordinator
            .on_presence_info("peer@example.org", PresenceInfo::offer("10.0.0.9", 9999, "abc", "peerNode1"))
            .await
            .unwrap();

        assert_eq!(decision, InitiationDecision::Initiate);
        assert_eq!(
            f.transport.connect_requests(),
            vec![PeerConnectRequest {
                host: "10.0.0.9".to_string(),
                port: 9999,
                key: "abc".to_string(),
                peer_id: "peer@example.org".to_string(),
                node_id: "peerNode1".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn higher_address_waits_for_inbound() {
        let mut f = fixture(LoopbackTransport::new("10.0.0.9", 50210));

        let decision = f
            .coordinator
            .on_presence_info("peer@example.org", PresenceInfo::offer("10.0.0.5", 9999, "abc", "peerNode1"))
            .await
            .unwrap();

        assert_eq!(decision, InitiationDecision::AwaitInbound);
        assert!(f.transport.connect_requests().is_empty());
        assert!(f.coordinator.directory().record("peer@example.org").unwrap().visible);
    }

    #[tokio::test]
    async fn unreachable_node_initiates_to_any_visible_peer() {
        let mut f = fixture(LoopbackTransport::unreachable());

        let decision = f
            .coordinator
            .on_presence_info("peer@example.org", PresenceInfo::offer("0.0.0.1", 1, "abc", "n"))
            .await
            .unwrap();

        assert_eq!(decision, InitiationDecision::Initiate);
    }

    #[tokio::test]
    async fn hidden_and_incomplete_presence_only_update_directory() {
        let mut f = fixture(LoopbackTransport::unreachable());

        let hidden = f
            .coordinator
            .on_presence_info("a@example.org", PresenceInfo::hidden())
            .await
            .unwrap();
        let incomplete = f
            .coordinator
            .on_presence_info(
                "b@example.org",
                PresenceInfo {
                    visible: true,
                    address: Some("10.0.0.9".to_string()),
                    ..PresenceInfo::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(hidden, InitiationDecision::PeerHidden);
        assert_eq!(incomplete, InitiationDecision::Incomplete);
        assert!(f.transport.connect_requests().is_empty());
        assert_eq!(f.coordinator.directory().len(), 2);
    }

    #[test]
    fn avatar_reaches_source_only_with_control_connection() {
        let mut f = fixture(LoopbackTransport::unreachable());

        assert!(!f.coordinator.on_avatar("bob@example.org", Avatar::from(vec![1u8, 2])));
        assert_eq!(f.coordinator.directory().avatar("bob@example.org"), Some(&Avatar::from(vec![1u8, 2])));

        f.sources.add_remote("source-bob");
        f.transport
            .establish_control_connection("bob@example.org", Some("source-bob".to_string()));

        assert!(f.coordinator.on_avatar("bob@example.org", Avatar::from(vec![3u8])));
        assert_eq!(f.sources.avatar("source-bob"), Some(Avatar::from(vec![3u8])));
    }

    #[test]
    fn empty_peer_avatar_is_ignored() {
        let mut f = fixture(LoopbackTransport::unreachable());

        assert!(!f.coordinator.on_avatar("bob@example.org", Avatar::default()));
        assert!(f.coordinator.directory().avatar("bob@example.org").is_none());
    }

    #[test]
    fn own_avatar_is_forwarded_unconditionally() {
        let f = fixture(LoopbackTransport::unreachable());

        f.coordinator.on_own_avatar(Avatar::from(vec![7u8]));
        assert_eq!(f.identity.local_avatar(), Some(Avatar::from(vec![7u8])));

        f.coordinator.on_own_avatar(Avatar::default());
        assert_eq!(f.identity.local_avatar(), Some(Avatar::default()));
    }

    #[tokio::test]
    async fn clear_peers_drops_directory_offers_and_sources() {
        let mut f = fixture(LoopbackTransport::new("10.0.0.5", 50210));
        f.coordinator
            .on_peer_online(f.plugin.as_ref(), "bob@example.org/peerlink")
            .await
            .unwrap();
        f.coordinator.on_software_version("bob@example.org/peerlink", "peerlink 0.1");
        f.sources.add_remote("source-bob");
        assert_eq!(f.coordinator.offers().len(), 1);

        assert_eq!(f.coordinator.clear_peers(), 1);
        assert!(f.coordinator.directory().is_empty());
        assert!(f.coordinator.offers().is_empty());
        assert_eq!(f.sources.remote_count(), 0);
    }
}
