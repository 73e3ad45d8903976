//! In-process collaborators
//!
//! A [`LoopbackHub`] stands in for a presence server: every
//! [`LoopbackPlugin`] connected to the same hub sees the others come online
//! and can message them. Together with [`LoopbackTransport`],
//! [`LoopbackIdentity`] and [`LoopbackSources`] this is enough to run full
//! negotiations without a network, which is what the simulator and the
//! integration tests do.

use crate::error::{Result, SignalingError};
use crate::offers::PendingConnection;
use crate::payload::PresenceInfo;
use crate::plugin::{PluginEventSink, SignalingPlugin};
use crate::transport::{ControlConnection, LocalIdentity, PeerConnectRequest, SourceRegistry, Transport};
use crate::types::{Avatar, ConnectionState, NodeId, PeerId, PluginErrorCode, SourceId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

/// Shared presence space for loopback plugins
#[derive(Debug, Clone, Default)]
pub struct LoopbackHub {
    members: Arc<Mutex<HashMap<PeerId, PluginEventSink>>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peers currently online
    pub fn online(&self) -> Vec<PeerId> {
        let mut online: Vec<PeerId> = self.members.lock().keys().cloned().collect();
        online.sort();
        online
    }

    fn join(&self, peer_id: &str, sink: PluginEventSink) {
        let mut members = self.members.lock();
        if members.insert(peer_id.to_string(), sink.clone()).is_some() {
            return;
        }
        for (other, other_sink) in members.iter().filter(|(id, _)| id.as_str() != peer_id) {
            other_sink.peer_online(peer_id);
            sink.peer_online(other.clone());
        }
    }

    fn leave(&self, peer_id: &str) {
        let mut members = self.members.lock();
        if members.remove(peer_id).is_none() {
            return;
        }
        for sink in members.values() {
            sink.peer_offline(peer_id);
        }
    }

    fn deliver(&self, from: &str, to: &str, text: &str) -> bool {
        let members = self.members.lock();
        let Some(sink) = members.get(to) else {
            return false;
        };
        match PresenceInfo::from_json(text) {
            Ok(info) => sink.presence_info_received(from, info),
            Err(_) => sink.message_received(from, text),
        }
    }

    fn broadcast_avatar(&self, from: &str, avatar: &Avatar) {
        let members = self.members.lock();
        for (id, sink) in members.iter() {
            if id == from {
                sink.own_avatar_received(avatar.clone());
            } else {
                sink.avatar_received(from, avatar.clone());
            }
        }
    }

    fn broadcast_version(&self, from: &str, version: &str) {
        let members = self.members.lock();
        for (_, sink) in members.iter().filter(|(id, _)| id.as_str() != from) {
            sink.software_version_received(from, version);
        }
    }
}

/// A signaling plugin whose "server" is a [`LoopbackHub`]
pub struct LoopbackPlugin {
    plugin_id: String,
    account_id: String,
    /// Address of this account on the hub
    peer_id: PeerId,
    hub: LoopbackHub,
    sink: Mutex<Option<PluginEventSink>>,
    sent: Mutex<Vec<(PeerId, String)>>,
    fail_next_connect: Mutex<Option<(PluginErrorCode, String)>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    settings_checks: AtomicUsize,
    proxy_refreshes: AtomicUsize,
    configuration_changes: AtomicUsize,
}

impl LoopbackPlugin {
    pub fn new(
        hub: &LoopbackHub,
        plugin_id: impl Into<String>,
        account_id: impl Into<String>,
        peer_id: impl Into<PeerId>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            account_id: account_id.into(),
            peer_id: peer_id.into(),
            hub: hub.clone(),
            sink: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            fail_next_connect: Mutex::new(None),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            settings_checks: AtomicUsize::new(0),
            proxy_refreshes: AtomicUsize::new(0),
            configuration_changes: AtomicUsize::new(0),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn sink(&self) -> Option<PluginEventSink> {
        self.sink.lock().clone()
    }

    /// Make the next `connect` fail with `code` instead of joining the hub
    pub fn fail_next_connect(&self, code: PluginErrorCode, message: impl Into<String>) {
        *self.fail_next_connect.lock() = Some((code, message.into()));
    }

    /// Report an error as if the underlying connection raised it
    pub fn report_error(&self, code: PluginErrorCode, message: impl Into<String>) {
        if let Some(sink) = self.sink() {
            sink.error(code, message);
        }
    }

    /// Publish an avatar for this account to every hub member
    pub fn publish_avatar(&self, avatar: Avatar) {
        self.hub.broadcast_avatar(&self.peer_id, &avatar);
    }

    pub fn publish_software_version(&self, version: &str) {
        self.hub.broadcast_version(&self.peer_id, version);
    }

    /// Every (recipient, text) pair sent through this plugin
    pub fn sent_messages(&self) -> Vec<(PeerId, String)> {
        self.sent.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn settings_checks(&self) -> usize {
        self.settings_checks.load(Ordering::SeqCst)
    }

    pub fn proxy_refreshes(&self) -> usize {
        self.proxy_refreshes.load(Ordering::SeqCst)
    }

    pub fn configuration_changes(&self) -> usize {
        self.configuration_changes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingPlugin for LoopbackPlugin {
    fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    fn account_id(&self) -> &str {
        &self.account_id
    }

    fn attach(&self, events: PluginEventSink) {
        *self.sink.lock() = Some(events);
    }

    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let sink = self
            .sink()
            .ok_or_else(|| SignalingError::plugin(self.plugin_id.clone(), "not attached"))?;

        sink.connection_state_changed(ConnectionState::Connecting);

        let failure = self.fail_next_connect.lock().take();
        if let Some((code, message)) = failure {
            debug!("{} refusing connection: {}", self.peer_id, message);
            sink.error(code, message);
            sink.connection_state_changed(ConnectionState::Disconnected);
            return Ok(());
        }

        sink.connection_state_changed(ConnectionState::Connected);
        self.hub.join(&self.peer_id, sink);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.hub.leave(&self.peer_id);
        if let Some(sink) = self.sink() {
            sink.connection_state_changed(ConnectionState::Disconnected);
        }
        Ok(())
    }

    async fn send_message(&self, peer_id: &str, text: &str) -> Result<()> {
        self.sent.lock().push((peer_id.to_string(), text.to_string()));
        if !self.hub.deliver(&self.peer_id, peer_id, text) {
            debug!("{} is not on the hub, message dropped", peer_id);
        }
        Ok(())
    }

    async fn refresh_proxy_settings(&self) -> Result<()> {
        self.proxy_refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn check_settings(&self) -> Result<()> {
        self.settings_checks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn configuration_changed(&self) -> Result<()> {
        self.configuration_changes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Transport that records requests instead of opening sockets
pub struct LoopbackTransport {
    reachable: bool,
    address: String,
    port: u16,
    refuse_offers: AtomicBool,
    offers: Mutex<Vec<(String, PendingConnection)>>,
    connects: Mutex<Vec<PeerConnectRequest>>,
    controls: Mutex<HashMap<PeerId, ControlConnection>>,
}

impl LoopbackTransport {
    /// An externally reachable transport listening on `address:port`
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            reachable: true,
            address: address.into(),
            port,
            refuse_offers: AtomicBool::new(false),
            offers: Mutex::new(Vec::new()),
            connects: Mutex::new(Vec::new()),
            controls: Mutex::new(HashMap::new()),
        }
    }

    /// A transport behind NAT that accepts no inbound connections
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new("", 0)
        }
    }

    pub fn set_refuse_offers(&self, refuse: bool) {
        self.refuse_offers.store(refuse, Ordering::SeqCst);
    }

    /// Keys of every offer announced to this transport
    pub fn registered_offers(&self) -> Vec<String> {
        self.offers.lock().iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn connect_requests(&self) -> Vec<PeerConnectRequest> {
        self.connects.lock().clone()
    }

    /// Pretend a control connection to `peer_id` was established
    pub fn establish_control_connection(&self, peer_id: &str, source: Option<SourceId>) {
        self.controls.lock().insert(
            peer_id.to_string(),
            ControlConnection {
                peer_id: peer_id.to_string(),
                source,
            },
        );
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn is_externally_reachable(&self) -> bool {
        self.reachable
    }

    fn external_address(&self) -> String {
        self.address.clone()
    }

    fn external_port(&self) -> u16 {
        self.port
    }

    async fn register_offer(&self, key: &str, pending: &PendingConnection) -> Result<()> {
        if self.refuse_offers.load(Ordering::SeqCst) {
            return Err(SignalingError::transport("offer refused"));
        }
        self.offers.lock().push((key.to_string(), pending.clone()));
        Ok(())
    }

    async fn connect_to_peer(&self, request: PeerConnectRequest) -> Result<()> {
        self.connects.lock().push(request);
        Ok(())
    }

    fn lookup_control_connection(&self, peer_id: &str) -> Option<ControlConnection> {
        self.controls.lock().get(peer_id).cloned()
    }
}

/// Fixed local identity that remembers its avatar
pub struct LoopbackIdentity {
    node_id: NodeId,
    avatar: Mutex<Option<Avatar>>,
}

impl LoopbackIdentity {
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            avatar: Mutex::new(None),
        }
    }

    pub fn local_avatar(&self) -> Option<Avatar> {
        self.avatar.lock().clone()
    }
}

impl LocalIdentity for LoopbackIdentity {
    fn local_node_id(&self) -> NodeId {
        self.node_id.clone()
    }

    fn set_local_avatar(&self, avatar: Avatar) {
        *self.avatar.lock() = Some(avatar);
    }
}

/// Source registry keeping remote sources and their avatars in memory
#[derive(Default)]
pub struct LoopbackSources {
    remote: Mutex<HashMap<SourceId, Option<Avatar>>>,
}

impl LoopbackSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_remote(&self, source: impl Into<SourceId>) {
        self.remote.lock().entry(source.into()).or_insert(None);
    }

    pub fn avatar(&self, source: &str) -> Option<Avatar> {
        self.remote.lock().get(source).cloned().flatten()
    }

    pub fn remote_count(&self) -> usize {
        self.remote.lock().len()
    }
}

impl SourceRegistry for LoopbackSources {
    fn set_source_avatar(&self, source: &str, avatar: Avatar) {
        self.remote.lock().insert(source.to_string(), Some(avatar));
    }

    fn remove_all_remote(&self) {
        self.remote.lock().clear();
    }
}
