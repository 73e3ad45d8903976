//! Signaling plugin capability interface
//!
//! A signaling plugin is one presence/messaging account (an XMPP account, for
//! instance) used only to exchange negotiation metadata with peers. Plugins
//! report everything that happens to them through the [`PluginEventSink`]
//! handed to [`SignalingPlugin::attach`]; every event is tagged with the
//! plugin's id and queued for the handler's owner task.

use crate::error::Result;
use crate::payload::PresenceInfo;
use crate::types::{Avatar, ConnectionState, PeerId, PluginErrorCode, PluginId};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Events a signaling plugin reports
#[derive(Debug, Clone)]
pub enum PluginEvent {
    PeerOnline {
        peer_id: PeerId,
    },
    PeerOffline {
        peer_id: PeerId,
    },
    MessageReceived {
        from: PeerId,
        text: String,
    },
    /// A peer's presence advertisement, already decoded by the plugin
    PresenceInfoReceived {
        peer_id: PeerId,
        info: PresenceInfo,
    },
    SoftwareVersionReceived {
        peer_id: PeerId,
        version: String,
    },
    AvatarReceived {
        peer_id: PeerId,
        avatar: Avatar,
    },
    /// The account's own avatar
    OwnAvatarReceived {
        avatar: Avatar,
    },
    Error {
        code: PluginErrorCode,
        message: String,
    },
    ConnectionStateChanged {
        state: ConnectionState,
    },
}

/// A plugin event together with the id of the plugin that raised it
#[derive(Debug, Clone)]
pub struct TaggedPluginEvent {
    pub plugin_id: PluginId,
    pub event: PluginEvent,
}

/// Sending half through which a plugin reports its events
#[derive(Debug, Clone)]
pub struct PluginEventSink {
    plugin_id: PluginId,
    sender: mpsc::UnboundedSender<TaggedPluginEvent>,
}

impl PluginEventSink {
    pub fn new(plugin_id: impl Into<PluginId>, sender: mpsc::UnboundedSender<TaggedPluginEvent>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            sender,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Queue an event; returns false once the handler has shut down
    pub fn emit(&self, event: PluginEvent) -> bool {
        self.sender
            .send(TaggedPluginEvent {
                plugin_id: self.plugin_id.clone(),
                event,
            })
            .is_ok()
    }

    pub fn peer_online(&self, peer_id: impl Into<PeerId>) -> bool {
        self.emit(PluginEvent::PeerOnline {
            peer_id: peer_id.into(),
        })
    }

    pub fn peer_offline(&self, peer_id: impl Into<PeerId>) -> bool {
        self.emit(PluginEvent::PeerOffline {
            peer_id: peer_id.into(),
        })
    }

    pub fn message_received(&self, from: impl Into<PeerId>, text: impl Into<String>) -> bool {
        self.emit(PluginEvent::MessageReceived {
            from: from.into(),
            text: text.into(),
        })
    }

    pub fn presence_info_received(&self, peer_id: impl Into<PeerId>, info: PresenceInfo) -> bool {
        self.emit(PluginEvent::PresenceInfoReceived {
            peer_id: peer_id.into(),
            info,
        })
    }

    pub fn software_version_received(&self, peer_id: impl Into<PeerId>, version: impl Into<String>) -> bool {
        self.emit(PluginEvent::SoftwareVersionReceived {
            peer_id: peer_id.into(),
            version: version.into(),
        })
    }

    pub fn avatar_received(&self, peer_id: impl Into<PeerId>, avatar: Avatar) -> bool {
        self.emit(PluginEvent::AvatarReceived {
            peer_id: peer_id.into(),
            avatar,
        })
    }

    pub fn own_avatar_received(&self, avatar: Avatar) -> bool {
        self.emit(PluginEvent::OwnAvatarReceived { avatar })
    }

    pub fn error(&self, code: PluginErrorCode, message: impl Into<String>) -> bool {
        self.emit(PluginEvent::Error {
            code,
            message: message.into(),
        })
    }

    pub fn connection_state_changed(&self, state: ConnectionState) -> bool {
        self.emit(PluginEvent::ConnectionStateChanged { state })
    }
}

/// Capability surface every signaling plugin provides
///
/// Calls should return promptly. Progress (connecting, connected, failures)
/// is reported asynchronously through the attached sink rather than through
/// the return value.
#[async_trait]
pub trait SignalingPlugin: Send + Sync {
    /// Unique id of this plugin instance
    fn plugin_id(&self) -> &str;

    /// Id of the account the plugin was created from
    fn account_id(&self) -> &str;

    /// Human readable name used in logs
    fn friendly_name(&self) -> &str {
        self.account_id()
    }

    /// Wire the plugin's event output to the handler
    fn attach(&self, events: PluginEventSink);

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn send_message(&self, peer_id: &str, text: &str) -> Result<()>;

    async fn refresh_proxy_settings(&self) -> Result<()>;

    /// Re-validate settings after a global settings change
    async fn check_settings(&self) -> Result<()>;

    /// The backing account's configuration changed
    async fn configuration_changed(&self) -> Result<()> {
        Ok(())
    }
}
