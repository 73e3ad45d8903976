//! Core types shared across the presence core

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a remote peer as reported by a signaling plugin (e.g. a jid)
pub type PeerId = String;

/// Unique identifier of a signaling plugin instance
pub type PluginId = String;

/// Stable identifier of a node's local data store
pub type NodeId = String;

/// Identifier of a logical source owned by the source registry
pub type SourceId = String;

/// Connection state of a signaling plugin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Error codes a signaling plugin can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginErrorCode {
    /// Credentials were rejected; retrying without reconfiguration is pointless
    AuthError,
    /// The underlying connection failed or dropped
    ConnectionError,
    /// Plugin-specific code
    Other(i32),
}

impl PluginErrorCode {
    /// Whether this code means the account credentials were rejected
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, PluginErrorCode::AuthError)
    }
}

impl fmt::Display for PluginErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginErrorCode::AuthError => write!(f, "auth-error"),
            PluginErrorCode::ConnectionError => write!(f, "connection-error"),
            PluginErrorCode::Other(code) => write!(f, "error-{}", code),
        }
    }
}

/// Encoded avatar image
///
/// The bytes are treated as opaque; an empty image is the "null" avatar and is
/// never stored.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Avatar(Bytes);

impl Avatar {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Avatar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Avatar({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for Avatar {
    fn from(data: Vec<u8>) -> Self {
        Self(Bytes::from(data))
    }
}

impl From<&'static [u8]> for Avatar {
    fn from(data: &'static [u8]) -> Self {
        Self(Bytes::from_static(data))
    }
}

/// Snapshot of one managed signaling plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingPluginHandle {
    pub plugin_id: PluginId,
    /// Id of the external account object backing the plugin
    pub account_id: String,
    pub friendly_name: String,
    pub connection_state: ConnectionState,
}
