//! Error types for the presence core

use thiserror::Error;

/// Result type for presence-core operations
pub type Result<T> = std::result::Result<T, SignalingError>;

/// Errors that can occur in the presence core
#[derive(Debug, Error)]
pub enum SignalingError {
    /// No managed plugin carries this id
    #[error("Signaling plugin not found: {plugin_id}")]
    PluginNotFound { plugin_id: String },

    /// A plugin with this id is already managed
    #[error("Signaling plugin already added: {plugin_id}")]
    DuplicatePlugin { plugin_id: String },

    /// An offer with this key is already registered
    #[error("Connection offer already registered for key {key}")]
    DuplicateOffer { key: String },

    /// A plugin call failed
    #[error("Plugin {plugin_id} failed: {message}")]
    Plugin { plugin_id: String, message: String },

    /// The transport layer refused or failed a request
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// A presence payload could not be encoded or decoded
    #[error("Presence payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The owner task is gone, so the command could not be delivered
    #[error("Signaling handler is shut down")]
    HandlerClosed,
}

impl SignalingError {
    /// Create a plugin-not-found error
    pub fn plugin_not_found(plugin_id: impl Into<String>) -> Self {
        Self::PluginNotFound {
            plugin_id: plugin_id.into(),
        }
    }

    /// Create a plugin failure error
    pub fn plugin(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Plugin {
            plugin_id: plugin_id.into(),
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl From<toml::de::Error> for SignalingError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}
