//! Presence advertisement exchanged over signaling plugins
//!
//! The payload is a small JSON object:
//!
//! ```json
//! {"visible": true, "address": "203.0.113.7", "port": 50210, "key": "…", "nodeId": "…"}
//! ```
//!
//! Everything except `visible` is omitted when the sender cannot accept
//! inbound connections.

use crate::error::Result;
use crate::types::NodeId;
use serde::{Deserialize, Serialize};

/// Presence advertisement sent to, and received from, a peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceInfo {
    /// Whether the sender accepts direct inbound connections
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Offer key the receiver must present when connecting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
}

/// Everything needed to dial a visible peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialTarget<'a> {
    pub host: &'a str,
    pub port: u16,
    pub key: &'a str,
    pub node_id: &'a str,
}

impl PresenceInfo {
    /// Advertisement of a node that cannot be reached from outside
    pub fn hidden() -> Self {
        Self::default()
    }

    /// Advertisement inviting the peer to connect using `key`
    pub fn offer(
        address: impl Into<String>,
        port: u16,
        key: impl Into<String>,
        node_id: impl Into<NodeId>,
    ) -> Self {
        Self {
            visible: true,
            address: Some(address.into()),
            port: Some(port),
            key: Some(key.into()),
            node_id: Some(node_id.into()),
        }
    }

    /// Dial target, if the advertisement is visible and complete
    pub fn dial_target(&self) -> Option<DialTarget<'_>> {
        if !self.visible {
            return None;
        }
        Some(DialTarget {
            host: self.address.as_deref()?,
            port: self.port?,
            key: self.key.as_deref()?,
            node_id: self.node_id.as_deref()?,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn hidden_payload_carries_only_visibility() {
        let text = PresenceInfo::hidden().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({ "visible": false }));
    }

    #[test]
    fn offer_payload_uses_wire_field_names() {
        let text = PresenceInfo::offer("10.0.0.5", 50210, "k1", "node-a").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({
                "visible": true,
                "address": "10.0.0.5",
                "port": 50210,
                "key": "k1",
                "nodeId": "node-a",
            })
        );
    }

    #[test]
    fn parses_payload_with_missing_optionals() {
        let info = PresenceInfo::from_json(r#"{"visible":true,"address":"10.0.0.9"}"#).unwrap();
        assert!(info.visible);
        assert_eq!(info.port, None);
        assert!(info.dial_target().is_none());
    }

    #[test]
    fn rejects_non_presence_text() {
        assert!(PresenceInfo::from_json("hello there").is_err());
    }
}
