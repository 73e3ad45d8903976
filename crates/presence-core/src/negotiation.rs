//! Connection direction tie-break
//!
//! If only one of two peers is externally visible, the other one connects to
//! it. If both are visible, the peer whose address sorts first connects, so a
//! pair of peers never opens duplicate connections to each other. The rule
//! only holds if both sides see the same address text, hence the optional
//! canonicalisation.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::net::IpAddr;

/// How address text is compared by the tie-break
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressComparison {
    /// Compare the address strings exactly as reported
    #[default]
    Literal,
    /// Normalise IP literals and host names before comparing
    Canonical,
}

impl AddressComparison {
    pub fn compare(&self, local: &str, remote: &str) -> Ordering {
        match self {
            AddressComparison::Literal => local.cmp(remote),
            AddressComparison::Canonical => canonical_address(local).cmp(&canonical_address(remote)),
        }
    }
}

/// Canonical text form of an address: IP literals are re-rendered, host
/// names are lowercased without a trailing dot
pub fn canonical_address(address: &str) -> String {
    let trimmed = address.trim();
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);

    match unbracketed.parse::<IpAddr>() {
        Ok(ip) => ip.to_string(),
        Err(_) => trimmed.trim_end_matches('.').to_ascii_lowercase(),
    }
}

/// Decide whether this node opens the connection to a visible peer.
///
/// `local_address` is `None` when this node is not externally reachable, in
/// which case it always initiates.
pub fn should_initiate(
    local_address: Option<&str>,
    remote_address: &str,
    comparison: AddressComparison,
) -> bool {
    match local_address {
        None => true,
        Some(local) => comparison.compare(local, remote_address) != Ordering::Greater,
    }
}

/// Name given to a connection offered to `peer_id`.
///
/// Group-chat room occupants keep their full id; direct ids lose their
/// resource part (`user@host/resource` becomes `user@host`).
pub fn connection_display_name(peer_id: &str) -> String {
    if peer_id.contains("@conference.") {
        return peer_id.to_string();
    }
    match peer_id.find('/') {
        Some(idx) => peer_id[..idx].to_string(),
        None => peer_id.to_string(),
    }
}
