//! Traversal server descriptors
//!
//! A [`TraversalConfig`] is resolved once per pairing and handed to the media
//! transport. It is never cached across pairings because relay credentials
//! expire.

use serde::{Deserialize, Serialize};

/// Public reflection servers used when no credentials could be obtained.
pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// One reflection (STUN) or relay (TURN) server, possibly reachable on several URIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub credentials: Option<Credentials>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            credentials: None,
        }
    }
}

/// Ordered set of traversal servers for one negotiation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalConfig {
    pub servers: Vec<IceServer>,
}

impl TraversalConfig {
    pub fn new(servers: Vec<IceServer>) -> Self {
        Self { servers }
    }

    /// Reflection-only fallback; connectivity across symmetric NATs may fail.
    pub fn public_default() -> Self {
        Self {
            servers: DEFAULT_STUN_SERVERS
                .iter()
                .map(|url| IceServer::stun(*url))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// All `stun:` URIs, in configuration order.
    pub fn stun_urls(&self) -> impl Iterator<Item = &str> {
        self.servers
            .iter()
            .flat_map(|s| s.urls.iter())
            .map(String::as_str)
            .filter(|url| url.starts_with("stun:"))
    }

    pub fn has_relay(&self) -> bool {
        self.servers
            .iter()
            .flat_map(|s| s.urls.iter())
            .any(|url| url.starts_with("turn:") || url.starts_with("turns:"))
    }
}
