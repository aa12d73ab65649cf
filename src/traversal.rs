//! Traversal config resolution
//!
//! Fetches time-limited STUN/TURN descriptors from a credential service and
//! falls back to public reflection servers whenever that fails. Resolution
//! never fails outward: a call with degraded connectivity beats no call.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::TraversalError;
use crate::model::{Credentials, IceServer, TraversalConfig};

/// Source of traversal configuration for one negotiation.
#[async_trait]
pub trait ResolveTraversal: Send + Sync {
    /// Always yields a usable, non-empty configuration.
    async fn resolve(&self) -> TraversalConfig;
}

/// `{ "iceServers": [...] }` as issued by hosted TURN providers.
#[derive(Debug, Deserialize)]
struct CredentialResponse {
    #[serde(rename = "iceServers")]
    ice_servers: Vec<IceServerEntry>,
}

#[derive(Debug, Deserialize)]
struct IceServerEntry {
    urls: Urls,
    username: Option<String>,
    credential: Option<String>,
}

/// Browsers accept either a single URI or a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Urls {
    One(String),
    Many(Vec<String>),
}

impl Urls {
    fn into_vec(self) -> Vec<String> {
        match self {
            Urls::One(url) => vec![url],
            Urls::Many(urls) => urls,
        }
    }
}

/// Parses a credential service response body.
///
/// ## Returns
///
/// * `Ok(TraversalConfig)`: at least one server, each with at least one URI.
/// * `Err(TraversalError::Malformed)`: anything else.
pub fn parse_credential_response(body: &[u8]) -> Result<TraversalConfig, TraversalError> {
    let response: CredentialResponse =
        serde_json::from_slice(body).map_err(|e| TraversalError::Malformed(e.to_string()))?;

    let mut servers = Vec::with_capacity(response.ice_servers.len());
    for entry in response.ice_servers {
        let urls: Vec<String> = entry
            .urls
            .into_vec()
            .into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if urls.is_empty() {
            return Err(TraversalError::Malformed("server entry without urls".into()));
        }

        let credentials = match (entry.username, entry.credential) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            _ => None,
        };
        servers.push(IceServer { urls, credentials });
    }

    if servers.is_empty() {
        return Err(TraversalError::Malformed("empty iceServers list".into()));
    }

    Ok(TraversalConfig::new(servers))
}

/// Resolves traversal servers over HTTP, once per call to [`resolve`](ResolveTraversal::resolve).
pub struct TraversalResolver {
    client: reqwest::Client,
    credentials_url: Option<String>,
    timeout: Duration,
}

impl TraversalResolver {
    pub fn new(credentials_url: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials_url,
            timeout,
        }
    }

    async fn fetch(&self, url: &str) -> Result<TraversalConfig, TraversalError> {
        let response = self.client.get(url).timeout(self.timeout).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TraversalError::Status(status));
        }

        let body = response.bytes().await?;
        parse_credential_response(&body)
    }
}

#[async_trait]
impl ResolveTraversal for TraversalResolver {
    async fn resolve(&self) -> TraversalConfig {
        let Some(url) = self.credentials_url.as_deref() else {
            info!("No credential service configured, using public STUN servers");
            return TraversalConfig::public_default();
        };

        match self.fetch(url).await {
            Ok(config) => {
                debug!(
                    servers = config.servers.len(),
                    relay = config.has_relay(),
                    "Resolved traversal servers"
                );
                config
            }
            Err(e) => {
                warn!("Traversal credential fetch failed, using public STUN servers: {}", e);
                TraversalConfig::public_default()
            }
        }
    }
}
