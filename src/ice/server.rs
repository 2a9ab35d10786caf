//! STUN/TURN server entries.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{BridgeError, Result};

const ICE_SCHEMES: [&str; 4] = ["stun", "stuns", "turn", "turns"];

/// One ICE server entry: a set of equivalent URLs plus optional credentials.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Create a STUN-only server config
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }

    /// Create a TURN server config with credentials
    pub fn turn(url: &str, username: &str, credential: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: Some(username.to_string()),
            credential: Some(credential.to_string()),
        }
    }

    /// Build from a comma separated URL list, e.g. `"stun:a:3478, turn:b"`.
    ///
    /// The result is validated.
    pub fn parse(urls: &str) -> Result<Self> {
        let server = Self {
            urls: urls
                .split(',')
                .map(|u| u.trim().to_string())
                .collect(),
            username: None,
            credential: None,
        };
        server.validate()?;
        Ok(server)
    }

    pub fn with_credentials(mut self, username: &str, credential: &str) -> Self {
        self.username = Some(username.to_string());
        self.credential = Some(credential.to_string());
        self
    }

    /// Check that every URL is a well-formed `stun:`, `stuns:`, `turn:` or
    /// `turns:` URL with a host part.
    pub fn validate(&self) -> Result<()> {
        if self.urls.is_empty() {
            return Err(BridgeError::Validation("ICE server has no URLs".into()));
        }
        for raw in &self.urls {
            validate_url(raw)?;
        }
        Ok(())
    }
}

fn validate_url(raw: &str) -> Result<()> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(BridgeError::Validation("empty ICE server URL".into()));
    }

    let url = Url::parse(trimmed)
        .map_err(|e| BridgeError::Validation(format!("invalid ICE server URL '{}': {}", trimmed, e)))?;

    if !ICE_SCHEMES.contains(&url.scheme()) {
        return Err(BridgeError::Validation(format!(
            "unsupported ICE server scheme '{}' in '{}'",
            url.scheme(),
            trimmed
        )));
    }

    // stun:host:port has an opaque path rather than an authority
    let target = if url.cannot_be_a_base() {
        url.path()
    } else {
        url.host_str().unwrap_or("")
    };
    if target.is_empty() {
        return Err(BridgeError::Validation(format!("ICE server URL '{}' has no host", trimmed)));
    }
    Ok(())
}
