//! Session configuration handed to the engine when a session is created.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::IceServer;
use crate::error::Result;

/// Which candidate types the engine may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceTransportPolicy {
    /// Gather no candidates
    None,
    /// Relay candidates only
    Relay,
    #[default]
    All,
}

impl IceTransportPolicy {
    /// Engine ordering: None=0, Relay=1, NoHost=2 (unsupported), All=3.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(IceTransportPolicy::None),
            1 => Some(IceTransportPolicy::Relay),
            3 => Some(IceTransportPolicy::All),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            IceTransportPolicy::None => 0,
            IceTransportPolicy::Relay => 1,
            IceTransportPolicy::All => 3,
        }
    }
}

impl fmt::Display for IceTransportPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IceTransportPolicy::None => "none",
            IceTransportPolicy::Relay => "relay",
            IceTransportPolicy::All => "all",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundlePolicy {
    #[default]
    Balanced,
    MaxBundle,
    MaxCompat,
}

impl BundlePolicy {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(BundlePolicy::Balanced),
            1 => Some(BundlePolicy::MaxBundle),
            2 => Some(BundlePolicy::MaxCompat),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for BundlePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BundlePolicy::Balanced => "balanced",
            BundlePolicy::MaxBundle => "max-bundle",
            BundlePolicy::MaxCompat => "max-compat",
        })
    }
}

/// ICE servers plus transport and bundle policy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
    #[serde(default)]
    pub ice_transport_policy: IceTransportPolicy,
    #[serde(default)]
    pub bundle_policy: BundlePolicy,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ice_server(mut self, server: IceServer) -> Self {
        self.ice_servers.push(server);
        self
    }

    pub fn with_ice_servers(mut self, servers: impl IntoIterator<Item = IceServer>) -> Self {
        self.ice_servers.extend(servers);
        self
    }

    pub fn with_ice_transport_policy(mut self, policy: IceTransportPolicy) -> Self {
        self.ice_transport_policy = policy;
        self
    }

    pub fn with_bundle_policy(mut self, policy: BundlePolicy) -> Self {
        self.bundle_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            server.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Configuration::new();
        assert!(config.ice_servers.is_empty());
        assert_eq!(config.ice_transport_policy, IceTransportPolicy::All);
        assert_eq!(config.bundle_policy, BundlePolicy::Balanced);
    }

    #[test]
    fn test_builder() {
        let config = Configuration::new()
            .with_ice_server(IceServer::stun("stun:stun.example.org"))
            .with_ice_transport_policy(IceTransportPolicy::Relay)
            .with_bundle_policy(BundlePolicy::MaxBundle);
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_transport_policy, IceTransportPolicy::Relay);
        assert_eq!(config.bundle_policy, BundlePolicy::MaxBundle);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_reports_bad_server() {
        let config = Configuration::new().with_ice_server(IceServer::stun("badurl"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_raw_values() {
        assert_eq!(IceTransportPolicy::from_raw(2), None);
        assert_eq!(IceTransportPolicy::from_raw(3), Some(IceTransportPolicy::All));
        assert_eq!(BundlePolicy::from_raw(BundlePolicy::MaxCompat.as_raw()), Some(BundlePolicy::MaxCompat));
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Configuration::new().with_bundle_policy(BundlePolicy::MaxBundle)).unwrap();
        assert!(json.contains(r#""bundlePolicy":"max-bundle""#));
        assert!(json.contains(r#""iceTransportPolicy":"all""#));
    }
}
