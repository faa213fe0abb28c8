//! Anchor orchestrator configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{AnchorError, Result};
use crate::provider::ProviderKind;

/// Identifier selecting failover across every eligible provider.
pub const ANY_SERVICE: &str = "any";

/// Default fee per anchoring transaction.
pub const DEFAULT_FEE_SATOSHI: u64 = 10_000;

/// Default per-call deadline.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Bitcoin network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Network {
    /// Bitcoin mainnet.
    #[default]
    Main,
    /// Bitcoin testnet.
    Test,
}

impl Network {
    /// Get the network name.
    pub fn name(&self) -> &'static str {
        match self {
            Network::Main => "mainnet",
            Network::Test => "testnet",
        }
    }

    /// Convert to bitcoin crate network type.
    pub fn to_bitcoin_network(&self) -> bitcoin::Network {
        match self {
            Network::Main => bitcoin::Network::Bitcoin,
            Network::Test => bitcoin::Network::Testnet,
        }
    }
}

/// Configuration for the anchor orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    /// Use the Bitcoin testnet.
    pub use_testnet: bool,

    /// Provider identifier, or `"any"` for failover mode.
    pub service: String,

    /// Fee per transaction in satoshi.
    pub fee_satoshi: u64,

    /// Credentials (token or base URL) by provider.
    pub credentials: BTreeMap<ProviderKind, String>,

    /// Providers never to use.
    pub excluded: Vec<ProviderKind>,

    /// Deadline for each remote call, in seconds.
    pub timeout_secs: u64,
}

impl AnchorConfig {
    /// Create a mainnet configuration in failover mode.
    pub fn new() -> Self {
        Self {
            use_testnet: false,
            service: ANY_SERVICE.to_string(),
            fee_satoshi: DEFAULT_FEE_SATOSHI,
            credentials: BTreeMap::new(),
            excluded: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Create a testnet configuration in failover mode.
    pub fn testnet() -> Self {
        Self::new().with_testnet(true)
    }

    /// Select the network.
    pub fn with_testnet(mut self, use_testnet: bool) -> Self {
        self.use_testnet = use_testnet;
        self
    }

    /// Pin a single provider (or `"any"`).
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Set the fee.
    pub fn with_fee(mut self, fee_satoshi: u64) -> Self {
        self.fee_satoshi = fee_satoshi;
        self
    }

    /// Supply a provider credential.
    pub fn with_credential(mut self, provider: ProviderKind, credential: impl Into<String>) -> Self {
        self.credentials.insert(provider, credential.into());
        self
    }

    /// Exclude a provider.
    pub fn without(mut self, provider: ProviderKind) -> Self {
        if !self.excluded.contains(&provider) {
            self.excluded.push(provider);
        }
        self
    }

    /// Set the per-call deadline.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Selected network.
    pub fn network(&self) -> Network {
        if self.use_testnet {
            Network::Test
        } else {
            Network::Main
        }
    }

    /// Credential for a provider, ignoring blank values.
    pub fn credential(&self, provider: ProviderKind) -> Option<&str> {
        self.credentials
            .get(&provider)
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
    }

    /// Parse the service selection: `None` for failover mode.
    pub fn explicit_service(&self) -> Result<Option<ProviderKind>> {
        let service = self.service.trim();
        if service.is_empty() || service.eq_ignore_ascii_case(ANY_SERVICE) {
            Ok(None)
        } else {
            service.parse().map(Some)
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.fee_satoshi == 0 {
            return Err(AnchorError::Configuration(
                "fee must be at least 1 satoshi".into(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(AnchorError::Configuration(
                "timeout must be at least 1 second".into(),
            ));
        }

        self.explicit_service()?;

        Ok(())
    }
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = AnchorConfig::testnet()
            .with_service("BlockCypher")
            .with_fee(20_000)
            .with_credential(ProviderKind::Blockcypher, "token")
            .without(ProviderKind::Blockr)
            .with_timeout(5);

        assert_eq!(config.network(), Network::Test);
        assert_eq!(config.fee_satoshi, 20_000);
        assert_eq!(config.credential(ProviderKind::Blockcypher), Some("token"));
        assert_eq!(config.excluded, vec![ProviderKind::Blockr]);
        assert_eq!(
            config.explicit_service().unwrap(),
            Some(ProviderKind::Blockcypher)
        );
    }

    #[test]
    fn test_defaults() {
        let config = AnchorConfig::default();
        assert_eq!(config.network(), Network::Main);
        assert_eq!(config.fee_satoshi, 10_000);
        assert_eq!(config.explicit_service().unwrap(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(AnchorConfig::new().with_timeout(0).validate().is_err());
        assert!(AnchorConfig::new().with_fee(0).validate().is_err());
        assert!(AnchorConfig::new().with_service("nope").validate().is_err());
    }

    #[test]
    fn test_blank_credential_is_absent() {
        let config = AnchorConfig::new().with_credential(ProviderKind::InsightApi, "  ");
        assert_eq!(config.credential(ProviderKind::InsightApi), None);
    }

    #[test]
    fn test_deserialize_partial() {
        let json = r#"{"use_testnet": true, "credentials": {"blockcypher": "abc"}}"#;
        let config: AnchorConfig = serde_json::from_str(json).unwrap();

        assert!(config.use_testnet);
        assert_eq!(config.service, "any");
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.credential(ProviderKind::Blockcypher), Some("abc"));
    }
}
