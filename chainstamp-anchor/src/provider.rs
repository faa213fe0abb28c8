//! Service trait and types for blockchain-data providers.
//!
//! This module defines the contract every provider adapter must
//! implement, plus the plain records that flow across it.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Network;
use crate::errors::{AnchorError, Result};

/// A known blockchain-data provider.
///
/// The set is closed: adding a provider means adding a variant here and
/// an entry in the service table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// BlockCypher REST API.
    Blockcypher,
    /// An Insight API deployment.
    #[serde(rename = "insightapi")]
    InsightApi,
    /// Blockr.io REST API.
    Blockr,
}

impl ProviderKind {
    /// All known providers in default priority order.
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Blockcypher,
        ProviderKind::InsightApi,
        ProviderKind::Blockr,
    ];

    /// Lowercase identifier.
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Blockcypher => "blockcypher",
            ProviderKind::InsightApi => "insightapi",
            ProviderKind::Blockr => "blockr",
        }
    }

    /// Name of the credential this provider needs, if any.
    pub fn required_credential(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Blockcypher => Some("API token"),
            ProviderKind::InsightApi => Some("API base URL"),
            ProviderKind::Blockr => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = AnchorError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.name() == lower)
            .ok_or_else(|| AnchorError::Configuration(format!("unknown provider: {s}")))
    }
}

/// Per-call options handed to a provider.
///
/// Built fresh for every invocation; carries only what that provider needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Network to query.
    pub network: Network,
    /// Token or base URL, present only for providers that require one.
    pub credential: Option<String>,
}

impl ServiceOptions {
    /// Create options for a network.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            credential: None,
        }
    }

    /// Attach a credential.
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Whether the testnet is selected.
    pub fn is_testnet(&self) -> bool {
        self.network == Network::Test
    }

    /// The credential, or a configuration error naming what is missing.
    pub fn require_credential(&self, kind: ProviderKind) -> Result<&str> {
        self.credential.as_deref().ok_or_else(|| {
            AnchorError::Configuration(format!(
                "{kind} requires {}",
                kind.required_credential().unwrap_or("a credential")
            ))
        })
    }
}

/// Capabilities advertised by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCapabilities {
    /// Supports Ethereum data confirmation.
    pub ethereum: bool,
}

/// A spendable output reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    /// Transaction holding the output.
    pub source_tx_id: String,
    /// Index of the output in that transaction.
    pub output_index: u32,
    /// Value in satoshi.
    pub amount_satoshi: u64,
}

impl UnspentOutput {
    /// Create a new unspent output.
    pub fn new(source_tx_id: impl Into<String>, output_index: u32, amount_satoshi: u64) -> Self {
        Self {
            source_tx_id: source_tx_id.into(),
            output_index,
            amount_satoshi,
        }
    }
}

/// Transaction statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStats {
    /// Transaction id.
    pub id: String,
    /// Height of the containing block, if confirmed.
    pub block_height: Option<u64>,
    /// Hash of the containing block, if confirmed.
    pub block_hash: Option<String>,
    /// Confirmation count.
    pub confirmations: u64,
    /// Fee paid in satoshi.
    pub fee_satoshi: u64,
    /// Serialized size in bytes.
    pub size_bytes: u64,
    /// Hex payload of the null-data output, if any.
    pub op_return: Option<String>,
}

/// Block statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStats {
    /// Block hash.
    pub hash: String,
    /// Block height.
    pub height: u64,
    /// Merkle root as reported by the provider.
    pub merkle_root: String,
    /// Transaction ids in block order.
    pub tx_ids: Vec<String>,
    /// Block time (unix seconds).
    pub time: i64,
}

/// A block addressed by height or hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockRef {
    /// Block height.
    Height(u64),
    /// 64-hex-digit block hash.
    Hash(String),
}

impl BlockRef {
    /// Parse a height or hash, rejecting anything else.
    pub fn parse(height_or_hash: &str) -> Option<Self> {
        let s = height_or_hash.trim();
        if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(BlockRef::Hash(s.to_ascii_lowercase()))
        } else if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            s.parse().ok().map(BlockRef::Height)
        } else {
            None
        }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockRef::Height(h) => write!(f, "{h}"),
            BlockRef::Hash(h) => f.write_str(h),
        }
    }
}

/// A blockchain-data provider.
///
/// Implementations map one vendor API onto these operations. They must
/// not retry on their own: a "not found" or "bad identifier" answer is
/// `Ok(false)` for confirmations and [`AnchorError::NotFound`] for stat
/// queries. Retrying and failover belong to the caller.
#[async_trait]
pub trait BlockchainService: Send + Sync {
    /// Which provider this is.
    fn kind(&self) -> ProviderKind;

    /// Advertised capabilities.
    fn capabilities(&self) -> ServiceCapabilities {
        ServiceCapabilities::default()
    }

    /// Unspent outputs for an address, in no particular order.
    async fn unspent_outputs(
        &self,
        address: &str,
        options: &ServiceOptions,
    ) -> Result<Vec<UnspentOutput>>;

    /// Broadcast a raw transaction, returning its id.
    async fn push_transaction(&self, raw_hex: &str, options: &ServiceOptions) -> Result<String>;

    /// Whether some null-data output of the transaction carries exactly `expected_hex`.
    async fn confirm_op_return(
        &self,
        tx_id: &str,
        expected_hex: &str,
        options: &ServiceOptions,
    ) -> Result<bool>;

    /// Whether the block's merkle root equals `expected_root`.
    async fn confirm_block_header(
        &self,
        block: &BlockRef,
        expected_root: &str,
        options: &ServiceOptions,
    ) -> Result<bool>;

    /// Statistics for a transaction.
    async fn transaction_stats(&self, tx_id: &str, options: &ServiceOptions) -> Result<TxStats>;

    /// Confirmation count for a transaction.
    async fn confirmation_count(&self, tx_id: &str, options: &ServiceOptions) -> Result<u64> {
        Ok(self.transaction_stats(tx_id, options).await?.confirmations)
    }

    /// Statistics for a block.
    async fn block_stats(&self, block: &BlockRef, options: &ServiceOptions) -> Result<BlockStats>;

    /// Transaction ids of a block.
    async fn block_tx_ids(&self, block: &BlockRef, options: &ServiceOptions) -> Result<Vec<String>> {
        Ok(self.block_stats(block, options).await?.tx_ids)
    }

    /// Estimated fee rate in satoshi per byte.
    async fn estimate_fee_rate(&self, options: &ServiceOptions) -> Result<u64>;

    /// Whether an Ethereum transaction carries `expected_value`.
    ///
    /// Both arguments arrive without a `0x` prefix.
    async fn confirm_eth_data(
        &self,
        _tx_id: &str,
        _expected_value: &str,
        _options: &ServiceOptions,
    ) -> Result<bool> {
        Err(AnchorError::Unsupported {
            provider: self.kind(),
            operation: "ethereum data confirmation",
        })
    }
}
