//! The anchor orchestrator.
//!
//! Entry point for every public operation. Applies the provider selection
//! policy, validates input before any provider is contacted, and hands the
//! per-provider work to the failover controller.

use std::time::Duration;

use bitcoin::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{AnchorConfig, Network};
use crate::errors::{AnchorError, ProviderFailure, Result};
use crate::failover::Failover;
use crate::keys::KeyMaterial;
use crate::provider::{BlockRef, BlockStats, ProviderKind, TxStats, UnspentOutput};
use crate::registry::{ProviderEntry, ProviderList, Selection, ServiceTable};
use crate::tx::{self, SignedTransaction};
use crate::MAX_OP_RETURN_SIZE;

/// Result of an embed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorResult {
    /// Transaction id reported by the provider.
    pub tx_id: String,
    /// Serialized transaction, hex.
    pub raw_tx: String,
    /// Provider that accepted the broadcast.
    pub provider: ProviderKind,
    /// When the broadcast was accepted.
    pub broadcast_at: DateTime<Utc>,
    /// Earlier broadcasts in this call whose outcome is unknown.
    ///
    /// Non-empty means another transaction spending the same outputs may
    /// also have reached the network.
    #[serde(default)]
    pub unknown_broadcasts: Vec<String>,
}

/// Result of a split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitResult {
    /// Transaction id reported by the provider.
    pub tx_id: String,
    /// Serialized transaction, hex.
    pub raw_tx: String,
    /// Number of outputs created.
    pub count: usize,
    /// Provider that accepted the broadcast.
    pub provider: ProviderKind,
    /// When the broadcast was accepted.
    pub broadcast_at: DateTime<Utc>,
    /// Earlier broadcasts in this call whose outcome is unknown.
    ///
    /// Non-empty means another transaction spending the same outputs may
    /// also have reached the network.
    #[serde(default)]
    pub unknown_broadcasts: Vec<String>,
}

/// Anchors data into Bitcoin and verifies anchors through external providers.
pub struct BlockchainAnchor {
    keys: KeyMaterial,
    network: Network,
    fee_satoshi: u64,
    providers: ProviderList,
    failover: Failover,
}

impl BlockchainAnchor {
    /// Create an orchestrator for a WIF private key.
    ///
    /// Fails if the configuration is invalid, the key does not decode for
    /// the selected network, the explicit provider is unusable, or no
    /// provider is eligible at all.
    pub fn new(wif: &str, config: AnchorConfig, table: &ServiceTable) -> Result<Self> {
        config.validate()?;

        let network = config.network();
        let keys = KeyMaterial::from_wif(wif, network)?;
        let providers = ProviderList::build(&config, table)?;

        if providers.is_empty() {
            return Err(AnchorError::Configuration(
                "no blockchain service is eligible".into(),
            ));
        }

        info!(
            network = network.name(),
            selection = ?providers.selection(),
            providers = ?providers.kinds(),
            address = %keys.address(),
            "blockchain anchor ready"
        );

        Ok(Self {
            keys,
            network,
            fee_satoshi: config.fee_satoshi,
            providers,
            failover: Failover::new(Duration::from_secs(config.timeout_secs)),
        })
    }

    /// The anchoring address.
    pub fn address(&self) -> &Address {
        self.keys.address()
    }

    /// The configured network.
    pub fn network(&self) -> Network {
        self.network
    }

    /// Eligible providers in priority order.
    pub fn providers(&self) -> &ProviderList {
        &self.providers
    }

    /// Embed `payload` in a null-data output using the configured fee.
    pub async fn embed(&self, payload: &[u8]) -> Result<AnchorResult> {
        self.embed_with_fee(payload, self.fee_satoshi).await
    }

    /// Embed a hex-encoded payload using the configured fee.
    pub async fn embed_hex(&self, payload_hex: &str) -> Result<AnchorResult> {
        let payload = hex::decode(payload_hex.trim())
            .map_err(|e| AnchorError::InvalidPayload(e.to_string()))?;
        self.embed(&payload).await
    }

    /// Embed `payload` paying `fee_satoshi`.
    pub async fn embed_with_fee(&self, payload: &[u8], fee_satoshi: u64) -> Result<AnchorResult> {
        if payload.len() > MAX_OP_RETURN_SIZE {
            return Err(AnchorError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_OP_RETURN_SIZE,
            });
        }

        let (mut result, failed) = self
            .failover
            .run_recovering(self.providers.entries(), "embed", move |entry| async move {
                let unspent = self.fetch_unspent(&entry).await?;
                let signed = tx::build_embed_tx(&unspent, fee_satoshi, payload, &self.keys)?;
                let raw_tx = signed.raw_hex.clone();
                let tx_id = self.broadcast(&entry, signed, 1, 2).await?;

                Ok(AnchorResult {
                    tx_id,
                    raw_tx,
                    provider: entry.kind(),
                    broadcast_at: Utc::now(),
                    unknown_broadcasts: Vec::new(),
                })
            })
            .await?;

        result.unknown_broadcasts = unknown_broadcasts(&failed, &result.tx_id);
        Ok(result)
    }

    /// Split the balance into at most `max_outputs` outputs using the configured fee.
    pub async fn split_outputs(&self, max_outputs: usize) -> Result<SplitResult> {
        self.split_outputs_with_fee(max_outputs, self.fee_satoshi)
            .await
    }

    /// Split the balance into at most `max_outputs` outputs paying `fee_satoshi`.
    pub async fn split_outputs_with_fee(
        &self,
        max_outputs: usize,
        fee_satoshi: u64,
    ) -> Result<SplitResult> {
        if max_outputs == 0 {
            return Err(AnchorError::Configuration(
                "max outputs must be at least 1".into(),
            ));
        }

        let (mut result, failed) = self
            .failover
            .run_recovering(self.providers.entries(), "split outputs", move |entry| async move {
                let unspent = self.fetch_unspent(&entry).await?;
                let (signed, count) =
                    tx::build_split_tx(&unspent, fee_satoshi, max_outputs, &self.keys)?;
                let raw_tx = signed.raw_hex.clone();
                let tx_id = self.broadcast(&entry, signed, unspent.len(), count).await?;

                Ok(SplitResult {
                    tx_id,
                    raw_tx,
                    count,
                    provider: entry.kind(),
                    broadcast_at: Utc::now(),
                    unknown_broadcasts: Vec::new(),
                })
            })
            .await?;

        result.unknown_broadcasts = unknown_broadcasts(&failed, &result.tx_id);
        Ok(result)
    }

    /// Whether the transaction carries exactly `expected_hex` in a null-data output.
    pub async fn confirm_op_return(&self, tx_id: &str, expected_hex: &str) -> Result<bool> {
        self.run("confirm op-return", move |entry| async move {
            self.failover
                .call(
                    entry
                        .service
                        .confirm_op_return(tx_id, expected_hex, &entry.options),
                )
                .await
        })
        .await
    }

    /// Whether the block's merkle root is exactly `expected_root`.
    ///
    /// A malformed height or hash is answered `false` without contacting
    /// any provider.
    pub async fn confirm_block_header(&self, height_or_hash: &str, expected_root: &str) -> Result<bool> {
        let Some(block) = BlockRef::parse(height_or_hash) else {
            debug!(height_or_hash, "unparseable block reference");
            return Ok(false);
        };
        let block = &block;

        self.run("confirm block header", move |entry| async move {
            self.failover
                .call(
                    entry
                        .service
                        .confirm_block_header(block, expected_root, &entry.options),
                )
                .await
        })
        .await
    }

    /// Whether the Ethereum transaction carries `expected_value`.
    ///
    /// Both arguments may carry a `0x` prefix. Only providers advertising
    /// Ethereum support are tried.
    pub async fn confirm_eth_data(&self, tx_id: &str, expected_value: &str) -> Result<bool> {
        let tx_id = strip_hex_prefix(tx_id);
        let expected_value = strip_hex_prefix(expected_value);

        let queue: Vec<ProviderEntry> = self
            .providers
            .entries()
            .iter()
            .filter(|entry| entry.service.capabilities().ethereum)
            .cloned()
            .collect();

        if queue.is_empty() {
            return Err(match self.providers.selection() {
                Selection::Explicit(provider) => AnchorError::Unsupported {
                    provider,
                    operation: "ethereum data confirmation",
                },
                Selection::Any => AnchorError::Configuration(
                    "no eligible provider supports ethereum data confirmation".into(),
                ),
            });
        }

        self.failover
            .run(&queue, "confirm eth data", move |entry| async move {
                self.failover
                    .call(
                        entry
                            .service
                            .confirm_eth_data(tx_id, expected_value, &entry.options),
                    )
                    .await
            })
            .await
    }

    /// Statistics for a transaction.
    pub async fn tx_stats(&self, tx_id: &str) -> Result<TxStats> {
        self.run("transaction stats", move |entry| async move {
            self.failover
                .call(entry.service.transaction_stats(tx_id, &entry.options))
                .await
        })
        .await
    }

    /// Confirmation count for a transaction.
    pub async fn confirmation_count(&self, tx_id: &str) -> Result<u64> {
        self.run("confirmation count", move |entry| async move {
            self.failover
                .call(entry.service.confirmation_count(tx_id, &entry.options))
                .await
        })
        .await
    }

    /// Statistics for a block by height or hash.
    pub async fn block_stats(&self, height_or_hash: &str) -> Result<BlockStats> {
        let block = &parse_block(height_or_hash)?;

        self.run("block stats", move |entry| async move {
            self.failover
                .call(entry.service.block_stats(block, &entry.options))
                .await
        })
        .await
    }

    /// Transaction ids of a block by height or hash.
    pub async fn block_tx_ids(&self, height_or_hash: &str) -> Result<Vec<String>> {
        let block = &parse_block(height_or_hash)?;

        self.run("block tx ids", move |entry| async move {
            self.failover
                .call(entry.service.block_tx_ids(block, &entry.options))
                .await
        })
        .await
    }

    /// Estimated fee rate in satoshi per byte.
    pub async fn estimate_fee_rate(&self) -> Result<u64> {
        self.run("estimate fee rate", move |entry| async move {
            self.failover
                .call(entry.service.estimate_fee_rate(&entry.options))
                .await
        })
        .await
    }

    async fn run<T, F, Fut>(&self, operation: &'static str, attempt: F) -> Result<T>
    where
        F: FnMut(ProviderEntry) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.failover
            .run(self.providers.entries(), operation, attempt)
            .await
    }

    async fn fetch_unspent(&self, entry: &ProviderEntry) -> Result<Vec<UnspentOutput>> {
        let address = self.keys.address().to_string();
        self.failover
            .call(entry.service.unspent_outputs(&address, &entry.options))
            .await
    }

    /// Push a signed transaction. A push that exceeds the deadline, or that
    /// the adapter reports as sent but unanswered, has an unknown outcome and
    /// is reported with the locally computed id.
    async fn broadcast(
        &self,
        entry: &ProviderEntry,
        signed: SignedTransaction,
        inputs: usize,
        outputs: usize,
    ) -> Result<String> {
        let provider = entry.kind();
        let push = entry.service.push_transaction(&signed.raw_hex, &entry.options);

        let tx_id = match tokio::time::timeout(self.failover.timeout(), push).await {
            Ok(Ok(tx_id)) => tx_id,
            Ok(Err(AnchorError::BroadcastOutcomeUnknown { reason, .. })) => {
                return Err(AnchorError::BroadcastOutcomeUnknown {
                    provider,
                    tx_id: signed.tx_id,
                    reason,
                })
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(AnchorError::BroadcastOutcomeUnknown {
                    provider,
                    tx_id: signed.tx_id,
                    reason: format!(
                        "no response within {} seconds",
                        self.failover.timeout().as_secs()
                    ),
                })
            }
        };

        if tx_id != signed.tx_id {
            debug!(%provider, reported = %tx_id, computed = %signed.tx_id, "provider reported a different txid");
        }

        info!(%provider, tx_id = %tx_id, inputs, outputs, "transaction broadcast");
        Ok(tx_id)
    }
}

impl std::fmt::Debug for BlockchainAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainAnchor")
            .field("address", &self.keys.address().to_string())
            .field("network", &self.network)
            .field("fee_satoshi", &self.fee_satoshi)
            .field("providers", &self.providers)
            .finish()
    }
}

/// Ids of unknown-outcome broadcasts among `failed`, other than `accepted`.
fn unknown_broadcasts(failed: &[ProviderFailure], accepted: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();

    for id in failed.iter().flat_map(|f| f.error.unknown_broadcasts()) {
        if id != accepted && !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_string());
        }
    }

    if !ids.is_empty() {
        warn!(accepted, unknown = ?ids, "broadcast succeeded after pushes with unknown outcome");
    }
    ids
}

fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

fn parse_block(height_or_hash: &str) -> Result<BlockRef> {
    BlockRef::parse(height_or_hash)
        .ok_or_else(|| AnchorError::NotFound(format!("block {height_or_hash}")))
}
