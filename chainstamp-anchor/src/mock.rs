//! Mock blockchain service for testing and development.
//!
//! This module provides a scriptable in-memory implementation of the
//! `BlockchainService` trait. It records every broadcast and counts
//! every call so tests can assert on what reached the network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::script::Instruction;
use bitcoin::Transaction;
use parking_lot::RwLock;

use crate::errors::{AnchorError, Result};
use crate::provider::{
    BlockRef, BlockStats, BlockchainService, ProviderKind, ServiceCapabilities, ServiceOptions,
    TxStats, UnspentOutput,
};

/// Configuration for the mock service.
#[derive(Debug, Clone)]
pub struct MockServiceConfig {
    /// Provider this mock stands in for.
    pub kind: ProviderKind,
    /// Advertise Ethereum support.
    pub ethereum: bool,
    /// Fee rate reported by `estimate_fee_rate`.
    pub fee_rate: u64,
    /// Delay before every call.
    pub latency: Duration,
    /// Extra delay before a broadcast.
    pub push_latency: Duration,
    /// Accept broadcasts but lose the response, as if the connection dropped.
    pub lose_push_response: bool,
}

impl MockServiceConfig {
    /// Defaults for a provider.
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            ethereum: false,
            fee_rate: 10,
            latency: Duration::ZERO,
            push_latency: Duration::ZERO,
            lose_push_response: false,
        }
    }
}

/// In-memory implementation of [`BlockchainService`].
pub struct MockService {
    config: MockServiceConfig,
    failing: AtomicBool,
    unspent: RwLock<Vec<UnspentOutput>>,
    op_returns: RwLock<HashMap<String, String>>,
    transactions: RwLock<HashMap<String, TxStats>>,
    blocks: RwLock<Vec<BlockStats>>,
    eth_data: RwLock<HashMap<String, String>>,
    pushed: RwLock<Vec<String>>,
    calls: AtomicU64,
}

impl MockService {
    /// Create a healthy, empty mock for a provider.
    pub fn new(kind: ProviderKind) -> Self {
        Self::with_config(MockServiceConfig::new(kind))
    }

    /// Create with custom configuration.
    pub fn with_config(config: MockServiceConfig) -> Self {
        Self {
            config,
            failing: AtomicBool::new(false),
            unspent: RwLock::new(Vec::new()),
            op_returns: RwLock::new(HashMap::new()),
            transactions: RwLock::new(HashMap::new()),
            blocks: RwLock::new(Vec::new()),
            eth_data: RwLock::new(HashMap::new()),
            pushed: RwLock::new(Vec::new()),
            calls: AtomicU64::new(0),
        }
    }

    /// Start a builder.
    pub fn builder(kind: ProviderKind) -> MockServiceBuilder {
        MockServiceBuilder::new(kind)
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Add a spendable output.
    pub fn add_unspent(&self, output: UnspentOutput) {
        self.unspent.write().push(output);
    }

    /// Record a null-data payload for a transaction.
    pub fn add_op_return(&self, tx_id: impl Into<String>, payload_hex: impl Into<String>) {
        self.op_returns
            .write()
            .insert(tx_id.into(), payload_hex.into());
    }

    /// Add transaction statistics.
    pub fn add_transaction(&self, stats: TxStats) {
        self.transactions.write().insert(stats.id.clone(), stats);
    }

    /// Add a block.
    pub fn add_block(&self, block: BlockStats) {
        self.blocks.write().push(block);
    }

    /// Record Ethereum data for a transaction (unprefixed hex).
    pub fn add_eth_data(&self, tx_id: impl Into<String>, value: impl Into<String>) {
        self.eth_data.write().insert(tx_id.into(), value.into());
    }

    /// Raw transactions broadcast so far.
    pub fn pushed(&self) -> Vec<String> {
        self.pushed.read().clone()
    }

    /// Number of calls received, successful or not.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    async fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if self.config.latency > Duration::ZERO {
            tokio::time::sleep(self.config.latency).await;
        }

        if self.failing.load(Ordering::Relaxed) {
            return Err(AnchorError::ProviderTransport {
                provider: self.config.kind,
                message: "simulated failure".into(),
            });
        }

        Ok(())
    }

    fn find_block(&self, block: &BlockRef) -> Option<BlockStats> {
        self.blocks
            .read()
            .iter()
            .find(|b| match block {
                BlockRef::Height(h) => b.height == *h,
                BlockRef::Hash(h) => b.hash == *h,
            })
            .cloned()
    }

    fn decode(&self, raw_hex: &str) -> Result<Transaction> {
        let rejected = |message: String| AnchorError::ProviderTransport {
            provider: self.config.kind,
            message,
        };

        let bytes = hex::decode(raw_hex).map_err(|e| rejected(e.to_string()))?;
        bitcoin::consensus::deserialize(&bytes).map_err(|e| rejected(e.to_string()))
    }
}

fn op_return_payload(tx: &Transaction) -> Option<String> {
    tx.output
        .iter()
        .filter(|out| out.script_pubkey.is_op_return())
        .find_map(|out| {
            out.script_pubkey
                .instructions()
                .find_map(|ins| match ins {
                    Ok(Instruction::PushBytes(bytes)) => Some(hex::encode(bytes.as_bytes())),
                    _ => None,
                })
        })
}

#[async_trait]
impl BlockchainService for MockService {
    fn kind(&self) -> ProviderKind {
        self.config.kind
    }

    fn capabilities(&self) -> ServiceCapabilities {
        ServiceCapabilities {
            ethereum: self.config.ethereum,
        }
    }

    async fn unspent_outputs(
        &self,
        _address: &str,
        _options: &ServiceOptions,
    ) -> Result<Vec<UnspentOutput>> {
        self.enter().await?;
        Ok(self.unspent.read().clone())
    }

    async fn push_transaction(&self, raw_hex: &str, _options: &ServiceOptions) -> Result<String> {
        self.enter().await?;

        if self.config.push_latency > Duration::ZERO {
            tokio::time::sleep(self.config.push_latency).await;
        }

        let tx = self.decode(raw_hex)?;
        let tx_id = tx.compute_txid().to_string();

        if let Some(payload) = op_return_payload(&tx) {
            self.add_op_return(tx_id.clone(), payload);
        }
        self.pushed.write().push(raw_hex.to_string());

        if self.config.lose_push_response {
            return Err(AnchorError::BroadcastOutcomeUnknown {
                provider: self.config.kind,
                tx_id: String::new(),
                reason: "connection dropped after send".into(),
            });
        }

        Ok(tx_id)
    }

    async fn confirm_op_return(
        &self,
        tx_id: &str,
        expected_hex: &str,
        _options: &ServiceOptions,
    ) -> Result<bool> {
        self.enter().await?;
        Ok(self
            .op_returns
            .read()
            .get(tx_id)
            .is_some_and(|payload| payload == expected_hex))
    }

    async fn confirm_block_header(
        &self,
        block: &BlockRef,
        expected_root: &str,
        _options: &ServiceOptions,
    ) -> Result<bool> {
        self.enter().await?;
        Ok(self
            .find_block(block)
            .is_some_and(|b| b.merkle_root == expected_root))
    }

    async fn transaction_stats(&self, tx_id: &str, _options: &ServiceOptions) -> Result<TxStats> {
        self.enter().await?;
        self.transactions
            .read()
            .get(tx_id)
            .cloned()
            .ok_or_else(|| AnchorError::NotFound(format!("transaction {tx_id}")))
    }

    async fn block_stats(&self, block: &BlockRef, _options: &ServiceOptions) -> Result<BlockStats> {
        self.enter().await?;
        self.find_block(block)
            .ok_or_else(|| AnchorError::NotFound(format!("block {block}")))
    }

    async fn estimate_fee_rate(&self, _options: &ServiceOptions) -> Result<u64> {
        self.enter().await?;
        Ok(self.config.fee_rate)
    }

    async fn confirm_eth_data(
        &self,
        tx_id: &str,
        expected_value: &str,
        _options: &ServiceOptions,
    ) -> Result<bool> {
        self.enter().await?;

        if !self.config.ethereum {
            return Err(AnchorError::Unsupported {
                provider: self.config.kind,
                operation: "ethereum data confirmation",
            });
        }

        Ok(self
            .eth_data
            .read()
            .get(tx_id)
            .is_some_and(|value| value == expected_value))
    }
}

/// Builder for creating mock services.
pub struct MockServiceBuilder {
    config: MockServiceConfig,
    failing: bool,
    unspent: Vec<UnspentOutput>,
    op_returns: Vec<(String, String)>,
    transactions: Vec<TxStats>,
    blocks: Vec<BlockStats>,
    eth_data: Vec<(String, String)>,
}

impl MockServiceBuilder {
    /// Create a new builder.
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            config: MockServiceConfig::new(kind),
            failing: false,
            unspent: Vec::new(),
            op_returns: Vec::new(),
            transactions: Vec::new(),
            blocks: Vec::new(),
            eth_data: Vec::new(),
        }
    }

    /// Fail every call.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Advertise Ethereum support.
    pub fn ethereum(mut self) -> Self {
        self.config.ethereum = true;
        self
    }

    /// Set the reported fee rate.
    pub fn fee_rate(mut self, rate: u64) -> Self {
        self.config.fee_rate = rate;
        self
    }

    /// Set latency for every call.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.config.latency = latency;
        self
    }

    /// Set extra latency for broadcasts.
    pub fn push_latency(mut self, latency: Duration) -> Self {
        self.config.push_latency = latency;
        self
    }

    /// Accept broadcasts without answering them.
    pub fn lose_push_response(mut self) -> Self {
        self.config.lose_push_response = true;
        self
    }

    /// Add a spendable output.
    pub fn unspent(mut self, source_tx_id: impl Into<String>, output_index: u32, amount: u64) -> Self {
        self.unspent
            .push(UnspentOutput::new(source_tx_id, output_index, amount));
        self
    }

    /// Record a null-data payload.
    pub fn op_return(mut self, tx_id: impl Into<String>, payload_hex: impl Into<String>) -> Self {
        self.op_returns.push((tx_id.into(), payload_hex.into()));
        self
    }

    /// Add transaction statistics.
    pub fn transaction(mut self, stats: TxStats) -> Self {
        self.transactions.push(stats);
        self
    }

    /// Add a block.
    pub fn block(mut self, block: BlockStats) -> Self {
        self.blocks.push(block);
        self
    }

    /// Record Ethereum data.
    pub fn eth_data(mut self, tx_id: impl Into<String>, value: impl Into<String>) -> Self {
        self.eth_data.push((tx_id.into(), value.into()));
        self
    }

    /// Build the mock service.
    pub fn build(self) -> MockService {
        let service = MockService::with_config(self.config);
        service.set_failing(self.failing);

        for output in self.unspent {
            service.add_unspent(output);
        }
        for (tx_id, payload) in self.op_returns {
            service.add_op_return(tx_id, payload);
        }
        for stats in self.transactions {
            service.add_transaction(stats);
        }
        for block in self.blocks {
            service.add_block(block);
        }
        for (tx_id, value) in self.eth_data {
            service.add_eth_data(tx_id, value);
        }

        service
    }
}
