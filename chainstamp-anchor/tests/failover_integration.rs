//! Failover behavior of the orchestrator across mock services.
//!
//! These tests drive `BlockchainAnchor` end to end against in-memory
//! services and check ordering, fallback and error aggregation.

use std::sync::Arc;

use bitcoin::secp256k1::SecretKey;
use bitcoin::{NetworkKind, PrivateKey};
use chainstamp_anchor::{
    AnchorConfig, AnchorError, BlockchainAnchor, MockService, ProviderKind, Selection,
    ServiceTable,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("chainstamp_anchor=debug")
        .with_test_writer()
        .try_init();
}

fn testnet_wif() -> String {
    let secret = SecretKey::from_slice(&[0x22; 32]).unwrap();
    PrivateKey::new(secret, NetworkKind::Test).to_wif()
}

/// Config that makes all three providers eligible.
fn full_config() -> AnchorConfig {
    AnchorConfig::testnet()
        .with_credential(ProviderKind::Blockcypher, "token")
        .with_credential(ProviderKind::InsightApi, "https://insight.example/api")
}

struct Services {
    cypher: Arc<MockService>,
    insight: Arc<MockService>,
    blockr: Arc<MockService>,
}

impl Services {
    fn new(cypher: MockService, insight: MockService, blockr: MockService) -> Self {
        Self {
            cypher: Arc::new(cypher),
            insight: Arc::new(insight),
            blockr: Arc::new(blockr),
        }
    }

    fn table(&self) -> ServiceTable {
        ServiceTable::new()
            .with(self.cypher.clone())
            .with(self.insight.clone())
            .with(self.blockr.clone())
    }

    fn total_calls(&self) -> u64 {
        self.cypher.call_count() + self.insight.call_count() + self.blockr.call_count()
    }
}

fn failing(kind: ProviderKind) -> MockService {
    MockService::builder(kind).failing().build()
}

#[tokio::test]
async fn third_provider_answers_after_two_failures() {
    init_tracing();
    let services = Services::new(
        failing(ProviderKind::Blockcypher),
        failing(ProviderKind::InsightApi),
        MockService::builder(ProviderKind::Blockr).fee_rate(37).build(),
    );
    let anchor = BlockchainAnchor::new(&testnet_wif(), full_config(), &services.table()).unwrap();

    assert_eq!(anchor.estimate_fee_rate().await.unwrap(), 37);
    assert_eq!(services.cypher.call_count(), 1);
    assert_eq!(services.insight.call_count(), 1);
    assert_eq!(services.blockr.call_count(), 1);
}

#[tokio::test]
async fn total_failure_lists_every_provider_in_order() {
    init_tracing();
    let services = Services::new(
        failing(ProviderKind::Blockcypher),
        failing(ProviderKind::InsightApi),
        failing(ProviderKind::Blockr),
    );
    let anchor = BlockchainAnchor::new(&testnet_wif(), full_config(), &services.table()).unwrap();

    let err = anchor.tx_stats(&"ab".repeat(32)).await.unwrap_err();

    let order: Vec<_> = err.failures().iter().map(|f| f.provider).collect();
    assert_eq!(
        order,
        vec![
            ProviderKind::Blockcypher,
            ProviderKind::InsightApi,
            ProviderKind::Blockr
        ]
    );
    assert!(err
        .failures()
        .iter()
        .all(|f| matches!(f.error, AnchorError::ProviderTransport { .. })));

    let rendered = err.to_string();
    assert!(rendered.contains("blockcypher"));
    assert!(rendered.contains("insightapi"));
    assert!(rendered.contains("blockr"));
}

#[tokio::test]
async fn explicit_provider_never_falls_back() {
    init_tracing();
    let services = Services::new(
        failing(ProviderKind::Blockcypher),
        MockService::new(ProviderKind::InsightApi),
        MockService::new(ProviderKind::Blockr),
    );
    let config = full_config().with_service("blockcypher");
    let anchor = BlockchainAnchor::new(&testnet_wif(), config, &services.table()).unwrap();

    assert_eq!(
        anchor.providers().selection(),
        Selection::Explicit(ProviderKind::Blockcypher)
    );

    let err = anchor.estimate_fee_rate().await.unwrap_err();
    assert_eq!(err.failures().len(), 1);
    assert_eq!(err.failures()[0].provider, ProviderKind::Blockcypher);
    assert_eq!(services.insight.call_count(), 0);
    assert_eq!(services.blockr.call_count(), 0);
}

#[tokio::test]
async fn embed_falls_over_to_a_funded_provider() {
    init_tracing();
    let services = Services::new(
        failing(ProviderKind::Blockcypher),
        MockService::new(ProviderKind::InsightApi),
        MockService::builder(ProviderKind::Blockr)
            .unspent("33".repeat(32), 1, 75_000)
            .build(),
    );
    let anchor = BlockchainAnchor::new(&testnet_wif(), full_config(), &services.table()).unwrap();

    let result = anchor.embed(b"fingerprint").await.unwrap();

    assert_eq!(result.provider, ProviderKind::Blockr);
    assert_eq!(services.blockr.pushed(), vec![result.raw_tx.clone()]);
    assert!(services.insight.pushed().is_empty());
}

#[tokio::test]
async fn no_funds_on_every_provider_is_aggregated() {
    init_tracing();
    let services = Services::new(
        MockService::new(ProviderKind::Blockcypher),
        MockService::new(ProviderKind::InsightApi),
        MockService::new(ProviderKind::Blockr),
    );
    let anchor = BlockchainAnchor::new(&testnet_wif(), full_config(), &services.table()).unwrap();

    let err = anchor.embed(b"x").await.unwrap_err();

    assert_eq!(err.failures().len(), 3);
    assert!(err
        .failures()
        .iter()
        .all(|f| matches!(f.error, AnchorError::NoFunds)));
    assert_eq!(services.total_calls(), 3);
}

#[tokio::test]
async fn excluded_provider_is_skipped() {
    init_tracing();
    let services = Services::new(
        MockService::builder(ProviderKind::Blockcypher).fee_rate(1).build(),
        MockService::builder(ProviderKind::InsightApi).fee_rate(2).build(),
        MockService::builder(ProviderKind::Blockr).fee_rate(3).build(),
    );
    let config = full_config().without(ProviderKind::Blockcypher);
    let anchor = BlockchainAnchor::new(&testnet_wif(), config, &services.table()).unwrap();

    assert_eq!(
        anchor.providers().kinds(),
        vec![ProviderKind::InsightApi, ProviderKind::Blockr]
    );
    assert_eq!(anchor.estimate_fee_rate().await.unwrap(), 2);
    assert_eq!(services.cypher.call_count(), 0);
}

#[tokio::test]
async fn unanswered_push_is_reported_on_later_success() {
    init_tracing();
    let services = Services::new(
        MockService::builder(ProviderKind::Blockcypher)
            .unspent("aa".repeat(32), 0, 500_000)
            .push_latency(std::time::Duration::from_secs(3))
            .build(),
        failing(ProviderKind::InsightApi),
        MockService::builder(ProviderKind::Blockr)
            .unspent("bb".repeat(32), 1, 500_000)
            .build(),
    );
    let config = full_config().with_timeout(1);
    let anchor = BlockchainAnchor::new(&testnet_wif(), config, &services.table()).unwrap();

    let result = anchor.embed(b"late push").await.unwrap();

    assert_eq!(result.provider, ProviderKind::Blockr);
    assert_eq!(services.blockr.pushed().len(), 1);
    assert_eq!(result.unknown_broadcasts.len(), 1);
    assert_ne!(result.unknown_broadcasts[0], result.tx_id);
}

#[tokio::test]
async fn dropped_push_response_carries_the_computed_txid() {
    init_tracing();
    let services = Services::new(
        MockService::builder(ProviderKind::Blockcypher)
            .unspent("cc".repeat(32), 0, 500_000)
            .lose_push_response()
            .build(),
        failing(ProviderKind::InsightApi),
        failing(ProviderKind::Blockr),
    );
    let anchor = BlockchainAnchor::new(&testnet_wif(), full_config(), &services.table()).unwrap();

    let err = anchor.split_outputs(2).await.unwrap_err();

    let pushed = services.cypher.pushed();
    assert_eq!(pushed.len(), 1);

    let tx: bitcoin::Transaction =
        bitcoin::consensus::encode::deserialize(&hex::decode(&pushed[0]).unwrap()).unwrap();
    assert_eq!(err.unknown_broadcasts(), vec![tx.compute_txid().to_string()]);
}

#[tokio::test]
async fn same_transaction_accepted_later_is_not_unknown() {
    init_tracing();
    let services = Services::new(
        MockService::builder(ProviderKind::Blockcypher)
            .unspent("dd".repeat(32), 0, 500_000)
            .lose_push_response()
            .build(),
        MockService::builder(ProviderKind::InsightApi)
            .unspent("dd".repeat(32), 0, 500_000)
            .build(),
        failing(ProviderKind::Blockr),
    );
    let anchor = BlockchainAnchor::new(&testnet_wif(), full_config(), &services.table()).unwrap();

    let result = anchor.embed(b"same inputs").await.unwrap();

    assert_eq!(result.provider, ProviderKind::InsightApi);
    assert_eq!(services.cypher.pushed(), services.insight.pushed());
    assert!(result.unknown_broadcasts.is_empty());
}
