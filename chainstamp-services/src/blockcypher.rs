//! BlockCypher REST adapter.
//!
//! Needs an API token. The only provider here that can also read
//! Ethereum transactions.

use async_trait::async_trait;
use chainstamp_anchor::{
    BlockRef, BlockStats, BlockchainService, ProviderKind, ServiceCapabilities, ServiceOptions,
    TxStats, UnspentOutput,
};
use serde::{Deserialize, Serialize};

use crate::error::{not_found_is_false, AttributeExt, Result, ServiceError};
use crate::http::HttpClient;
use crate::sat_per_kb_to_per_byte;

const KIND: ProviderKind = ProviderKind::Blockcypher;

/// Public API root.
pub const DEFAULT_BASE_URL: &str = "https://api.blockcypher.com/v1";

/// Transaction ids fetched per block page.
const PAGE_SIZE: usize = 500;

/// BlockCypher implementation of [`BlockchainService`].
#[derive(Debug, Clone)]
pub struct BlockcypherService {
    http: HttpClient,
    base_url: String,
}

impl BlockcypherService {
    /// Create an adapter for the public API.
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the adapter at another API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn chain_url(&self, options: &ServiceOptions) -> String {
        let chain = if options.is_testnet() { "test3" } else { "main" };
        format!("{}/btc/{chain}", self.base_url)
    }

    async fn fetch_tx(&self, tx_id: &str, token: &str, options: &ServiceOptions) -> Result<TxResponse> {
        let url = format!("{}/txs/{tx_id}", self.chain_url(options));
        let tx: TxResponse = self
            .http
            .get(&url, &[("token", token)], "transaction")
            .await?;
        api_error(tx.error.as_deref())?;
        Ok(tx)
    }

    async fn fetch_block_page(
        &self,
        block: &BlockRef,
        start: usize,
        token: &str,
        options: &ServiceOptions,
    ) -> Result<BlockResponse> {
        let url = format!("{}/blocks/{block}", self.chain_url(options));
        let start = start.to_string();
        let limit = PAGE_SIZE.to_string();

        let page: BlockResponse = self
            .http
            .get(
                &url,
                &[("token", token), ("txstart", start.as_str()), ("limit", limit.as_str())],
                "block",
            )
            .await?;
        api_error(page.error.as_deref())?;
        Ok(page)
    }

    /// Fetch a block with every transaction id, one page at a time.
    async fn fetch_block(&self, block: &BlockRef, token: &str, options: &ServiceOptions) -> Result<BlockResponse> {
        let mut first = self.fetch_block_page(block, 0, token, options).await?;

        while (first.txids.len() as u64) < first.n_tx {
            let page = self
                .fetch_block_page(block, first.txids.len(), token, options)
                .await?;
            if page.txids.is_empty() {
                break;
            }
            first.txids.extend(page.txids);
        }

        Ok(first)
    }
}

#[async_trait]
impl BlockchainService for BlockcypherService {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn capabilities(&self) -> ServiceCapabilities {
        ServiceCapabilities { ethereum: true }
    }

    async fn unspent_outputs(
        &self,
        address: &str,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<Vec<UnspentOutput>> {
        let token = options.require_credential(KIND)?;
        let url = format!("{}/addrs/{address}", self.chain_url(options));

        let response: AddressResponse = self
            .http
            .get(&url, &[("token", token), ("unspentOnly", "1")], "address")
            .await
            .attribute(KIND)?;

        response.into_unspent().attribute(KIND)
    }

    async fn push_transaction(
        &self,
        raw_hex: &str,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<String> {
        let token = options.require_credential(KIND)?;
        let url = format!("{}/txs/push", self.chain_url(options));

        let response: PushResponse = self
            .http
            .post(&url, &[("token", token)], &PushRequest { tx: raw_hex }, "push")
            .await
            .attribute_push(KIND)?;

        response.into_tx_id().attribute(KIND)
    }

    async fn confirm_op_return(
        &self,
        tx_id: &str,
        expected_hex: &str,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<bool> {
        let token = options.require_credential(KIND)?;
        let found = async {
            let tx = self.fetch_tx(tx_id, token, options).await?;
            Ok::<_, ServiceError>(tx.carries_op_return(expected_hex))
        };

        not_found_is_false(found.await).attribute(KIND)
    }

    async fn confirm_block_header(
        &self,
        block: &BlockRef,
        expected_root: &str,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<bool> {
        let token = options.require_credential(KIND)?;
        let found = async {
            let page = self.fetch_block_page(block, 0, token, options).await?;
            Ok::<_, ServiceError>(page.mrkl_root == expected_root)
        };

        not_found_is_false(found.await).attribute(KIND)
    }

    async fn transaction_stats(
        &self,
        tx_id: &str,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<TxStats> {
        let token = options.require_credential(KIND)?;
        let tx = self.fetch_tx(tx_id, token, options).await.attribute(KIND)?;
        Ok(tx.into_stats())
    }

    async fn confirmation_count(
        &self,
        tx_id: &str,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<u64> {
        let token = options.require_credential(KIND)?;
        let tx = self.fetch_tx(tx_id, token, options).await.attribute(KIND)?;
        Ok(tx.confirmations)
    }

    async fn block_stats(
        &self,
        block: &BlockRef,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<BlockStats> {
        let token = options.require_credential(KIND)?;
        let response = self.fetch_block(block, token, options).await.attribute(KIND)?;
        response.into_stats().attribute(KIND)
    }

    async fn block_tx_ids(
        &self,
        block: &BlockRef,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<Vec<String>> {
        let token = options.require_credential(KIND)?;
        let response = self.fetch_block(block, token, options).await.attribute(KIND)?;
        Ok(response.txids)
    }

    async fn estimate_fee_rate(&self, options: &ServiceOptions) -> chainstamp_anchor::Result<u64> {
        let token = options.require_credential(KIND)?;
        let url = self.chain_url(options);

        let chain: ChainResponse = self
            .http
            .get(&url, &[("token", token)], "chain")
            .await
            .attribute(KIND)?;

        chain.fee_rate().attribute(KIND)
    }

    async fn confirm_eth_data(
        &self,
        tx_id: &str,
        expected_value: &str,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<bool> {
        let token = options.require_credential(KIND)?;
        let url = format!("{}/eth/main/txs/{tx_id}", self.base_url);

        let found = async {
            let tx: EthTxResponse = self
                .http
                .get(&url, &[("token", token)], "ethereum transaction")
                .await?;
            api_error(tx.error.as_deref())?;
            Ok::<_, ServiceError>(tx.carries(expected_value))
        };

        not_found_is_false(found.await).attribute(KIND)
    }
}

fn api_error(error: Option<&str>) -> Result<()> {
    match error {
        Some(message) => Err(ServiceError::Api(message.to_string())),
        None => Ok(()),
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    tx: &'a str,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    #[serde(default)]
    tx: Option<PushedTx>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushedTx {
    hash: String,
}

impl PushResponse {
    fn into_tx_id(self) -> Result<String> {
        api_error(self.error.as_deref())?;
        self.tx
            .map(|tx| tx.hash)
            .ok_or_else(|| ServiceError::Decode("push response has no transaction".into()))
    }
}

#[derive(Debug, Deserialize)]
struct AddressResponse {
    #[serde(default)]
    txrefs: Vec<TxRef>,
    #[serde(default)]
    unconfirmed_txrefs: Vec<TxRef>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TxRef {
    tx_hash: String,
    tx_output_n: i64,
    value: u64,
}

impl AddressResponse {
    fn into_unspent(self) -> Result<Vec<UnspentOutput>> {
        api_error(self.error.as_deref())?;

        Ok(self
            .txrefs
            .into_iter()
            .chain(self.unconfirmed_txrefs)
            .filter_map(|r| {
                let index = u32::try_from(r.tx_output_n).ok()?;
                Some(UnspentOutput::new(r.tx_hash, index, r.value))
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    hash: String,
    #[serde(default)]
    block_height: Option<i64>,
    #[serde(default)]
    block_hash: Option<String>,
    #[serde(default)]
    confirmations: u64,
    #[serde(default)]
    fees: u64,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    outputs: Vec<TxOutput>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TxOutput {
    #[serde(default)]
    script_type: Option<String>,
    #[serde(default)]
    data_hex: Option<String>,
}

impl TxOutput {
    fn null_data(&self) -> Option<&str> {
        match self.script_type.as_deref() {
            Some("null-data") => self.data_hex.as_deref(),
            _ => None,
        }
    }
}

impl TxResponse {
    fn carries_op_return(&self, expected_hex: &str) -> bool {
        self.outputs
            .iter()
            .any(|o| o.null_data() == Some(expected_hex))
    }

    fn into_stats(self) -> TxStats {
        let op_return = self
            .outputs
            .iter()
            .find_map(TxOutput::null_data)
            .map(str::to_string);

        TxStats {
            id: self.hash,
            // Unconfirmed transactions report height -1.
            block_height: self.block_height.and_then(|h| u64::try_from(h).ok()),
            block_hash: self.block_hash,
            confirmations: self.confirmations,
            fee_satoshi: self.fees,
            size_bytes: self.size,
            op_return,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BlockResponse {
    hash: String,
    height: u64,
    mrkl_root: String,
    time: String,
    #[serde(default)]
    n_tx: u64,
    #[serde(default)]
    txids: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

impl BlockResponse {
    fn into_stats(self) -> Result<BlockStats> {
        let time = chrono::DateTime::parse_from_rfc3339(&self.time)
            .map_err(|e| ServiceError::Decode(format!("block time {}: {e}", self.time)))?
            .timestamp();

        Ok(BlockStats {
            hash: self.hash,
            height: self.height,
            merkle_root: self.mrkl_root,
            tx_ids: self.txids,
            time,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChainResponse {
    high_fee_per_kb: i64,
    #[serde(default)]
    error: Option<String>,
}

impl ChainResponse {
    fn fee_rate(&self) -> Result<u64> {
        api_error(self.error.as_deref())?;
        match u64::try_from(self.high_fee_per_kb) {
            Ok(per_kb) if per_kb > 0 => Ok(sat_per_kb_to_per_byte(per_kb)),
            _ => Err(ServiceError::InvalidValue(format!(
                "estimated fee {}",
                self.high_fee_per_kb
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EthTxResponse {
    #[serde(default)]
    outputs: Vec<EthOutput>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EthOutput {
    #[serde(default)]
    script: Option<String>,
}

impl EthTxResponse {
    fn carries(&self, expected_value: &str) -> bool {
        self.outputs
            .iter()
            .any(|o| o.script.as_deref() == Some(expected_value))
    }
}
