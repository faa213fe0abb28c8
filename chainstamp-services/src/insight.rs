//! Insight API adapter.
//!
//! Insight is self-hosted, so the credential is the API base URL
//! (for example `https://insight.example.com/api`). The network is
//! whatever that deployment serves.

use std::collections::HashMap;

use async_trait::async_trait;
use chainstamp_anchor::{
    BlockRef, BlockStats, BlockchainService, ProviderKind, ServiceOptions, TxStats, UnspentOutput,
};
use serde::{Deserialize, Serialize};

use crate::error::{not_found_is_false, AttributeExt, Result, ServiceError};
use crate::http::HttpClient;
use crate::{btc_to_satoshi, op_return_asm, sat_per_kb_to_per_byte, OP_RETURN_ASM_PREFIX};

const KIND: ProviderKind = ProviderKind::InsightApi;

/// Confirmation target for fee estimates, in blocks.
const FEE_TARGET_BLOCKS: &str = "2";

/// Insight implementation of [`BlockchainService`].
#[derive(Debug, Clone)]
pub struct InsightService {
    http: HttpClient,
}

impl InsightService {
    /// Create an adapter.
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    fn base_url(options: &ServiceOptions) -> chainstamp_anchor::Result<String> {
        Ok(options
            .require_credential(KIND)?
            .trim_end_matches('/')
            .to_string())
    }

    async fn fetch_tx(&self, base: &str, tx_id: &str) -> Result<InsightTx> {
        self.http
            .get(&format!("{base}/tx/{tx_id}"), &[], "transaction")
            .await
    }

    /// Resolve a block reference to a hash; heights go through the block index.
    async fn block_hash(&self, base: &str, block: &BlockRef) -> Result<String> {
        match block {
            BlockRef::Hash(hash) => Ok(hash.clone()),
            BlockRef::Height(height) => {
                let index: BlockIndex = self
                    .http
                    .get(&format!("{base}/block-index/{height}"), &[], "block height")
                    .await?;
                Ok(index.block_hash)
            }
        }
    }

    async fn fetch_block(&self, base: &str, block: &BlockRef) -> Result<InsightBlock> {
        let hash = self.block_hash(base, block).await?;
        self.http
            .get(&format!("{base}/block/{hash}"), &[], "block")
            .await
    }
}

#[async_trait]
impl BlockchainService for InsightService {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    async fn unspent_outputs(
        &self,
        address: &str,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<Vec<UnspentOutput>> {
        let base = Self::base_url(options)?;

        let utxos: Vec<InsightUtxo> = self
            .http
            .get(
                &format!("{base}/addr/{address}/utxo"),
                &[("noCache", "1")],
                "address",
            )
            .await
            .attribute(KIND)?;

        Ok(utxos.into_iter().filter_map(InsightUtxo::into_unspent).collect())
    }

    async fn push_transaction(
        &self,
        raw_hex: &str,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<String> {
        let base = Self::base_url(options)?;

        let response: SendResponse = self
            .http
            .post(
                &format!("{base}/tx/send"),
                &[],
                &SendRequest { rawtx: raw_hex },
                "push",
            )
            .await
            .attribute_push(KIND)?;

        response
            .txid
            .filter(|txid| !txid.is_empty())
            .ok_or_else(|| ServiceError::Decode("push response has no txid".into()))
            .attribute(KIND)
    }

    async fn confirm_op_return(
        &self,
        tx_id: &str,
        expected_hex: &str,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<bool> {
        let base = Self::base_url(options)?;
        let found = async {
            let tx = self.fetch_tx(&base, tx_id).await?;
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
        let base = Self::base_url(options)?;
        let found = async {
            let block = self.fetch_block(&base, block).await?;
            Ok::<_, ServiceError>(block.merkleroot == expected_root)
        };

        not_found_is_false(found.await).attribute(KIND)
    }

    async fn transaction_stats(
        &self,
        tx_id: &str,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<TxStats> {
        let base = Self::base_url(options)?;
        let tx = self.fetch_tx(&base, tx_id).await.attribute(KIND)?;
        Ok(tx.into_stats())
    }

    async fn confirmation_count(
        &self,
        tx_id: &str,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<u64> {
        let base = Self::base_url(options)?;
        let tx = self.fetch_tx(&base, tx_id).await.attribute(KIND)?;
        Ok(tx.confirmations)
    }

    async fn block_stats(
        &self,
        block: &BlockRef,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<BlockStats> {
        let base = Self::base_url(options)?;
        let block = self.fetch_block(&base, block).await.attribute(KIND)?;
        Ok(block.into_stats())
    }

    async fn estimate_fee_rate(&self, options: &ServiceOptions) -> chainstamp_anchor::Result<u64> {
        let base = Self::base_url(options)?;

        let estimates: HashMap<String, f64> = self
            .http
            .get(
                &format!("{base}/utils/estimatefee"),
                &[("nbBlocks", FEE_TARGET_BLOCKS)],
                "fee estimate",
            )
            .await
            .attribute(KIND)?;

        fee_rate(&estimates).attribute(KIND)
    }
}

/// Sat/byte from Insight's BTC/kB estimate.
fn fee_rate(estimates: &HashMap<String, f64>) -> Result<u64> {
    let btc_per_kb = estimates.get(FEE_TARGET_BLOCKS).copied().unwrap_or(-1.0);

    match btc_to_satoshi(btc_per_kb) {
        Some(per_kb) if per_kb > 0 => Ok(sat_per_kb_to_per_byte(per_kb)),
        _ => Err(ServiceError::InvalidValue(format!(
            "estimated fee {btc_per_kb}"
        ))),
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    rawtx: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    txid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InsightUtxo {
    #[serde(default)]
    txid: Option<String>,
    #[serde(default)]
    vout: Option<u32>,
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    satoshis: Option<u64>,
}

impl InsightUtxo {
    fn into_unspent(self) -> Option<UnspentOutput> {
        let txid = self.txid.filter(|t| !t.is_empty())?;
        let vout = self.vout?;
        let amount = self.satoshis.or_else(|| self.amount.and_then(btc_to_satoshi))?;

        (amount > 0).then(|| UnspentOutput::new(txid, vout, amount))
    }
}

#[derive(Debug, Deserialize)]
struct InsightTx {
    txid: String,
    #[serde(default)]
    blockheight: Option<i64>,
    #[serde(default)]
    blockhash: Option<String>,
    #[serde(default)]
    confirmations: u64,
    #[serde(default)]
    fees: Option<f64>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    vout: Vec<InsightVout>,
}

#[derive(Debug, Deserialize)]
struct InsightVout {
    #[serde(rename = "scriptPubKey", default)]
    script_pub_key: Option<ScriptPubKey>,
}

#[derive(Debug, Deserialize)]
struct ScriptPubKey {
    #[serde(default)]
    asm: Option<String>,
}

impl InsightVout {
    fn asm(&self) -> Option<&str> {
        self.script_pub_key.as_ref()?.asm.as_deref()
    }
}

impl InsightTx {
    fn carries_op_return(&self, expected_hex: &str) -> bool {
        let expected = op_return_asm(expected_hex);
        self.vout.iter().any(|o| o.asm() == Some(expected.as_str()))
    }

    fn into_stats(self) -> TxStats {
        let op_return = self.vout.iter().find_map(|o| {
            o.asm()?
                .strip_prefix(OP_RETURN_ASM_PREFIX)
                .map(str::to_string)
        });

        TxStats {
            id: self.txid,
            // Unconfirmed transactions report height -1.
            block_height: self.blockheight.and_then(|h| u64::try_from(h).ok()),
            block_hash: self.blockhash,
            confirmations: self.confirmations,
            fee_satoshi: self.fees.and_then(btc_to_satoshi).unwrap_or(0),
            size_bytes: self.size,
            op_return,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BlockIndex {
    #[serde(rename = "blockHash")]
    block_hash: String,
}

#[derive(Debug, Deserialize)]
struct InsightBlock {
    hash: String,
    height: u64,
    merkleroot: String,
    #[serde(default)]
    tx: Vec<String>,
    time: i64,
}

impl InsightBlock {
    fn into_stats(self) -> BlockStats {
        BlockStats {
            hash: self.hash,
            height: self.height,
            merkle_root: self.merkleroot,
            tx_ids: self.tx,
            time: self.time,
        }
    }
}
