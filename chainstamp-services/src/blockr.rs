//! Blockr adapter.
//!
//! Blockr needs no credential. Every reply is wrapped in a
//! `{status, data, message}` envelope; anything but `"success"` is an error.
//! It has no transaction, block or fee statistics endpoints.

use async_trait::async_trait;
use chainstamp_anchor::{
    AnchorError, BlockRef, BlockStats, BlockchainService, ProviderKind, ServiceOptions, TxStats,
    UnspentOutput,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{not_found_is_false, AttributeExt, Result, ServiceError};
use crate::http::HttpClient;
use crate::{btc_to_satoshi, op_return_asm};

const KIND: ProviderKind = ProviderKind::Blockr;

const SUCCESS: &str = "success";

/// Blockr implementation of [`BlockchainService`].
#[derive(Debug, Clone)]
pub struct BlockrService {
    http: HttpClient,
    host: Option<String>,
}

impl BlockrService {
    /// Create an adapter against the public Blockr hosts.
    pub fn new(http: HttpClient) -> Self {
        Self { http, host: None }
    }

    /// Create an adapter against a fixed API root, regardless of network.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.host = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    fn api_url(&self, options: &ServiceOptions) -> String {
        match &self.host {
            Some(host) => host.clone(),
            None => {
                let chain = if options.is_testnet() { "tbtc" } else { "btc" };
                format!("https://{chain}.blockr.io/api/v1")
            }
        }
    }

    async fn get<T>(&self, url: &str, query: &[(&str, &str)], what: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let envelope: Envelope<T> = self.http.get(url, query, what).await?;
        envelope.into_data(what)
    }

    async fn tx_info(&self, tx_id: &str, options: &ServiceOptions) -> Result<TxInfo> {
        let url = format!("{}/tx/info/{tx_id}", self.api_url(options));
        self.get(&url, &[], "transaction").await
    }

    fn unsupported(operation: &'static str) -> AnchorError {
        AnchorError::Unsupported {
            provider: KIND,
            operation,
        }
    }
}

#[async_trait]
impl BlockchainService for BlockrService {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    async fn unspent_outputs(
        &self,
        address: &str,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<Vec<UnspentOutput>> {
        let url = format!("{}/address/unspent/{address}", self.api_url(options));

        let data: UnspentData = self
            .get(&url, &[("unconfirmed", "1")], "address")
            .await
            .attribute(KIND)?;

        Ok(data
            .unspent
            .into_iter()
            .filter_map(BlockrUnspent::into_unspent)
            .collect())
    }

    async fn push_transaction(
        &self,
        raw_hex: &str,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<String> {
        let url = format!("{}/tx/push", self.api_url(options));

        let envelope: Envelope<Value> = self
            .http
            .post(&url, &[], &PushRequest { hex: raw_hex }, "push")
            .await
            .attribute_push(KIND)?;

        // Rejections put the reason in `data` rather than `message`.
        match envelope.data {
            Some(Value::String(txid)) if envelope.status == SUCCESS && !txid.is_empty() => {
                Ok(txid)
            }
            data if envelope.status == SUCCESS => {
                Err(ServiceError::Decode(format!("unexpected push result: {data:?}")))
                    .attribute(KIND)
            }
            data => Err(ServiceError::Api(
                envelope
                    .message
                    .filter(|m| !m.is_empty())
                    .or_else(|| data.map(|d| d.to_string()))
                    .unwrap_or_else(|| envelope.status.clone()),
            ))
            .attribute(KIND),
        }
    }

    async fn confirm_op_return(
        &self,
        tx_id: &str,
        expected_hex: &str,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<bool> {
        let found = async {
            let info = self.tx_info(tx_id, options).await?;
            Ok::<_, ServiceError>(info.carries_op_return(expected_hex))
        };

        not_found_is_false(found.await).attribute(KIND)
    }

    async fn confirm_block_header(
        &self,
        block: &BlockRef,
        expected_root: &str,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<bool> {
        let url = format!("{}/block/info/{block}", self.api_url(options));
        let found = async {
            let info: BlockInfo = self.get(&url, &[], "block").await?;
            Ok::<_, ServiceError>(info.merkleroot == expected_root)
        };

        not_found_is_false(found.await).attribute(KIND)
    }

    async fn transaction_stats(
        &self,
        _tx_id: &str,
        _options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<TxStats> {
        Err(Self::unsupported("transaction statistics"))
    }

    async fn confirmation_count(
        &self,
        tx_id: &str,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<u64> {
        let info = self.tx_info(tx_id, options).await.attribute(KIND)?;
        Ok(info.confirmations)
    }

    async fn block_stats(
        &self,
        _block: &BlockRef,
        _options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<BlockStats> {
        Err(Self::unsupported("block statistics"))
    }

    async fn block_tx_ids(
        &self,
        block: &BlockRef,
        options: &ServiceOptions,
    ) -> chainstamp_anchor::Result<Vec<String>> {
        let url = format!("{}/block/raw/{block}", self.api_url(options));
        let raw: RawBlock = self.get(&url, &[], "block").await.attribute(KIND)?;
        Ok(raw.tx)
    }

    async fn estimate_fee_rate(&self, _options: &ServiceOptions) -> chainstamp_anchor::Result<u64> {
        Err(Self::unsupported("fee estimation"))
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    status: String,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
    /// HTTP-style status repeated in the body; may say 404 under a 200.
    #[serde(default)]
    code: Option<u16>,
}

impl<T> Envelope<T> {
    fn into_data(self, what: &str) -> Result<T> {
        if self.status != SUCCESS {
            if matches!(self.code, Some(400 | 404)) {
                return Err(ServiceError::NotFound(what.to_string()));
            }

            return Err(ServiceError::Api(
                self.message
                    .filter(|m| !m.is_empty())
                    .unwrap_or(self.status),
            ));
        }

        self.data
            .ok_or_else(|| ServiceError::Decode("envelope has no data".into()))
    }
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    hex: &'a str,
}

#[derive(Debug, Deserialize)]
struct UnspentData {
    #[serde(default)]
    unspent: Vec<BlockrUnspent>,
}

#[derive(Debug, Deserialize)]
struct BlockrUnspent {
    tx: String,
    n: u32,
    /// BTC, sent as either a string or a number.
    amount: Value,
}

impl BlockrUnspent {
    fn into_unspent(self) -> Option<UnspentOutput> {
        let amount = parse_btc(&self.amount)?;
        (amount > 0).then(|| UnspentOutput::new(self.tx, self.n, amount))
    }
}

fn parse_btc(value: &Value) -> Option<u64> {
    let btc = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    btc_to_satoshi(btc)
}

#[derive(Debug, Deserialize)]
struct TxInfo {
    #[serde(default)]
    confirmations: u64,
    #[serde(default)]
    vouts: Vec<Vout>,
}

#[derive(Debug, Deserialize)]
struct Vout {
    #[serde(default)]
    extras: Option<Extras>,
}

#[derive(Debug, Deserialize)]
struct Extras {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    asm: Option<String>,
}

impl TxInfo {
    fn carries_op_return(&self, expected_hex: &str) -> bool {
        let expected = op_return_asm(expected_hex);
        self.vouts.iter().filter_map(|v| v.extras.as_ref()).any(|e| {
            e.kind.as_deref() == Some("nulldata") && e.asm.as_deref() == Some(expected.as_str())
        })
    }
}

#[derive(Debug, Deserialize)]
struct BlockInfo {
    merkleroot: String,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    #[serde(default)]
    tx: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unspent_amounts_as_string_or_number() {
        let json = r#"{
            "status": "success",
            "data": {
                "address": "mxyz",
                "unspent": [
                    {"tx": "aa", "amount": "0.00050000", "n": 1, "confirmations": 3},
                    {"tx": "bb", "amount": 0.0002, "n": 0, "confirmations": 0},
                    {"tx": "cc", "amount": "garbage", "n": 2}
                ]
            },
            "code": 200,
            "message": ""
        }"#;

        let envelope: Envelope<UnspentData> = serde_json::from_str(json).unwrap();
        let unspent: Vec<_> = envelope
            .into_data("test")
            .unwrap()
            .unspent
            .into_iter()
            .filter_map(BlockrUnspent::into_unspent)
            .collect();

        assert_eq!(
            unspent,
            vec![
                UnspentOutput::new("aa", 1, 50_000),
                UnspentOutput::new("bb", 0, 20_000),
            ]
        );
    }

    #[test]
    fn test_envelope_not_found_code() {
        let json = r#"{"status": "fail", "data": null, "code": 404, "message": "No transaction found"}"#;
        let envelope: Envelope<TxInfo> = serde_json::from_str(json).unwrap();

        match envelope.into_data("transaction") {
            Err(ServiceError::NotFound(what)) => assert_eq!(what, "transaction"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_envelope_failure() {
        let json = r#"{"status": "error", "data": null, "code": 500, "message": "Internal error"}"#;
        let envelope: Envelope<TxInfo> = serde_json::from_str(json).unwrap();

        match envelope.into_data("transaction") {
            Err(ServiceError::Api(message)) => assert_eq!(message, "Internal error"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_nulldata_match() {
        let json = r#"{
            "status": "success",
            "data": {
                "tx": "f1",
                "confirmations": 12,
                "vouts": [
                    {"address": null, "amount": 0, "n": 0, "extras": {"asm": "OP_RETURN cafe", "script": "6a02cafe", "type": "nulldata"}},
                    {"address": "mxyz", "amount": 0.0009, "n": 1, "extras": {"asm": "OP_RETURN cafe", "type": "pubkeyhash"}},
                    {"address": "mxyz", "amount": 0.0001, "n": 2}
                ]
            }
        }"#;

        let info = serde_json::from_str::<Envelope<TxInfo>>(json)
            .unwrap()
            .into_data("test")
            .unwrap();

        assert_eq!(info.confirmations, 12);
        assert!(info.carries_op_return("cafe"));
        assert!(!info.carries_op_return("caf"));
    }

    #[test]
    fn test_block_endpoints() {
        let info: BlockInfo = serde_json::from_str::<Envelope<BlockInfo>>(
            r#"{"status": "success", "data": {"nb": 481824, "merkleroot": "5f"}}"#,
        )
        .unwrap()
        .into_data("test")
        .unwrap();
        assert_eq!(info.merkleroot, "5f");

        let raw: RawBlock = serde_json::from_str::<Envelope<RawBlock>>(
            r#"{"status": "success", "data": {"hash": "00ab", "tx": ["t1", "t2"]}}"#,
        )
        .unwrap()
        .into_data("test")
        .unwrap();
        assert_eq!(raw.tx, vec!["t1", "t2"]);
    }

    #[test]
    fn test_host_per_network() {
        let http = HttpClient::new(std::time::Duration::from_secs(1)).unwrap();
        let service = BlockrService::new(http.clone());

        let test = ServiceOptions::new(chainstamp_anchor::Network::Test);
        let main = ServiceOptions::new(chainstamp_anchor::Network::Main);
        assert_eq!(service.api_url(&test), "https://tbtc.blockr.io/api/v1");
        assert_eq!(service.api_url(&main), "https://btc.blockr.io/api/v1");

        let pinned = BlockrService::new(http).with_base_url("http://localhost:3000/api/v1/");
        assert_eq!(pinned.api_url(&main), "http://localhost:3000/api/v1");
    }

    #[tokio::test]
    async fn test_statistics_are_unsupported() {
        let service = BlockrService::new(HttpClient::new(std::time::Duration::from_secs(1)).unwrap());
        let options = ServiceOptions::new(chainstamp_anchor::Network::Test);
        let block = BlockRef::Height(1);

        let results = [
            service.transaction_stats("ab", &options).await.err(),
            service.block_stats(&block, &options).await.err(),
            service.estimate_fee_rate(&options).await.err(),
            service.confirm_eth_data("ab", "cd", &options).await.err(),
        ];

        for err in results {
            assert!(matches!(
                err,
                Some(AnchorError::Unsupported {
                    provider: ProviderKind::Blockr,
                    ..
                })
            ));
        }
    }
}
