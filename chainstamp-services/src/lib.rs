//! HTTP provider adapters for chainstamp-anchor.
//!
//! Each adapter implements [`chainstamp_anchor::BlockchainService`] against one public
//! blockchain-data API:
//!
//! | Provider    | Credential    | Ethereum | Stats |
//! |-------------|---------------|----------|-------|
//! | BlockCypher | API token     | yes      | yes   |
//! | Insight     | API base URL  | no       | yes   |
//! | Blockr      | none          | no       | confirmations and block txids only |
//!
//! # Example
//!
//! ```ignore
//! use chainstamp_anchor::{AnchorConfig, ProviderKind};
//!
//! let config = AnchorConfig::testnet()
//!     .with_credential(ProviderKind::Blockcypher, token);
//!
//! let anchor = chainstamp_services::connect(&wif, config)?;
//! let result = anchor.embed(b"hello").await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod blockcypher;
mod blockr;
mod error;
mod http;
mod insight;

use std::sync::Arc;
use std::time::Duration;

use chainstamp_anchor::{AnchorConfig, AnchorError, BlockchainAnchor, ServiceTable};

pub use blockcypher::BlockcypherService;
pub use blockr::BlockrService;
pub use error::{Result, ServiceError};
pub use http::HttpClient;
pub use insight::InsightService;

/// Satoshi per bitcoin.
const SATOSHI_PER_BTC: f64 = 100_000_000.0;

/// Prefix of an OP_RETURN output in script assembly form.
pub(crate) const OP_RETURN_ASM_PREFIX: &str = "OP_RETURN ";

/// A table holding every HTTP adapter, sharing one client.
pub fn default_services(timeout: Duration) -> chainstamp_anchor::Result<ServiceTable> {
    let http = HttpClient::new(timeout).map_err(|e| AnchorError::Configuration(e.to_string()))?;

    Ok(ServiceTable::new()
        .with(Arc::new(BlockcypherService::new(http.clone())))
        .with(Arc::new(InsightService::new(http.clone())))
        .with(Arc::new(BlockrService::new(http))))
}

/// Build an anchor backed by the HTTP adapters.
///
/// Per-request HTTP timeouts follow the configured timeout.
pub fn connect(wif: &str, config: AnchorConfig) -> chainstamp_anchor::Result<BlockchainAnchor> {
    let table = default_services(Duration::from_secs(config.timeout_secs.max(1)))?;
    BlockchainAnchor::new(wif, config, &table)
}

/// Ceiling conversion from sat/kB (1024 bytes) to sat/byte.
pub(crate) fn sat_per_kb_to_per_byte(per_kb: u64) -> u64 {
    per_kb.div_ceil(1024)
}

/// Convert a BTC amount to satoshi, rejecting negative or non-finite values.
pub(crate) fn btc_to_satoshi(btc: f64) -> Option<u64> {
    if !btc.is_finite() || btc < 0.0 {
        return None;
    }

    let sats = (btc * SATOSHI_PER_BTC).round();
    (sats <= u64::MAX as f64).then_some(sats as u64)
}

/// Script assembly of an OP_RETURN output carrying `data_hex`.
pub(crate) fn op_return_asm(data_hex: &str) -> String {
    format!("{OP_RETURN_ASM_PREFIX}{data_hex}")
}
