//! Provider-Agnostic Bitcoin Anchoring.
//!
//! This crate embeds short fingerprints into Bitcoin null-data outputs and
//! verifies them later, using third-party blockchain-data services instead
//! of a full node. Services are tried in priority order; the first one to
//! succeed answers the call.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        CHAINSTAMP ANCHOR                             │
//! │                                                                      │
//! │  ┌───────────────────────────────────────────────────────────────┐  │
//! │  │ BLOCKCHAIN ANCHOR                                              │  │
//! │  │  - Validates payloads and arguments                            │  │
//! │  │  - Builds and signs embed and split transactions               │  │
//! │  │  - Confirms anchors, blocks and Ethereum data                  │  │
//! │  └───────────────────────────────────────────────────────────────┘  │
//! │                            │                                         │
//! │  ┌───────────────────────────────────────────────────────────────┐  │
//! │  │ FAILOVER                                                       │  │
//! │  │  - One provider at a time, first success wins                  │  │
//! │  │  - Per-call deadline                                           │  │
//! │  │  - Collects every failure in order                             │  │
//! │  └───────────────────────────────────────────────────────────────┘  │
//! │                            │                                         │
//! │           ┌────────────────┼────────────────┐                       │
//! │           ▼                ▼                ▼                       │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐                 │
//! │  │ BlockCypher │  │  Insight    │  │   Blockr    │                 │
//! │  │  Service    │  │  Service    │  │  Service    │                 │
//! │  └─────────────┘  └─────────────┘  └─────────────┘                 │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use chainstamp_anchor::{AnchorConfig, BlockchainAnchor, ProviderKind};
//!
//! let config = AnchorConfig::testnet()
//!     .with_credential(ProviderKind::Blockcypher, token);
//!
//! let anchor = BlockchainAnchor::new(&wif, config, &services)?;
//!
//! // Embed a fingerprint
//! let result = anchor.embed(&digest).await?;
//!
//! // Later, check that it is there
//! let found = anchor.confirm_op_return(&result.tx_id, &hex::encode(digest)).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod anchor;
pub mod config;
pub mod errors;
pub mod failover;
pub mod keys;
pub mod provider;
pub mod registry;
pub mod tx;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(test)]
mod proptest;

/// Largest payload a null-data output may carry, in bytes.
pub const MAX_OP_RETURN_SIZE: usize = 80;

/// Smallest value of a split output, in satoshi.
pub const DUST_THRESHOLD_SATOSHI: u64 = 10_000;

pub use anchor::{AnchorResult, BlockchainAnchor, SplitResult};
pub use config::{AnchorConfig, Network, ANY_SERVICE, DEFAULT_FEE_SATOSHI, DEFAULT_TIMEOUT_SECS};
pub use errors::{AnchorError, ProviderFailure, Result};
pub use failover::Failover;
pub use keys::KeyMaterial;
pub use provider::{
    BlockRef, BlockStats, BlockchainService, ProviderKind, ServiceCapabilities, ServiceOptions,
    TxStats, UnspentOutput,
};
pub use registry::{ProviderEntry, ProviderList, Selection, ServiceTable};
pub use tx::{SignedTransaction, SplitPlan};

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockService, MockServiceBuilder, MockServiceConfig};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::anchor::{AnchorResult, BlockchainAnchor, SplitResult};
    pub use crate::config::{AnchorConfig, Network};
    pub use crate::errors::{AnchorError, Result};
    pub use crate::provider::{BlockchainService, ProviderKind, ServiceOptions};
    pub use crate::registry::ServiceTable;

    #[cfg(any(test, feature = "mock"))]
    pub use crate::mock::{MockService, MockServiceBuilder};
}
