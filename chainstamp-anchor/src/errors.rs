//! Error types for the anchor layer.

use thiserror::Error;

use crate::provider::ProviderKind;

/// Result type for anchor operations.
pub type Result<T> = std::result::Result<T, AnchorError>;

/// Errors that can occur during anchoring and verification.
#[derive(Debug, Error)]
pub enum AnchorError {
    /// The private key could not be decoded for the configured network.
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    /// Bad or unsupported provider choice, missing credential, bad option.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Payload exceeds what a null-data output can carry.
    #[error("payload too large: {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Payload size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Payload could not be decoded.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The anchoring address has no unspent outputs.
    #[error("no unspent outputs available, balance likely 0")]
    NoFunds,

    /// Not enough value to cover the fee, or a split collapsed to zero outputs.
    #[error("insufficient funds: need {need} sat, have {have} sat")]
    InsufficientFunds {
        /// Amount needed.
        need: u64,
        /// Amount available.
        have: u64,
    },

    /// Operation not offered by a provider.
    #[error("{provider} does not support {operation}")]
    Unsupported {
        /// Provider that rejected the call.
        provider: ProviderKind,
        /// Operation name.
        operation: &'static str,
    },

    /// Remote identifier unknown to the provider.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network or HTTP failure talking to a provider.
    #[error("{provider} transport error: {message}")]
    ProviderTransport {
        /// Provider that failed.
        provider: ProviderKind,
        /// Failure description.
        message: String,
    },

    /// A remote call exceeded its deadline.
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    /// The push request was sent but its outcome could not be observed.
    #[error("broadcast of {tx_id} via {provider} has unknown outcome: {reason}")]
    BroadcastOutcomeUnknown {
        /// Provider the transaction was pushed to.
        provider: ProviderKind,
        /// Locally computed transaction id.
        tx_id: String,
        /// Why the outcome is unknown.
        reason: String,
    },

    /// Transaction construction or signing failed.
    #[error("transaction building failed: {0}")]
    TxBuild(String),

    /// Every provider in the queue failed.
    #[error("all blockchain services failed:\n{}", render_failures(.errors))]
    AllProvidersFailed {
        /// Per-provider failures in queue order.
        errors: Vec<ProviderFailure>,
    },
}

impl AnchorError {
    /// Whether this error is raised before any provider is contacted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AnchorError::InvalidKey(_)
                | AnchorError::Configuration(_)
                | AnchorError::PayloadTooLarge { .. }
                | AnchorError::InvalidPayload(_)
        )
    }

    /// Per-provider failures carried by an aggregate error.
    pub fn failures(&self) -> &[ProviderFailure] {
        match self {
            AnchorError::AllProvidersFailed { errors } => errors,
            _ => &[],
        }
    }

    /// Transaction ids whose broadcast outcome is unknown.
    ///
    /// A caller seeing any of these must check the chain before retrying.
    pub fn unknown_broadcasts(&self) -> Vec<&str> {
        match self {
            AnchorError::BroadcastOutcomeUnknown { tx_id, .. } => vec![tx_id.as_str()],
            AnchorError::AllProvidersFailed { errors } => errors
                .iter()
                .flat_map(|f| f.error.unknown_broadcasts())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// One provider's failure inside an aggregate error.
#[derive(Debug)]
pub struct ProviderFailure {
    /// Provider that was attempted.
    pub provider: ProviderKind,
    /// What went wrong.
    pub error: AnchorError,
}

impl ProviderFailure {
    /// Create a new failure record.
    pub fn new(provider: ProviderKind, error: AnchorError) -> Self {
        Self { provider, error }
    }
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

fn render_failures(errors: &[ProviderFailure]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
