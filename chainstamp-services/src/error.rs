//! Error types for the HTTP adapters.

use chainstamp_anchor::{AnchorError, ProviderKind};
use thiserror::Error;

/// Result type for adapter internals.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors raised while talking to a provider's HTTP API.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The HTTP client could not be built.
    #[error("client setup failed: {0}")]
    Client(String),

    /// The request never produced a response.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider does not know the identifier (HTTP 404 or 400).
    #[error("{0} not found")]
    NotFound(String),

    /// Any other non-success status.
    #[error("API error {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The provider answered with an error in a success response.
    #[error("API reported: {0}")]
    Api(String),

    /// The body could not be decoded.
    #[error("failed to parse response: {0}")]
    Decode(String),

    /// The provider returned a value that makes no sense.
    #[error("invalid value received: {0}")]
    InvalidValue(String),
}

impl ServiceError {
    /// Whether the provider reported the identifier as unknown.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::NotFound(_))
    }

    /// Whether a push may have reached the provider even though it failed.
    ///
    /// True once the request was written: the response timed out, its body
    /// broke off, or it arrived but could not be read.
    pub fn outcome_unknown(&self) -> bool {
        match self {
            ServiceError::Request(e) => e.is_timeout() || e.is_body() || e.is_decode(),
            ServiceError::Decode(_) => true,
            _ => false,
        }
    }

    /// Convert a push failure, keeping unknown outcomes distinct.
    ///
    /// The transaction id is left empty; the caller knows it.
    pub fn into_push_anchor(self, provider: ProviderKind) -> AnchorError {
        if self.outcome_unknown() {
            AnchorError::BroadcastOutcomeUnknown {
                provider,
                tx_id: String::new(),
                reason: self.to_string(),
            }
        } else {
            self.into_anchor(provider)
        }
    }

    /// Convert into the engine's error, attributing it to `provider`.
    pub fn into_anchor(self, provider: ProviderKind) -> AnchorError {
        match self {
            ServiceError::NotFound(what) => AnchorError::NotFound(what),
            other => AnchorError::ProviderTransport {
                provider,
                message: other.to_string(),
            },
        }
    }
}

/// Attribute an adapter result to a provider.
pub(crate) trait AttributeExt<T> {
    /// Convert the error side into the engine's error.
    fn attribute(self, provider: ProviderKind) -> chainstamp_anchor::Result<T>;

    /// Like `attribute`, for the result of a push request.
    fn attribute_push(self, provider: ProviderKind) -> chainstamp_anchor::Result<T>;
}

impl<T> AttributeExt<T> for Result<T> {
    fn attribute(self, provider: ProviderKind) -> chainstamp_anchor::Result<T> {
        self.map_err(|e| e.into_anchor(provider))
    }

    fn attribute_push(self, provider: ProviderKind) -> chainstamp_anchor::Result<T> {
        self.map_err(|e| e.into_push_anchor(provider))
    }
}

/// Map a confirmation lookup so "not found" answers `false`.
pub(crate) fn not_found_is_false(result: Result<bool>) -> Result<bool> {
    match result {
        Err(e) if e.is_not_found() => Ok(false),
        other => other,
    }
}
