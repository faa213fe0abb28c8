//! Shared HTTP client for the provider adapters.

use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, ServiceError};

const USER_AGENT: &str = concat!("chainstamp/", env!("CARGO_PKG_VERSION"));

/// Longest response body carried in an error message.
const MAX_ERROR_BODY: usize = 256;

/// JSON-over-HTTP client shared by every adapter.
///
/// Cloning is cheap; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    /// Create a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ServiceError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    /// GET `url` and decode the JSON body.
    ///
    /// `what` names the looked-up object in errors; URLs are never echoed
    /// since they may carry credentials.
    pub async fn get<T>(&self, url: &str, query: &[(&str, &str)], what: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.execute(self.client.get(url).query(query), what).await
    }

    /// POST `body` as JSON to `url` and decode the JSON reply.
    pub async fn post<B, T>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        body: &B,
        what: &str,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(self.client.post(url).query(query).json(body), what)
            .await
    }

    async fn execute<T>(&self, request: RequestBuilder, what: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = request.send().await?;
        let status = response.status();
        debug!(what, status = status.as_u16(), "provider response");

        if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
            return Err(ServiceError::NotFound(what.to_string()));
        }

        let body = response.text().await?;

        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| ServiceError::Decode(e.to_string()))
    }
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}
