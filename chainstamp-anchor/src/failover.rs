//! Ordered failover across providers.
//!
//! Providers are tried strictly one after another. The first success ends
//! the call; every failure is recorded with its provider and the next one
//! is tried. When the queue runs out the caller gets every failure, in
//! queue order.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::{AnchorError, ProviderFailure, Result};
use crate::registry::ProviderEntry;

/// Drives one operation over a provider queue.
#[derive(Debug, Clone, Copy)]
pub struct Failover {
    timeout: Duration,
}

impl Failover {
    /// Create a controller with a per-call deadline.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The per-call deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `attempt` against each provider until one succeeds.
    pub async fn run<T, F, Fut>(
        &self,
        queue: &[ProviderEntry],
        operation: &'static str,
        attempt: F,
    ) -> Result<T>
    where
        F: FnMut(ProviderEntry) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_recovering(queue, operation, attempt)
            .await
            .map(|(value, _)| value)
    }

    /// Like [`Failover::run`], also returning the failures that preceded
    /// the successful provider.
    pub async fn run_recovering<T, F, Fut>(
        &self,
        queue: &[ProviderEntry],
        operation: &'static str,
        mut attempt: F,
    ) -> Result<(T, Vec<ProviderFailure>)>
    where
        F: FnMut(ProviderEntry) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut errors = Vec::with_capacity(queue.len());

        for entry in queue {
            let provider = entry.kind();
            debug!(%provider, operation, "attempting provider");

            match attempt(entry.clone()).await {
                Ok(value) => {
                    if !errors.is_empty() {
                        info!(%provider, operation, failed = errors.len(), "succeeded after failover");
                    }
                    return Ok((value, errors));
                }
                Err(e) => {
                    warn!(%provider, operation, error = %e, "provider attempt failed");
                    errors.push(ProviderFailure::new(provider, e));
                }
            }
        }

        Err(AnchorError::AllProvidersFailed { errors })
    }

    /// Await a single remote call under the deadline.
    pub async fn call<T, Fut>(&self, call: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| AnchorError::Timeout(self.timeout.as_secs()))?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Network;
    use crate::mock::MockService;
    use crate::provider::{BlockchainService, ProviderKind, ServiceOptions};

    fn entry(service: MockService) -> ProviderEntry {
        ProviderEntry {
            service: Arc::new(service),
            options: ServiceOptions::new(Network::Test),
        }
    }

    fn queue() -> Vec<ProviderEntry> {
        vec![
            entry(MockService::builder(ProviderKind::Blockcypher).failing().build()),
            entry(MockService::builder(ProviderKind::InsightApi).failing().build()),
            entry(MockService::builder(ProviderKind::Blockr).fee_rate(42).build()),
        ]
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let failover = Failover::new(Duration::from_secs(5));
        let rate = failover
            .run(&queue(), "estimate fee", |entry| async move {
                entry.service.estimate_fee_rate(&entry.options).await
            })
            .await
            .unwrap();

        assert_eq!(rate, 42);
    }

    #[tokio::test]
    async fn test_exhaustion_lists_failures_in_order() {
        let mut queue = queue();
        queue.pop();
        queue.push(entry(MockService::builder(ProviderKind::Blockr).failing().build()));

        let failover = Failover::new(Duration::from_secs(5));
        let err = failover
            .run(&queue, "estimate fee", |entry| async move {
                entry.service.estimate_fee_rate(&entry.options).await
            })
            .await
            .unwrap_err();

        let providers: Vec<_> = err.failures().iter().map(|f| f.provider).collect();
        assert_eq!(
            providers,
            vec![
                ProviderKind::Blockcypher,
                ProviderKind::InsightApi,
                ProviderKind::Blockr
            ]
        );
    }

    #[tokio::test]
    async fn test_stops_after_success() {
        let second = Arc::new(MockService::new(ProviderKind::InsightApi));
        let queue = vec![
            entry(MockService::new(ProviderKind::Blockcypher)),
            ProviderEntry {
                service: second.clone(),
                options: ServiceOptions::new(Network::Test),
            },
        ];

        let failover = Failover::new(Duration::from_secs(5));
        failover
            .run(&queue, "estimate fee", |entry| async move {
                entry.service.estimate_fee_rate(&entry.options).await
            })
            .await
            .unwrap();

        assert_eq!(second.call_count(), 0);
    }

    #[tokio::test]
    async fn test_recovered_failures_are_returned() {
        let failover = Failover::new(Duration::from_secs(5));
        let (rate, failed) = failover
            .run_recovering(&queue(), "estimate fee", |entry| async move {
                entry.service.estimate_fee_rate(&entry.options).await
            })
            .await
            .unwrap();

        assert_eq!(rate, 42);
        let providers: Vec<_> = failed.iter().map(|f| f.provider).collect();
        assert_eq!(
            providers,
            vec![ProviderKind::Blockcypher, ProviderKind::InsightApi]
        );
    }

    #[tokio::test]
    async fn test_call_deadline() {
        let slow = MockService::builder(ProviderKind::Blockr)
            .latency(Duration::from_millis(200))
            .build();
        let options = ServiceOptions::new(Network::Test);

        let failover = Failover::new(Duration::from_millis(20));
        let result = failover.call(slow.estimate_fee_rate(&options)).await;

        assert!(matches!(result, Err(AnchorError::Timeout(_))));
    }
}
