//! Service table and provider list.
//!
//! The table maps every known provider to its adapter and is built once
//! at startup. The provider list is derived from it per orchestrator:
//! every known provider, minus those missing a required credential, minus
//! those excluded by configuration. It never changes afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::AnchorConfig;
use crate::errors::{AnchorError, Result};
use crate::provider::{BlockchainService, ProviderKind, ServiceOptions};

/// Fixed table of provider adapters.
#[derive(Clone, Default)]
pub struct ServiceTable {
    services: BTreeMap<ProviderKind, Arc<dyn BlockchainService>>,
}

impl ServiceTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own kind, replacing any previous one.
    pub fn register(&mut self, service: Arc<dyn BlockchainService>) -> &mut Self {
        self.services.insert(service.kind(), service);
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, service: Arc<dyn BlockchainService>) -> Self {
        self.register(service);
        self
    }

    /// Get the adapter for a provider.
    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn BlockchainService>> {
        self.services.get(&kind).map(Arc::clone)
    }

    /// Whether a provider has an adapter.
    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.services.contains_key(&kind)
    }

    /// Number of registered adapters.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl std::fmt::Debug for ServiceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.services.keys()).finish()
    }
}

/// How providers are chosen for each call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Exactly one provider, no fallback.
    Explicit(ProviderKind),
    /// Every eligible provider in priority order.
    Any,
}

/// One eligible provider with the options it is called with.
#[derive(Clone)]
pub struct ProviderEntry {
    /// The adapter.
    pub service: Arc<dyn BlockchainService>,
    /// Options for every call to it.
    pub options: ServiceOptions,
}

impl ProviderEntry {
    /// Which provider this is.
    pub fn kind(&self) -> ProviderKind {
        self.service.kind()
    }
}

/// Immutable, ordered list of eligible providers.
#[derive(Clone)]
pub struct ProviderList {
    selection: Selection,
    entries: Vec<ProviderEntry>,
}

impl ProviderList {
    /// Build the list for a configuration.
    ///
    /// Fails if the configuration names an unknown provider, a provider
    /// without an adapter, or one whose credential is missing or excluded.
    pub fn build(config: &AnchorConfig, table: &ServiceTable) -> Result<Self> {
        let network = config.network();

        let eligible = |kind: ProviderKind| -> std::result::Result<ProviderEntry, String> {
            let service = table
                .get(kind)
                .ok_or_else(|| format!("no adapter registered for {kind}"))?;

            if config.excluded.contains(&kind) {
                return Err(format!("{kind} is excluded by configuration"));
            }

            let mut options = ServiceOptions::new(network);
            if let Some(what) = kind.required_credential() {
                let credential = config
                    .credential(kind)
                    .ok_or_else(|| format!("{kind} requires {what} but none was supplied"))?;
                options = options.with_credential(credential);
            }

            Ok(ProviderEntry { service, options })
        };

        match config.explicit_service()? {
            Some(kind) => {
                let entry = eligible(kind).map_err(AnchorError::Configuration)?;
                Ok(Self {
                    selection: Selection::Explicit(kind),
                    entries: vec![entry],
                })
            }
            None => Ok(Self {
                selection: Selection::Any,
                entries: ProviderKind::ALL
                    .into_iter()
                    .filter_map(|kind| eligible(kind).ok())
                    .collect(),
            }),
        }
    }

    /// The selection mode.
    pub fn selection(&self) -> Selection {
        self.selection
    }

    /// Providers in priority order.
    pub fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }

    /// Provider kinds in priority order.
    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.entries.iter().map(ProviderEntry::kind).collect()
    }

    /// Number of providers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no provider is eligible.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ProviderList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderList")
            .field("selection", &self.selection)
            .field("providers", &self.kinds())
            .finish()
    }
}
