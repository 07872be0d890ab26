//! Strategy marketplace: registry refresh, installs and the catalog.
//!
//! The catalog and the registry are immutable maps behind `RwLock<Arc<_>>`.
//! Updates are built off to the side and published with a single pointer
//! swap, so readers always see a complete snapshot and no lock is ever held
//! across an await.

use crate::store::{Catalog, PackageStore};
use crate::transport::RegistryTransport;
use crate::verify::Verifier;
use aion_types::error::{MarketError, MarketResult};
use aion_types::package::{
    validate_strategy_id, AvailableStrategy, RegistryEntry, StrategyPackage, StrategySummary,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};

/// Remote index: strategy id to descriptor.
pub type Registry = HashMap<String, RegistryEntry>;

/// Result of a registry refresh. Refreshing never fails outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryRefresh {
    /// The registry was replaced; holds the new entry count.
    Updated(usize),
    /// The fetch failed and the previous registry was kept; holds the reason.
    Kept(String),
}

/// Owns the catalog of installed strategies and the remote registry.
pub struct Marketplace {
    registry_url: String,
    store: PackageStore,
    verifier: Arc<Verifier>,
    transport: Arc<dyn RegistryTransport>,
    catalog: RwLock<Arc<Catalog>>,
    registry: RwLock<Arc<Registry>>,
    /// Serializes save + publish so disk and catalog agree on the winner.
    publish: Mutex<()>,
}

impl Marketplace {
    /// Build the marketplace and load the local pool into the catalog.
    pub fn open(
        registry_url: impl Into<String>,
        store: PackageStore,
        verifier: Arc<Verifier>,
        transport: Arc<dyn RegistryTransport>,
    ) -> Self {
        let (catalog, _report) = store.load_all();
        Self {
            registry_url: registry_url.into(),
            store,
            verifier,
            transport,
            catalog: RwLock::new(Arc::new(catalog)),
            registry: RwLock::new(Arc::new(Registry::new())),
            publish: Mutex::new(()),
        }
    }

    pub fn verifier(&self) -> &Arc<Verifier> {
        &self.verifier
    }

    pub fn store(&self) -> &PackageStore {
        &self.store
    }

    /// Current catalog snapshot.
    pub fn catalog_snapshot(&self) -> Arc<Catalog> {
        self.catalog
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Current registry snapshot.
    pub fn registry_snapshot(&self) -> Arc<Registry> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Installed package for `id`, if any.
    pub fn get(&self, id: &str) -> Option<Arc<StrategyPackage>> {
        self.catalog_snapshot().get(id).cloned()
    }

    /// Fetch the remote index and replace the registry wholesale.
    ///
    /// On any network or parse failure the previous registry is kept and the
    /// failure is logged; nothing is returned as an error.
    pub async fn refresh_registry(&self) -> RegistryRefresh {
        match self.fetch_registry().await {
            Ok(registry) => {
                let count = registry.len();
                *self.registry.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(registry);
                info!(count, url = %self.registry_url, "Updated strategy registry");
                RegistryRefresh::Updated(count)
            }
            Err(e) => {
                warn!(
                    url = %self.registry_url,
                    error = %e,
                    "Registry refresh failed, keeping previous registry"
                );
                RegistryRefresh::Kept(e.to_string())
            }
        }
    }

    async fn fetch_registry(&self) -> MarketResult<Registry> {
        let body = self.transport.fetch_index(&self.registry_url).await?;
        serde_json::from_slice(&body)
            .map_err(|e| MarketError::InvalidPackage(format!("registry document: {e}")))
    }

    /// Download, verify, persist and publish one strategy.
    ///
    /// All-or-nothing: on any failure the catalog and the pool are exactly as
    /// they were. The only await point is the download, so dropping this
    /// future early has no side effects either.
    pub async fn install(&self, strategy_id: &str) -> MarketResult<StrategySummary> {
        let result = self.install_inner(strategy_id).await;
        if let Err(ref e) = result {
            warn!(
                strategy = %strategy_id,
                error = %e,
                retryable = e.is_retryable(),
                "Strategy install failed"
            );
        }
        result
    }

    async fn install_inner(&self, strategy_id: &str) -> MarketResult<StrategySummary> {
        let entry = self
            .registry_snapshot()
            .get(strategy_id)
            .cloned()
            .ok_or_else(|| MarketError::NotFound(strategy_id.to_string()))?;

        let declared = entry.metadata.id().unwrap_or_default();
        if declared != strategy_id {
            return Err(MarketError::IdMismatch {
                expected: strategy_id.to_string(),
                found: declared.to_string(),
            });
        }
        validate_strategy_id(strategy_id)?;

        let signature = hex::decode(entry.signature.trim())
            .map_err(|e| MarketError::SignatureInvalid(format!("signature is not hex: {e}")))?;

        info!(strategy = %strategy_id, url = %entry.download_url, "Downloading strategy");
        let code = self
            .transport
            .fetch_code(&entry.download_url, self.verifier.max_code_bytes())
            .await?;

        let candidate = StrategyPackage::new(code, entry.metadata, signature, entry.author_key);
        self.verifier.check(&candidate)?;
        self.commit(candidate)
    }

    /// Persist then publish. Synchronous: no await between the two steps.
    fn commit(&self, package: StrategyPackage) -> MarketResult<StrategySummary> {
        let _publish = self.publish.lock().unwrap_or_else(|e| e.into_inner());

        self.store.save(&package)?;

        let id = package.id().to_string();
        let package = Arc::new(package);
        self.swap_in(package.clone());

        info!(
            strategy = %id,
            name = package.metadata().name().unwrap_or_default(),
            "Installed strategy"
        );
        Ok(package.summary(true))
    }

    /// Replace the catalog with a copy that includes `package`.
    fn swap_in(&self, package: Arc<StrategyPackage>) {
        let mut catalog = self.catalog.write().unwrap_or_else(|e| e.into_inner());
        let mut next = Catalog::clone(&catalog);
        next.insert(package.id().to_string(), package);
        *catalog = Arc::new(next);
    }

    /// Catalog entry for `id` together with its persisted record.
    ///
    /// Both are read under the publish lock, so an install can never be
    /// observed between its save and its catalog swap.
    pub fn installed_with_record(
        &self,
        id: &str,
    ) -> Option<(Arc<StrategyPackage>, MarketResult<StrategyPackage>)> {
        let _publish = self.publish.lock().unwrap_or_else(|e| e.into_inner());
        let package = self.get(id)?;
        let record = self.store.load_record(id);
        Some((package, record))
    }

    /// Installed strategies with a fresh verification result, sorted by id.
    pub fn list_strategies(&self) -> Vec<StrategySummary> {
        let catalog = self.catalog_snapshot();
        let mut rows: Vec<StrategySummary> = catalog
            .values()
            .map(|pkg| pkg.summary(self.verifier.verify(pkg)))
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    /// Registry entries with their install status, sorted by id.
    pub fn available(&self) -> Vec<AvailableStrategy> {
        let registry = self.registry_snapshot();
        let catalog = self.catalog_snapshot();
        let mut rows: Vec<AvailableStrategy> = registry
            .iter()
            .map(|(id, entry)| {
                let field = |v: Option<&str>| v.unwrap_or_default().to_string();
                AvailableStrategy {
                    id: id.clone(),
                    name: field(entry.metadata.name()),
                    version: field(entry.metadata.version()),
                    author: field(entry.metadata.author()),
                    installed: catalog.contains_key(id),
                }
            })
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }
}
