//! AionKernel: assembles and owns every AION subsystem.

use crate::config::resolve_path;
use crate::error::{KernelError, KernelResult};
use aion_market::{
    HttpTransport, KeyStore, Marketplace, PackageStore, RegistryRefresh, RegistryTransport,
    Verifier,
};
use aion_runtime::{StrategyRunner, WasmSandbox};
use aion_types::config::AionConfig;
use aion_types::error::MarketResult;
use aion_types::package::{AvailableStrategy, StrategyArgs, StrategySummary};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The assembled AION context.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct AionKernel {
    config: AionConfig,
    home: PathBuf,
    market: Arc<Marketplace>,
    runner: StrategyRunner,
}

impl AionKernel {
    /// Boot with the HTTP transport described by `config`.
    pub fn boot(config: AionConfig, home: &Path) -> KernelResult<Self> {
        let transport = HttpTransport::new(
            Duration::from_secs(config.marketplace.request_timeout_secs),
            config.marketplace.allow_insecure_http,
        )?;
        Self::boot_with_transport(config, home, Arc::new(transport))
    }

    /// Boot with a caller-supplied transport.
    ///
    /// Loads the trust store once, then loads and verifies the strategy pool.
    pub fn boot_with_transport(
        config: AionConfig,
        home: &Path,
        transport: Arc<dyn RegistryTransport>,
    ) -> KernelResult<Self> {
        let market_cfg = &config.marketplace;
        let keys_dir = resolve_path(home, &market_cfg.trusted_keys);
        let pool = resolve_path(home, &market_cfg.strategy_pool);

        let keys = Arc::new(KeyStore::load(&keys_dir));
        let verifier = Arc::new(Verifier::new(keys.clone(), market_cfg.max_strategy_bytes));
        let store = PackageStore::new(pool.clone(), verifier.clone());
        let market = Arc::new(Marketplace::open(
            market_cfg.registry_url.clone(),
            store,
            verifier,
            transport,
        ));

        let sandbox = WasmSandbox::new(config.sandbox.clone())
            .map_err(|e| KernelError::BootFailed(format!("sandbox: {e}")))?;
        let runner = StrategyRunner::new(market.clone(), sandbox);

        info!(
            home = %home.display(),
            pool = %pool.display(),
            trusted_keys = keys.len(),
            strategies = market.catalog_snapshot().len(),
            "AION kernel booted"
        );

        Ok(Self {
            config,
            home: home.to_path_buf(),
            market,
            runner,
        })
    }

    pub fn config(&self) -> &AionConfig {
        &self.config
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn marketplace(&self) -> &Arc<Marketplace> {
        &self.market
    }

    pub fn runner(&self) -> &StrategyRunner {
        &self.runner
    }

    /// Ids of the trusted author keys, sorted.
    pub fn trusted_keys(&self) -> Vec<String> {
        self.market.verifier().keys().key_ids()
    }

    pub async fn refresh_registry(&self) -> RegistryRefresh {
        self.market.refresh_registry().await
    }

    pub async fn install(&self, strategy_id: &str) -> MarketResult<StrategySummary> {
        self.market.install(strategy_id).await
    }

    pub async fn execute(
        &self,
        strategy_id: &str,
        args: StrategyArgs,
    ) -> MarketResult<serde_json::Value> {
        self.runner.execute(strategy_id, args).await
    }

    pub fn list_strategies(&self) -> Vec<StrategySummary> {
        self.market.list_strategies()
    }

    pub fn available(&self) -> Vec<AvailableStrategy> {
        self.market.available()
    }
}
