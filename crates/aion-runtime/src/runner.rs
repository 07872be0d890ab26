//! Runs installed strategies.
//!
//! Installation is not trusted forever: every execution re-verifies the
//! catalog entry and checks that the persisted record still matches it
//! before any strategy code is compiled.

use crate::sandbox::{SandboxError, WasmSandbox};
use aion_market::Marketplace;
use aion_types::error::{MarketError, MarketResult};
use aion_types::package::{StrategyArgs, StrategyPackage};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Executes catalog strategies inside the WASM sandbox.
#[derive(Clone)]
pub struct StrategyRunner {
    market: Arc<Marketplace>,
    sandbox: WasmSandbox,
}

impl StrategyRunner {
    pub fn new(market: Arc<Marketplace>, sandbox: WasmSandbox) -> Self {
        Self { market, sandbox }
    }

    pub fn sandbox(&self) -> &WasmSandbox {
        &self.sandbox
    }

    /// Re-verify and run `strategy_id`, returning whatever the strategy wrote
    /// to its output slot.
    ///
    /// Verification, compilation and execution are CPU-bound and run on the
    /// blocking pool.
    pub async fn execute(
        &self,
        strategy_id: &str,
        args: StrategyArgs,
    ) -> MarketResult<serde_json::Value> {
        if self.market.get(strategy_id).is_none() {
            return Err(MarketError::NotFound(strategy_id.to_string()));
        }

        let market = self.market.clone();
        let sandbox = self.sandbox.clone();
        let id = strategy_id.to_string();

        tokio::task::spawn_blocking(move || {
            let package = ensure_still_trusted(&market, &id)?;

            info!(strategy = %id, "Executing strategy");
            match sandbox.run(&id, package.code(), &args) {
                Ok(result) => {
                    info!(
                        strategy = %id,
                        fuel_consumed = result.fuel_consumed,
                        "Strategy finished"
                    );
                    Ok(result.output)
                }
                Err(e) => {
                    error!(strategy = %id, error = %e, "Strategy execution failed");
                    Err(execution_failure(e))
                }
            }
        })
        .await
        .map_err(|e| MarketError::ExecutionFailure(format!("execution task failed: {e}")))?
    }
}

/// The current catalog entry must still verify and the pool must still hold
/// the same bytes; otherwise the package is refused.
///
/// Entry and record are read together under the marketplace publish lock, so
/// a concurrent reinstall is seen either entirely before or entirely after.
fn ensure_still_trusted(market: &Marketplace, id: &str) -> MarketResult<Arc<StrategyPackage>> {
    let (package, on_disk) = market
        .installed_with_record(id)
        .ok_or_else(|| MarketError::NotFound(id.to_string()))?;

    if let Err(e) = market.verifier().check(&package) {
        warn!(strategy = %id, error = %e, "Installed strategy failed re-verification");
        return Err(MarketError::SecurityError(format!(
            "strategy '{id}' failed re-verification: {e}"
        )));
    }

    let on_disk = on_disk.map_err(|e| {
        warn!(strategy = %id, error = %e, "Persisted strategy record unreadable");
        MarketError::SecurityError(format!("strategy '{id}' record unavailable: {e}"))
    })?;

    if on_disk != *package {
        warn!(strategy = %id, "Persisted strategy record differs from catalog");
        return Err(MarketError::SecurityError(format!(
            "strategy '{id}' was modified on disk after install"
        )));
    }
    Ok(package)
}

fn execution_failure(e: SandboxError) -> MarketError {
    MarketError::ExecutionFailure(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::tests::{ECHO_WAT, TRAP_WAT};
    use aion_market::signing;
    use aion_market::{KeyStore, PackageStore, RegistryTransport, Verifier};
    use aion_types::config::SandboxConfig;
    use aion_types::package::{PackageRecord, StrategyMetadata};
    use async_trait::async_trait;
    use rsa::{RsaPrivateKey, RsaPublicKey};
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    const ALICE_PEM: &str = include_str!("../../aion-market/testdata/alice.pem");

    struct Offline;

    #[async_trait]
    impl RegistryTransport for Offline {
        async fn fetch_index(&self, url: &str) -> MarketResult<Vec<u8>> {
            Err(MarketError::NetworkFailure(format!("offline: {url}")))
        }

        async fn fetch_code(&self, url: &str, _max_bytes: usize) -> MarketResult<String> {
            Err(MarketError::NetworkFailure(format!("offline: {url}")))
        }
    }

    /// Serves one strategy, swappable between installs.
    #[derive(Default)]
    struct Mirror {
        index: Mutex<Vec<u8>>,
        code: Mutex<String>,
    }

    impl Mirror {
        fn offer(&self, id: &str, code: &str) {
            let url = format!("https://cdn.test/{id}.wat");
            let entry =
                signing::registry_entry(&alice(), "alice", code, metadata(id), &url).unwrap();
            let index: HashMap<&str, _> = [(id, entry)].into_iter().collect();
            *self.index.lock().unwrap() = serde_json::to_vec(&index).unwrap();
            *self.code.lock().unwrap() = code.to_string();
        }
    }

    #[async_trait]
    impl RegistryTransport for Mirror {
        async fn fetch_index(&self, _url: &str) -> MarketResult<Vec<u8>> {
            Ok(self.index.lock().unwrap().clone())
        }

        async fn fetch_code(&self, _url: &str, _max_bytes: usize) -> MarketResult<String> {
            Ok(self.code.lock().unwrap().clone())
        }
    }

    fn alice() -> RsaPrivateKey {
        signing::parse_private_key_pem(ALICE_PEM).unwrap()
    }

    fn metadata(id: &str) -> StrategyMetadata {
        StrategyMetadata::new()
            .with("id", id)
            .with("name", "Test")
            .with("version", "1.0")
            .with("author", "alice")
    }

    fn package(id: &str, code: &str) -> StrategyPackage {
        let signature = signing::sign_code(&alice(), code).unwrap();
        StrategyPackage::new(code, metadata(id), signature, "alice")
    }

    fn runner(pool: &Path, packages: &[StrategyPackage]) -> StrategyRunner {
        runner_with(pool, packages, Arc::new(Offline))
    }

    /// Runner over a pool pre-populated with `packages`.
    fn runner_with(
        pool: &Path,
        packages: &[StrategyPackage],
        transport: Arc<dyn RegistryTransport>,
    ) -> StrategyRunner {
        let keys = KeyStore::from_keys([("alice", RsaPublicKey::from(&alice()))]);
        let verifier = Arc::new(Verifier::new(Arc::new(keys), 1024 * 1024));
        let store = PackageStore::new(pool.to_path_buf(), verifier.clone());
        for pkg in packages {
            store.save(pkg).unwrap();
        }
        let market = Marketplace::open(
            "https://registry.test/index.json",
            store,
            verifier,
            transport,
        );
        StrategyRunner::new(
            Arc::new(market),
            WasmSandbox::new(SandboxConfig::default()).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_execute_passes_args_and_returns_output() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), &[package("echo", ECHO_WAT)]);

        let args = StrategyArgs::new()
            .arg(serde_json::json!(85))
            .kwarg("threshold", serde_json::json!(0.8));
        let output = runner.execute("echo", args).await.unwrap();
        assert_eq!(
            output,
            serde_json::json!({"args": [85], "kwargs": {"threshold": 0.8}})
        );
    }

    #[tokio::test]
    async fn test_unknown_strategy_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), &[]);
        let err = runner
            .execute("ghost", StrategyArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::NotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_tampered_record_refused() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), &[package("echo", ECHO_WAT)]);

        let path = dir.path().join("echo.strategy");
        let mut record: PackageRecord =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        record.code = record.code.replace("1024", "2048");
        std::fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();

        let err = runner
            .execute("echo", StrategyArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::SecurityError(_)), "got {err}");
    }

    #[tokio::test]
    async fn test_deleted_record_refused() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), &[package("echo", ECHO_WAT)]);
        std::fs::remove_file(dir.path().join("echo.strategy")).unwrap();

        let err = runner
            .execute("echo", StrategyArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::SecurityError(_)));
    }

    #[tokio::test]
    async fn test_trap_is_execution_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), &[package("trap", TRAP_WAT)]);
        let err = runner
            .execute("trap", StrategyArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::ExecutionFailure(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_concurrent_executions() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), &[package("echo", ECHO_WAT)]);

        let mut handles = Vec::new();
        for i in 0..8 {
            let runner = runner.clone();
            handles.push(tokio::spawn(async move {
                runner
                    .execute("echo", StrategyArgs::new().arg(serde_json::json!(i)))
                    .await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            let output = handle.await.unwrap().unwrap();
            assert_eq!(output["args"][0], i);
        }
    }

    #[tokio::test]
    async fn test_reinstall_runs_new_version() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = Arc::new(Mirror::default());
        let runner = runner_with(dir.path(), &[package("decide", ECHO_WAT)], mirror.clone());

        mirror.offer("decide", crate::sandbox::tests::DECISION_WAT);
        runner.market.refresh_registry().await;
        runner.market.install("decide").await.unwrap();

        let output = runner
            .execute("decide", StrategyArgs::new())
            .await
            .unwrap();
        assert_eq!(output, serde_json::json!({"action": "scale_down"}));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_execute_during_reinstall_is_not_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = Arc::new(Mirror::default());
        let runner = runner_with(dir.path(), &[package("echo", ECHO_WAT)], mirror.clone());
        let v2 = format!("{ECHO_WAT} ;; v2");

        let installer = {
            let runner = runner.clone();
            let mirror = mirror.clone();
            tokio::spawn(async move {
                for round in 0..16 {
                    let code = if round % 2 == 0 { v2.as_str() } else { ECHO_WAT };
                    mirror.offer("echo", code);
                    runner.market.refresh_registry().await;
                    runner.market.install("echo").await.unwrap();
                }
            })
        };

        let mut runs = Vec::new();
        for _ in 0..32 {
            let runner = runner.clone();
            runs.push(tokio::spawn(async move {
                runner.execute("echo", StrategyArgs::new()).await
            }));
        }

        installer.await.unwrap();
        for run in runs {
            let result = run.await.unwrap();
            assert!(result.is_ok(), "execute overlapping a reinstall failed: {result:?}");
        }
    }
}
