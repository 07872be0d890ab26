//! Local strategy pool: one JSON record per package in `<pool>/<id>.strategy`.

use crate::verify::Verifier;
use aion_types::error::{MarketError, MarketResult};
use aion_types::package::{validate_strategy_id, PackageRecord, StrategyPackage};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// File extension of persisted strategy records.
pub const RECORD_EXTENSION: &str = "strategy";

/// Verified packages keyed by strategy id.
pub type Catalog = HashMap<String, Arc<StrategyPackage>>;

/// Outcome of a bulk load.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Number of packages accepted into the catalog.
    pub loaded: usize,
    /// Records left out of the catalog, with the reason.
    pub rejected: Vec<(PathBuf, String)>,
}

/// Persists and reloads strategy packages.
pub struct PackageStore {
    pool: PathBuf,
    verifier: Arc<Verifier>,
}

impl PackageStore {
    pub fn new(pool: PathBuf, verifier: Arc<Verifier>) -> Self {
        Self { pool, verifier }
    }

    pub fn pool(&self) -> &Path {
        &self.pool
    }

    /// Path of the record for `id`.
    pub fn record_path(&self, id: &str) -> MarketResult<PathBuf> {
        validate_strategy_id(id)?;
        Ok(self.pool.join(format!("{id}.{RECORD_EXTENSION}")))
    }

    /// Load and verify every record in the pool.
    ///
    /// Records that fail to parse or verify are logged and skipped; they stay
    /// on disk untouched for inspection. Never fails as a whole.
    pub fn load_all(&self) -> (Catalog, LoadReport) {
        let mut catalog = Catalog::new();
        let mut report = LoadReport::default();

        if let Err(e) = std::fs::create_dir_all(&self.pool) {
            warn!(pool = %self.pool.display(), error = %e, "Cannot create strategy pool");
            return (catalog, report);
        }

        let entries = match std::fs::read_dir(&self.pool) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(pool = %self.pool.display(), error = %e, "Cannot read strategy pool");
                return (catalog, report);
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION)
            })
            .collect();
        paths.sort();

        for path in paths {
            match self.load_path(&path) {
                Ok(package) => {
                    info!(
                        strategy = %package.id(),
                        name = package.metadata().name().unwrap_or_default(),
                        "Loaded strategy"
                    );
                    catalog.insert(package.id().to_string(), Arc::new(package));
                    report.loaded += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Rejected strategy record");
                    report.rejected.push((path, e.to_string()));
                }
            }
        }

        info!(
            loaded = report.loaded,
            rejected = report.rejected.len(),
            pool = %self.pool.display(),
            "Strategy pool loaded"
        );
        (catalog, report)
    }

    /// Read, parse and verify one record file.
    fn load_path(&self, path: &Path) -> MarketResult<StrategyPackage> {
        let package = read_record(path)?;
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let id = package.metadata().id().unwrap_or_default();
        if id != stem {
            return Err(MarketError::IdMismatch {
                expected: stem.to_string(),
                found: id.to_string(),
            });
        }
        self.verifier.check(&package)?;
        Ok(package)
    }

    /// Read the persisted record for `id` without verifying it.
    pub fn load_record(&self, id: &str) -> MarketResult<StrategyPackage> {
        read_record(&self.record_path(id)?)
    }

    /// Persist `package`, replacing any prior record for its id.
    ///
    /// The record is written to a temporary file in the pool and renamed into
    /// place, so a failed save leaves the previous record intact.
    pub fn save(&self, package: &StrategyPackage) -> MarketResult<PathBuf> {
        let id = package
            .metadata()
            .id()
            .ok_or_else(|| MarketError::InvalidStrategyId(String::new()))?;
        let path = self.record_path(id)?;
        self.verifier.check_size(package.code().len())?;

        let record = PackageRecord::from_package(package, Some(chrono::Utc::now()));
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| MarketError::InvalidPackage(format!("serialize record: {e}")))?;

        std::fs::create_dir_all(&self.pool)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.pool)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| MarketError::Io(e.error))?;

        info!(strategy = %id, path = %path.display(), "Saved strategy record");
        Ok(path)
    }
}

fn read_record(path: &Path) -> MarketResult<StrategyPackage> {
    let bytes = std::fs::read(path)?;
    let record: PackageRecord = serde_json::from_slice(&bytes)
        .map_err(|e| MarketError::InvalidPackage(format!("{}: {e}", path.display())))?;
    record.into_package()
}
