//! Trust and author tooling: keys, sign, export-key.

use super::Context;
use crate::cli::SignArgs;
use crate::ui;
use aion_market::{signing, KeyStore};
use aion_types::package::{validate_strategy_id, StrategyMetadata};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub fn cmd_keys(ctx: Context) {
    let (keys_dir, ids) = trusted_key_ids(&ctx);

    ui::section(&format!("Trusted keys in {}", keys_dir.display()));
    if ids.is_empty() {
        println!("  (none) every install will be rejected as untrusted");
        return;
    }
    for id in ids {
        println!("  {id}");
    }
}

pub fn cmd_sign(args: SignArgs) {
    if let Err(e) = validate_strategy_id(&args.id) {
        fail(&e.to_string());
    }
    let key = signing::load_private_key(&args.key).unwrap_or_else(|e| fail(&e.to_string()));
    let code = std::fs::read_to_string(&args.code).unwrap_or_else(|e| {
        fail(&format!("cannot read {}: {e}", args.code.display()))
    });

    let metadata = match build_metadata(&args) {
        Ok(m) => m,
        Err(msg) => fail(&msg),
    };
    let entry = signing::registry_entry(&key, &args.key_id, &code, metadata, &args.url)
        .unwrap_or_else(|e| fail(&e.to_string()));

    let mut doc = BTreeMap::new();
    doc.insert(args.id.clone(), entry);
    match serde_json::to_string_pretty(&doc) {
        Ok(s) => println!("{s}"),
        Err(e) => fail(&e.to_string()),
    }
}

pub fn cmd_export_key(key: &Path) {
    let key = signing::load_private_key(key).unwrap_or_else(|e| fail(&e.to_string()));
    match signing::public_key_pem(&key) {
        Ok(pem) => print!("{pem}"),
        Err(e) => fail(&e.to_string()),
    }
}

/// Scans only the trust directory; the strategy pool is never opened.
fn trusted_key_ids(ctx: &Context) -> (PathBuf, Vec<String>) {
    let keys_dir =
        aion_kernel::config::resolve_path(&ctx.home, &ctx.config.marketplace.trusted_keys);
    let ids = KeyStore::load(&keys_dir).key_ids();
    (keys_dir, ids)
}

/// Required fields from flags, extras from repeated `--meta key=value`.
fn build_metadata(args: &SignArgs) -> Result<StrategyMetadata, String> {
    let mut metadata = StrategyMetadata::new();
    for pair in &args.meta {
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| format!("--meta expects KEY=VALUE, got '{pair}'"))?;
        metadata = metadata.with(k.trim(), v);
    }
    Ok(metadata
        .with("id", args.id.as_str())
        .with("name", args.name.as_str())
        .with("version", args.version.as_str())
        .with("author", args.author.as_str()))
}

fn fail(msg: &str) -> ! {
    ui::error(msg);
    std::process::exit(1);
}
