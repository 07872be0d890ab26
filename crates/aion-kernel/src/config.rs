//! Configuration loading from `~/.aion/config.toml`.

use aion_types::config::AionConfig;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable overriding the AION home directory.
pub const HOME_ENV: &str = "AION_HOME";

/// Load kernel configuration from a TOML file, falling back to defaults.
///
/// A missing, unreadable or malformed file is logged and replaced by
/// [`AionConfig::default`]; booting never fails on configuration alone.
pub fn load_config(path: Option<&Path>) -> AionConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return AionConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<AionConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                AionConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            AionConfig::default()
        }
    }
}

/// The AION home directory: `$AION_HOME`, else `~/.aion`.
pub fn aion_home() -> PathBuf {
    match std::env::var_os(HOME_ENV) {
        Some(home) if !home.is_empty() => PathBuf::from(home),
        _ => dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".aion"),
    }
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    aion_home().join("config.toml")
}

/// Resolve a configured path against the home directory.
pub fn resolve_path(home: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        home.join(path)
    }
}
