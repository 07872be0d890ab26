//! Command implementations.

pub mod keys;
pub mod strategy;

use crate::ui;
use aion_kernel::AionKernel;
use aion_types::config::AionConfig;
use std::path::PathBuf;

/// Resolved home and configuration for one invocation.
pub struct Context {
    pub home: PathBuf,
    pub config: AionConfig,
}

impl Context {
    /// Boot the kernel or exit with a message.
    pub fn boot(self) -> AionKernel {
        AionKernel::boot(self.config, &self.home).unwrap_or_else(|e| {
            ui::error(&format!("Failed to start AION: {e}"));
            std::process::exit(1);
        })
    }
}

/// Multi-threaded runtime for one command; strategy execution needs the
/// blocking pool.
pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        ui::error(&format!("Failed to start async runtime: {e}"));
        std::process::exit(1);
    })
}
