//! Kernel-specific error types.

use aion_types::error::MarketError;
use thiserror::Error;

/// Kernel error type wrapping MarketError with boot context.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A wrapped MarketError.
    #[error(transparent)]
    Market(#[from] MarketError),

    /// The kernel failed to boot.
    #[error("Boot failed: {0}")]
    BootFailed(String),
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;
