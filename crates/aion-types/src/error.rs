//! Shared error types for the strategy marketplace.

use thiserror::Error;

/// Every failure the marketplace surfaces to its callers.
///
/// Verification failures, network failures and sandbox failures are kept in
/// distinct variants so a caller can decide whether to retry (see
/// [`MarketError::is_retryable`]) or abandon.
#[derive(Error, Debug)]
pub enum MarketError {
    /// The package names a signing key that is not in the trust store.
    #[error("Untrusted author key: {0}")]
    UntrustedAuthor(String),

    /// Required metadata fields are absent or empty.
    #[error("Incomplete metadata for '{id}': missing {}", missing.join(", "))]
    IncompleteMetadata {
        /// Strategy id, or `<unknown>` when the id itself is missing.
        id: String,
        /// Names of the missing fields.
        missing: Vec<String>,
    },

    /// The signature does not verify over the code digest.
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// The code payload exceeds the configured ceiling.
    #[error("Strategy code is {size} bytes, exceeding the {limit}-byte limit")]
    OversizedPackage {
        /// Observed size in bytes (a lower bound when a download was cut short).
        size: usize,
        /// Configured maximum in bytes.
        limit: usize,
    },

    /// No strategy with this id in the registry or catalog.
    #[error("Strategy not found: {0}")]
    NotFound(String),

    /// A registry or download request failed.
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// The sandboxed strategy failed while running.
    #[error("Strategy execution failed: {0}")]
    ExecutionFailure(String),

    /// A previously trusted strategy no longer passes verification.
    #[error("Security error: {0}")]
    SecurityError(String),

    /// A package's metadata id disagrees with the id it is stored or listed under.
    #[error("Expected strategy id '{expected}' but package declares '{found}'")]
    IdMismatch {
        /// The registry key or record file stem.
        expected: String,
        /// The id carried in the descriptor metadata.
        found: String,
    },

    /// The strategy id cannot be used to address local storage.
    #[error("Invalid strategy id: {0:?}")]
    InvalidStrategyId(String),

    /// A record or download could not be decoded.
    #[error("Invalid package: {0}")]
    InvalidPackage(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MarketError {
    /// True only for transient failures that are worth retrying.
    ///
    /// Verification and security failures are never retryable: the same
    /// bytes will fail the same way.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkFailure(_))
    }

    /// True for failures that indicate untrusted or tampered content.
    pub fn is_security_failure(&self) -> bool {
        matches!(
            self,
            Self::UntrustedAuthor(_)
                | Self::IncompleteMetadata { .. }
                | Self::SignatureInvalid(_)
                | Self::SecurityError(_)
                | Self::IdMismatch { .. }
        )
    }
}

/// Alias for Result with MarketError.
pub type MarketResult<T> = Result<T, MarketError>;
