//! Package verification: size ceiling, author trust, metadata completeness
//! and RSA-PSS signature over the SHA-512 code digest.
//!
//! The same check runs at load, install, execute and listing time, so it must
//! stay free of side effects beyond logging and the digest counter.

use crate::keystore::KeyStore;
use crate::signing::code_digest;
use aion_types::error::{MarketError, MarketResult};
use aion_types::package::StrategyPackage;
use rsa::pss::{Signature, VerifyingKey};
use rsa::signature::hazmat::PrehashVerifier;
use sha2::Sha512;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Verifies strategy packages against the trust store.
#[derive(Debug)]
pub struct Verifier {
    keys: Arc<KeyStore>,
    max_code_bytes: usize,
    digests_computed: AtomicU64,
}

impl Verifier {
    pub fn new(keys: Arc<KeyStore>, max_code_bytes: usize) -> Self {
        Self {
            keys,
            max_code_bytes,
            digests_computed: AtomicU64::new(0),
        }
    }

    /// The trust store backing this verifier.
    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Configured code size ceiling in bytes.
    pub fn max_code_bytes(&self) -> usize {
        self.max_code_bytes
    }

    /// Number of code digests computed so far.
    pub fn digests_computed(&self) -> u64 {
        self.digests_computed.load(Ordering::Relaxed)
    }

    /// Reject code over the ceiling. Cheap; never touches crypto.
    pub fn check_size(&self, size: usize) -> MarketResult<()> {
        if size > self.max_code_bytes {
            return Err(MarketError::OversizedPackage {
                size,
                limit: self.max_code_bytes,
            });
        }
        Ok(())
    }

    /// Run every check in order and return the first failure.
    ///
    /// Order: size, author trust, metadata, digest + signature.
    pub fn check(&self, package: &StrategyPackage) -> MarketResult<()> {
        self.check_size(package.code().len())?;

        let key = self
            .keys
            .lookup(package.author_key())
            .ok_or_else(|| MarketError::UntrustedAuthor(package.author_key().to_string()))?;

        let missing = package.metadata().missing_required();
        if !missing.is_empty() {
            return Err(MarketError::IncompleteMetadata {
                id: package.id().to_string(),
                missing,
            });
        }

        let digest = code_digest(package.code());
        self.digests_computed.fetch_add(1, Ordering::Relaxed);

        let signature = Signature::try_from(package.signature())
            .map_err(|e| MarketError::SignatureInvalid(format!("malformed signature: {e}")))?;
        VerifyingKey::<Sha512>::new(key.clone())
            .verify_prehash(&digest, &signature)
            .map_err(|e| MarketError::SignatureInvalid(e.to_string()))
    }

    /// Boolean form of [`check`](Self::check); failures are logged.
    pub fn verify(&self, package: &StrategyPackage) -> bool {
        match self.check(package) {
            Ok(()) => true,
            Err(e) => {
                warn!(strategy = %package.id(), error = %e, "Strategy failed verification");
                false
            }
        }
    }
}
