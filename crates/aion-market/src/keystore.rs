//! Trust store: author public keys loaded from a directory at startup.
//!
//! One PEM file per author; the file stem is the key id. The store is
//! read-only once built, so it can be shared freely behind an `Arc`.

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Smallest accepted modulus, in bytes (2048 bits).
pub const MIN_KEY_BYTES: usize = 256;

/// Trusted author keys, keyed by key id.
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    keys: HashMap<String, RsaPublicKey>,
}

impl KeyStore {
    /// Load every key file in `dir`.
    ///
    /// Unreadable or malformed files are skipped with a warning; a missing
    /// directory yields an empty store. Files are visited in name order so
    /// duplicate stems resolve deterministically (first wins).
    pub fn load(dir: &Path) -> Self {
        let mut keys = HashMap::new();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Trusted key directory unavailable");
                return Self { keys };
            }
        };

        let mut paths: Vec<_> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        for path in paths {
            let Some(key_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if key_id.is_empty() || key_id.starts_with('.') {
                continue;
            }
            if keys.contains_key(key_id) {
                warn!(key_id, path = %path.display(), "Duplicate key id, keeping the first file");
                continue;
            }

            let parsed = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|pem| parse_public_key_pem(&pem));
            match parsed {
                Ok(key) => {
                    keys.insert(key_id.to_string(), key);
                }
                Err(e) => {
                    warn!(key_id, path = %path.display(), error = %e, "Skipping invalid key file");
                }
            }
        }

        info!(count = keys.len(), dir = %dir.display(), "Loaded trusted keys");
        Self { keys }
    }

    /// Build a store from keys already in memory.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = (S, RsaPublicKey)>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(|(id, k)| (id.into(), k)).collect(),
        }
    }

    /// Look up a trusted key.
    pub fn lookup(&self, key_id: &str) -> Option<&RsaPublicKey> {
        self.keys.get(key_id)
    }

    /// Trusted key ids, sorted.
    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.keys.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Parse a PEM public key (SPKI `PUBLIC KEY`, or PKCS#1 `RSA PUBLIC KEY`).
pub fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey, String> {
    let key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| format!("not an RSA public key: {e}"))?;
    if key.size() < MIN_KEY_BYTES {
        return Err(format!(
            "key is {} bits, minimum is {}",
            key.size() * 8,
            MIN_KEY_BYTES * 8
        ));
    }
    Ok(key)
}
