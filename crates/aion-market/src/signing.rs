//! Author-side signing helpers.
//!
//! Produces signatures with exactly the scheme the [`Verifier`](crate::Verifier)
//! checks: SHA-512 digest of the code, signed with RSASSA-PSS (MGF1-SHA-512,
//! salt length equal to the digest length).

use aion_types::error::{MarketError, MarketResult};
use aion_types::package::{RegistryEntry, StrategyMetadata};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey, LineEnding};
use rsa::pss::SigningKey;
use rsa::signature::hazmat::RandomizedPrehashSigner;
use rsa::signature::SignatureEncoding;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha512};
use std::path::Path;

/// SHA-512 digest of strategy code. This is the value that gets signed.
pub fn code_digest(code: &str) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(code.as_bytes());
    let mut digest = [0u8; 64];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// Parse a PEM private key (PKCS#8 `PRIVATE KEY` or PKCS#1 `RSA PRIVATE KEY`).
pub fn parse_private_key_pem(pem: &str) -> MarketResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| MarketError::Config(format!("not an RSA private key: {e}")))
}

/// Read and parse a PEM private key file.
pub fn load_private_key(path: &Path) -> MarketResult<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path)?;
    parse_private_key_pem(&pem)
}

/// The public half of `key` as SPKI PEM, suitable for a trust directory.
pub fn public_key_pem(key: &RsaPrivateKey) -> MarketResult<String> {
    RsaPublicKey::from(key)
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| MarketError::Config(format!("cannot encode public key: {e}")))
}

/// Sign strategy code.
pub fn sign_code(key: &RsaPrivateKey, code: &str) -> MarketResult<Vec<u8>> {
    let signing_key = SigningKey::<Sha512>::new(key.clone());
    let digest = code_digest(code);
    let signature = signing_key
        .sign_prehash_with_rng(&mut rand::thread_rng(), &digest)
        .map_err(|e| MarketError::SignatureInvalid(format!("signing failed: {e}")))?;
    Ok(signature.to_vec())
}

/// Build the registry descriptor for a signed strategy.
pub fn registry_entry(
    key: &RsaPrivateKey,
    key_id: &str,
    code: &str,
    metadata: StrategyMetadata,
    download_url: &str,
) -> MarketResult<RegistryEntry> {
    let signature = sign_code(key, code)?;
    Ok(RegistryEntry {
        metadata,
        download_url: download_url.to_string(),
        signature: hex::encode(signature),
        author_key: key_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{alice, metadata, ALICE_PEM};

    #[test]
    fn test_digest_is_512_bits() {
        assert_eq!(code_digest("").len(), 64);
        assert_ne!(code_digest("a"), code_digest("b"));
    }

    #[test]
    fn test_signatures_are_randomized() {
        let key = alice();
        let a = sign_code(&key, "(module)").unwrap();
        let b = sign_code(&key, "(module)").unwrap();
        assert_eq!(a.len(), 256);
        assert_ne!(a, b, "PSS salt should differ between signatures");
    }

    #[test]
    fn test_registry_entry_hex_signature() {
        let entry = registry_entry(
            &alice(),
            "alice",
            "(module)",
            metadata("s1", "Echo"),
            "https://example.com/s1.wat",
        )
        .unwrap();
        assert_eq!(entry.author_key, "alice");
        assert_eq!(hex::decode(&entry.signature).unwrap().len(), 256);
    }

    #[test]
    fn test_parse_private_key_rejects_garbage() {
        assert!(parse_private_key_pem(ALICE_PEM).is_ok());
        assert!(matches!(
            parse_private_key_pem("-----BEGIN NOTHING-----"),
            Err(MarketError::Config(_))
        ));
    }
}
