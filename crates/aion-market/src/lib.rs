//! Strategy marketplace for AION.
//!
//! This crate provides:
//! - **KeyStore**: trusted author public keys loaded once at startup
//! - **Verifier**: RSA-PSS/SHA-512 signature and metadata checks
//! - **PackageStore**: the on-disk strategy pool, filtered through the verifier
//! - **Marketplace**: registry refresh and all-or-nothing installs
//! - **Signing**: author-side helpers that produce matching signatures

pub mod keystore;
pub mod marketplace;
pub mod signing;
pub mod store;
pub mod transport;
pub mod verify;

pub use aion_types::error::{MarketError, MarketResult};
pub use keystore::KeyStore;
pub use marketplace::{Marketplace, RegistryRefresh};
pub use store::{LoadReport, PackageStore};
pub use transport::{HttpTransport, RegistryTransport};
pub use verify::Verifier;
