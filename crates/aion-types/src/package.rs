//! Strategy packages, their on-disk records and registry descriptors.

use crate::error::{MarketError, MarketResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata fields every package must carry.
pub const REQUIRED_FIELDS: [&str; 4] = ["id", "name", "version", "author"];

/// Longest strategy id accepted for local storage.
pub const MAX_ID_LEN: usize = 128;

/// String-to-string metadata attached to a strategy.
///
/// Backed by an ordered map so serialization is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyMetadata(BTreeMap<String, String>);

impl StrategyMetadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Look up a field.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.get("id")
    }

    pub fn name(&self) -> Option<&str> {
        self.get("name")
    }

    pub fn version(&self) -> Option<&str> {
        self.get("version")
    }

    pub fn author(&self) -> Option<&str> {
        self.get("author")
    }

    /// Required fields that are absent or blank, in declaration order.
    pub fn missing_required(&self) -> Vec<String> {
        REQUIRED_FIELDS
            .iter()
            .filter(|f| self.get(f).map_or(true, |v| v.trim().is_empty()))
            .map(|f| f.to_string())
            .collect()
    }

    /// Iterate over all fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StrategyMetadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A signed, executable unit of strategy logic.
///
/// Immutable once constructed: any change to code, metadata or signature
/// requires building a new package, which must be verified again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyPackage {
    code: String,
    metadata: StrategyMetadata,
    signature: Vec<u8>,
    author_key: String,
}

impl StrategyPackage {
    pub fn new(
        code: impl Into<String>,
        metadata: StrategyMetadata,
        signature: Vec<u8>,
        author_key: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            metadata,
            signature,
            author_key: author_key.into(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn metadata(&self) -> &StrategyMetadata {
        &self.metadata
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn author_key(&self) -> &str {
        &self.author_key
    }

    /// The strategy id, or `<unknown>` when metadata lacks one.
    pub fn id(&self) -> &str {
        self.metadata.id().unwrap_or("<unknown>")
    }

    /// Summary row for listings.
    pub fn summary(&self, verified: bool) -> StrategySummary {
        let field = |v: Option<&str>| v.unwrap_or_default().to_string();
        StrategySummary {
            id: field(self.metadata.id()),
            name: field(self.metadata.name()),
            version: field(self.metadata.version()),
            author: field(self.metadata.author()),
            verified,
        }
    }
}

/// On-disk form of a [`StrategyPackage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub code: String,
    pub metadata: StrategyMetadata,
    /// Lowercase hex of the signature bytes.
    pub signature: String,
    pub author_key: String,
    /// When the package was written. Not covered by the signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
}

impl PackageRecord {
    pub fn from_package(package: &StrategyPackage, installed_at: Option<DateTime<Utc>>) -> Self {
        Self {
            code: package.code.clone(),
            metadata: package.metadata.clone(),
            signature: hex::encode(&package.signature),
            author_key: package.author_key.clone(),
            installed_at,
        }
    }

    pub fn into_package(self) -> MarketResult<StrategyPackage> {
        let signature = hex::decode(self.signature.trim())
            .map_err(|e| MarketError::InvalidPackage(format!("signature is not hex: {e}")))?;
        Ok(StrategyPackage::new(
            self.code,
            self.metadata,
            signature,
            self.author_key,
        ))
    }
}

/// One entry of the remote registry document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub metadata: StrategyMetadata,
    pub download_url: String,
    /// Lowercase hex of the signature over the downloadable code.
    pub signature: String,
    pub author_key: String,
}

/// A row returned by `list_strategies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategySummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub author: String,
    pub verified: bool,
}

/// A registry entry as seen by a browsing user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableStrategy {
    pub id: String,
    pub name: String,
    pub version: String,
    pub author: String,
    pub installed: bool,
}

/// Positional and keyword arguments handed to a strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyArgs {
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

impl StrategyArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: serde_json::Value) -> Self {
        self.args.push(value);
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }
}

/// Check that an id is safe to use as a file stem.
///
/// Accepts `[A-Za-z0-9][A-Za-z0-9._-]*` up to [`MAX_ID_LEN`] characters,
/// which rules out separators, `..` and hidden files.
pub fn validate_strategy_id(id: &str) -> MarketResult<()> {
    let mut chars = id.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if first_ok && rest_ok && id.len() <= MAX_ID_LEN {
        Ok(())
    } else {
        Err(MarketError::InvalidStrategyId(id.to_string()))
    }
}
