use std::fmt;

use serde::{Deserialize, Serialize};

/// Script identifier, unique within a namespace.
pub type ScriptName = String;

/// Literal script source text.
pub type ScriptBody = String;

/// Logical database index selecting a store subdivision.
pub type Partition = u32;

/// Content digest assigned by the engine when a script body is loaded.
///
/// Used as the key into the engine's script execution cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptHash(String);

impl ScriptHash {
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ScriptHash {
    fn from(digest: String) -> Self {
        Self(digest)
    }
}

impl From<&str> for ScriptHash {
    fn from(digest: &str) -> Self {
        Self(digest.to_string())
    }
}

impl AsRef<str> for ScriptHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Separator between the key prefix and the schema version in a namespace.
pub const NAMESPACE_VERSION_SEPARATOR: char = '|';

/// Versioned key scoping one persisted name-to-hash mapping record.
///
/// Conventionally `"<prefix>|<version>"`, e.g. `scriptKey|0.0.0`, so that a
/// schema bump starts from a fresh record instead of reusing stale hashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Build a namespace from a key prefix and a schema version.
    pub fn versioned(prefix: &str, version: &str) -> Self {
        Self(format!("{prefix}{NAMESPACE_VERSION_SEPARATOR}{version}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The version suffix, if the key follows the `prefix|version` convention.
    pub fn version(&self) -> Option<&str> {
        self.0
            .split_once(NAMESPACE_VERSION_SEPARATOR)
            .map(|(_, version)| version)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Namespace {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for Namespace {
    fn from(key: String) -> Self {
        Self(key)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
