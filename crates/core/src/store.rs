//! Capability surface consumed from the backing scripting engine.
//!
//! [`ScriptStore`] is the only seam between this workspace and the engine.
//! Connection setup, pooling and the wire protocol belong to whoever
//! implements it.

use async_trait::async_trait;

use crate::reply::ReplyValue;
use crate::types::{Partition, ScriptHash};

/// Message the engine returns when asked to run a hash it does not hold.
pub const NOSCRIPT_MESSAGE: &str = "NOSCRIPT No matching script. Please use EVAL.";

/// Failures reported by a [`ScriptStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The client could not reach the engine (connection refused, reset,
    /// timed out at the socket layer).
    #[error("{0}")]
    Transport(String),

    /// Script compilation or execution failed inside the engine. The message
    /// is the engine's own text.
    #[error("{0}")]
    Script(String),

    /// The requested hash is not resident in the engine's script cache.
    #[error("NOSCRIPT No matching script. Please use EVAL.")]
    NoScript,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Operations a backing store client must provide.
///
/// Calls are awaited one at a time by the registry; implementations apply no
/// retries on behalf of callers. Key/field operations take the partition
/// explicitly, while scripts select it themselves.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// Evaluate a literal script body.
    async fn eval(&self, body: &str, keys: &[String], args: &[String])
        -> StoreResult<ReplyValue>;

    /// Evaluate a script already resident in the engine's cache.
    ///
    /// Fails with [`StoreError::NoScript`] when `hash` is unknown.
    async fn eval_sha(
        &self,
        hash: &ScriptHash,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<ReplyValue>;

    /// Load a body into the script cache without running it.
    async fn script_load(&self, body: &str) -> StoreResult<ScriptHash>;

    /// One residency flag per queried hash, in query order.
    async fn script_exists(&self, hashes: &[ScriptHash]) -> StoreResult<Vec<bool>>;

    /// Drop every script from the engine's cache.
    async fn script_flush(&self) -> StoreResult<()>;

    async fn hget(&self, partition: Partition, key: &str, field: &str)
        -> StoreResult<Option<String>>;

    /// Returns `true` when `field` was newly created.
    async fn hset(&self, partition: Partition, key: &str, field: &str, value: &str)
        -> StoreResult<bool>;

    async fn exists(&self, partition: Partition, key: &str) -> StoreResult<bool>;

    async fn hexists(&self, partition: Partition, key: &str, field: &str) -> StoreResult<bool>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
