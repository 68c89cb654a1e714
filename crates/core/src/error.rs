use crate::reply::ReplyError;
use crate::store::StoreError;
use crate::types::{ScriptHash, ScriptName};

/// Stable message returned when running a name that was never registered.
///
/// Callers match on this string, so it must not change.
pub const SCRIPT_NOT_FOUND_MESSAGE: &str = "script not found.";

/// Coarse classification of a [`ScriptorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    CacheEviction,
    Engine,
    Transport,
    Decode,
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptorError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("script not found.")]
    ScriptNotFound,

    /// The namespace record, or a member inside it, is absent.
    #[error("Mapping not found: {0}")]
    MappingNotFound(String),

    /// A persisted hash is no longer resident in the engine's script cache.
    #[error("Script '{name}' ({hash}) was evicted from the script cache; re-register it")]
    CacheEviction { name: ScriptName, hash: ScriptHash },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reply(#[from] ReplyError),
}

/// Convenience alias used across the workspace.
pub type ScriptorResult<T> = Result<T, ScriptorError>;

impl ScriptorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::ScriptNotFound | Self::MappingNotFound(_) => ErrorKind::NotFound,
            Self::CacheEviction { .. } => ErrorKind::CacheEviction,
            Self::Store(StoreError::Transport(_)) => ErrorKind::Transport,
            Self::Store(StoreError::Script(_) | StoreError::NoScript) => ErrorKind::Engine,
            Self::Reply(_) => ErrorKind::Decode,
        }
    }

    /// Whether registration repairs this failure instead of surfacing it.
    pub fn is_repairable(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::CacheEviction)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
