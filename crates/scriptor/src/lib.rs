//! Named script execution against a Redis-style scripting engine.
//!
//! [`Scriptor`] keeps an in-process name→hash registry in step with a
//! persisted mapping record and the engine's script cache, and runs scripts
//! either by body or by registered name. Replies are decoded with
//! [`ReplyReader`].

pub mod config;
pub mod scriptor;

pub use config::ScriptorConfig;
pub use scriptor::{Scriptor, ScriptorBuilder};

pub use scriptor_core::{
    ErrorKind, Namespace, Partition, ReplyError, ReplyReader, ReplyValue, ScriptBody, ScriptHash,
    ScriptName, ScriptStore, ScriptorError, ScriptorResult, StoreError, StoreResult,
    SCRIPT_NOT_FOUND_MESSAGE,
};
pub use scriptor_db::{MappingTemplates, MemoryStore};
