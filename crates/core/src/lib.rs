//! Shared domain types for the scriptor workspace.
//!
//! - [`types`]: script names, hashes, namespaces and partitions.
//! - [`store`]: the [`ScriptStore`](store::ScriptStore) capability trait
//!   implemented by backing engines.
//! - [`reply`]: [`ReplyValue`](reply::ReplyValue) and the
//!   [`ReplyReader`](reply::ReplyReader) cursor.
//! - [`error`]: [`ScriptorError`](error::ScriptorError) and its kinds.

pub mod error;
pub mod hashing;
pub mod reply;
pub mod store;
pub mod types;

pub use error::{ErrorKind, ScriptorError, ScriptorResult, SCRIPT_NOT_FOUND_MESSAGE};
pub use reply::{ReplyError, ReplyReader, ReplyValue};
pub use store::{ScriptStore, StoreError, StoreResult};
pub use types::{Namespace, Partition, ScriptBody, ScriptHash, ScriptName};
