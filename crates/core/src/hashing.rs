//! Content digest for script bodies.

use sha2::{Digest, Sha256};

use crate::types::ScriptHash;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Digest identifying a script body in an engine's script cache.
///
/// Identical bodies always produce identical hashes, which is what makes
/// concurrent re-registration of the same script harmless.
///
/// This is SHA-256 (64 hex characters). Redis servers key their cache by
/// SHA-1 (40 hex characters) and report their own hashes through
/// [`ScriptStore::script_load`](crate::store::ScriptStore::script_load), so
/// this digest only addresses scripts in the in-process engine.
pub fn script_digest(body: &str) -> ScriptHash {
    ScriptHash::new(sha256_hex(body.as_bytes()))
}
