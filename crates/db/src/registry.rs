//! In-process name→hash registry reconciled against the mapping record and
//! the engine's script cache.
//!
//! Registration trusts a persisted hash only after a four-step check
//! (namespace exists, member exists, hash fetched, hash resident). Any
//! not-found or eviction outcome is repaired by reloading the body and
//! rewriting the mapping member. Loading identical bodies always yields
//! identical hashes, so concurrent repairs from separate processes converge.
//!
//! The check is a sequence of independent round trips. A script evicted
//! between the residency check and a later `eval_sha` surfaces as NOSCRIPT
//! to the caller, who recovers by registering again.

use std::collections::HashMap;
use std::slice;

use scriptor_core::{
    ScriptBody, ScriptHash, ScriptName, ScriptStore, ScriptorError, ScriptorResult,
};
use tracing::{debug, info, warn};

use crate::mapping::MappingRepo;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptRegistry {
    entries: HashMap<ScriptName, ScriptHash>,
}

impl ScriptRegistry {
    /// Empty registry. Use [`build`](Self::build) to populate one.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a registry for `mapping`'s namespace and partition.
    ///
    /// With no scripts (or an empty map) the persisted record is bulk loaded;
    /// otherwise every supplied script is registered.
    pub async fn build(
        store: &dyn ScriptStore,
        scripts: Option<&HashMap<ScriptName, ScriptBody>>,
        mapping: &MappingRepo,
    ) -> ScriptorResult<Self> {
        match scripts {
            Some(scripts) if !scripts.is_empty() => {
                let mut registry = Self::new();
                registry.register(store, scripts, mapping).await?;
                Ok(registry)
            }
            _ => Self::bulk_load(store, mapping).await,
        }
    }

    /// Register `scripts`, merging them into this registry.
    ///
    /// Entries are only committed once every script has been resolved, so a
    /// failure part way through leaves the registry as it was.
    pub async fn register(
        &mut self,
        store: &dyn ScriptStore,
        scripts: &HashMap<ScriptName, ScriptBody>,
        mapping: &MappingRepo,
    ) -> ScriptorResult<()> {
        let mut staged = Vec::with_capacity(scripts.len());

        for (name, body) in scripts {
            let hash = match trusted_hash(store, mapping, name).await {
                Ok(hash) => {
                    debug!(
                        namespace = %mapping.namespace(),
                        partition = mapping.partition(),
                        script = %name,
                        hash = %hash,
                        "Adopted persisted script hash"
                    );
                    hash
                }
                Err(err) if err.is_repairable() => repair(store, mapping, name, body, &err).await?,
                Err(err) => return Err(err),
            };
            staged.push((name.clone(), hash));
        }

        self.entries.extend(staged);
        Ok(())
    }

    /// Rebuild a registry from the persisted record alone.
    ///
    /// An absent record yields an empty registry. If any persisted hash is no
    /// longer resident the whole load fails with
    /// [`ScriptorError::CacheEviction`] and nothing is returned.
    pub async fn bulk_load(store: &dyn ScriptStore, mapping: &MappingRepo) -> ScriptorResult<Self> {
        let pairs = mapping.load_all(store).await?;
        if pairs.is_empty() {
            info!(
                namespace = %mapping.namespace(),
                partition = mapping.partition(),
                "No persisted scripts, starting with an empty registry"
            );
            return Ok(Self::new());
        }

        let hashes: Vec<ScriptHash> = pairs.iter().map(|(_, hash)| hash.clone()).collect();
        let resident = store.script_exists(&hashes).await?;

        let mut entries = HashMap::with_capacity(pairs.len());
        for (index, (name, hash)) in pairs.into_iter().enumerate() {
            if !resident.get(index).copied().unwrap_or(false) {
                warn!(
                    namespace = %mapping.namespace(),
                    partition = mapping.partition(),
                    script = %name,
                    hash = %hash,
                    "Persisted script is no longer resident"
                );
                return Err(ScriptorError::CacheEviction { name, hash });
            }
            entries.insert(name, hash);
        }

        info!(
            namespace = %mapping.namespace(),
            partition = mapping.partition(),
            count = entries.len(),
            "Registry rebuilt from persisted mapping"
        );
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&ScriptHash> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ScriptName, &ScriptHash)> {
        self.entries.iter()
    }
}

/// The four-step check. Returns the persisted hash only if it can be trusted.
async fn trusted_hash(
    store: &dyn ScriptStore,
    mapping: &MappingRepo,
    name: &str,
) -> ScriptorResult<ScriptHash> {
    if !mapping.namespace_exists(store).await? {
        return Err(ScriptorError::MappingNotFound(mapping.namespace().to_string()));
    }
    if !mapping.member_exists(store, name).await? {
        return Err(ScriptorError::MappingNotFound(format!(
            "{}/{}",
            mapping.namespace(),
            name
        )));
    }

    let hash = mapping.get(store, name).await?;
    let resident = store.script_exists(slice::from_ref(&hash)).await?;
    if !resident.first().copied().unwrap_or(false) {
        warn!(
            namespace = %mapping.namespace(),
            partition = mapping.partition(),
            script = name,
            hash = %hash,
            "Persisted script is no longer resident"
        );
        return Err(ScriptorError::CacheEviction {
            name: name.to_string(),
            hash,
        });
    }
    Ok(hash)
}

async fn repair(
    store: &dyn ScriptStore,
    mapping: &MappingRepo,
    name: &str,
    body: &str,
    cause: &ScriptorError,
) -> ScriptorResult<ScriptHash> {
    let hash = store.script_load(body).await?;
    mapping.set(store, name, &hash).await?;
    info!(
        namespace = %mapping.namespace(),
        partition = mapping.partition(),
        script = name,
        hash = %hash,
        cause = %cause,
        "Script loaded and mapping repaired"
    );
    Ok(hash)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use scriptor_core::hashing::script_digest;
    use scriptor_core::{ErrorKind, Namespace};

    use super::*;
    use crate::mapping::MappingTemplates;
    use crate::memory::MemoryStore;

    fn mapping() -> MappingRepo {
        MappingRepo::new(MappingTemplates::default(), Namespace::new("scriptKey|0.0.0"), 1)
    }

    fn scripts(pairs: &[(&str, &str)]) -> HashMap<ScriptName, ScriptBody> {
        pairs
            .iter()
            .map(|(name, body)| (name.to_string(), body.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn build_without_scripts_on_fresh_store_is_empty() {
        let store = MemoryStore::new();
        let empty = HashMap::new();
        for scripts in [None, Some(&empty)] {
            let registry = ScriptRegistry::build(&store, scripts, &mapping())
                .await
                .expect("build");
            assert!(registry.is_empty());
        }
    }

    #[tokio::test]
    async fn register_loads_and_persists() {
        let store = MemoryStore::new();
        let mapping = mapping();
        let registry = ScriptRegistry::build(
            &store,
            Some(&scripts(&[("hello", "return 1"), ("bye", "return 2")])),
            &mapping,
        )
        .await
        .expect("build");

        assert_eq!(registry.names(), vec!["bye", "hello"]);
        assert_eq!(registry.get("hello"), Some(&script_digest("return 1")));
        assert_eq!(
            mapping.get(&store, "bye").await.expect("persisted"),
            script_digest("return 2")
        );
    }

    #[tokio::test]
    async fn register_adopts_resident_hash_without_reloading() {
        let store = MemoryStore::new();
        let mapping = mapping();
        // Persisted hash points at a resident script with a different body.
        let resident = store.script_load("return 42").await.expect("load");
        mapping.set(&store, "hello", &resident).await.expect("seed");

        let registry = ScriptRegistry::build(
            &store,
            Some(&scripts(&[("hello", "return 1")])),
            &mapping,
        )
        .await
        .expect("build");
        assert_eq!(registry.get("hello"), Some(&resident));
    }

    #[tokio::test]
    async fn register_repairs_evicted_hash() {
        let store = MemoryStore::new();
        let mapping = mapping();
        let source = scripts(&[("hello", "return 1")]);
        let mut registry = ScriptRegistry::new();
        registry.register(&store, &source, &mapping).await.expect("register");

        let hash = script_digest("return 1");
        assert!(store.evict_script(&hash));
        registry.register(&store, &source, &mapping).await.expect("re-register");

        assert_eq!(registry.get("hello"), Some(&hash));
        assert_eq!(store.script_exists(&[hash]).await.expect("exists"), vec![true]);
    }

    #[tokio::test]
    async fn register_merges_into_existing_entries() {
        let store = MemoryStore::new();
        let mapping = mapping();
        let mut registry = ScriptRegistry::new();
        registry
            .register(&store, &scripts(&[("a", "return 1")]), &mapping)
            .await
            .expect("register a");
        registry
            .register(&store, &scripts(&[("b", "return 2")]), &mapping)
            .await
            .expect("register b");
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn register_failure_leaves_registry_untouched() {
        let store = MemoryStore::new();
        let mapping = mapping();
        let mut registry = ScriptRegistry::new();
        registry
            .register(&store, &scripts(&[("a", "return 1")]), &mapping)
            .await
            .expect("register a");

        let err = registry
            .register(&store, &scripts(&[("bad", "return {")]), &mapping)
            .await
            .expect_err("compile error");
        assert_eq!(err.kind(), ErrorKind::Engine);
        assert_eq!(registry.names(), vec!["a"]);
    }

    #[tokio::test]
    async fn transport_errors_are_not_repaired() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let err = ScriptRegistry::build(&store, Some(&scripts(&[("a", "return 1")])), &mapping())
            .await
            .expect_err("offline");
        assert_eq!(err.kind(), ErrorKind::Transport);
        store.set_offline(false);
        assert_eq!(store.script_count(), 0);
    }

    #[tokio::test]
    async fn bulk_load_reproduces_registered_pairs() {
        let store = MemoryStore::new();
        let mapping = mapping();
        let registered = ScriptRegistry::build(
            &store,
            Some(&scripts(&[("a", "return 1"), ("b", "return 'two'")])),
            &mapping,
        )
        .await
        .expect("register");

        let loaded = ScriptRegistry::bulk_load(&store, &mapping).await.expect("load");
        assert_eq!(loaded, registered);
    }

    #[tokio::test]
    async fn bulk_load_fails_on_eviction() {
        let store = MemoryStore::new();
        let mapping = mapping();
        ScriptRegistry::build(&store, Some(&scripts(&[("hello", "return 1")])), &mapping)
            .await
            .expect("register");
        store.evict_script(&script_digest("return 1"));

        let result = ScriptRegistry::build(&store, None, &mapping).await;
        assert_matches!(
            result,
            Err(ScriptorError::CacheEviction { name, .. }) if name == "hello"
        );
    }
}
