//! Execution facade: run literal bodies or registered scripts by name.

use std::collections::HashMap;
use std::sync::Arc;

use scriptor_core::{
    Namespace, Partition, ReplyValue, ScriptBody, ScriptName, ScriptStore, ScriptorError,
    ScriptorResult,
};
use scriptor_db::{MappingRepo, MappingTemplates, ScriptRegistry};

use crate::config::ScriptorConfig;

/// Runs scripts against a [`ScriptStore`] through a reconciled registry.
///
/// The registry is populated once at construction. Running by name never
/// reloads on its own; after a NOSCRIPT error call [`register`](Self::register)
/// again with the source bodies.
pub struct Scriptor {
    store: Arc<dyn ScriptStore>,
    mapping: MappingRepo,
    registry: ScriptRegistry,
}

impl std::fmt::Debug for Scriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scriptor")
            .field("mapping", &self.mapping)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Scriptor {
    pub fn builder() -> ScriptorBuilder {
        ScriptorBuilder::default()
    }

    /// Build from loaded configuration. An empty `scripts` map bulk loads the
    /// persisted record instead of registering.
    pub async fn from_config(
        store: Arc<dyn ScriptStore>,
        config: &ScriptorConfig,
        scripts: HashMap<ScriptName, ScriptBody>,
    ) -> ScriptorResult<Self> {
        Self::builder()
            .store(Some(store))
            .namespace(config.namespace.clone())
            .partition(config.partition)
            .scripts(scripts)
            .build()
            .await
    }

    /// Evaluate a literal body. Engine errors come back verbatim.
    pub async fn exec(
        &self,
        body: &str,
        keys: &[String],
        args: &[String],
    ) -> ScriptorResult<ReplyValue> {
        Ok(self.store.eval(body, keys, args).await?)
    }

    /// Evaluate a registered script by name.
    ///
    /// Unknown names fail with [`ScriptorError::ScriptNotFound`] before any
    /// round trip.
    pub async fn exec_sha(
        &self,
        name: &str,
        keys: &[String],
        args: &[String],
    ) -> ScriptorResult<ReplyValue> {
        let hash = self
            .registry
            .get(name)
            .ok_or(ScriptorError::ScriptNotFound)?;
        Ok(self.store.eval_sha(hash, keys, args).await?)
    }

    /// Register more scripts, or repair ones that were evicted.
    pub async fn register(
        &mut self,
        scripts: &HashMap<ScriptName, ScriptBody>,
    ) -> ScriptorResult<()> {
        self.registry
            .register(self.store.as_ref(), scripts, &self.mapping)
            .await
    }

    /// Replace the registry with a fresh bulk load. On failure the current
    /// registry is kept.
    pub async fn reload(&mut self) -> ScriptorResult<()> {
        self.registry = ScriptRegistry::bulk_load(self.store.as_ref(), &self.mapping).await?;
        Ok(())
    }

    pub fn registry(&self) -> &ScriptRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ScriptStore> {
        &self.store
    }

    pub fn namespace(&self) -> &Namespace {
        self.mapping.namespace()
    }

    pub fn partition(&self) -> Partition {
        self.mapping.partition()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ScriptorBuilder {
    store: Option<Arc<dyn ScriptStore>>,
    namespace: Option<Namespace>,
    partition: Partition,
    scripts: HashMap<ScriptName, ScriptBody>,
    templates: MappingTemplates,
}

impl ScriptorBuilder {
    pub fn store(mut self, store: Option<Arc<dyn ScriptStore>>) -> Self {
        self.store = store;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<Namespace>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn partition(mut self, partition: Partition) -> Self {
        self.partition = partition;
        self
    }

    pub fn scripts(mut self, scripts: HashMap<ScriptName, ScriptBody>) -> Self {
        self.scripts.extend(scripts);
        self
    }

    pub fn script(mut self, name: impl Into<ScriptName>, body: impl Into<ScriptBody>) -> Self {
        self.scripts.insert(name.into(), body.into());
        self
    }

    pub fn templates(mut self, templates: MappingTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub async fn build(self) -> ScriptorResult<Scriptor> {
        let store = self
            .store
            .ok_or_else(|| ScriptorError::InvalidArgument("'store' is invalid".into()))?;
        let namespace = self
            .namespace
            .filter(|ns| !ns.as_str().is_empty())
            .ok_or_else(|| ScriptorError::InvalidArgument("'namespace' is invalid".into()))?;

        let mapping = MappingRepo::new(self.templates, namespace, self.partition);
        let registry = ScriptRegistry::build(store.as_ref(), Some(&self.scripts), &mapping).await?;

        tracing::info!(
            namespace = %mapping.namespace(),
            partition = mapping.partition(),
            scripts = registry.len(),
            "Scriptor ready"
        );

        Ok(Scriptor {
            store,
            mapping,
            registry,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
