//! Persisted name→hash mapping record (one hash per namespace).
//!
//! Every round trip goes through a parameterized script template so that the
//! partition switch happens inside the engine: `KEYS[1]` is the namespace,
//! `ARGV[1]` the partition, `ARGV[2]` the script name and `ARGV[3]` the hash.

use scriptor_core::{
    Namespace, Partition, ReplyError, ReplyReader, ReplyValue, ScriptHash, ScriptName, ScriptStore,
    ScriptorError, ScriptorResult,
};

const LOAD_ALL: &str = "
    redis.pcall('SELECT', ARGV[1])
    return redis.call('HGETALL', KEYS[1])
";

const GET: &str = "
    redis.pcall('SELECT', ARGV[1])
    return redis.call('HGET', KEYS[1], ARGV[2])
";

const SET: &str = "
    redis.pcall('SELECT', ARGV[1])
    return redis.call('HSET', KEYS[1], ARGV[2], ARGV[3])
";

const KEY_EXISTS: &str = "
    redis.pcall('SELECT', ARGV[1])
    return redis.call('EXISTS', KEYS[1])
";

const FIELD_EXISTS: &str = "
    redis.pcall('SELECT', ARGV[1])
    return redis.call('HEXISTS', KEYS[1], ARGV[2])
";

/// Script templates used for each mapping operation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingTemplates {
    pub load_all: String,
    pub get: String,
    pub set: String,
    pub key_exists: String,
    pub field_exists: String,
}

impl Default for MappingTemplates {
    fn default() -> Self {
        Self {
            load_all: LOAD_ALL.to_string(),
            get: GET.to_string(),
            set: SET.to_string(),
            key_exists: KEY_EXISTS.to_string(),
            field_exists: FIELD_EXISTS.to_string(),
        }
    }
}

/// Reads and writes the mapping record at (`namespace`, `partition`).
#[derive(Debug, Clone)]
pub struct MappingRepo {
    templates: MappingTemplates,
    namespace: Namespace,
    partition: Partition,
}

impl MappingRepo {
    pub fn new(templates: MappingTemplates, namespace: Namespace, partition: Partition) -> Self {
        Self {
            templates,
            namespace,
            partition,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn templates(&self) -> &MappingTemplates {
        &self.templates
    }

    /// Fetch every (name, hash) pair in one round trip. An absent record
    /// yields an empty list.
    pub async fn load_all(
        &self,
        store: &dyn ScriptStore,
    ) -> ScriptorResult<Vec<(ScriptName, ScriptHash)>> {
        let reply = self.run(store, &self.templates.load_all, &[]).await?;
        tracing::debug!(
            namespace = %self.namespace,
            partition = self.partition,
            "Loaded mapping record"
        );

        if reply.is_nil() {
            return Ok(Vec::new());
        }
        let mut reader = ReplyReader::from_value(&reply).ok_or_else(|| {
            ScriptorError::from(ReplyError::TypeMismatch {
                index: 0,
                expected: "array",
                found: reply.type_name(),
            })
        })?;
        if reader.len() % 2 != 0 {
            return Err(ReplyError::TypeMismatch {
                index: reader.len(),
                expected: "string",
                found: "nil",
            }
            .into());
        }

        let mut pairs = Vec::with_capacity(reader.len() / 2);
        while reader.has_next() {
            let name = reader.read_string();
            let hash = reader.read_string();
            pairs.push((name, ScriptHash::new(hash)));
        }
        Ok(pairs)
    }

    /// Stored hash for `name`. A missing or empty value is `MappingNotFound`.
    pub async fn get(&self, store: &dyn ScriptStore, name: &str) -> ScriptorResult<ScriptHash> {
        let reply = self.run(store, &self.templates.get, &[name]).await?;
        tracing::debug!(
            namespace = %self.namespace,
            partition = self.partition,
            script = name,
            "Fetched mapping member"
        );

        let hash = reply.as_string();
        if hash.is_empty() {
            return Err(ScriptorError::MappingNotFound(format!(
                "{}/{}",
                self.namespace, name
            )));
        }
        Ok(ScriptHash::new(hash))
    }

    pub async fn set(
        &self,
        store: &dyn ScriptStore,
        name: &str,
        hash: &ScriptHash,
    ) -> ScriptorResult<()> {
        self.run(store, &self.templates.set, &[name, hash.as_str()])
            .await?;
        tracing::debug!(
            namespace = %self.namespace,
            partition = self.partition,
            script = name,
            hash = %hash,
            "Stored mapping member"
        );
        Ok(())
    }

    pub async fn namespace_exists(&self, store: &dyn ScriptStore) -> ScriptorResult<bool> {
        let reply = self.run(store, &self.templates.key_exists, &[]).await?;
        tracing::debug!(
            namespace = %self.namespace,
            partition = self.partition,
            "Checked mapping record"
        );
        Ok(truthy(&reply))
    }

    pub async fn member_exists(&self, store: &dyn ScriptStore, name: &str) -> ScriptorResult<bool> {
        let reply = self.run(store, &self.templates.field_exists, &[name]).await?;
        tracing::debug!(
            namespace = %self.namespace,
            partition = self.partition,
            script = name,
            "Checked mapping member"
        );
        Ok(truthy(&reply))
    }

    async fn run(
        &self,
        store: &dyn ScriptStore,
        template: &str,
        extra: &[&str],
    ) -> ScriptorResult<ReplyValue> {
        let keys = [self.namespace.as_str().to_string()];
        let mut args = Vec::with_capacity(extra.len() + 1);
        args.push(self.partition.to_string());
        args.extend(extra.iter().map(|s| s.to_string()));
        Ok(store.eval(template, &keys, &args).await?)
    }
}

fn truthy(reply: &ReplyValue) -> bool {
    reply.as_i64().unwrap_or(0) > 0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
