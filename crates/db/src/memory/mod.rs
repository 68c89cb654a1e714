//! In-process scripting engine implementing [`ScriptStore`].
//!
//! [`MemoryStore`] keeps partitioned keyspaces of string and hash values plus
//! a script cache keyed by content digest. Scripts run atomically under the
//! engine lock, the same way a single-threaded engine would run them.
//!
//! The cache key is the 64-character SHA-256 hex digest from
//! [`script_digest`], not the 40-character SHA-1 a Redis server reports.
//! Hashes are opaque to the registry and facade, so nothing above this
//! module depends on their length or algorithm.
//!
//! It exists so that the registry and facade can be exercised end to end
//! without a networked engine; tests use [`evict_script`](MemoryStore::evict_script),
//! [`flush_all`](MemoryStore::flush_all) and
//! [`set_offline`](MemoryStore::set_offline) to simulate drift and outages.

pub mod lexer;
pub mod script;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use scriptor_core::hashing::script_digest;
use scriptor_core::{Partition, ReplyValue, ScriptHash, ScriptStore, StoreError, StoreResult};

use script::{compile, execute, Chunk, CommandRunner};

/// Number of logical databases; valid partitions are `0..PARTITION_COUNT`.
pub const PARTITION_COUNT: Partition = 16;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum Entry {
    Text(String),
    Hash(BTreeMap<String, String>),
}

#[derive(Debug, Default)]
struct EngineState {
    keyspaces: HashMap<Partition, HashMap<String, Entry>>,
    scripts: HashMap<ScriptHash, Arc<Chunk>>,
}

/// In-memory engine. Cheap to share behind an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<EngineState>,
    offline: AtomicBool,
    default_partition: Partition,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose scripts start out in `partition` instead of 0.
    pub fn with_default_partition(partition: Partition) -> Self {
        Self {
            default_partition: partition,
            ..Self::default()
        }
    }

    /// Drop a single script from the cache. Returns whether it was resident.
    pub fn evict_script(&self, hash: &ScriptHash) -> bool {
        self.state
            .lock()
            .map(|mut state| state.scripts.remove(hash).is_some())
            .unwrap_or(false)
    }

    /// Clear every keyspace. The script cache is left alone.
    pub fn flush_all(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.keyspaces.clear();
        }
    }

    /// Number of scripts currently resident.
    pub fn script_count(&self) -> usize {
        self.state.lock().map(|state| state.scripts.len()).unwrap_or(0)
    }

    /// While offline, every [`ScriptStore`] call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, EngineState>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("connection refused".to_string()));
        }
        self.state
            .lock()
            .map_err(|_| StoreError::Transport("engine state lock poisoned".to_string()))
    }

    fn run_chunk(
        &self,
        state: &mut EngineState,
        chunk: &Chunk,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<ReplyValue> {
        let mut session = Session {
            state,
            partition: self.default_partition,
        };
        execute(chunk, &mut session, keys, args).map_err(StoreError::Script)
    }

    fn command(&self, partition: Partition, argv: &[&str]) -> StoreResult<ReplyValue> {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let mut state = self.lock()?;
        let mut partition = partition;
        state
            .command(&mut partition, &argv)
            .map_err(StoreError::Script)
    }
}

#[async_trait]
impl ScriptStore for MemoryStore {
    async fn eval(
        &self,
        body: &str,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<ReplyValue> {
        let chunk = Arc::new(compile(body).map_err(StoreError::Script)?);
        let mut state = self.lock()?;
        state
            .scripts
            .entry(script_digest(body))
            .or_insert_with(|| Arc::clone(&chunk));
        self.run_chunk(&mut state, &chunk, keys, args)
    }

    async fn eval_sha(
        &self,
        hash: &ScriptHash,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<ReplyValue> {
        let mut state = self.lock()?;
        let chunk = state.scripts.get(hash).cloned().ok_or(StoreError::NoScript)?;
        self.run_chunk(&mut state, &chunk, keys, args)
    }

    async fn script_load(&self, body: &str) -> StoreResult<ScriptHash> {
        let chunk = compile(body).map_err(StoreError::Script)?;
        let hash = script_digest(body);
        self.lock()?.scripts.insert(hash.clone(), Arc::new(chunk));
        Ok(hash)
    }

    async fn script_exists(&self, hashes: &[ScriptHash]) -> StoreResult<Vec<bool>> {
        let state = self.lock()?;
        Ok(hashes.iter().map(|h| state.scripts.contains_key(h)).collect())
    }

    async fn script_flush(&self) -> StoreResult<()> {
        self.lock()?.scripts.clear();
        Ok(())
    }

    async fn hget(
        &self,
        partition: Partition,
        key: &str,
        field: &str,
    ) -> StoreResult<Option<String>> {
        match self.command(partition, &["HGET", key, field])? {
            ReplyValue::Text(value) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    async fn hset(
        &self,
        partition: Partition,
        key: &str,
        field: &str,
        value: &str,
    ) -> StoreResult<bool> {
        let reply = self.command(partition, &["HSET", key, field, value])?;
        Ok(reply.as_i64() == Some(1))
    }

    async fn exists(&self, partition: Partition, key: &str) -> StoreResult<bool> {
        let reply = self.command(partition, &["EXISTS", key])?;
        Ok(reply.as_i64().unwrap_or(0) > 0)
    }

    async fn hexists(&self, partition: Partition, key: &str, field: &str) -> StoreResult<bool> {
        let reply = self.command(partition, &["HEXISTS", key, field])?;
        Ok(reply.as_i64() == Some(1))
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Script-scoped view of the engine: `SELECT` only lasts for the script.
struct Session<'a> {
    state: &'a mut EngineState,
    partition: Partition,
}

impl CommandRunner for Session<'_> {
    fn run(&mut self, argv: &[String]) -> Result<ReplyValue, String> {
        self.state.command(&mut self.partition, argv)
    }
}

fn arity_error(name: &str) -> String {
    format!("ERR wrong number of arguments for '{}' command", name.to_ascii_lowercase())
}

impl EngineState {
    fn command(&mut self, partition: &mut Partition, argv: &[String]) -> Result<ReplyValue, String> {
        let Some((name, rest)) = argv.split_first() else {
            return Err("ERR empty command".to_string());
        };
        let name = name.to_ascii_uppercase();
        let space = self.keyspaces.entry(*partition).or_default();

        match (name.as_str(), rest) {
            ("PING", []) => Ok(ReplyValue::from("PONG")),
            ("SELECT", [index]) => {
                let index: Partition = index
                    .parse()
                    .map_err(|_| "ERR value is not an integer or out of range".to_string())?;
                if index >= PARTITION_COUNT {
                    return Err("ERR DB index is out of range".to_string());
                }
                *partition = index;
                Ok(ReplyValue::from("OK"))
            }
            ("GET", [key]) => match space.get(key) {
                None => Ok(ReplyValue::Nil),
                Some(Entry::Text(value)) => Ok(ReplyValue::from(value.as_str())),
                Some(Entry::Hash(_)) => Err(WRONGTYPE.to_string()),
            },
            ("SET", [key, value]) => {
                space.insert(key.clone(), Entry::Text(value.clone()));
                Ok(ReplyValue::from("OK"))
            }
            ("DEL", keys) if !keys.is_empty() => {
                let removed = keys.iter().filter(|k| space.remove(*k).is_some()).count();
                Ok(ReplyValue::Integer(removed as i64))
            }
            ("EXISTS", keys) if !keys.is_empty() => {
                let found = keys.iter().filter(|k| space.contains_key(*k)).count();
                Ok(ReplyValue::Integer(found as i64))
            }
            ("HGET", [key, field]) => match space.get(key) {
                None => Ok(ReplyValue::Nil),
                Some(Entry::Hash(map)) => Ok(map
                    .get(field)
                    .map(|v| ReplyValue::from(v.as_str()))
                    .unwrap_or(ReplyValue::Nil)),
                Some(Entry::Text(_)) => Err(WRONGTYPE.to_string()),
            },
            ("HSET", [key, pairs @ ..]) if !pairs.is_empty() && pairs.len() % 2 == 0 => {
                let entry = space
                    .entry(key.clone())
                    .or_insert_with(|| Entry::Hash(BTreeMap::new()));
                let Entry::Hash(map) = entry else {
                    return Err(WRONGTYPE.to_string());
                };
                let created = pairs
                    .chunks(2)
                    .filter(|pair| map.insert(pair[0].clone(), pair[1].clone()).is_none())
                    .count();
                Ok(ReplyValue::Integer(created as i64))
            }
            ("HEXISTS", [key, field]) => match space.get(key) {
                None => Ok(ReplyValue::Integer(0)),
                Some(Entry::Hash(map)) => Ok(ReplyValue::Integer(i64::from(map.contains_key(field)))),
                Some(Entry::Text(_)) => Err(WRONGTYPE.to_string()),
            },
            ("HGETALL", [key]) => match space.get(key) {
                None => Ok(ReplyValue::Array(Vec::new())),
                Some(Entry::Hash(map)) => Ok(ReplyValue::Array(
                    map.iter()
                        .flat_map(|(f, v)| [ReplyValue::from(f.as_str()), ReplyValue::from(v.as_str())])
                        .collect(),
                )),
                Some(Entry::Text(_)) => Err(WRONGTYPE.to_string()),
            },
            ("HLEN", [key]) => match space.get(key) {
                None => Ok(ReplyValue::Integer(0)),
                Some(Entry::Hash(map)) => Ok(ReplyValue::Integer(map.len() as i64)),
                Some(Entry::Text(_)) => Err(WRONGTYPE.to_string()),
            },
            ("HDEL", [key, fields @ ..]) if !fields.is_empty() => {
                let (removed, now_empty) = match space.get_mut(key) {
                    None => (0, false),
                    Some(Entry::Hash(map)) => {
                        let removed = fields.iter().filter(|f| map.remove(*f).is_some()).count();
                        (removed, map.is_empty())
                    }
                    Some(Entry::Text(_)) => return Err(WRONGTYPE.to_string()),
                };
                if now_empty {
                    space.remove(key);
                }
                Ok(ReplyValue::Integer(removed as i64))
            }
            ("PING" | "SELECT" | "GET" | "SET" | "DEL" | "EXISTS" | "HGET" | "HSET" | "HEXISTS"
            | "HGETALL" | "HLEN" | "HDEL", _) => Err(arity_error(&name)),
            _ => Err(format!("ERR unknown command '{}'", argv[0])),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn eval_sha_matches_eval() {
        let store = MemoryStore::new();
        for body in ["return 1", "return 'Hello, World!'", "return {1, 'a', {2}}"] {
            let direct = store.eval(body, &[], &[]).await.expect("eval");
            let hash = store.script_load(body).await.expect("load");
            let cached = store.eval_sha(&hash, &[], &[]).await.expect("evalsha");
            assert_eq!(direct, cached, "body {body:?}");
        }
    }

    #[tokio::test]
    async fn load_is_content_addressed() {
        let store = MemoryStore::new();
        let a = store.script_load("return 1").await.expect("load");
        let b = store.script_load("return 1").await.expect("load");
        assert_eq!(a, b);
        assert_eq!(store.script_count(), 1);
    }

    #[tokio::test]
    async fn unknown_hash_is_noscript() {
        let store = MemoryStore::new();
        let result = store.eval_sha(&ScriptHash::new("deadbeef"), &[], &[]).await;
        assert_matches!(result, Err(StoreError::NoScript));
    }

    #[tokio::test]
    async fn eviction_and_flush() {
        let store = MemoryStore::new();
        let one = store.script_load("return 1").await.expect("load");
        let two = store.script_load("return 2").await.expect("load");

        assert!(store.evict_script(&one));
        assert!(!store.evict_script(&one));
        assert_eq!(
            store.script_exists(&[one.clone(), two.clone()]).await.expect("exists"),
            vec![false, true]
        );

        store.script_flush().await.expect("flush");
        assert_eq!(store.script_exists(&[two]).await.expect("exists"), vec![false]);
    }

    #[tokio::test]
    async fn compile_errors_are_script_errors() {
        let store = MemoryStore::new();
        let result = store.eval("error return 'Hello, World!'", &[], &[]).await;
        assert_matches!(result, Err(StoreError::Script(msg)) if msg.starts_with("ERR Error compiling script"));
        assert_matches!(store.script_load("return {").await, Err(StoreError::Script(_)));
    }

    #[tokio::test]
    async fn select_inside_script_is_scoped() {
        let store = MemoryStore::new();
        let body = "redis.call('SELECT', ARGV[1])\nreturn redis.call('HSET', KEYS[1], ARGV[2], ARGV[3])";
        let reply = store
            .eval(body, &strings(&["ns"]), &strings(&["3", "hello", "abc"]))
            .await
            .expect("eval");
        assert_eq!(reply, ReplyValue::Integer(1));

        assert_eq!(store.hget(3, "ns", "hello").await.expect("hget"), Some("abc".to_string()));
        assert!(!store.exists(0, "ns").await.expect("exists"));

        // Next script starts in the default partition again.
        let reply = store
            .eval("return redis.call('EXISTS', KEYS[1])", &strings(&["ns"]), &[])
            .await
            .expect("eval");
        assert_eq!(reply, ReplyValue::Integer(0));
    }

    #[tokio::test]
    async fn script_errors_leave_the_engine_usable() {
        let store = MemoryStore::new();
        let result = store
            .eval("return -tonumber(ARGV[1])", &[], &strings(&["-9223372036854775808"]))
            .await;
        assert_matches!(result, Err(StoreError::Script(msg)) if msg.contains("no integer representation"));

        let deep = format!("return {}1{}", "{".repeat(200_000), "}".repeat(200_000));
        assert_matches!(store.eval(&deep, &[], &[]).await, Err(StoreError::Script(_)));

        assert_eq!(store.eval("return 1", &[], &[]).await, Ok(ReplyValue::Integer(1)));
    }

    #[tokio::test]
    async fn scripts_start_in_default_partition() {
        let store = MemoryStore::with_default_partition(2);
        store
            .eval("return redis.call('SET', 'k', 'v')", &[], &[])
            .await
            .expect("set");
        let reply = store
            .eval("redis.call('SELECT', 2)\nreturn redis.call('GET', 'k')", &[], &[])
            .await
            .expect("get");
        assert_eq!(reply, ReplyValue::from("v"));
        assert!(!store.exists(0, "k").await.expect("exists"));
    }

    #[tokio::test]
    async fn hash_commands() {
        let store = MemoryStore::new();
        assert!(store.hset(1, "h", "a", "1").await.expect("hset"));
        assert!(!store.hset(1, "h", "a", "2").await.expect("hset"));
        assert!(store.hexists(1, "h", "a").await.expect("hexists"));
        assert!(!store.hexists(1, "h", "b").await.expect("hexists"));
        assert!(store.exists(1, "h").await.expect("exists"));
        assert_eq!(store.hget(1, "h", "a").await.expect("hget"), Some("2".to_string()));
        assert_eq!(store.hget(1, "h", "b").await.expect("hget"), None);

        let all = store
            .eval(
                "redis.call('SELECT', 1)\nreturn redis.call('HGETALL', 'h')",
                &[],
                &[],
            )
            .await
            .expect("eval");
        assert_eq!(all, ReplyValue::Array(vec![ReplyValue::from("a"), ReplyValue::from("2")]));

        store.flush_all();
        assert!(!store.exists(1, "h").await.expect("exists"));
    }

    #[tokio::test]
    async fn wrong_type_and_arity() {
        let store = MemoryStore::new();
        store
            .eval("return redis.call('SET', 'k', 'v')", &[], &[])
            .await
            .expect("set");
        assert_matches!(store.hget(0, "k", "f").await, Err(StoreError::Script(msg)) if msg.starts_with("WRONGTYPE"));
        assert_matches!(
            store.eval("return redis.call('HGET', 'k')", &[], &[]).await,
            Err(StoreError::Script(msg)) if msg.contains("wrong number of arguments for 'hget'")
        );
        assert_matches!(
            store.eval("return redis.call('SELECT', 99)", &[], &[]).await,
            Err(StoreError::Script(msg)) if msg == "ERR DB index is out of range"
        );
    }

    #[tokio::test]
    async fn offline_store_reports_transport_errors() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert_matches!(store.eval("return 1", &[], &[]).await, Err(StoreError::Transport(_)));
        assert_matches!(store.script_exists(&[]).await, Err(StoreError::Transport(_)));
        store.set_offline(false);
        assert_eq!(store.eval("return 1", &[], &[]).await, Ok(ReplyValue::Integer(1)));
    }
}
