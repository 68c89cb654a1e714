use scriptor_core::{Namespace, Partition, ScriptorError, ScriptorResult};

/// Default namespace key, `<prefix>|<version>`.
pub const DEFAULT_NAMESPACE: &str = "scriptKey|0.0.0";

/// Where the persisted mapping record lives.
///
/// Loaded from environment variables; see [`ScriptorConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptorConfig {
    /// Namespace key of the mapping record (default: `scriptKey|0.0.0`).
    pub namespace: Namespace,
    /// Logical database holding the record (default: `0`).
    pub partition: Partition,
}

impl Default for ScriptorConfig {
    fn default() -> Self {
        Self {
            namespace: Namespace::new(DEFAULT_NAMESPACE),
            partition: 0,
        }
    }
}

impl ScriptorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var              | Default           |
    /// |----------------------|-------------------|
    /// | `SCRIPTOR_NAMESPACE` | `scriptKey\|0.0.0` |
    /// | `SCRIPTOR_PARTITION` | `0`               |
    pub fn from_env() -> ScriptorResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> ScriptorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let namespace = lookup("SCRIPTOR_NAMESPACE")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.into());
        if namespace.is_empty() {
            return Err(ScriptorError::InvalidArgument(
                "SCRIPTOR_NAMESPACE must not be empty".into(),
            ));
        }

        let partition: Partition = lookup("SCRIPTOR_PARTITION")
            .unwrap_or_else(|| "0".into())
            .trim()
            .parse()
            .map_err(|_| {
                ScriptorError::InvalidArgument(
                    "SCRIPTOR_PARTITION must be a valid u32".into(),
                )
            })?;

        Ok(Self {
            namespace: Namespace::new(namespace),
            partition,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
