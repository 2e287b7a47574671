//! Workspace context and configuration.
//!
//! A [`Workspace`] is an explicit value threaded through every component
//! call. Configuration lives in an optional `amp.toml` at the workspace root:
//!
//! ```toml
//! memory_dir = "memory"
//! index_path = "_build/index.json"
//! shard_capacity = 50
//! required_tag_prefixes = ["topic"]
//! index_policy = "strict"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Config file name at the workspace root.
pub const CONFIG_FILE: &str = "amp.toml";

/// Environment variable naming the workspace directory.
pub const WORKSPACE_ENV: &str = "AMP_DIR";

/// Hard upper bound on records per shard.
pub const MAX_SHARD_RECORDS: usize = 50;

/// What readers do when the index on disk does not match the shards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexPolicy {
    /// Refuse with a stale-index error.
    #[default]
    Strict,
    /// Serve the last successfully built index and log a warning.
    LastGood,
}

/// Settings loaded from `amp.toml`. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Shard directory, relative to the root.
    pub memory_dir: PathBuf,
    /// Compiled index file, relative to the root.
    pub index_path: PathBuf,
    /// Lock file and plan ledger directory, relative to the root.
    pub state_dir: PathBuf,
    /// Records per shard; clamped to [`MAX_SHARD_RECORDS`].
    pub shard_capacity: usize,
    /// Tag prefixes the build gate accepts as classifying a record.
    pub recognized_tag_prefixes: Vec<String>,
    /// Prefixes every active record should carry (planner check).
    pub required_tag_prefixes: Vec<String>,
    /// Days until `review_after` for new records; `0` disables.
    pub default_review_days: u32,
    pub lock_retries: u32,
    pub lock_retry_ms: u64,
    pub index_policy: IndexPolicy,
    /// External index compiler: program followed by arguments. The memory
    /// directory and output path are appended.
    pub compiler_command: Option<Vec<String>>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            memory_dir: PathBuf::from("memory"),
            index_path: PathBuf::from("_build/index.json"),
            state_dir: PathBuf::from(".amp"),
            shard_capacity: MAX_SHARD_RECORDS,
            recognized_tag_prefixes: [
                "topic", "repo", "product", "area", "tier", "intent", "review", "source", "kind",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            required_tag_prefixes: vec!["topic".to_string()],
            default_review_days: 30,
            lock_retries: 10,
            lock_retry_ms: 100,
            index_policy: IndexPolicy::Strict,
            compiler_command: None,
        }
    }
}

impl WorkspaceConfig {
    /// Parse a config document.
    pub fn from_toml(text: &str) -> StoreResult<Self> {
        toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn with_shard_capacity(mut self, capacity: usize) -> Self {
        self.shard_capacity = capacity;
        self
    }

    pub fn with_index_policy(mut self, policy: IndexPolicy) -> Self {
        self.index_policy = policy;
        self
    }

    pub fn with_default_review_days(mut self, days: u32) -> Self {
        self.default_review_days = days;
        self
    }
}

/// A memory workspace: root directory plus its configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Workspace {
    root: PathBuf,
    config: WorkspaceConfig,
}

impl Workspace {
    /// Open `root`, reading `amp.toml` when present.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        let config_path = root.join(CONFIG_FILE);
        let config = if config_path.exists() {
            WorkspaceConfig::from_toml(&fs::read_to_string(&config_path)?)?
        } else {
            WorkspaceConfig::default()
        };
        Ok(Self { root, config })
    }

    /// Use an explicit configuration, ignoring any `amp.toml`.
    pub fn with_config(root: impl AsRef<Path>, config: WorkspaceConfig) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            config,
        }
    }

    /// Locate the workspace: explicit path, then `AMP_DIR`, then the nearest
    /// ancestor of the current directory containing `amp.toml`.
    pub fn discover(explicit: Option<&Path>) -> StoreResult<Self> {
        if let Some(dir) = explicit {
            return Self::open(dir);
        }
        if let Ok(dir) = std::env::var(WORKSPACE_ENV) {
            debug!(dir = %dir, "workspace from {}", WORKSPACE_ENV);
            return Self::open(dir);
        }
        let cwd = std::env::current_dir()?;
        for dir in cwd.ancestors() {
            if dir.join(CONFIG_FILE).is_file() {
                return Self::open(dir);
            }
        }
        Err(StoreError::Config(format!(
            "no {CONFIG_FILE} found above {} and {WORKSPACE_ENV} is not set",
            cwd.display()
        )))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.root.join(&self.config.memory_dir)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(&self.config.index_path)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(&self.config.state_dir)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join("workspace.lock")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir().join("applied-plans.json")
    }

    /// Effective shard capacity, always within `1..=MAX_SHARD_RECORDS`.
    pub fn shard_capacity(&self) -> usize {
        self.config.shard_capacity.clamp(1, MAX_SHARD_RECORDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        assert_eq!(ws.config(), &WorkspaceConfig::default());
        assert_eq!(ws.memory_dir(), dir.path().join("memory"));
        assert_eq!(ws.shard_capacity(), 50);
    }

    #[test]
    fn test_partial_config_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "shard_capacity = 10\nindex_policy = \"last_good\"\n",
        )
        .unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        assert_eq!(ws.shard_capacity(), 10);
        assert_eq!(ws.config().index_policy, IndexPolicy::LastGood);
        assert_eq!(ws.config().required_tag_prefixes, vec!["topic"]);
    }

    #[test]
    fn test_capacity_is_clamped() {
        let ws = Workspace::with_config(
            "/tmp/ws",
            WorkspaceConfig::default().with_shard_capacity(500),
        );
        assert_eq!(ws.shard_capacity(), MAX_SHARD_RECORDS);
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let err = WorkspaceConfig::from_toml("shard_capacity = \"many\"").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn test_discover_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::discover(Some(dir.path())).unwrap();
        assert_eq!(ws.root(), dir.path());
    }
}
