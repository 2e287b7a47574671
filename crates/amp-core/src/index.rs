//! The compiled, read-only Index and its freshness check.
//!
//! An [`Index`] is a point-in-time snapshot of every memory and link. It is
//! tied to the workspace fingerprint it was built from; opening it after the
//! shards changed either fails or, under the `last_good` policy, serves the
//! old snapshot with a warning.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use amp_store::{Fingerprint, IndexPolicy, Link, Memory, ShardStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AmpError, AmpResult};
use crate::obs;

/// Version of the on-disk index layout.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// On-disk index document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexFile {
    pub format_version: u32,
    pub fingerprint: Fingerprint,
    pub built_at: DateTime<Utc>,
    pub nodes: Vec<Memory>,
    pub edges: Vec<Link>,
}

/// In-memory index with id lookup and an undirected adjacency map.
#[derive(Debug, Clone)]
pub struct Index {
    file: IndexFile,
    by_id: BTreeMap<String, usize>,
    adjacency: BTreeMap<String, BTreeSet<String>>,
}

impl Index {
    pub fn from_file(file: IndexFile) -> Self {
        let by_id = file
            .nodes
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.clone(), i))
            .collect();

        let mut adjacency: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for edge in &file.edges {
            adjacency
                .entry(edge.from.clone())
                .or_default()
                .insert(edge.to.clone());
            adjacency
                .entry(edge.to.clone())
                .or_default()
                .insert(edge.from.clone());
        }

        Self {
            file,
            by_id,
            adjacency,
        }
    }

    /// Parse an index file from disk.
    pub fn read(path: &Path) -> AmpResult<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AmpError::StaleIndex {
                    reason: format!("no index has been built at {}", path.display()),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let file: IndexFile = serde_json::from_str(&text).map_err(|e| AmpError::StaleIndex {
            reason: format!("unreadable index {}: {e}", path.display()),
        })?;
        if file.format_version != INDEX_FORMAT_VERSION {
            return Err(AmpError::StaleIndex {
                reason: format!(
                    "index format {} is not supported (expected {INDEX_FORMAT_VERSION})",
                    file.format_version
                ),
            });
        }
        Ok(Self::from_file(file))
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.file.fingerprint
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.file.built_at
    }

    pub fn file(&self) -> &IndexFile {
        &self.file
    }

    pub fn len(&self) -> usize {
        self.file.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file.nodes.is_empty()
    }

    /// All memories in id order.
    pub fn memories(&self) -> impl Iterator<Item = &Memory> {
        self.by_id.values().map(move |&i| &self.file.nodes[i])
    }

    pub fn edges(&self) -> &[Link] {
        &self.file.edges
    }

    pub fn get(&self, id: &str) -> Option<&Memory> {
        self.by_id.get(id).map(|&i| &self.file.nodes[i])
    }

    /// Exact lookup, falling back to a case-insensitive match.
    pub fn resolve(&self, id: &str) -> Option<&Memory> {
        self.get(id).or_else(|| {
            self.by_id
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(id))
                .map(|(_, &i)| &self.file.nodes[i])
        })
    }

    /// Ids linked to `id` in either direction, derived edges included.
    pub fn neighbors(&self, id: &str) -> impl Iterator<Item = &str> {
        self.adjacency
            .get(id)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn degree(&self, id: &str) -> usize {
        self.adjacency.get(id).map_or(0, BTreeSet::len)
    }

    /// Whether any edge joins `a` and `b`, in either direction.
    pub fn connected(&self, a: &str, b: &str) -> bool {
        self.adjacency.get(a).is_some_and(|n| n.contains(b))
    }
}

/// Open the workspace index and check it against the current shards.
pub fn open_index(store: &ShardStore) -> AmpResult<Index> {
    let workspace = store.workspace();
    let index = Index::read(&workspace.index_path())?;
    let current = store.fingerprint()?;
    if index.fingerprint() == current {
        return Ok(index);
    }

    let reason = format!(
        "index built from {} but shards are at {}; rebuild required",
        index.fingerprint(),
        current
    );
    match workspace.config().index_policy {
        IndexPolicy::Strict => Err(AmpError::StaleIndex { reason }),
        IndexPolicy::LastGood => {
            obs::emit_index_stale_served(&reason);
            Ok(index)
        }
    }
}
