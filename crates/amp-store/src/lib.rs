//! Sharded TOML storage for typed memory records.
//!
//! Records are grouped by type into shard files of bounded size under the
//! workspace's memory directory. All writes are atomic, lock-protected and
//! checked against the fingerprint the shard was read at.

pub mod error;
pub mod fingerprint;
pub mod lock;
pub mod model;
pub mod shard;
pub mod store;
pub mod workspace;

pub use error::{StoreError, StoreResult};
pub use fingerprint::Fingerprint;
pub use lock::WorkspaceLock;
pub use model::{
    derive_id, is_well_formed_tag, slugify, tag_prefix, Confidence, Link, LinkTarget, Links,
    Memory, MemoryDraft, MemoryPatch, MemoryType, Relation, Status,
};
pub use shard::{list_shards, Shard, ShardHandle};
pub use store::{workspace_fingerprint, ShardSnapshot, ShardStore, MAX_ID_SUFFIX};
pub use workspace::{
    IndexPolicy, Workspace, WorkspaceConfig, CONFIG_FILE, MAX_SHARD_RECORDS, WORKSPACE_ENV,
};
