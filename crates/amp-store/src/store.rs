//! Record store over the shard directory.
//!
//! Every mutation runs under the workspace lock and re-checks the shard
//! fingerprint before writing, so concurrent writers fail with a conflict
//! instead of losing updates.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::fingerprint::Fingerprint;
use crate::lock::WorkspaceLock;
use crate::model::{derive_id, Memory, MemoryDraft, MemoryPatch, MemoryType, Status};
use crate::shard::{list_shards, write_atomic, Shard, ShardHandle};
use crate::workspace::Workspace;

/// Highest numeric suffix tried when a derived id collides.
pub const MAX_ID_SUFFIX: u32 = 99;

/// Sharded TOML record store rooted at a workspace.
#[derive(Debug, Clone)]
pub struct ShardStore {
    workspace: Workspace,
}

impl ShardStore {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Persist a new record and return its id.
    ///
    /// The id is taken from the draft or derived from type and title; a taken
    /// derived id gets `_2`, `_3`, ... up to `_99`. An explicit id that is
    /// already present is rejected.
    pub fn create(&self, draft: MemoryDraft) -> StoreResult<String> {
        draft.validate()?;
        let _lock = WorkspaceLock::acquire(&self.workspace)?;
        fs::create_dir_all(self.workspace.memory_dir())?;

        let existing = self.all_ids()?;
        let id = match draft.id.clone() {
            Some(id) if existing.contains(&id) => return Err(StoreError::DuplicateId { id }),
            Some(id) => id,
            None => next_free_id(&derive_id(draft.memory_type, &draft.title), &existing)?,
        };

        let now = Utc::now();
        let mut draft = draft;
        let review_days = self.workspace.config().default_review_days;
        if draft.review_after.is_none() && review_days > 0 {
            draft.review_after = Some(now + Duration::days(i64::from(review_days)));
        }
        let memory_type = draft.memory_type;
        let memory = draft.into_memory(id.clone(), now)?;

        let mut shard = self.writable_shard(memory_type)?;
        shard.records.push(memory);
        shard.commit()?;

        info!(
            event = "memory.created",
            id = %id,
            memory_type = %memory_type,
            shard = %shard.handle.name(),
        );
        Ok(id)
    }

    /// Apply a field-level patch. Returns the record as stored afterwards.
    pub fn update(&self, id: &str, patch: &MemoryPatch) -> StoreResult<Memory> {
        match self.update_if_changed(id, patch)? {
            Some(updated) => Ok(updated),
            None => self.get(id),
        }
    }

    /// Like [`update`](Self::update), but `None` when the patch left the
    /// record as it was. Nothing is written in that case.
    pub fn update_if_changed(&self, id: &str, patch: &MemoryPatch) -> StoreResult<Option<Memory>> {
        if patch.superseded_by.as_deref() == Some(id) {
            return Err(StoreError::InvalidRecord(format!("{id} cannot supersede itself")));
        }
        let _lock = WorkspaceLock::acquire(&self.workspace)?;
        if let Some(ref by) = patch.superseded_by {
            self.ensure_exists(by)?;
        }

        let (mut shard, idx) = self.find(id)?;
        let record = &mut shard.records[idx];
        if !record.apply_patch(patch)? {
            debug!(event = "memory.update_skipped", id = %id, "patch changed nothing");
            return Ok(None);
        }
        record.updated_at = Utc::now();
        let updated = record.clone();
        shard.commit()?;

        info!(event = "memory.updated", id = %id, shard = %shard.handle.name());
        Ok(Some(updated))
    }

    /// Mark a record deprecated, optionally naming its successor. A
    /// deprecation without a successor must carry a note.
    pub fn deprecate(
        &self,
        id: &str,
        superseded_by: Option<&str>,
        note: Option<&str>,
    ) -> StoreResult<Memory> {
        if superseded_by == Some(id) {
            return Err(StoreError::InvalidRecord(format!("{id} cannot supersede itself")));
        }
        if superseded_by.is_none() && note.map_or(true, |n| n.trim().is_empty()) {
            return Err(StoreError::InvalidRecord(format!(
                "deprecating {id} without a successor requires a note"
            )));
        }

        let _lock = WorkspaceLock::acquire(&self.workspace)?;
        if let Some(by) = superseded_by {
            self.ensure_exists(by)?;
        }

        let (mut shard, idx) = self.find(id)?;
        let record = &mut shard.records[idx];
        record.status = Status::Deprecated;
        if let Some(by) = superseded_by {
            record.superseded_by = Some(by.to_string());
        }
        if let Some(note) = note {
            record.deprecation_note = Some(note.to_string());
        }
        record.updated_at = Utc::now();
        let deprecated = record.clone();
        shard.commit()?;

        info!(
            event = "memory.deprecated",
            id = %id,
            superseded_by = superseded_by.unwrap_or(""),
        );
        Ok(deprecated)
    }

    /// The shard file holding `id`.
    pub fn locate(&self, id: &str) -> StoreResult<ShardHandle> {
        self.find(id).map(|(shard, _)| shard.handle)
    }

    /// Read a single record straight from its shard.
    pub fn get(&self, id: &str) -> StoreResult<Memory> {
        let (shard, idx) = self.find(id)?;
        Ok(shard.records[idx].clone())
    }

    /// All shard files in type order, then part order.
    pub fn shards(&self) -> StoreResult<Vec<ShardHandle>> {
        let dir = self.workspace.memory_dir();
        let mut all = Vec::new();
        for memory_type in MemoryType::ALL {
            all.extend(list_shards(&dir, memory_type)?);
        }
        Ok(all)
    }

    /// Capture the raw bytes of every shard file.
    pub fn snapshot(&self) -> StoreResult<ShardSnapshot> {
        let _lock = WorkspaceLock::acquire(&self.workspace)?;
        let mut files = Vec::new();
        for handle in self.shards()? {
            let bytes = fs::read(&handle.path)?;
            files.push((handle.path, bytes));
        }
        Ok(ShardSnapshot { files })
    }

    /// Put the shard directory back as it was at `snapshot`. Shards created
    /// since are removed; captured ones are rewritten byte for byte.
    pub fn restore(&self, snapshot: &ShardSnapshot) -> StoreResult<()> {
        let _lock = WorkspaceLock::acquire(&self.workspace)?;
        let captured: HashSet<&Path> = snapshot.files.iter().map(|(p, _)| p.as_path()).collect();
        let mut removed = 0usize;
        for handle in self.shards()? {
            if !captured.contains(handle.path.as_path()) {
                fs::remove_file(&handle.path)?;
                removed += 1;
            }
        }
        for (path, bytes) in &snapshot.files {
            write_atomic(path, bytes)?;
        }
        info!(event = "shards.restored", files = snapshot.files.len(), removed);
        Ok(())
    }

    /// Read every shard.
    pub fn load_all(&self) -> StoreResult<Vec<Shard>> {
        self.shards()?.iter().map(Shard::read).collect()
    }

    /// Fingerprint of the whole shard directory.
    pub fn fingerprint(&self) -> StoreResult<Fingerprint> {
        Ok(workspace_fingerprint(&self.load_all()?))
    }

    fn all_ids(&self) -> StoreResult<HashSet<String>> {
        Ok(self
            .load_all()?
            .into_iter()
            .flat_map(|s| s.records.into_iter().map(|m| m.id))
            .collect())
    }

    fn ensure_exists(&self, id: &str) -> StoreResult<()> {
        self.find(id).map(|_| ())
    }

    /// Last shard of the type, or a fresh part when it is full.
    fn writable_shard(&self, memory_type: MemoryType) -> StoreResult<Shard> {
        let dir = self.workspace.memory_dir();
        let last = list_shards(&dir, memory_type)?
            .pop()
            .unwrap_or_else(|| ShardHandle::new(&dir, memory_type, 1));
        let shard = Shard::read(&last)?;
        if shard.len() < self.workspace.shard_capacity() {
            return Ok(shard);
        }

        let next = ShardHandle::new(&dir, memory_type, last.part + 1);
        info!(
            event = "shard.split",
            memory_type = %memory_type,
            full = %last.name(),
            next = %next.name(),
        );
        let fresh = Shard::read(&next)?;
        if !fresh.is_empty() {
            return Err(StoreError::Conflict {
                path: next.path,
                detail: "next shard part appeared concurrently".to_string(),
            });
        }
        Ok(fresh)
    }

    /// Find the shard containing `id`, checking the type implied by the id
    /// prefix first.
    fn find(&self, id: &str) -> StoreResult<(Shard, usize)> {
        let dir = self.workspace.memory_dir();
        let hinted = MemoryType::from_id(id);
        let order = hinted
            .into_iter()
            .chain(MemoryType::ALL.into_iter().filter(|t| Some(*t) != hinted));

        for memory_type in order {
            for handle in list_shards(&dir, memory_type)? {
                let shard = Shard::read(&handle)?;
                if let Some(idx) = shard.position(id) {
                    return Ok((shard, idx));
                }
            }
        }
        Err(StoreError::NotFound { id: id.to_string() })
    }
}

/// Shard file contents captured by [`ShardStore::snapshot`].
#[derive(Debug, Clone)]
pub struct ShardSnapshot {
    files: Vec<(PathBuf, Vec<u8>)>,
}

impl ShardSnapshot {
    /// Number of shard files captured.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Combined fingerprint over shard names and contents.
pub fn workspace_fingerprint(shards: &[Shard]) -> Fingerprint {
    let parts: Vec<(String, String)> = shards
        .iter()
        .filter_map(|s| s.fingerprint().map(|fp| (s.handle.name(), fp.to_hex())))
        .collect();
    Fingerprint::of_parts(parts.iter().map(|(n, h)| (n.as_str(), h.as_bytes())))
}

fn next_free_id(base: &str, taken: &HashSet<String>) -> StoreResult<String> {
    if !taken.contains(base) {
        return Ok(base.to_string());
    }
    (2..=MAX_ID_SUFFIX)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !taken.contains(candidate))
        .ok_or_else(|| StoreError::DuplicateId { id: base.to_string() })
}
