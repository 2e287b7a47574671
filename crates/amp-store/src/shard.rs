//! Shard files: one TOML document per file, one `[[memory]]` table per record.
//!
//! A type's records live in `<plural>.toml`, then `<plural>_002.toml`,
//! `<plural>_003.toml` and so on once earlier parts fill up.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::fingerprint::Fingerprint;
use crate::model::{Memory, MemoryType};

/// Location of one shard file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardHandle {
    pub memory_type: MemoryType,
    /// 1-based position in the type's series.
    pub part: usize,
    pub path: PathBuf,
}

impl ShardHandle {
    pub fn new(memory_dir: &Path, memory_type: MemoryType, part: usize) -> Self {
        Self {
            memory_type,
            part,
            path: memory_dir.join(Self::file_name(memory_type, part)),
        }
    }

    pub fn file_name(memory_type: MemoryType, part: usize) -> String {
        if part <= 1 {
            format!("{}.toml", memory_type.shard_stem())
        } else {
            format!("{}_{:03}.toml", memory_type.shard_stem(), part)
        }
    }

    /// File name; the shard's stable name in workspace fingerprints.
    pub fn name(&self) -> String {
        Self::file_name(self.memory_type, self.part)
    }

    /// Parse the part number out of a file name belonging to `memory_type`.
    fn parse_part(memory_type: MemoryType, file_name: &str) -> Option<usize> {
        let rest = file_name
            .strip_prefix(memory_type.shard_stem())?
            .strip_suffix(".toml")?;
        if rest.is_empty() {
            return Some(1);
        }
        let digits = rest.strip_prefix('_')?;
        if digits.len() < 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().filter(|p| *p >= 2)
    }
}

/// On-disk document shape.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ShardDocument {
    #[serde(default)]
    memory: Vec<Memory>,
}

/// An in-memory view of one shard, remembering the content fingerprint it
/// was read at so that [`Shard::commit`] can detect concurrent edits.
#[derive(Debug, Clone)]
pub struct Shard {
    pub handle: ShardHandle,
    pub records: Vec<Memory>,
    fingerprint: Option<Fingerprint>,
}

impl Shard {
    /// Read a shard. A missing file yields an empty shard with no
    /// fingerprint.
    pub fn read(handle: &ShardHandle) -> StoreResult<Self> {
        let Some(bytes) = read_optional(&handle.path)? else {
            return Ok(Self {
                handle: handle.clone(),
                records: Vec::new(),
                fingerprint: None,
            });
        };
        let text = String::from_utf8(bytes).map_err(|e| StoreError::MalformedShard {
            path: handle.path.clone(),
            detail: e.to_string(),
        })?;
        let doc: ShardDocument = toml::from_str(&text).map_err(|e| StoreError::MalformedShard {
            path: handle.path.clone(),
            detail: e.to_string(),
        })?;
        Ok(Self {
            handle: handle.clone(),
            records: doc.memory,
            fingerprint: Some(Fingerprint::compute(text.as_bytes())),
        })
    }

    /// Content fingerprint at read (or last commit) time.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|m| m.id == id)
    }

    /// Serialized file contents.
    pub fn render(&self) -> StoreResult<String> {
        let doc = ShardDocument {
            memory: self.records.clone(),
        };
        let header = format!(
            "# amp memory shard: {}, part {}\n# One [[memory]] table per record.\n\n",
            self.handle.memory_type.shard_stem(),
            self.handle.part
        );
        Ok(header + &toml::to_string(&doc)?)
    }

    /// Write the shard atomically. Fails with a conflict when the file on
    /// disk no longer matches what was read.
    pub fn commit(&mut self) -> StoreResult<()> {
        let on_disk = read_optional(&self.handle.path)?.map(|b| Fingerprint::compute(&b));
        if on_disk != self.fingerprint {
            warn!(
                event = "shard.conflict",
                path = %self.handle.path.display(),
                "shard changed since it was read"
            );
            return Err(StoreError::Conflict {
                path: self.handle.path.clone(),
                detail: "shard changed since it was read".to_string(),
            });
        }

        let rendered = self.render()?;
        write_atomic(&self.handle.path, rendered.as_bytes())?;
        self.fingerprint = Some(Fingerprint::compute(rendered.as_bytes()));
        debug!(
            path = %self.handle.path.display(),
            records = self.records.len(),
            "shard committed"
        );
        Ok(())
    }
}

/// Existing shards of one type, ordered by part.
pub fn list_shards(memory_dir: &Path, memory_type: MemoryType) -> StoreResult<Vec<ShardHandle>> {
    let entries = match fs::read_dir(memory_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut handles = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(part) = ShardHandle::parse_part(memory_type, name) {
            handles.push(ShardHandle {
                memory_type,
                part,
                path: entry.path(),
            });
        }
    }
    handles.sort_by_key(|h| h.part);
    Ok(handles)
}

fn read_optional(path: &Path) -> StoreResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write via a temp file in the same directory, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryDraft;
    use chrono::Utc;

    fn record(id: &str) -> Memory {
        MemoryDraft::new(MemoryType::Fact, id)
            .with_tag("topic:test")
            .with_body("body text")
            .into_memory(id.to_string(), Utc::now())
            .unwrap()
    }

    #[test]
    fn file_names_follow_series() {
        assert_eq!(ShardHandle::file_name(MemoryType::Fact, 1), "facts.toml");
        assert_eq!(ShardHandle::file_name(MemoryType::Fact, 2), "facts_002.toml");
        assert_eq!(
            ShardHandle::parse_part(MemoryType::Fact, "facts_012.toml"),
            Some(12)
        );
        assert_eq!(ShardHandle::parse_part(MemoryType::Fact, "facts.toml"), Some(1));
        assert_eq!(ShardHandle::parse_part(MemoryType::Fact, "facts_x.toml"), None);
        assert_eq!(ShardHandle::parse_part(MemoryType::Goal, "facts.toml"), None);
    }

    #[test]
    fn missing_shard_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let shard = Shard::read(&ShardHandle::new(dir.path(), MemoryType::Risk, 1)).unwrap();
        assert!(shard.is_empty());
        assert!(shard.fingerprint().is_none());
    }

    #[test]
    fn commit_then_read_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ShardHandle::new(dir.path(), MemoryType::Fact, 1);
        let mut shard = Shard::read(&handle).unwrap();
        shard.records.push(record("FACT_a"));
        shard.records.push(record("FACT_b"));
        shard.commit().unwrap();

        let text = std::fs::read_to_string(&handle.path).unwrap();
        assert!(text.starts_with("# amp memory shard: facts, part 1"));
        assert!(text.contains("[[memory]]"));

        let back = Shard::read(&handle).unwrap();
        assert_eq!(back.records, shard.records);
        assert_eq!(back.fingerprint(), shard.fingerprint());
    }

    #[test]
    fn concurrent_edit_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ShardHandle::new(dir.path(), MemoryType::Fact, 1);
        let mut first = Shard::read(&handle).unwrap();
        first.records.push(record("FACT_a"));
        first.commit().unwrap();

        let mut stale = Shard::read(&handle).unwrap();
        let mut fresh = Shard::read(&handle).unwrap();
        fresh.records.push(record("FACT_b"));
        fresh.commit().unwrap();

        stale.records.push(record("FACT_c"));
        assert!(matches!(stale.commit(), Err(StoreError::Conflict { .. })));
    }

    #[test]
    fn malformed_shard_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ShardHandle::new(dir.path(), MemoryType::Goal, 1);
        std::fs::write(&handle.path, "[[memory]]\nid = 3\n").unwrap();
        assert!(matches!(
            Shard::read(&handle),
            Err(StoreError::MalformedShard { .. })
        ));
    }

    #[test]
    fn list_orders_by_part() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["facts_003.toml", "facts.toml", "facts_002.toml", "goals.toml"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let parts: Vec<usize> = list_shards(dir.path(), MemoryType::Fact)
            .unwrap()
            .into_iter()
            .map(|h| h.part)
            .collect();
        assert_eq!(parts, vec![1, 2, 3]);
    }
}
