//! Advisory workspace lock held around read-modify-write sequences.

use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::workspace::Workspace;

/// RAII guard for the exclusive workspace lock. Released on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    file: File,
    path: PathBuf,
}

impl WorkspaceLock {
    /// Acquire the lock, retrying `lock_retries` times before failing with a
    /// conflict.
    pub fn acquire(workspace: &Workspace) -> StoreResult<Self> {
        let path = workspace.lock_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let config = workspace.config();
        let attempts = config.lock_retries.max(1);
        let sleep = Duration::from_millis(config.lock_retry_ms);
        let mut last_err = None;

        for attempt in 0..attempts {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(path = %path.display(), attempt, "workspace lock acquired");
                    return Ok(Self { file, path });
                }
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < attempts {
                        thread::sleep(sleep);
                    }
                }
            }
        }

        let detail = last_err
            .map(|e| format!("workspace is locked by another writer: {e}"))
            .unwrap_or_else(|| "workspace is locked by another writer".to_string());
        warn!(event = "lock.contended", path = %path.display(), attempts);
        Err(StoreError::Conflict { path, detail })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
