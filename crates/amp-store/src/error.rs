//! Error types for the shard store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The derived (or explicit) id is already taken and no suffix is left.
    #[error("duplicate memory id: {id}")]
    DuplicateId { id: String },

    /// No shard contains the requested id.
    #[error("memory not found: {id}")]
    NotFound { id: String },

    /// A shard changed between read and write, or the workspace lock is held
    /// by someone else.
    #[error("write conflict on {}: {detail}", path.display())]
    Conflict { path: PathBuf, detail: String },

    /// The record failed shape validation at the storage boundary.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// A shard file could not be parsed.
    #[error("malformed shard {}: {detail}", path.display())]
    MalformedShard { path: PathBuf, detail: String },

    /// Workspace configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),

    #[error("shard serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_error_displays_path_and_detail() {
        let err = StoreError::Conflict {
            path: PathBuf::from("memory/facts.toml"),
            detail: "fingerprint changed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("memory/facts.toml"));
        assert!(msg.contains("fingerprint changed"));
    }

    #[test]
    fn test_duplicate_id_error_displays_id() {
        let err = StoreError::DuplicateId {
            id: "FACT_api_port".to_string(),
        };
        assert!(err.to_string().contains("FACT_api_port"));
    }
}
