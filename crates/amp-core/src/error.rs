//! Error taxonomy exposed by every graph operation.

use std::path::PathBuf;

use amp_store::StoreError;
use thiserror::Error;

use crate::build::{BuildRule, Diagnostic};

#[derive(Debug, Error)]
pub enum AmpError {
    #[error("duplicate memory id: {id}")]
    DuplicateId { id: String },

    #[error("memory not found: {id}")]
    NotFound { id: String },

    #[error("write conflict on {}: {detail}", path.display())]
    Conflict { path: PathBuf, detail: String },

    /// Every violation found in one validation pass.
    #[error("validation failed with {} diagnostic(s)", .0.len())]
    Validation(Vec<Diagnostic>),

    #[error("stale index: {reason}")]
    StaleIndex { reason: String },

    #[error("malformed plan: {0}")]
    MalformedPlan(String),

    #[error("capture source unavailable: {origin}: {detail}")]
    SourceUnavailable { origin: String, detail: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AmpError {
    /// Diagnostics carried by a validation failure; empty for other kinds.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::Validation(diags) => diags,
            _ => &[],
        }
    }
}

impl From<StoreError> for AmpError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateId { id } => Self::DuplicateId { id },
            StoreError::NotFound { id } => Self::NotFound { id },
            StoreError::Conflict { path, detail } => Self::Conflict { path, detail },
            StoreError::InvalidRecord(message) => {
                Self::Validation(vec![Diagnostic::new(BuildRule::InvalidRecord, None, message)])
            }
            StoreError::MalformedShard { path, detail } => Self::Validation(vec![Diagnostic::new(
                BuildRule::MalformedShard,
                None,
                format!("{}: {detail}", path.display()),
            )]),
            StoreError::Config(message) => Self::Config(message),
            StoreError::Serialize(e) => Self::Serialization(e.to_string()),
            StoreError::Io(e) => Self::Io(e),
        }
    }
}

impl From<serde_json::Error> for AmpError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for graph operations.
pub type AmpResult<T> = std::result::Result<T, AmpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_kind_for_kind() {
        let err: AmpError = StoreError::NotFound { id: "FACT_x".into() }.into();
        assert!(matches!(err, AmpError::NotFound { ref id } if id == "FACT_x"));

        let err: AmpError = StoreError::DuplicateId { id: "DEC_y".into() }.into();
        assert!(matches!(err, AmpError::DuplicateId { .. }));

        let err: AmpError = StoreError::InvalidRecord("title must not be empty".into()).into();
        assert_eq!(err.diagnostics().len(), 1);
        assert_eq!(err.diagnostics()[0].rule, BuildRule::InvalidRecord);
    }

    #[test]
    fn test_validation_display_counts_diagnostics() {
        let err = AmpError::Validation(vec![
            Diagnostic::new(BuildRule::EmptyBody, Some("FACT_a".into()), "empty body"),
            Diagnostic::new(BuildRule::DanglingLink, Some("FACT_b".into()), "x"),
        ]);
        assert!(err.to_string().contains("2 diagnostic"));
    }
}
