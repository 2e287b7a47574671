//! Plans: ordered, checksummed maintenance actions.
//!
//! A [`Plan`] is produced by the [`planner`], persisted as JSON, and replayed
//! by the [`executor`]. The checksum covers only the ordered action list, so
//! regenerating a plan from an unchanged Index yields the same checksum.

pub mod executor;
pub mod planner;

use std::fmt;
use std::fs;
use std::path::Path;

use amp_store::{MemoryDraft, MemoryPatch, Relation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::build::write_json_atomic;
use crate::digest::compute_digest;
use crate::error::{AmpError, AmpResult};

pub use executor::{ActionOutcome, ActionReport, AppliedLedger, ApplyReport, Executor};
pub use planner::{PlanCheck, Planner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Add,
    Update,
    Deprecate,
    /// Create a replacement record and deprecate the target in favor of it.
    Supersede,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Update => write!(f, "update"),
            Self::Deprecate => write!(f, "deprecate"),
            Self::Supersede => write!(f, "supersede"),
        }
    }
}

/// Kind-specific action data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionPayload {
    Add {
        draft: MemoryDraft,
    },
    Update {
        patch: MemoryPatch,
    },
    Deprecate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        superseded_by: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    Supersede {
        draft: MemoryDraft,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Add { .. } => ActionKind::Add,
            Self::Update { .. } => ActionKind::Update,
            Self::Deprecate { .. } => ActionKind::Deprecate,
            Self::Supersede { .. } => ActionKind::Supersede,
        }
    }
}

/// One proposed change with a human-readable rationale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub payload: ActionPayload,
    pub rationale: String,
}

impl Action {
    pub fn add(draft: MemoryDraft, rationale: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Add,
            target_id: draft.id.clone(),
            payload: ActionPayload::Add { draft },
            rationale: rationale.into(),
        }
    }

    pub fn update(id: impl Into<String>, patch: MemoryPatch, rationale: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Update,
            target_id: Some(id.into()),
            payload: ActionPayload::Update { patch },
            rationale: rationale.into(),
        }
    }

    pub fn deprecate(
        id: impl Into<String>,
        superseded_by: Option<String>,
        note: Option<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            kind: ActionKind::Deprecate,
            target_id: Some(id.into()),
            payload: ActionPayload::Deprecate {
                superseded_by,
                note,
            },
            rationale: rationale.into(),
        }
    }

    /// Replace `id` with a record built from `draft`. The draft gains a
    /// `supersedes` link to `id` if it does not carry one.
    pub fn supersede(
        id: impl Into<String>,
        draft: MemoryDraft,
        note: Option<String>,
        rationale: impl Into<String>,
    ) -> Self {
        let id = id.into();
        let draft = if draft.links.get(Relation::Supersedes).contains(&id) {
            draft
        } else {
            draft.with_link(Relation::Supersedes, id.clone())
        };
        Self {
            kind: ActionKind::Supersede,
            target_id: Some(id),
            payload: ActionPayload::Supersede { draft, note },
            rationale: rationale.into(),
        }
    }

    /// Schema check: kind agrees with payload, and updates and deprecations
    /// name their target.
    pub fn validate(&self) -> Result<(), String> {
        if self.kind != self.payload.kind() {
            return Err(format!(
                "{} action carries a {} payload",
                self.kind,
                self.payload.kind()
            ));
        }
        let has_target = self.target_id.as_deref().is_some_and(|t| !t.trim().is_empty());
        match self.payload {
            ActionPayload::Add { ref draft } => {
                if self.target_id.is_some() && self.target_id != draft.id {
                    return Err("add target_id differs from the draft id".to_string());
                }
                draft.validate().map_err(|e| e.to_string())
            }
            _ if !has_target => Err(format!("{} action requires a target_id", self.kind)),
            ActionPayload::Update { ref patch } if patch.is_empty() => {
                Err("update action carries an empty patch".to_string())
            }
            ActionPayload::Deprecate {
                ref superseded_by,
                ref note,
            } if superseded_by.is_none() && note.as_deref().map_or(true, |n| n.trim().is_empty()) => {
                Err("deprecate action needs superseded_by or a note".to_string())
            }
            ActionPayload::Supersede { ref draft, .. } => {
                if draft.id.is_some() && draft.id == self.target_id {
                    return Err("supersede draft reuses the target id".to_string());
                }
                draft.validate().map_err(|e| e.to_string())
            }
            _ => Ok(()),
        }
    }
}

/// An immutable, checksummed action list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub actions: Vec<Action>,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> AmpResult<Self> {
        Ok(Self {
            checksum: Self::checksum_of(&actions)?,
            created_at: Utc::now(),
            actions,
        })
    }

    /// SHA-256 over the canonical JSON of the ordered actions.
    pub fn checksum_of(actions: &[Action]) -> AmpResult<String> {
        compute_digest(&serde_json::to_value(actions)?)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Check every action's schema and the checksum.
    pub fn verify(&self) -> AmpResult<()> {
        for (position, action) in self.actions.iter().enumerate() {
            action
                .validate()
                .map_err(|e| AmpError::MalformedPlan(format!("action {position}: {e}")))?;
        }
        let expected = Self::checksum_of(&self.actions)?;
        if expected != self.checksum {
            return Err(AmpError::MalformedPlan(format!(
                "checksum mismatch: plan says {}, actions hash to {expected}",
                self.checksum
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> AmpResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and verify a serialized plan.
    pub fn from_json(text: &str) -> AmpResult<Self> {
        let plan: Plan =
            serde_json::from_str(text).map_err(|e| AmpError::MalformedPlan(e.to_string()))?;
        plan.verify()?;
        Ok(plan)
    }

    pub fn save(&self, path: &Path) -> AmpResult<()> {
        write_json_atomic(path, self)
    }

    pub fn load(path: &Path) -> AmpResult<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}
