//! Replays a plan through the store.
//!
//! Actions run strictly in order and a failing action never stops the run;
//! its error becomes data in the [`ApplyReport`]. Plans whose every action
//! succeeded are recorded by checksum in the [`AppliedLedger`], which makes
//! re-applying them a no-op.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use amp_store::{MemoryDraft, Relation, ShardStore, StoreError, WorkspaceLock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Action, ActionKind, ActionPayload, Plan};
use crate::build::write_json_atomic;
use crate::error::{AmpError, AmpResult};
use crate::obs::{self, PlanSpan};

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    applied: BTreeMap<String, DateTime<Utc>>,
}

/// Checksums of fully applied plans, persisted under the state directory.
#[derive(Debug)]
pub struct AppliedLedger {
    path: PathBuf,
    file: LedgerFile,
}

impl AppliedLedger {
    /// Load the ledger; a missing file is an empty ledger.
    pub fn load(path: &Path) -> AmpResult<Self> {
        let file = match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == ErrorKind::NotFound => LedgerFile::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn contains(&self, checksum: &str) -> bool {
        self.file.applied.contains_key(checksum)
    }

    pub fn applied_at(&self, checksum: &str) -> Option<DateTime<Utc>> {
        self.file.applied.get(checksum).copied()
    }

    pub fn len(&self) -> usize {
        self.file.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file.applied.is_empty()
    }

    /// Record a checksum and persist atomically.
    ///
    /// The file is re-read first so entries written by other runs since
    /// [`load`](Self::load) survive. Callers hold the workspace lock.
    pub fn record(&mut self, checksum: &str, at: DateTime<Utc>) -> AmpResult<()> {
        let current = Self::load(&self.path)?;
        self.file.applied.extend(current.file.applied);
        self.file.applied.insert(checksum.to_string(), at);
        write_json_atomic(&self.path, &self.file)
    }

    /// Drop a checksum so the plan can be applied again. Same locking rule
    /// as [`record`](Self::record).
    pub fn forget(&mut self, checksum: &str) -> AmpResult<bool> {
        self.file = Self::load(&self.path)?.file;
        let removed = self.file.applied.remove(checksum).is_some();
        if removed {
            write_json_atomic(&self.path, &self.file)?;
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Applied { id: String },
    /// The change is already present.
    SkippedDuplicate { reason: String },
    Failed { reason: String },
    /// The whole plan was applied by an earlier run.
    AlreadyApplied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    pub position: usize,
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub outcome: ActionOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub checksum: String,
    pub already_applied: bool,
    pub actions: Vec<ActionReport>,
    /// Shards changed; the Index must be rebuilt before the next query.
    pub rebuild_required: bool,
}

impl ApplyReport {
    fn count(&self, pred: impl Fn(&ActionOutcome) -> bool) -> usize {
        self.actions.iter().filter(|a| pred(&a.outcome)).count()
    }

    pub fn applied(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Applied { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::SkippedDuplicate { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Failed { .. }))
    }

    /// Ids created or modified by this run.
    pub fn touched_ids(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter_map(|a| match a.outcome {
                ActionOutcome::Applied { ref id } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct Executor {
    store: ShardStore,
}

impl Executor {
    pub fn new(store: ShardStore) -> Self {
        Self { store }
    }

    /// Verify and apply `plan`.
    ///
    /// Fails only when the plan itself is malformed or the ledger cannot be
    /// read or written; per-action errors are reported, not raised.
    pub fn apply(&self, plan: &Plan) -> AmpResult<ApplyReport> {
        plan.verify()?;
        let _span = PlanSpan::enter(&plan.checksum);

        let mut ledger = AppliedLedger::load(&self.store.workspace().ledger_path())?;
        if ledger.contains(&plan.checksum) {
            let report = ApplyReport {
                checksum: plan.checksum.clone(),
                already_applied: true,
                actions: plan
                    .actions
                    .iter()
                    .enumerate()
                    .map(|(position, action)| ActionReport {
                        position,
                        kind: action.kind,
                        target_id: action.target_id.clone(),
                        outcome: ActionOutcome::AlreadyApplied,
                    })
                    .collect(),
                rebuild_required: false,
            };
            obs::emit_plan_applied(&plan.checksum, 0, 0, 0, true);
            return Ok(report);
        }

        let cyclic = supersede_cycles(&plan.actions);
        let mut reports = Vec::with_capacity(plan.actions.len());
        for (position, action) in plan.actions.iter().enumerate() {
            let outcome = match action.target_id.as_deref() {
                Some(target) if cyclic.contains(target) => Err(AmpError::MalformedPlan(format!(
                    "circular supersede chain involving {target}"
                ))),
                _ => self.execute(action),
            };
            let outcome = outcome.unwrap_or_else(|e| {
                obs::emit_action_failed(
                    position,
                    &action.kind.to_string(),
                    action.target_id.as_deref().unwrap_or("-"),
                    &e,
                );
                ActionOutcome::Failed {
                    reason: e.to_string(),
                }
            });
            reports.push(ActionReport {
                position,
                kind: action.kind,
                target_id: action.target_id.clone(),
                outcome,
            });
        }

        let report = ApplyReport {
            checksum: plan.checksum.clone(),
            already_applied: false,
            rebuild_required: reports
                .iter()
                .any(|r| matches!(r.outcome, ActionOutcome::Applied { .. })),
            actions: reports,
        };
        if report.failed() == 0 {
            let _lock = WorkspaceLock::acquire(self.store.workspace())?;
            ledger.record(&plan.checksum, Utc::now())?;
        }

        obs::emit_plan_applied(
            &plan.checksum,
            report.applied(),
            report.skipped(),
            report.failed(),
            false,
        );
        Ok(report)
    }

    fn execute(&self, action: &Action) -> AmpResult<ActionOutcome> {
        match action.payload {
            ActionPayload::Add { ref draft } => {
                if let Some(ref id) = draft.id {
                    if self.exists(id)? {
                        return Ok(skipped(format!("{id} already exists")));
                    }
                }
                match self.store.create(draft.clone()) {
                    Ok(id) => Ok(ActionOutcome::Applied { id }),
                    Err(StoreError::DuplicateId { id }) => {
                        Ok(skipped(format!("{id} already exists")))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            ActionPayload::Update { ref patch } => {
                let target = required_target(action)?;
                match self.store.update_if_changed(target, patch)? {
                    Some(updated) => Ok(ActionOutcome::Applied { id: updated.id }),
                    None => Ok(skipped(format!("{target} already matches the patch"))),
                }
            }
            ActionPayload::Deprecate {
                ref superseded_by,
                ref note,
            } => {
                let target = required_target(action)?;
                if self.store.get(target)?.is_deprecated() {
                    return Ok(skipped(format!("{target} is already deprecated")));
                }
                let deprecated =
                    self.store
                        .deprecate(target, superseded_by.as_deref(), note.as_deref())?;
                Ok(ActionOutcome::Applied { id: deprecated.id })
            }
            ActionPayload::Supersede {
                ref draft,
                ref note,
            } => {
                let target = required_target(action)?;
                if self.store.get(target)?.is_deprecated() {
                    return Ok(skipped(format!("{target} is already deprecated")));
                }
                // A replacement left behind by an interrupted run is reused.
                let replacement = match self.replacement_of(target, draft)? {
                    Some(id) => id,
                    None => self.store.create(draft.clone())?,
                };
                self.store
                    .deprecate(target, Some(replacement.as_str()), note.as_deref())?;
                Ok(ActionOutcome::Applied { id: replacement })
            }
        }
    }

    /// An existing active record that already supersedes `target`: the
    /// draft's explicit id, or any record linking to `target`.
    fn replacement_of(&self, target: &str, draft: &MemoryDraft) -> AmpResult<Option<String>> {
        if let Some(ref id) = draft.id {
            return Ok(self.exists(id)?.then(|| id.clone()));
        }
        let found = self
            .store
            .load_all()?
            .into_iter()
            .flat_map(|shard| shard.records)
            .find(|m| {
                !m.is_deprecated()
                    && m.memory_type == draft.memory_type
                    && m.links.get(Relation::Supersedes).iter().any(|t| t == target)
            });
        Ok(found.map(|m| m.id))
    }

    fn exists(&self, id: &str) -> AmpResult<bool> {
        match self.store.get(id) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn skipped(reason: String) -> ActionOutcome {
    ActionOutcome::SkippedDuplicate { reason }
}

fn required_target(action: &Action) -> AmpResult<&str> {
    action
        .target_id
        .as_deref()
        .ok_or_else(|| AmpError::MalformedPlan(format!("{} action without target_id", action.kind)))
}

/// Targets of deprecate and supersede actions whose `superseded_by` chain, within this
/// plan, loops back on itself.
fn supersede_cycles(actions: &[Action]) -> HashSet<String> {
    let edges: HashMap<&str, &str> = actions
        .iter()
        .filter_map(|a| match (&a.payload, a.target_id.as_deref()) {
            (ActionPayload::Deprecate { superseded_by: Some(by), .. }, Some(target)) => {
                Some((target, by.as_str()))
            }
            (ActionPayload::Supersede { draft, .. }, Some(target)) => {
                draft.id.as_deref().map(|by| (target, by))
            }
            _ => None,
        })
        .collect();

    let mut cyclic = HashSet::new();
    for &start in edges.keys() {
        let mut seen = HashSet::from([start]);
        let mut current = start;
        while let Some(&next) = edges.get(current) {
            if next == start {
                cyclic.insert(start.to_string());
                break;
            }
            if !seen.insert(next) {
                break;
            }
            current = next;
        }
    }
    cyclic
}
