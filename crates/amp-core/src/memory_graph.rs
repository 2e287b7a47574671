//! `MemoryGraph`: the query and maintenance boundary over one workspace.
//!
//! Writes go straight to the shard store. Reads go through a freshly opened
//! Index, so a query after an unbuilt change fails with a stale-index error
//! under the strict policy instead of answering from outdated data.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use amp_store::{Memory, MemoryDraft, MemoryPatch, ShardStore, Workspace, WorkspaceLock};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::build::{BuildGate, BuildReport};
use crate::capture::{self, commits, Candidate, CaptureInput, CaptureOptions, Origin, RuleClassifier};
use crate::error::AmpResult;
use crate::graph::{self, DistanceMap};
use crate::index::{open_index, Index};
use crate::obs;
use crate::plan::{AppliedLedger, ApplyReport, Executor, Plan, PlanCheck, Planner};
use crate::recall::{self, RecallQuery, RecallResult};
use crate::staleness::{self, StaleEntry};

/// Where commit capture reads from.
#[derive(Debug, Clone)]
pub enum CommitSource {
    /// Run `git log` in this repository.
    Repository(PathBuf),
    /// Commit-log text already in the capture format.
    Log(CaptureInput),
}

/// Result of [`MemoryGraph::plan`].
#[derive(Debug, Clone)]
pub enum PlanOutcome {
    Proposed(Plan),
    Applied {
        plan: Plan,
        report: ApplyReport,
        /// Present when the apply touched records and the Index was rebuilt.
        build: Option<BuildReport>,
    },
}

impl PlanOutcome {
    pub fn plan(&self) -> &Plan {
        match self {
            Self::Proposed(plan) | Self::Applied { plan, .. } => plan,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryGraph {
    store: ShardStore,
    now: Option<DateTime<Utc>>,
}

impl MemoryGraph {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            store: ShardStore::new(workspace),
            now: None,
        }
    }

    /// Open the workspace rooted at `root`, reading its `amp.toml`.
    pub fn open(root: impl AsRef<Path>) -> AmpResult<Self> {
        Ok(Self::new(Workspace::open(root)?))
    }

    /// Explicit path, then `AMP_DIR`, then the nearest `amp.toml` upwards.
    pub fn discover(explicit: Option<&Path>) -> AmpResult<Self> {
        Ok(Self::new(Workspace::discover(explicit)?))
    }

    /// Pin the clock used for staleness and planning.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    pub fn workspace(&self) -> &Workspace {
        self.store.workspace()
    }

    pub fn store(&self) -> &ShardStore {
        &self.store
    }

    /// Run the build gate and publish a new Index.
    pub fn rebuild(&self) -> AmpResult<BuildReport> {
        BuildGate::new(self.store.clone())?.build()
    }

    /// The current Index, checked against the shards.
    pub fn index(&self) -> AmpResult<Index> {
        open_index(&self.store)
    }

    // -- storage ------------------------------------------------------------

    pub fn create(&self, draft: MemoryDraft) -> AmpResult<String> {
        Ok(self.store.create(draft)?)
    }

    pub fn update(&self, id: &str, patch: &MemoryPatch) -> AmpResult<Memory> {
        Ok(self.store.update(id, patch)?)
    }

    pub fn deprecate(
        &self,
        id: &str,
        superseded_by: Option<&str>,
        note: Option<&str>,
    ) -> AmpResult<Memory> {
        Ok(self.store.deprecate(id, superseded_by, note)?)
    }

    // -- queries ------------------------------------------------------------

    pub fn recall(&self, query: &RecallQuery) -> AmpResult<RecallResult> {
        let index = self.index()?;
        Ok(recall::recall(&index, query, self.now()))
    }

    pub fn get(&self, id: &str) -> AmpResult<Memory> {
        let index = self.index()?;
        recall::get(&index, id).cloned()
    }

    pub fn related(&self, id: &str, hops: usize) -> AmpResult<DistanceMap> {
        graph::related(&self.index()?, id, hops)
    }

    pub fn tags(&self, prefix: Option<&str>) -> AmpResult<BTreeMap<String, usize>> {
        Ok(recall::tags(&self.index()?, prefix))
    }

    pub fn stale(&self) -> AmpResult<Vec<StaleEntry>> {
        Ok(staleness::stale(&self.index()?, self.now()))
    }

    // -- maintenance --------------------------------------------------------

    /// Propose a plan from the given checks (all checks when empty). With
    /// `auto_apply` the plan goes through [`apply_and_rebuild`](Self::apply_and_rebuild).
    pub fn plan(&self, checks: &[PlanCheck], auto_apply: bool) -> AmpResult<PlanOutcome> {
        let index = self.index()?;
        let mut planner = Planner::new(&index, self.workspace().config(), self.now());
        if !checks.is_empty() {
            planner = planner.with_checks(checks.iter().copied());
        }
        let plan = planner.plan()?;
        if !auto_apply {
            return Ok(PlanOutcome::Proposed(plan));
        }

        let (report, build) = self.apply_and_rebuild(&plan)?;
        Ok(PlanOutcome::Applied {
            plan,
            report,
            build,
        })
    }

    /// Apply `plan` without rebuilding. The caller rebuilds when
    /// `rebuild_required` is set.
    pub fn apply(&self, plan: &Plan) -> AmpResult<ApplyReport> {
        Executor::new(self.store.clone()).apply(plan)
    }

    /// Apply `plan` and rebuild the Index if anything changed.
    ///
    /// When the rebuild is rejected the shards are restored to their state
    /// before the apply, the plan is dropped from the applied ledger, and
    /// the build error is returned.
    pub fn apply_and_rebuild(&self, plan: &Plan) -> AmpResult<(ApplyReport, Option<BuildReport>)> {
        let snapshot = self.store.snapshot()?;
        let report = self.apply(plan)?;
        if !report.rebuild_required {
            return Ok((report, None));
        }
        match self.rebuild() {
            Ok(build) => Ok((report, Some(build))),
            Err(e) => {
                self.store.restore(&snapshot)?;
                let _lock = WorkspaceLock::acquire(self.workspace())?;
                AppliedLedger::load(&self.workspace().ledger_path())?.forget(&plan.checksum)?;
                obs::emit_plan_rolled_back(&plan.checksum, &e);
                Err(e)
            }
        }
    }

    // -- capture ------------------------------------------------------------

    /// Capture commits and judge them against the current Index.
    pub fn capture_commits(
        &self,
        source: &CommitSource,
        options: &CaptureOptions,
    ) -> AmpResult<Vec<Candidate>> {
        let (text, fallback_name) = match source {
            CommitSource::Repository(repo) => (
                commits::read_git_log(repo, &options.limit)?,
                dir_name(repo),
            ),
            CommitSource::Log(input) => (input.read()?, dir_name(self.workspace().root())),
        };
        let repo_name = options.repo_name.clone().unwrap_or(fallback_name);
        let found =
            commits::capture_commits(&text, &repo_name, &RuleClassifier::commits(), options);
        self.judge(Origin::Commits, found)
    }

    pub fn capture_log(
        &self,
        input: &CaptureInput,
        options: &CaptureOptions,
    ) -> AmpResult<Vec<Candidate>> {
        let text = input.read()?;
        let found =
            capture::log::capture_log(&text, &input.label(), &RuleClassifier::logs(), options);
        self.judge(Origin::Log, found)
    }

    pub fn capture_transcript(
        &self,
        input: &CaptureInput,
        options: &CaptureOptions,
    ) -> AmpResult<Vec<Candidate>> {
        let text = input.read()?;
        let found = capture::transcript::capture_transcript(
            &text,
            &input.label(),
            &RuleClassifier::transcripts(),
            options,
        );
        self.judge(Origin::Transcript, found)
    }

    /// Persist the `new` candidates. The Index needs a rebuild afterwards.
    pub fn accept(&self, candidates: &[Candidate]) -> AmpResult<Vec<String>> {
        let ids = capture::accept(&self.store, candidates)?;
        info!(event = "capture.accepted", created = ids.len());
        Ok(ids)
    }

    fn judge(&self, origin: Origin, found: Vec<Candidate>) -> AmpResult<Vec<Candidate>> {
        let index = self.index()?;
        let total = found.len();
        let judged = capture::dedup(found, index.memories());
        let new = judged.iter().filter(|c| c.is_new()).count();
        obs::emit_capture_completed(&origin.to_string(), total, new);
        Ok(judged)
    }
}

fn dir_name(path: &Path) -> String {
    path.canonicalize()
        .ok()
        .as_deref()
        .unwrap_or(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}

impl From<Workspace> for MemoryGraph {
    fn from(workspace: Workspace) -> Self {
        Self::new(workspace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AmpError;
    use crate::plan::Action;
    use amp_store::{Confidence, MemoryType, Relation, WorkspaceConfig};

    fn graph() -> (tempfile::TempDir, MemoryGraph) {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::with_config(dir.path(), WorkspaceConfig::default());
        (dir, MemoryGraph::new(workspace))
    }

    #[test]
    fn queries_require_a_built_index() {
        let (_dir, g) = graph();
        g.create(
            MemoryDraft::new(MemoryType::Fact, "API runs on port 8080")
                .with_body("From the deploy manifest.")
                .with_tag("topic:api"),
        )
        .unwrap();
        assert!(matches!(g.recall(&RecallQuery::text("port")), Err(AmpError::StaleIndex { .. })));

        g.rebuild().unwrap();
        let found = g.recall(&RecallQuery::text("port")).unwrap();
        assert_eq!(found.ids(), vec!["FACT_api_runs_on_port_8080"]);
    }

    #[test]
    fn rejected_rebuild_rolls_the_apply_back() {
        let (_dir, g) = graph();
        let port = g
            .create(
                MemoryDraft::new(MemoryType::Fact, "API runs on port 8080")
                    .with_body("From the deploy manifest.")
                    .with_tag("topic:api"),
            )
            .unwrap();
        g.rebuild().unwrap();
        let before = g.store().fingerprint().unwrap();

        // Facts need a body, so the rebuild after this plan is rejected.
        let plan = Plan::new(vec![
            Action::update(port.clone(), MemoryPatch::new().add_tag("area:edge"), "r"),
            Action::add(
                MemoryDraft::new(MemoryType::Fact, "Health checks hit /ready").with_tag("topic:api"),
                "r",
            ),
        ])
        .unwrap();
        let err = g.apply_and_rebuild(&plan).unwrap_err();
        assert!(matches!(err, AmpError::Validation(_)));

        assert_eq!(g.store().fingerprint().unwrap(), before);
        assert!(!g.store().get(&port).unwrap().has_tag("area:edge"));
        let ledger = AppliedLedger::load(&g.workspace().ledger_path()).unwrap();
        assert!(!ledger.contains(&plan.checksum));
        // The previous Index still matches the restored shards.
        assert_eq!(g.recall(&RecallQuery::text("port")).unwrap().ids(), vec![port.as_str()]);
    }

    #[test]
    fn auto_apply_rebuilds_the_index() {
        let (_dir, g) = graph();
        let a = g
            .create(
                MemoryDraft::new(MemoryType::Fact, "Gateway timeout is 30s")
                    .with_body("b")
                    .with_tag("topic:gateway")
                    .with_confidence(Confidence::High),
            )
            .unwrap();
        g.create(
            MemoryDraft::new(MemoryType::Fact, "Gateway timeout is 60s")
                .with_body("b")
                .with_tag("topic:gateway")
                .with_link(Relation::Contradicts, a.clone()),
        )
        .unwrap();
        g.rebuild().unwrap();

        let outcome = g.plan(&[PlanCheck::Conflicts], true).unwrap();
        let PlanOutcome::Applied { report, build, .. } = outcome else {
            panic!("expected an applied plan");
        };
        assert_eq!(report.applied(), 1);
        assert!(build.is_some());

        let questions = g
            .recall(&RecallQuery::all().with_type(MemoryType::Question))
            .unwrap();
        assert_eq!(questions.hits.len(), 1);
    }

    #[test]
    fn transcript_capture_marks_known_statements() {
        let (_dir, g) = graph();
        g.rebuild().unwrap();
        let input = CaptureInput::text("standup", "alice: We decided to use Postgres for the ledger.");
        let first = g.capture_transcript(&input, &CaptureOptions::new()).unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].is_new());

        g.accept(&first).unwrap();
        g.rebuild().unwrap();
        let second = g.capture_transcript(&input, &CaptureOptions::new()).unwrap();
        assert!(second.iter().all(|c| !c.is_new()));
    }
}
