//! Agent Memory Protocol core.
//!
//! Builds a validated Index over the shard store and answers recall, graph
//! and staleness queries against it. Also hosts the capture pipeline that
//! turns commits, logs and transcripts into candidate memories, and the
//! planner/executor pair that keeps the graph tidy.

pub mod build;
pub mod capture;
pub mod digest;
pub mod error;
pub mod graph;
pub mod index;
pub mod memory_graph;
pub mod obs;
pub mod plan;
pub mod recall;
pub mod staleness;
pub mod telemetry;

pub use build::{
    BuildGate, BuildReport, BuildRule, CommandCompiler, CompiledGraph, Diagnostic, IndexCompiler,
    NativeCompiler,
};
pub use capture::{
    accept, dedup, Candidate, CaptureInput, CaptureLimit, CaptureOptions, Classification,
    Classifier, DedupVerdict, Origin, RuleClassifier,
};
pub use error::{AmpError, AmpResult};
pub use graph::{neighborhood, related, DistanceMap};
pub use index::{open_index, Index, IndexFile, INDEX_FORMAT_VERSION};
pub use memory_graph::{CommitSource, MemoryGraph, PlanOutcome};
pub use plan::{
    Action, ActionKind, ActionOutcome, ActionPayload, ActionReport, AppliedLedger, ApplyReport,
    Executor, Plan, PlanCheck, Planner,
};
pub use recall::{
    recall, MatchKind, RecallHit, RecallQuery, RecallResult, SortKey, StaleFilter, StatusFilter,
};
pub use staleness::{classify, stale, StaleEntry, Staleness};

pub use amp_store;
