//! Structured lifecycle events for index builds, plans, and capture runs.
//!
//! Every event carries an `event = "<area>.<what>"` field so log pipelines
//! can filter on it. Store-level events (`memory.*`, `shard.split`) are
//! emitted by `amp-store` itself.

use tracing::{info, warn};

/// RAII guard entering a span tagged with a plan checksum.
pub struct PlanSpan {
    _span: tracing::span::EnteredSpan,
}

impl PlanSpan {
    pub fn enter(checksum: &str) -> Self {
        let short: String = checksum.chars().take(12).collect();
        let span = tracing::info_span!("amp.plan", checksum = %short);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_index_built(fingerprint: &str, nodes: usize, edges: usize) {
    info!(event = "index.built", fingerprint = %fingerprint, nodes, edges);
}

pub fn emit_index_rejected(diagnostics: usize) {
    warn!(event = "index.rejected", diagnostics);
}

pub fn emit_index_stale_served(reason: &str) {
    warn!(event = "index.stale_served", reason = %reason);
}

pub fn emit_plan_generated(checksum: &str, actions: usize) {
    info!(event = "plan.generated", checksum = %checksum, actions);
}

pub fn emit_plan_applied(
    checksum: &str,
    applied: usize,
    skipped: usize,
    failed: usize,
    already_applied: bool,
) {
    info!(
        event = "plan.applied",
        checksum = %checksum,
        applied,
        skipped,
        failed,
        already_applied,
    );
}

/// The post-apply rebuild was rejected and the shards were put back.
pub fn emit_plan_rolled_back(checksum: &str, reason: &dyn std::fmt::Display) {
    warn!(event = "plan.rolled_back", checksum = %checksum, reason = %reason);
}

/// A single action failed; the executor continues with the next one.
pub fn emit_action_failed(position: usize, kind: &str, target: &str, reason: &dyn std::fmt::Display) {
    warn!(
        event = "action.failed",
        position,
        kind = %kind,
        target = %target,
        reason = %reason,
    );
}

pub fn emit_capture_completed(origin: &str, candidates: usize, new: usize) {
    info!(event = "capture.completed", origin = %origin, candidates, new);
}
