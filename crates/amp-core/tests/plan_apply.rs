use std::fs;

use amp_core::amp_store::{
    Confidence, MemoryDraft, MemoryType, Relation, Status, Workspace, WorkspaceConfig,
};
use amp_core::{
    Action, ActionOutcome, AmpError, IndexFile, MemoryGraph, Plan, PlanCheck, PlanOutcome,
};
use chrono::{Duration, Utc};
use tempfile::tempdir;

fn seeded(dir: &std::path::Path) -> MemoryGraph {
    let config = WorkspaceConfig::default().with_default_review_days(0);
    let graph = MemoryGraph::new(Workspace::with_config(dir, config));

    let old = graph
        .create(
            MemoryDraft::new(MemoryType::Fact, "Rate limit is 100 rps")
                .with_body("From the 2023 capacity review.")
                .with_tag("topic:limits")
                .with_expires_at(Utc::now() - Duration::days(1)),
        )
        .unwrap();
    graph
        .create(
            MemoryDraft::new(MemoryType::Fact, "Rate limit is 250 rps")
                .with_body("Raised after the autoscaling work.")
                .with_tag("topic:limits")
                .with_confidence(Confidence::High)
                .with_link(Relation::Supersedes, old),
        )
        .unwrap();
    graph
        .create(
            MemoryDraft::new(MemoryType::Decision, "Shard the ledger by tenant")
                .with_body("Keeps hot tenants isolated.")
                .with_tag("topic:ledger")
                .with_tag("Area:storage"),
        )
        .unwrap();
    graph
        .create(
            MemoryDraft::new(MemoryType::Observation, "Ledger writes spike at midnight")
                .with_tag("topic:ledger")
                .with_tag("area:storage"),
        )
        .unwrap();
    graph
        .create(
            MemoryDraft::new(MemoryType::Observation, "Batch jobs run at midnight")
                .with_tag("area:storage"),
        )
        .unwrap();
    graph.rebuild().unwrap();
    graph
}

fn index_nodes(graph: &MemoryGraph) -> serde_json::Value {
    let text = fs::read_to_string(graph.workspace().index_path()).unwrap();
    let file: IndexFile = serde_json::from_str(&text).unwrap();
    // built_at differs per build; compare the graph content only.
    let nodes: Vec<_> = file
        .nodes
        .iter()
        .map(|n| (n.id.clone(), n.status, n.tags.clone(), n.links.clone()))
        .collect();
    serde_json::json!({
        "fingerprint": file.fingerprint,
        "nodes": nodes,
        "edges": file.edges,
    })
}

#[test]
fn applying_a_plan_twice_changes_nothing_the_second_time() {
    let dir = tempdir().unwrap();
    let graph = seeded(dir.path());

    let PlanOutcome::Proposed(plan) = graph.plan(&[], false).unwrap() else {
        panic!("expected a proposal");
    };
    assert!(!plan.is_empty());

    let first = graph.apply(&plan).unwrap();
    assert!(!first.already_applied);
    assert_eq!(first.failed(), 0, "{:#?}", first.actions);
    assert!(first.rebuild_required);
    graph.rebuild().unwrap();
    let after_first = index_nodes(&graph);

    let second = graph.apply(&plan).unwrap();
    assert!(second.already_applied);
    assert_eq!(second.actions.len(), plan.len());
    assert!(second
        .actions
        .iter()
        .all(|a| a.outcome == ActionOutcome::AlreadyApplied));
    graph.rebuild().unwrap();
    assert_eq!(index_nodes(&graph), after_first);
}

#[test]
fn expired_and_superseded_fact_is_deprecated() {
    let dir = tempdir().unwrap();
    let graph = seeded(dir.path());

    let outcome = graph.plan(&[PlanCheck::Stale], true).unwrap();
    let PlanOutcome::Applied { report, build, .. } = outcome else {
        panic!("expected an applied plan");
    };
    assert_eq!(report.applied(), 1);
    assert!(build.is_some());

    let old = graph.get("FACT_rate_limit_is_100_rps").unwrap();
    assert_eq!(old.status, Status::Deprecated);
    assert_eq!(old.superseded_by.as_deref(), Some("FACT_rate_limit_is_250_rps"));
}

#[test]
fn plan_survives_a_trip_through_disk() {
    let dir = tempdir().unwrap();
    let graph = seeded(dir.path());

    let plan = graph.plan(&[], false).unwrap().plan().clone();
    let path = dir.path().join("plans").join("maintenance.json");
    plan.save(&path).unwrap();

    let loaded = Plan::load(&path).unwrap();
    assert_eq!(loaded.checksum, plan.checksum);
    assert_eq!(graph.apply(&loaded).unwrap().failed(), 0);

    let tampered = fs::read_to_string(&path)
        .unwrap()
        .replace("needs-triage", "triaged");
    fs::write(&path, tampered).unwrap();
    assert!(matches!(Plan::load(&path), Err(AmpError::MalformedPlan(_))));
}

#[test]
fn supersede_replaces_a_fact_in_one_action() {
    let dir = tempdir().unwrap();
    let graph = seeded(dir.path());

    let replacement = MemoryDraft::new(MemoryType::Decision, "Shard the ledger by region")
        .with_body("Tenants moved to regional clusters.")
        .with_tag("topic:ledger");
    let plan = Plan::new(vec![Action::supersede(
        "DEC_shard_the_ledger_by_tenant",
        replacement,
        Some("Regional clusters replaced per-tenant shards.".into()),
        "Tenancy model changed.",
    )])
    .unwrap();

    let (report, build) = graph.apply_and_rebuild(&plan).unwrap();
    assert_eq!(report.applied(), 1);
    assert!(build.is_some());

    let old = graph.get("DEC_shard_the_ledger_by_tenant").unwrap();
    assert_eq!(old.status, Status::Deprecated);
    assert_eq!(old.superseded_by.as_deref(), Some("DEC_shard_the_ledger_by_region"));
    let new = graph.get("DEC_shard_the_ledger_by_region").unwrap();
    assert_eq!(new.links.get(Relation::Supersedes), ["DEC_shard_the_ledger_by_tenant"]);

    let again = graph.apply_and_rebuild(&plan).unwrap().0;
    assert!(again.already_applied);
}
