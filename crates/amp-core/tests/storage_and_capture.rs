use std::path::Path;
use std::process::Command as StdCommand;

use amp_core::amp_store::{
    MemoryDraft, MemoryType, Shard, Workspace, WorkspaceConfig, MAX_SHARD_RECORDS,
};
use amp_core::{AmpError, CaptureInput, CaptureOptions, CommitSource, MemoryGraph};
use tempfile::tempdir;

fn run_git(repo_dir: &Path, args: &[&str]) {
    let output = StdCommand::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn make_git_repo() -> tempfile::TempDir {
    let dir = tempdir().unwrap();
    run_git(dir.path(), &["init"]);
    run_git(dir.path(), &["config", "user.name", "test-user"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    dir
}

fn commit_file(repo: &Path, path: &str, content: &str, message: &str) {
    let full = repo.join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, content).unwrap();
    run_git(repo, &["add", "."]);
    run_git(repo, &["commit", "-m", message]);
}

fn graph(dir: &Path) -> MemoryGraph {
    MemoryGraph::new(Workspace::with_config(dir, WorkspaceConfig::default()))
}

// ---- Sharding ----

#[test]
fn shards_never_exceed_capacity() {
    let dir = tempdir().unwrap();
    let graph = graph(dir.path());

    let total = MAX_SHARD_RECORDS + 7;
    for n in 0..total {
        graph
            .create(
                MemoryDraft::new(MemoryType::Observation, format!("Load test note {n}"))
                    .with_tag("topic:load"),
            )
            .unwrap();
        for handle in graph.store().shards().unwrap() {
            assert!(Shard::read(&handle).unwrap().len() <= MAX_SHARD_RECORDS);
        }
    }

    let shards = graph.store().shards().unwrap();
    assert_eq!(shards.len(), 2);
    let counts: Vec<usize> = shards
        .iter()
        .map(|h| Shard::read(h).unwrap().len())
        .collect();
    assert_eq!(counts.iter().sum::<usize>(), total);

    let report = graph.rebuild().unwrap();
    assert_eq!(report.nodes, total);
}

#[test]
fn colliding_titles_get_suffixed_ids() {
    let dir = tempdir().unwrap();
    let graph = graph(dir.path());

    let draft = || MemoryDraft::new(MemoryType::Goal, "Cut p99 latency").with_tag("topic:perf");
    let first = graph.create(draft()).unwrap();
    let second = graph.create(draft()).unwrap();
    let third = graph.create(draft()).unwrap();
    assert_eq!(first, "GOAL_cut_p99_latency");
    assert_eq!(second, "GOAL_cut_p99_latency_2");
    assert_eq!(third, "GOAL_cut_p99_latency_3");

    let explicit = graph.create(draft().with_id(first.clone()));
    assert!(matches!(explicit, Err(AmpError::DuplicateId { .. })));
}

// ---- Capture ----

#[test]
fn second_commit_capture_over_same_range_finds_nothing_new() {
    let repo = make_git_repo();
    commit_file(repo.path(), "src/api/server.rs", "fn main() {}", "feat(api): add health endpoint");
    commit_file(
        repo.path(),
        "docs/ops.md",
        "# ops",
        "fix(deploy): root cause was a missing env var",
    );
    commit_file(repo.path(), "README.md", "hello", "docs: describe local setup");

    let workspace = tempdir().unwrap();
    let graph = graph(workspace.path());
    graph.rebuild().unwrap();

    let source = CommitSource::Repository(repo.path().to_path_buf());
    let options = CaptureOptions::new().with_repo_name("demo");

    let first = graph.capture_commits(&source, &options).unwrap();
    assert_eq!(first.len(), 3);
    assert!(first.iter().all(|c| c.is_new()));
    assert!(first
        .iter()
        .all(|c| c.draft.tags.contains(&"repo:demo".to_string())));
    let created = graph.accept(&first).unwrap();
    assert_eq!(created.len(), 3);
    graph.rebuild().unwrap();

    let second = graph.capture_commits(&source, &options).unwrap();
    assert_eq!(second.iter().filter(|c| c.is_new()).count(), 0);
    assert!(graph.accept(&second).unwrap().is_empty());
}

#[test]
fn missing_log_file_is_source_unavailable() {
    let workspace = tempdir().unwrap();
    let graph = graph(workspace.path());
    graph.rebuild().unwrap();

    let input = CaptureInput::Path(workspace.path().join("nope.log"));
    let err = graph.capture_log(&input, &CaptureOptions::new()).unwrap_err();
    assert!(matches!(err, AmpError::SourceUnavailable { .. }));

    let bad_repo = CommitSource::Repository(workspace.path().join("not-a-repo"));
    let err = graph
        .capture_commits(&bad_repo, &CaptureOptions::new())
        .unwrap_err();
    assert!(matches!(err, AmpError::SourceUnavailable { .. }));
}

#[test]
fn log_capture_is_judged_against_existing_memories() {
    let workspace = tempdir().unwrap();
    let graph = graph(workspace.path());
    graph.rebuild().unwrap();

    let log = "\
=== RUN TestCheckout
FAILED tests/test_checkout.py::test_refund - AssertionError
error: linker `cc` not found
";
    let input = CaptureInput::text("ci-1234", log);
    let first = graph.capture_log(&input, &CaptureOptions::new()).unwrap();
    assert_eq!(first.len(), 2);
    graph.accept(&first).unwrap();
    graph.rebuild().unwrap();

    let rerun = CaptureInput::text("ci-1235", log);
    let second = graph.capture_log(&rerun, &CaptureOptions::new()).unwrap();
    assert_eq!(second.len(), 2);
    assert!(second.iter().all(|c| !c.is_new()));
}
