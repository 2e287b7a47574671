//! Commit-history source.
//!
//! Reads `git log` output (or text captured earlier in the same format),
//! groups commits that touch overlapping files, and turns each group into one
//! candidate.

use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

use amp_store::{Confidence, MemoryDraft, MemoryType};
use regex::Regex;

use super::classifier::{clean_title, Classifier};
use super::similarity::jaccard;
use super::{Candidate, CaptureLimit, CaptureOptions, Origin};
use crate::error::{AmpError, AmpResult};

/// Separates commit records.
pub const RECORD_SEP: char = '\u{1e}';
/// Separates fields within a record.
pub const FIELD_SEP: char = '\u{1f}';

/// `git log --format` producing `RS hash US subject US body US author US date
/// US`, followed by the `--name-only` file list.
pub const GIT_LOG_FORMAT: &str = "%x1e%H%x1f%s%x1f%b%x1f%an%x1f%aI%x1f";

/// Minimum changed-file overlap for a commit to join a group.
pub const GROUP_OVERLAP: f64 = 0.3;

/// Groups at least this large have low confidence raised to medium.
const GROUP_UPGRADE_SIZE: usize = 3;

const GROUP_BODY_COMMITS: usize = 5;
const BODY_FILES: usize = 10;
const PATH_TOPICS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub hash: String,
    pub subject: String,
    pub body: String,
    pub author: String,
    pub date: String,
    pub files: Vec<String>,
}

impl Commit {
    pub fn short_hash(&self) -> &str {
        let end = self.hash.char_indices().nth(8).map_or(self.hash.len(), |(i, _)| i);
        &self.hash[..end]
    }

    /// `fix(gateway): ...` -> `gateway`.
    pub fn scope(&self) -> Option<&str> {
        static SCOPE: OnceLock<Regex> = OnceLock::new();
        SCOPE
            .get_or_init(|| Regex::new(r"^\w+\(([^)]+)\)").expect("static scope pattern"))
            .captures(&self.subject)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    /// Subject without its conventional-commit prefix.
    pub fn title(&self) -> String {
        static PREFIX: OnceLock<Regex> = OnceLock::new();
        let stripped = PREFIX
            .get_or_init(|| Regex::new(r"^\w+(\([^)]*\))?:\s*").expect("static prefix pattern"))
            .replace(&self.subject, "");
        if stripped.trim().is_empty() {
            clean_title(&self.subject)
        } else {
            clean_title(&stripped)
        }
    }

    fn classify_text(&self) -> String {
        format!("{}\n{}", self.subject, self.body)
    }
}

/// Parse `git log` output produced with [`GIT_LOG_FORMAT`] and `--name-only`.
/// Malformed records are skipped.
pub fn parse_commit_log(text: &str) -> Vec<Commit> {
    text.split(RECORD_SEP)
        .filter_map(|record| {
            let fields: Vec<&str> = record.splitn(6, FIELD_SEP).collect();
            if fields.len() < 5 || fields[0].trim().is_empty() {
                return None;
            }
            let files = fields
                .get(5)
                .map(|rest| {
                    rest.lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Some(Commit {
                hash: fields[0].trim().to_string(),
                subject: fields[1].trim().to_string(),
                body: fields[2].trim().to_string(),
                author: fields[3].trim().to_string(),
                date: fields[4].trim().to_string(),
                files,
            })
        })
        .collect()
}

/// Run `git log` in `repo` within `limit`.
pub fn read_git_log(repo: &Path, limit: &CaptureLimit) -> AmpResult<String> {
    let unavailable = |detail: String| AmpError::SourceUnavailable {
        origin: format!("git:{}", repo.display()),
        detail,
    };

    let mut cmd = Command::new("git");
    cmd.arg("log")
        .arg(format!("--format={GIT_LOG_FORMAT}"))
        .arg("--name-only")
        .current_dir(repo);
    if let Some(n) = limit.max_items {
        cmd.arg(format!("--max-count={n}"));
    }
    if let Some(ref since) = limit.since {
        cmd.arg(format!("--since={since}"));
    }
    if let Some(ref range) = limit.range {
        cmd.arg(range);
    }

    let output = cmd
        .output()
        .map_err(|e| unavailable(format!("failed to run git: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(unavailable(format!("git log failed: {}", stderr.trim())));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Greedy clustering: each commit joins the existing group whose files it
/// overlaps most, if that overlap reaches [`GROUP_OVERLAP`].
pub fn group_commits(commits: &[Commit]) -> Vec<Vec<&Commit>> {
    let mut groups: Vec<(Vec<&Commit>, BTreeSet<&str>)> = Vec::new();

    for commit in commits {
        let files: BTreeSet<&str> = commit.files.iter().map(String::as_str).collect();
        let best = groups
            .iter()
            .enumerate()
            .map(|(i, (_, group_files))| (i, jaccard(&files, group_files)))
            .filter(|(_, overlap)| *overlap > 0.0)
            .fold(None, |best: Option<(usize, f64)>, (i, o)| match best {
                Some((_, b)) if b >= o => best,
                _ => Some((i, o)),
            });

        match best {
            Some((i, overlap)) if overlap >= GROUP_OVERLAP => {
                groups[i].0.push(commit);
                groups[i].1.extend(files);
            }
            _ => groups.push((vec![commit], files)),
        }
    }

    groups.into_iter().map(|(members, _)| members).collect()
}

/// `repo:<name>`, `topic:<scope>`, then up to three `topic:` tags from the
/// first meaningful directory of each changed path.
pub fn infer_tags(commit: &Commit, repo_name: &str) -> Vec<String> {
    let mut tags = vec![format!("repo:{repo_name}")];
    if let Some(scope) = commit.scope() {
        tags.push(format!("topic:{scope}"));
    }

    let mut path_topics = BTreeSet::new();
    for file in &commit.files {
        let parts: Vec<&str> = file.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() < 2 {
            continue;
        }
        if let Some(part) = parts
            .iter()
            .find(|p| !matches!(**p, "src" | "lib" | "test" | "tests" | "include" | "." | ".."))
        {
            path_topics.insert(part.replace('_', "-"));
        }
    }
    for topic in path_topics.into_iter().take(PATH_TOPICS) {
        let tag = format!("topic:{topic}");
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

/// Turn commit-log text into candidates. Commits beyond
/// `options.limit.max_items` are ignored.
pub fn capture_commits(
    text: &str,
    repo_name: &str,
    classifier: &dyn Classifier,
    options: &CaptureOptions,
) -> Vec<Candidate> {
    let mut commits = parse_commit_log(text);
    if let Some(n) = options.limit.max_items {
        commits.truncate(n);
    }

    let candidates = group_commits(&commits)
        .into_iter()
        .filter_map(|group| group_candidate(&group, repo_name, classifier))
        .collect();
    options.finish(candidates)
}

fn group_candidate(
    group: &[&Commit],
    repo_name: &str,
    classifier: &dyn Classifier,
) -> Option<Candidate> {
    let primary = group.first()?;
    let (memory_type, mut confidence, rule) = match classifier.classify(&primary.classify_text()) {
        Some(c) => (c.memory_type, c.confidence, c.rule),
        None => (MemoryType::Observation, Confidence::Low, "unclassified"),
    };

    let (body, tags, source) = if group.len() == 1 {
        let mut parts = Vec::new();
        if !primary.body.is_empty() {
            parts.push(primary.body.clone());
        }
        if !primary.files.is_empty() {
            let shown: Vec<&str> = primary.files.iter().take(BODY_FILES).map(String::as_str).collect();
            parts.push(format!("Files: {}", shown.join(", ")));
        }
        (
            parts.join("\n"),
            infer_tags(primary, repo_name),
            format!("commit:{}", primary.short_hash()),
        )
    } else {
        if group.len() >= GROUP_UPGRADE_SIZE && confidence == Confidence::Low {
            confidence = Confidence::Medium;
        }
        let mut parts = vec![format!("Group of {} related commits:", group.len())];
        for commit in group.iter().take(GROUP_BODY_COMMITS) {
            parts.push(format!("  - {} ({})", commit.subject, commit.short_hash()));
        }
        if group.len() > GROUP_BODY_COMMITS {
            parts.push(format!("  ... and {} more", group.len() - GROUP_BODY_COMMITS));
        }
        let files: BTreeSet<&str> = group
            .iter()
            .flat_map(|c| c.files.iter().map(String::as_str))
            .collect();
        if !files.is_empty() {
            let shown: Vec<&str> = files.into_iter().take(BODY_FILES).collect();
            parts.push(format!("Files: {}", shown.join(", ")));
        }
        let tags: BTreeSet<String> = group.iter().flat_map(|c| infer_tags(c, repo_name)).collect();
        (
            parts.join("\n"),
            tags.into_iter().collect(),
            format!("commit:{}+{}", primary.short_hash(), group.len() - 1),
        )
    };

    let draft = MemoryDraft::new(memory_type, primary.title())
        .with_body(body)
        .with_tags(tags)
        .with_confidence(confidence)
        .with_scope(format!("repo:{repo_name}"))
        .with_source(source);
    let excerpt = group
        .iter()
        .map(|c| format!("{} {}", c.short_hash(), c.subject))
        .collect::<Vec<_>>()
        .join("\n");
    Some(Candidate::new(draft, Origin::Commits, excerpt, rule))
}
