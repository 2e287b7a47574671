//! Capture pipeline: raw sources in, deduplicated candidates out.
//!
//! Each source adapter segments its input into spans, classifies them with a
//! [`Classifier`], and yields [`Candidate`]s carrying provenance. [`dedup`]
//! then compares candidates against existing memories; only candidates with
//! a [`DedupVerdict::New`] verdict are persisted by [`accept`].

pub mod classifier;
pub mod commits;
pub mod log;
pub mod similarity;
pub mod transcript;

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::PathBuf;

use amp_store::{Confidence, Memory, MemoryDraft, ShardStore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AmpError, AmpResult};

pub use classifier::{Classification, Classifier, CueRule, MatchPolicy, RuleClassifier};
pub use similarity::{jaccard, normalize_title, ratio, title_ratio};

/// Title similarity at or above which a candidate is a duplicate.
pub const DUPLICATE_THRESHOLD: f64 = 0.9;

/// Title similarity at or above which a candidate needs a manual merge.
pub const NEAR_DUPLICATE_THRESHOLD: f64 = 0.7;

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Commits,
    Log,
    Transcript,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commits => write!(f, "commits"),
            Self::Log => write!(f, "log"),
            Self::Transcript => write!(f, "transcript"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum DedupVerdict {
    New,
    /// Dropped: an existing record already covers it.
    Duplicate { of: String },
    /// Flagged for a manual merge; never auto-created.
    NearDuplicate { of: String, similarity: f64 },
}

/// A memory-shaped record that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub draft: MemoryDraft,
    pub origin: Origin,
    pub raw_excerpt: String,
    /// Which cue produced the classification.
    pub rationale: String,
    pub verdict: DedupVerdict,
}

impl Candidate {
    pub fn new(
        draft: MemoryDraft,
        origin: Origin,
        raw_excerpt: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            draft,
            origin,
            raw_excerpt: raw_excerpt.into(),
            rationale: rationale.into(),
            verdict: DedupVerdict::New,
        }
    }

    pub fn is_new(&self) -> bool {
        self.verdict == DedupVerdict::New
    }
}

/// Caller-supplied bound on how much of a source is scanned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureLimit {
    /// At most this many items (commits, lines) are examined.
    pub max_items: Option<usize>,
    /// Date expression passed to `git log --since`.
    pub since: Option<String>,
    /// Revision range such as `v1.0..HEAD`.
    pub range: Option<String>,
}

impl CaptureLimit {
    pub fn items(max_items: usize) -> Self {
        Self {
            max_items: Some(max_items),
            ..Self::default()
        }
    }

    pub fn with_since(mut self, since: impl Into<String>) -> Self {
        self.since = Some(since.into());
        self
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = Some(range.into());
        self
    }
}

/// Raw capture input: a file, standard input, or text already in memory.
#[derive(Debug, Clone)]
pub enum CaptureInput {
    Path(PathBuf),
    Stdin,
    Text { label: String, text: String },
}

impl CaptureInput {
    pub fn text(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Text {
            label: label.into(),
            text: text.into(),
        }
    }

    /// Label used in provenance strings.
    pub fn label(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Stdin => "stdin".to_string(),
            Self::Text { label, .. } => label.clone(),
        }
    }

    pub fn read(&self) -> AmpResult<String> {
        let unavailable = |detail: String| AmpError::SourceUnavailable {
            origin: self.label(),
            detail,
        };
        match self {
            Self::Path(path) => fs::read_to_string(path).map_err(|e| unavailable(e.to_string())),
            Self::Stdin => {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .map_err(|e| unavailable(e.to_string()))?;
                Ok(buf)
            }
            Self::Text { text, .. } => Ok(text.clone()),
        }
    }
}

/// Options shared by every source adapter.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub limit: CaptureLimit,
    /// Candidates below this confidence are discarded before dedup.
    pub min_confidence: Confidence,
    /// Added to every candidate.
    pub extra_tags: Vec<String>,
    /// `repo:` tag value for commit capture; defaults to the repository
    /// directory name.
    pub repo_name: Option<String>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            limit: CaptureLimit::default(),
            min_confidence: Confidence::Low,
            extra_tags: Vec::new(),
            repo_name: None,
        }
    }
}

impl CaptureOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: CaptureLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_min_confidence(mut self, confidence: Confidence) -> Self {
        self.min_confidence = confidence;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.extra_tags.push(tag.into());
        self
    }

    pub fn with_repo_name(mut self, name: impl Into<String>) -> Self {
        self.repo_name = Some(name.into());
        self
    }

    /// Apply the confidence floor and extra tags.
    pub(crate) fn finish(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        candidates
            .into_iter()
            .filter(|c| c.draft.confidence >= self.min_confidence)
            .map(|mut c| {
                c.draft = c.draft.with_tags(self.extra_tags.iter().cloned());
                c
            })
            .collect()
    }
}

/// Assign a verdict to every candidate against `existing` records.
///
/// Deprecated records are ignored. A candidate is a duplicate when an
/// existing record of the same type has the same provenance source or a
/// title similarity of at least [`DUPLICATE_THRESHOLD`]; a near-duplicate at
/// [`NEAR_DUPLICATE_THRESHOLD`]. Candidates that duplicate an earlier
/// candidate of the same batch are dropped from the result.
pub fn dedup<'a, I>(candidates: Vec<Candidate>, existing: I) -> Vec<Candidate>
where
    I: IntoIterator<Item = &'a Memory>,
{
    let existing: Vec<&Memory> = existing.into_iter().filter(|m| !m.is_deprecated()).collect();
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());

    for mut candidate in candidates {
        let draft = &candidate.draft;
        let in_batch = kept.iter().any(|k| {
            k.draft.memory_type == draft.memory_type
                && title_ratio(&k.draft.title, &draft.title) >= DUPLICATE_THRESHOLD
        });
        if in_batch {
            debug!(title = %draft.title, "dropping in-batch duplicate");
            continue;
        }

        let mut best: Option<(&Memory, f64)> = None;
        for memory in existing.iter().filter(|m| m.memory_type == draft.memory_type) {
            if !draft.source.is_empty() && memory.source == draft.source {
                best = Some((memory, 1.0));
                break;
            }
            let similarity = title_ratio(&memory.title, &draft.title);
            if best.map_or(true, |(_, s)| similarity > s) {
                best = Some((memory, similarity));
            }
        }

        candidate.verdict = match best {
            Some((m, s)) if s >= DUPLICATE_THRESHOLD => DedupVerdict::Duplicate { of: m.id.clone() },
            Some((m, s)) if s >= NEAR_DUPLICATE_THRESHOLD => DedupVerdict::NearDuplicate {
                of: m.id.clone(),
                similarity: s,
            },
            _ => DedupVerdict::New,
        };
        kept.push(candidate);
    }

    kept
}

/// Persist every `New` candidate; returns the created ids in order.
pub fn accept(store: &ShardStore, candidates: &[Candidate]) -> AmpResult<Vec<String>> {
    let mut ids = Vec::new();
    for candidate in candidates.iter().filter(|c| c.is_new()) {
        ids.push(store.create(candidate.draft.clone())?);
    }
    Ok(ids)
}
