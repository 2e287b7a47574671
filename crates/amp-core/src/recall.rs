//! Boolean recall over the Index.
//!
//! Matching is substring-based, not scored:
//! - free-text terms match when ANY term occurs (case-insensitive) in the
//!   title, body, or a tag;
//! - tag filters combine with AND, including repeated prefixes, so
//!   `topic:a` + `topic:b` requires both tags;
//! - type and status filters are exact.
//!
//! With `expand(n)`, neighbors within `n` hops of the direct matches are
//! added as [`MatchKind::Expanded`]. Expanded nodes still honor the status
//! and staleness filters; a node that is both a direct match and a neighbor
//! is reported as direct.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use amp_store::{Memory, MemoryType, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AmpError, AmpResult};
use crate::graph;
use crate::index::Index;
use crate::staleness::{classify, Staleness};

/// Which statuses are eligible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    /// Everything except deprecated.
    #[default]
    Default,
    Only(Status),
    Any,
}

/// How staleness affects eligibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StaleFilter {
    /// Exclude expired records.
    #[default]
    Fresh,
    /// Ignore staleness.
    Include,
    /// Only expired or review-due records.
    Only,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// `created_at`, newest first.
    Newest,
    /// `created_at`, oldest first.
    Oldest,
    /// High to low, ties by `created_at` newest first.
    Confidence,
    /// `updated_at`, newest first.
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Direct,
    Expanded,
}

/// Recall parameters.
#[derive(Debug, Clone, Default)]
pub struct RecallQuery {
    pub terms: Vec<String>,
    pub tags: Vec<String>,
    pub memory_type: Option<MemoryType>,
    pub status: StatusFilter,
    pub stale: StaleFilter,
    pub sort: Option<SortKey>,
    pub limit: Option<usize>,
    pub expand: usize,
}

impl RecallQuery {
    /// Query matching every eligible record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Free-text query; whitespace separates terms.
    pub fn text(query: &str) -> Self {
        Self::default().with_text(query)
    }

    pub fn with_text(mut self, query: &str) -> Self {
        self.terms
            .extend(query.split_whitespace().map(str::to_lowercase));
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn with_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = Some(memory_type);
        self
    }

    pub fn with_status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    pub fn with_stale(mut self, stale: StaleFilter) -> Self {
        self.stale = stale;
        self
    }

    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort = Some(key);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn expand(mut self, hops: usize) -> Self {
        self.expand = hops;
        self
    }

    fn eligible(&self, memory: &Memory, now: DateTime<Utc>) -> bool {
        let status_ok = match self.status {
            StatusFilter::Default => !memory.is_deprecated(),
            StatusFilter::Only(status) => memory.status == status,
            StatusFilter::Any => true,
        };
        if !status_ok {
            return false;
        }
        let staleness = classify(memory, now);
        match self.stale {
            StaleFilter::Fresh => staleness != Staleness::Expired,
            StaleFilter::Include => true,
            StaleFilter::Only => staleness.is_stale(),
        }
    }

    fn matches(&self, memory: &Memory) -> bool {
        if self.memory_type.is_some_and(|t| t != memory.memory_type) {
            return false;
        }
        if !self.tags.iter().all(|t| memory.has_tag(t)) {
            return false;
        }
        if self.terms.is_empty() {
            return true;
        }
        let title = memory.title.to_lowercase();
        let body = memory.body.to_lowercase();
        let tags: Vec<String> = memory.tags.iter().map(|t| t.to_lowercase()).collect();
        self.terms.iter().any(|term| {
            title.contains(term.as_str())
                || body.contains(term.as_str())
                || tags.iter().any(|t| t.contains(term.as_str()))
        })
    }
}

/// One recall result.
#[derive(Debug, Clone, PartialEq)]
pub struct RecallHit {
    pub memory: Memory,
    pub match_kind: MatchKind,
}

/// Ordered hits plus the number of matches before the limit was applied.
#[derive(Debug, Clone, Default)]
pub struct RecallResult {
    pub hits: Vec<RecallHit>,
    pub total_matches: usize,
}

impl RecallResult {
    pub fn ids(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.memory.id.as_str()).collect()
    }

    pub fn direct(&self) -> impl Iterator<Item = &RecallHit> {
        self.hits
            .iter()
            .filter(|h| h.match_kind == MatchKind::Direct)
    }

    pub fn expanded(&self) -> impl Iterator<Item = &RecallHit> {
        self.hits
            .iter()
            .filter(|h| h.match_kind == MatchKind::Expanded)
    }
}

/// Run a recall query against `index` as of `now`.
pub fn recall(index: &Index, query: &RecallQuery, now: DateTime<Utc>) -> RecallResult {
    let direct: Vec<&Memory> = index
        .memories()
        .filter(|m| query.eligible(m, now) && query.matches(m))
        .collect();

    let mut hits: Vec<RecallHit> = direct
        .iter()
        .map(|m| RecallHit {
            memory: (*m).clone(),
            match_kind: MatchKind::Direct,
        })
        .collect();

    if query.expand > 0 && !direct.is_empty() {
        let reached = graph::neighborhood(index, direct.iter().map(|m| m.id.as_str()), query.expand);
        hits.extend(
            reached
                .iter()
                .filter_map(|id| index.get(id))
                .filter(|m| query.eligible(m, now))
                .map(|m| RecallHit {
                    memory: m.clone(),
                    match_kind: MatchKind::Expanded,
                }),
        );
    }

    let sort = match (query.sort, query.limit) {
        (Some(key), _) => Some(key),
        (None, Some(_)) => Some(SortKey::Confidence),
        (None, None) => None,
    };
    if let Some(key) = sort {
        hits.sort_by(|a, b| compare(key, &a.memory, &b.memory));
    }

    let total_matches = hits.len();
    if let Some(limit) = query.limit {
        hits.truncate(limit);
    }
    RecallResult {
        hits,
        total_matches,
    }
}

fn compare(key: SortKey, a: &Memory, b: &Memory) -> Ordering {
    let primary = match key {
        SortKey::Newest => b.created_at.cmp(&a.created_at),
        SortKey::Oldest => a.created_at.cmp(&b.created_at),
        SortKey::Confidence => b
            .confidence
            .cmp(&a.confidence)
            .then_with(|| b.created_at.cmp(&a.created_at)),
        SortKey::Updated => b.updated_at.cmp(&a.updated_at),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

/// Look up one memory, falling back to a case-insensitive id match.
pub fn get<'a>(index: &'a Index, id: &str) -> AmpResult<&'a Memory> {
    index
        .resolve(id)
        .ok_or_else(|| AmpError::NotFound { id: id.to_string() })
}

/// Tag usage counts over non-deprecated records, optionally restricted to
/// one prefix (`"topic"` or `"topic:"`).
pub fn tags(index: &Index, prefix: Option<&str>) -> BTreeMap<String, usize> {
    let wanted = prefix.map(|p| p.trim_end_matches(':'));
    let mut counts = BTreeMap::new();
    for memory in index.memories().filter(|m| !m.is_deprecated()) {
        let unique: BTreeSet<&String> = memory.tags.iter().collect();
        for tag in unique {
            let keep = match wanted {
                Some(p) => amp_store::tag_prefix(tag) == Some(p),
                None => true,
            };
            if keep {
                *counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
    }
    counts
}
