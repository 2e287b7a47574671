//! Typed memory records, links, and the inputs used to create and patch them.
//!
//! Records are schema-light on disk, so shape is enforced here: every
//! enumerated field is a closed enum and [`MemoryDraft::validate`] runs at the
//! storage boundary before anything touches a shard.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Maximum slug length used when deriving ids from titles.
pub const MAX_SLUG_LEN: usize = 50;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// The kind of knowledge a memory holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Observation,
    Decision,
    Fact,
    Preference,
    Risk,
    Goal,
    Question,
}

impl MemoryType {
    pub const ALL: [MemoryType; 7] = [
        Self::Observation,
        Self::Decision,
        Self::Fact,
        Self::Preference,
        Self::Risk,
        Self::Goal,
        Self::Question,
    ];

    /// Id prefix, e.g. `FACT` in `FACT_api_port`.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Observation => "MEM",
            Self::Decision => "DEC",
            Self::Fact => "FACT",
            Self::Preference => "PREF",
            Self::Risk => "RISK",
            Self::Goal => "GOAL",
            Self::Question => "Q",
        }
    }

    /// File stem for this type's shard series.
    pub fn shard_stem(&self) -> &'static str {
        match self {
            Self::Observation => "observations",
            Self::Decision => "decisions",
            Self::Fact => "facts",
            Self::Preference => "preferences",
            Self::Risk => "risks",
            Self::Goal => "goals",
            Self::Question => "questions",
        }
    }

    /// Status assigned on creation when the draft does not set one.
    pub fn default_status(&self) -> Status {
        match self {
            Self::Fact => Status::Promoted,
            _ => Status::Active,
        }
    }

    /// Types whose records must carry a non-empty body.
    pub fn requires_body(&self) -> bool {
        matches!(self, Self::Decision | Self::Fact | Self::Risk)
    }

    /// Infer the type from an id prefix (`DEC_x` -> decision).
    pub fn from_id(id: &str) -> Option<Self> {
        let prefix = id.split('_').next()?;
        Self::ALL
            .into_iter()
            .find(|t| t.id_prefix().eq_ignore_ascii_case(prefix))
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Observation => "observation",
            Self::Decision => "decision",
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Risk => "risk",
            Self::Goal => "goal",
            Self::Question => "question",
        };
        f.write_str(s)
    }
}

impl FromStr for MemoryType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.to_string() == s.to_ascii_lowercase())
            .ok_or_else(|| StoreError::InvalidRecord(format!("unknown memory type: {s}")))
    }
}

/// Lifecycle status of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Active,
    Deprecated,
    Promoted,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Deprecated => write!(f, "deprecated"),
            Self::Promoted => write!(f, "promoted"),
        }
    }
}

/// Ordinal confidence; `High > Medium > Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Typed relation carried by a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Relates,
    Supports,
    Depends,
    Supersedes,
    Contradicts,
    ExampleOf,
}

impl Relation {
    pub const ALL: [Relation; 6] = [
        Self::Relates,
        Self::Supports,
        Self::Depends,
        Self::Supersedes,
        Self::Contradicts,
        Self::ExampleOf,
    ];
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relates => write!(f, "relates"),
            Self::Supports => write!(f, "supports"),
            Self::Depends => write!(f, "depends"),
            Self::Supersedes => write!(f, "supersedes"),
            Self::Contradicts => write!(f, "contradicts"),
            Self::ExampleOf => write!(f, "example_of"),
        }
    }
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// A directed edge `(from, to, relation)` as it appears in the index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Link {
    pub from: String,
    pub to: String,
    pub relation: Relation,
}

/// Outgoing link target as stored on the source record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkTarget {
    pub relation: Relation,
    pub to: String,
}

impl LinkTarget {
    pub fn new(relation: Relation, to: impl Into<String>) -> Self {
        Self {
            relation,
            to: to.into(),
        }
    }
}

/// Outgoing links of a record, one list per relation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Links {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub relates: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub supports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub supersedes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contradicts: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub example_of: Vec<String>,
}

impl Links {
    pub fn is_empty(&self) -> bool {
        Relation::ALL.iter().all(|r| self.get(*r).is_empty())
    }

    pub fn get(&self, relation: Relation) -> &[String] {
        match relation {
            Relation::Relates => &self.relates,
            Relation::Supports => &self.supports,
            Relation::Depends => &self.depends,
            Relation::Supersedes => &self.supersedes,
            Relation::Contradicts => &self.contradicts,
            Relation::ExampleOf => &self.example_of,
        }
    }

    fn get_mut(&mut self, relation: Relation) -> &mut Vec<String> {
        match relation {
            Relation::Relates => &mut self.relates,
            Relation::Supports => &mut self.supports,
            Relation::Depends => &mut self.depends,
            Relation::Supersedes => &mut self.supersedes,
            Relation::Contradicts => &mut self.contradicts,
            Relation::ExampleOf => &mut self.example_of,
        }
    }

    /// Add a target. Returns `false` when the link was already present.
    pub fn insert(&mut self, relation: Relation, to: &str) -> bool {
        let targets = self.get_mut(relation);
        if targets.iter().any(|t| t == to) {
            return false;
        }
        targets.push(to.to_string());
        true
    }

    /// All outgoing targets in relation order.
    pub fn iter(&self) -> impl Iterator<Item = LinkTarget> + '_ {
        Relation::ALL.into_iter().flat_map(move |relation| {
            self.get(relation)
                .iter()
                .map(move |to| LinkTarget::new(relation, to.clone()))
        })
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// A typed knowledge unit as persisted in a shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub title: String,
    pub status: Status,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecation_note: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(default, skip_serializing_if = "Links::is_empty")]
    pub links: Links,
}

fn default_scope() -> String {
    "global".to_string()
}

impl Memory {
    pub fn is_deprecated(&self) -> bool {
        self.status == Status::Deprecated
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Prefix of each `prefix:value` tag.
    pub fn tag_prefixes(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().filter_map(|t| tag_prefix(t))
    }

    /// Apply a patch in place. Returns whether anything changed; the caller
    /// stamps `updated_at`.
    pub fn apply_patch(&mut self, patch: &MemoryPatch) -> StoreResult<bool> {
        let before = self.clone();

        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(confidence) = patch.confidence {
            self.confidence = confidence;
        }
        if let Some(ref scope) = patch.scope {
            self.scope = scope.clone();
        }
        if let Some(ref source) = patch.source {
            self.source = source.clone();
        }
        if let Some(review_after) = patch.review_after {
            self.review_after = Some(review_after);
        }
        if let Some(expires_at) = patch.expires_at {
            self.expires_at = Some(expires_at);
        }
        if let Some(ref by) = patch.superseded_by {
            self.superseded_by = Some(by.clone());
        }
        if let Some(ref note) = patch.deprecation_note {
            self.deprecation_note = Some(note.clone());
        }

        self.tags.retain(|t| !patch.remove_tags.contains(t));
        for tag in &patch.add_tags {
            if !self.has_tag(tag) {
                self.tags.push(tag.clone());
            }
        }

        for link in &patch.add_links {
            if link.to == self.id {
                return Err(StoreError::InvalidRecord(format!(
                    "self-link on {} ({})",
                    self.id, link.relation
                )));
            }
            self.links.insert(link.relation, &link.to);
        }

        Ok(*self != before)
    }
}

/// Input to `create`: everything except derived identity and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDraft {
    /// Explicit id; derived from type and title when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Links::is_empty")]
    pub links: Links,
}

impl MemoryDraft {
    pub fn new(memory_type: MemoryType, title: impl Into<String>) -> Self {
        Self {
            id: None,
            memory_type,
            title: title.into(),
            body: String::new(),
            tags: Vec::new(),
            confidence: Confidence::default(),
            scope: default_scope(),
            source: String::new(),
            status: None,
            review_after: None,
            expires_at: None,
            links: Links::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            self = self.with_tag(tag);
        }
        self
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_review_after(mut self, at: DateTime<Utc>) -> Self {
        self.review_after = Some(at);
        self
    }

    pub fn with_expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn with_link(mut self, relation: Relation, to: impl Into<String>) -> Self {
        self.links.insert(relation, &to.into());
        self
    }

    /// Shape checks performed before a draft is written.
    pub fn validate(&self) -> StoreResult<()> {
        if self.title.trim().is_empty() {
            return Err(StoreError::InvalidRecord("title must not be empty".into()));
        }
        if let Some(ref id) = self.id {
            if id.trim().is_empty() || id.chars().any(char::is_whitespace) {
                return Err(StoreError::InvalidRecord(format!("invalid explicit id: {id:?}")));
            }
        }
        if self.status == Some(Status::Deprecated) {
            return Err(StoreError::InvalidRecord(
                "records cannot be created deprecated; use deprecate".into(),
            ));
        }
        Ok(())
    }

    /// Materialize the record under `id` at `now`.
    pub fn into_memory(self, id: String, now: DateTime<Utc>) -> StoreResult<Memory> {
        if self.links.iter().any(|l| l.to == id) {
            return Err(StoreError::InvalidRecord(format!("self-link on {id}")));
        }
        let mut tags: Vec<String> = Vec::with_capacity(self.tags.len());
        for tag in self.tags {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        Ok(Memory {
            id,
            status: self.status.unwrap_or_else(|| self.memory_type.default_status()),
            memory_type: self.memory_type,
            title: self.title.trim().to_string(),
            tags,
            confidence: self.confidence,
            scope: self.scope,
            source: self.source,
            created_at: now,
            updated_at: now,
            review_after: self.review_after,
            expires_at: self.expires_at,
            superseded_by: None,
            deprecation_note: None,
            body: self.body,
            links: self.links,
        })
    }
}

/// Field-level edit applied by `update`. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_after: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecation_note: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add_tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove_tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add_links: Vec<LinkTarget>,
}

impl MemoryPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn review_after(mut self, at: DateTime<Utc>) -> Self {
        self.review_after = Some(at);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn add_tag(mut self, tag: impl Into<String>) -> Self {
        self.add_tags.push(tag.into());
        self
    }

    pub fn remove_tag(mut self, tag: impl Into<String>) -> Self {
        self.remove_tags.push(tag.into());
        self
    }

    pub fn add_link(mut self, relation: Relation, to: impl Into<String>) -> Self {
        self.add_links.push(LinkTarget::new(relation, to));
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ---------------------------------------------------------------------------
// Ids and tags
// ---------------------------------------------------------------------------

/// Convert a title to an id slug: lowercase, `[a-z0-9 ]` only, whitespace
/// runs collapsed to `_`, truncated to [`MAX_SLUG_LEN`].
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let kept: String = lowered
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace())
        .collect();
    let slug = kept.split_whitespace().collect::<Vec<_>>().join("_");
    slug.chars().take(MAX_SLUG_LEN).collect()
}

/// `{PREFIX}_{slug}` for a type and title. Titles with nothing sluggable
/// fall back to `untitled`.
pub fn derive_id(memory_type: MemoryType, title: &str) -> String {
    let slug = slugify(title);
    let slug = if slug.is_empty() { "untitled".to_string() } else { slug };
    format!("{}_{}", memory_type.id_prefix(), slug)
}

/// The `prefix` of a `prefix:value` tag, if it has one.
pub fn tag_prefix(tag: &str) -> Option<&str> {
    let (prefix, value) = tag.split_once(':')?;
    if prefix.is_empty() || value.is_empty() {
        None
    } else {
        Some(prefix)
    }
}

/// Whether a tag is shaped like `prefix:value` with a word-like prefix.
pub fn is_well_formed_tag(tag: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z][a-z0-9_-]*:\S+$").expect("static tag pattern"))
        .is_match(tag)
}
