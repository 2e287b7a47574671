//! Maintenance planning over the Index.
//!
//! Each [`PlanCheck`] inspects the Index and proposes actions with a
//! rationale. Nothing is mutated here; the resulting [`Plan`] is applied by
//! the executor.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use amp_store::{
    tag_prefix, Confidence, Memory, MemoryDraft, MemoryPatch, MemoryType, Relation,
    WorkspaceConfig, MAX_ID_SUFFIX,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Action, ActionKind, Plan};
use crate::capture::similarity::{jaccard, title_ratio};
use crate::error::{AmpError, AmpResult};
use crate::index::Index;
use crate::obs;
use crate::staleness::{classify, Staleness};

/// Tag added to stale records awaiting a human decision.
pub const REVIEW_PENDING_TAG: &str = "review:pending";

/// Value of the placeholder tag proposed for a missing required prefix.
pub const PLACEHOLDER_TAG_VALUE: &str = "needs-triage";

const DUPLICATE_TITLE_RATIO: f64 = 0.8;
const DUPLICATE_TAG_OVERLAP: f64 = 0.5;
const CONFLICT_TITLE_RATIO: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanCheck {
    Stale,
    MissingTags,
    Conflicts,
    Orphans,
    Duplicates,
    TagNormalize,
}

impl PlanCheck {
    pub const ALL: [PlanCheck; 6] = [
        Self::Stale,
        Self::MissingTags,
        Self::Conflicts,
        Self::Orphans,
        Self::Duplicates,
        Self::TagNormalize,
    ];
}

impl fmt::Display for PlanCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stale => "stale",
            Self::MissingTags => "missing_tags",
            Self::Conflicts => "conflicts",
            Self::Orphans => "orphans",
            Self::Duplicates => "duplicates",
            Self::TagNormalize => "tag_normalize",
        };
        f.write_str(s)
    }
}

impl FromStr for PlanCheck {
    type Err = AmpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|c| c.to_string() == wanted)
            .ok_or_else(|| AmpError::Config(format!("unknown plan check: {s}")))
    }
}

/// Proposes a [`Plan`] from a read-only Index.
pub struct Planner<'a> {
    index: &'a Index,
    required_prefixes: Vec<String>,
    now: DateTime<Utc>,
    checks: BTreeSet<PlanCheck>,
}

impl<'a> Planner<'a> {
    /// Planner running every check.
    pub fn new(index: &'a Index, config: &WorkspaceConfig, now: DateTime<Utc>) -> Self {
        Self {
            index,
            required_prefixes: config.required_tag_prefixes.clone(),
            now,
            checks: PlanCheck::ALL.into_iter().collect(),
        }
    }

    /// Restrict to the given checks. Checks always run in [`PlanCheck::ALL`]
    /// order.
    pub fn with_checks(mut self, checks: impl IntoIterator<Item = PlanCheck>) -> Self {
        self.checks = checks.into_iter().collect();
        self
    }

    pub fn plan(&self) -> AmpResult<Plan> {
        let mut actions: Vec<Action> = Vec::new();
        let mut retiring: HashSet<String> = HashSet::new();
        for check in &self.checks {
            let found = match check {
                PlanCheck::Stale => self.stale(),
                PlanCheck::MissingTags => self.missing_tags(),
                PlanCheck::Conflicts => self.conflicts(),
                PlanCheck::Orphans => self.orphans(),
                PlanCheck::Duplicates => self.duplicates(),
                PlanCheck::TagNormalize => self.tag_normalize(),
            };
            tracing::debug!(check = %check, actions = found.len(), "plan check finished");
            // A record is deprecated at most once per plan; the first check wins.
            for action in found {
                if matches!(action.kind, ActionKind::Deprecate | ActionKind::Supersede) {
                    let target = action.target_id.clone().unwrap_or_default();
                    if !retiring.insert(target) {
                        continue;
                    }
                }
                actions.push(action);
            }
        }

        let plan = Plan::new(actions)?;
        obs::emit_plan_generated(&plan.checksum, plan.len());
        Ok(plan)
    }

    fn active(&self) -> impl Iterator<Item = &'a Memory> {
        self.index.memories().filter(|m| !m.is_deprecated())
    }

    /// Expired or review-due records: deprecate when an active record
    /// already supersedes them, otherwise flag for review.
    fn stale(&self) -> Vec<Action> {
        let mut actions = Vec::new();
        for memory in self.active().filter(|m| m.superseded_by.is_none()) {
            let staleness = classify(memory, self.now);
            let since = match staleness {
                Staleness::Expired => memory.expires_at,
                Staleness::ReviewDue => memory.review_after,
                Staleness::Fresh => continue,
            };
            let since = since.map(|d| d.date_naive().to_string()).unwrap_or_default();

            if staleness == Staleness::Expired {
                if let Some(successor) = self.superseder_of(&memory.id) {
                    actions.push(Action::deprecate(
                        &memory.id,
                        Some(successor.id.clone()),
                        None,
                        format!("Expired on {since}; {} already supersedes it.", successor.id),
                    ));
                    continue;
                }
            }
            if memory.has_tag(REVIEW_PENDING_TAG) {
                continue;
            }
            let rationale = match staleness {
                Staleness::Expired => format!("Expired on {since}; needs review or deprecation."),
                _ => format!("Review overdue since {since}."),
            };
            actions.push(Action::update(
                &memory.id,
                MemoryPatch::new().add_tag(REVIEW_PENDING_TAG),
                rationale,
            ));
        }
        actions
    }

    fn superseder_of(&self, id: &str) -> Option<&'a Memory> {
        self.active()
            .find(|m| m.links.get(Relation::Supersedes).iter().any(|t| t == id))
    }

    /// Placeholder tags for missing required prefixes. The record's own
    /// confidence is left alone; the placeholder itself is the low-confidence
    /// part.
    fn missing_tags(&self) -> Vec<Action> {
        let mut actions = Vec::new();
        for memory in self.active() {
            let missing: Vec<&String> = self
                .required_prefixes
                .iter()
                .filter(|p| !memory.tag_prefixes().any(|have| have == p.as_str()))
                .collect();
            if missing.is_empty() {
                continue;
            }
            let mut patch = MemoryPatch::new();
            for prefix in &missing {
                patch = patch.add_tag(format!("{prefix}:{PLACEHOLDER_TAG_VALUE}"));
            }
            let names: Vec<&str> = missing.iter().map(|p| p.as_str()).collect();
            actions.push(Action::update(
                &memory.id,
                patch,
                format!(
                    "Missing required tag prefix(es): {}. Placeholder is a low-confidence guess; confirm or replace it.",
                    names.join(", ")
                ),
            ));
        }
        actions
    }

    /// One open question per contradicting pair, unless a question already
    /// links both records.
    fn conflicts(&self) -> Vec<Action> {
        let mut pairs: BTreeMap<(String, String), String> = BTreeMap::new();

        for edge in self.index.edges() {
            if edge.relation != Relation::Contradicts {
                continue;
            }
            let (Some(a), Some(b)) = (self.index.get(&edge.from), self.index.get(&edge.to)) else {
                continue;
            };
            if a.is_deprecated() || b.is_deprecated() {
                continue;
            }
            pairs
                .entry(ordered(&a.id, &b.id))
                .or_insert_with(|| format!("{} contradicts {}.", a.id, b.id));
        }

        let facts: Vec<&Memory> = self
            .active()
            .filter(|m| m.memory_type == MemoryType::Fact && m.confidence == Confidence::High)
            .collect();
        for (i, a) in facts.iter().enumerate() {
            for b in &facts[i + 1..] {
                let shared = shared_topics(a, b);
                if shared.is_empty() || title_ratio(&a.title, &b.title) < CONFLICT_TITLE_RATIO {
                    continue;
                }
                if textually_incompatible(a, b) {
                    pairs.entry(ordered(&a.id, &b.id)).or_insert_with(|| {
                        format!(
                            "{} and {} are high-confidence facts on {} with incompatible statements.",
                            a.id,
                            b.id,
                            shared.join(", ")
                        )
                    });
                }
            }
        }

        let mut taken: HashSet<String> = self.index.memories().map(|m| m.id.clone()).collect();
        let mut actions = Vec::new();
        for ((a, b), reason) in pairs {
            if self.question_links(&a, &b) {
                continue;
            }
            let title = format!("Resolve contradiction between {a} and {b}");
            let Some(id) = free_id(&question_base_id(&a, &b), &taken) else {
                continue;
            };
            taken.insert(id.clone());

            let (left, right) = (self.index.get(&a), self.index.get(&b));
            let mut tags: BTreeSet<String> = BTreeSet::new();
            if let (Some(l), Some(r)) = (left, right) {
                tags.extend(shared_topics(l, r).into_iter().map(str::to_string));
                if tags.is_empty() {
                    tags.extend(topics(l).chain(topics(r)).map(str::to_string));
                }
            }
            if tags.is_empty() {
                tags.insert(format!("topic:{PLACEHOLDER_TAG_VALUE}"));
            }

            let draft = MemoryDraft::new(MemoryType::Question, title)
                .with_id(id)
                .with_body(format!("{reason} Which one holds, and should the other be deprecated?"))
                .with_tags(tags)
                .with_confidence(Confidence::Medium)
                .with_link(Relation::Relates, a.clone())
                .with_link(Relation::Relates, b.clone());
            actions.push(Action::add(draft, reason));
        }
        actions
    }

    fn question_links(&self, a: &str, b: &str) -> bool {
        self.active()
            .filter(|m| m.memory_type == MemoryType::Question)
            .any(|q| {
                let targets: HashSet<String> = q.links.iter().map(|l| l.to).collect();
                targets.contains(a) && targets.contains(b)
            })
    }

    /// Unlinked decisions and facts get a `relates` link to the record they
    /// share the most tags with.
    fn orphans(&self) -> Vec<Action> {
        let mut proposed: HashSet<(String, String)> = HashSet::new();
        let mut actions = Vec::new();

        for memory in self.active().filter(|m| {
            matches!(m.memory_type, MemoryType::Decision | MemoryType::Fact)
                && self.index.degree(&m.id) == 0
        }) {
            let tags: BTreeSet<&str> = memory.tags.iter().map(String::as_str).collect();
            let best = self
                .active()
                .filter(|other| other.id != memory.id)
                .map(|other| {
                    let shared = other.tags.iter().filter(|t| tags.contains(t.as_str())).count();
                    (shared, other)
                })
                .filter(|(shared, _)| *shared > 0)
                .fold(None, |best: Option<(usize, &Memory)>, (shared, other)| match best {
                    Some((n, _)) if n >= shared => best,
                    _ => Some((shared, other)),
                });
            let Some((shared, neighbor)) = best else {
                continue;
            };
            if !proposed.insert(ordered(&memory.id, &neighbor.id)) {
                continue;
            }
            actions.push(Action::update(
                &memory.id,
                MemoryPatch::new().add_link(Relation::Relates, &neighbor.id),
                format!(
                    "{} has no links; {} shares {shared} tag(s) with it.",
                    memory.id, neighbor.id
                ),
            ));
        }
        actions
    }

    /// Same-type pairs with near-identical titles and overlapping tags: keep
    /// the higher (confidence, created_at) record, deprecate the other.
    /// Pairs marked as contradicting are left to the conflicts check.
    fn duplicates(&self) -> Vec<Action> {
        let active: Vec<&Memory> = self.active().collect();
        let contradicting: HashSet<(String, String)> = self
            .index
            .edges()
            .iter()
            .filter(|e| e.relation == Relation::Contradicts)
            .map(|e| ordered(&e.from, &e.to))
            .chain(active.iter().flat_map(|m| {
                m.links
                    .get(Relation::Contradicts)
                    .iter()
                    .map(move |to| ordered(&m.id, to))
            }))
            .collect();
        let mut retired: HashSet<&str> = HashSet::new();
        let mut kept: HashSet<&str> = HashSet::new();
        let mut actions = Vec::new();

        for (i, a) in active.iter().enumerate() {
            for b in &active[i + 1..] {
                if a.memory_type != b.memory_type || contradicting.contains(&ordered(&a.id, &b.id)) {
                    continue;
                }
                let ratio = title_ratio(&a.title, &b.title);
                if ratio < DUPLICATE_TITLE_RATIO {
                    continue;
                }
                let ta: BTreeSet<&str> = a.tags.iter().map(String::as_str).collect();
                let tb: BTreeSet<&str> = b.tags.iter().map(String::as_str).collect();
                let overlap = jaccard(&ta, &tb);
                if overlap < DUPLICATE_TAG_OVERLAP {
                    continue;
                }

                let (keep, old) = if (b.confidence, b.created_at) > (a.confidence, a.created_at) {
                    (*b, *a)
                } else {
                    (*a, *b)
                };
                if retired.contains(old.id.as_str())
                    || retired.contains(keep.id.as_str())
                    || kept.contains(old.id.as_str())
                {
                    continue;
                }
                retired.insert(old.id.as_str());
                kept.insert(keep.id.as_str());
                actions.push(Action::deprecate(
                    &old.id,
                    Some(keep.id.clone()),
                    None,
                    format!(
                        "Near-duplicate: title similarity {:.0}%, tag overlap {:.0}%. Keep {}, deprecate {}.",
                        ratio * 100.0,
                        overlap * 100.0,
                        keep.id,
                        old.id
                    ),
                ));
            }
        }
        actions
    }

    /// Tags that differ only by case are rewritten to their most used form.
    fn tag_normalize(&self) -> Vec<Action> {
        let mut usage: BTreeMap<&str, usize> = BTreeMap::new();
        for memory in self.active() {
            for tag in &memory.tags {
                *usage.entry(tag.as_str()).or_insert(0) += 1;
            }
        }

        let mut forms: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for tag in usage.keys() {
            forms.entry(tag.to_lowercase()).or_default().push(tag);
        }

        let mut canonical: BTreeMap<&str, &str> = BTreeMap::new();
        for variants in forms.values().filter(|v| v.len() > 1) {
            // BTreeMap key order makes the first maximum deterministic.
            let Some(best) = variants
                .iter()
                .copied()
                .fold(None, |best: Option<&str>, t| match best {
                    Some(b) if usage[b] >= usage[t] => Some(b),
                    _ => Some(t),
                })
            else {
                continue;
            };
            for variant in variants.iter().copied().filter(|v| *v != best) {
                canonical.insert(variant, best);
            }
        }
        if canonical.is_empty() {
            return Vec::new();
        }

        let mut actions = Vec::new();
        for memory in self.active() {
            let rewrites: Vec<(&str, &str)> = memory
                .tags
                .iter()
                .filter_map(|t| canonical.get_key_value(t.as_str()).map(|(k, v)| (*k, *v)))
                .collect();
            if rewrites.is_empty() {
                continue;
            }
            let mut patch = MemoryPatch::new();
            for (from, to) in &rewrites {
                patch = patch.remove_tag(*from).add_tag(*to);
            }
            let described: Vec<String> = rewrites.iter().map(|(f, t)| format!("'{f}' -> '{t}'")).collect();
            actions.push(Action::update(
                &memory.id,
                patch,
                format!("Tag normalization: {}", described.join(", ")),
            ));
        }
        actions
    }
}

fn ordered(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn topics(memory: &Memory) -> impl Iterator<Item = &str> {
    memory
        .tags
        .iter()
        .map(String::as_str)
        .filter(|t| tag_prefix(t) == Some("topic"))
}

fn shared_topics<'m>(a: &'m Memory, b: &Memory) -> Vec<&'m str> {
    topics(a).filter(|t| b.has_tag(t)).collect()
}

/// `Q_resolve_<a>_vs_<b>`, keeping the record ids readable.
fn question_base_id(a: &str, b: &str) -> String {
    let prefix = MemoryType::Question.id_prefix();
    format!("{prefix}_resolve_{}_vs_{}", a.to_lowercase(), b.to_lowercase())
}

/// `base`, suffixed like the store does when taken.
fn free_id(base: &str, taken: &HashSet<String>) -> Option<String> {
    if !taken.contains(base) {
        return Some(base.to_string());
    }
    (2..=MAX_ID_SUFFIX)
        .map(|n| format!("{base}_{n}"))
        .find(|id| !taken.contains(id))
}

/// Different numbers, or one side negated and the other not.
fn textually_incompatible(a: &Memory, b: &Memory) -> bool {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    static NEGATION: OnceLock<Regex> = OnceLock::new();
    let number = NUMBER.get_or_init(|| Regex::new(r"\d+(?:\.\d+)?").expect("static number pattern"));
    let negation = NEGATION.get_or_init(|| {
        Regex::new(r"(?i)\b(?:not|never|no|cannot|can't|don't|doesn't|isn't|won't)\b")
            .expect("static negation pattern")
    });

    let text_a = format!("{} {}", a.title, a.body);
    let text_b = format!("{} {}", b.title, b.body);
    let nums_a: BTreeSet<&str> = number.find_iter(&text_a).map(|m| m.as_str()).collect();
    let nums_b: BTreeSet<&str> = number.find_iter(&text_b).map(|m| m.as_str()).collect();
    if !nums_a.is_empty() && !nums_b.is_empty() && nums_a != nums_b {
        return true;
    }
    negation.is_match(&text_a) != negation.is_match(&text_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexFile, INDEX_FORMAT_VERSION};
    use crate::plan::ActionPayload;
    use amp_store::{Fingerprint, Link, Status};
    use chrono::Duration;

    fn mem(id: &str, title: &str, tags: &[&str]) -> Memory {
        MemoryDraft::new(MemoryType::from_id(id).unwrap_or(MemoryType::Fact), title)
            .with_tags(tags.iter().copied())
            .with_body("body")
            .into_memory(id.to_string(), Utc::now() - Duration::days(1))
            .unwrap()
    }

    fn link(from: &str, to: &str, relation: Relation) -> Link {
        Link {
            from: from.into(),
            to: to.into(),
            relation,
        }
    }

    fn index(nodes: Vec<Memory>, edges: Vec<Link>) -> Index {
        Index::from_file(IndexFile {
            format_version: INDEX_FORMAT_VERSION,
            fingerprint: Fingerprint::compute(b""),
            built_at: Utc::now(),
            nodes,
            edges,
        })
    }

    fn run(index: &Index, check: PlanCheck) -> Plan {
        Planner::new(index, &WorkspaceConfig::default(), Utc::now())
            .with_checks([check])
            .plan()
            .unwrap()
    }

    #[test]
    fn parses_check_names() {
        assert_eq!("tag-normalize".parse::<PlanCheck>().unwrap(), PlanCheck::TagNormalize);
        assert_eq!("stale".parse::<PlanCheck>().unwrap(), PlanCheck::Stale);
        assert!("bogus".parse::<PlanCheck>().is_err());
    }

    #[test]
    fn contradicts_link_yields_one_question() {
        let mut a = mem("FACT_gw_a", "Gateway timeout is 30s", &["topic:gateway"]);
        a.links.insert(Relation::Contradicts, "FACT_gw_b");
        let b = mem("FACT_gw_b", "Gateway timeout is 60s", &["topic:gateway"]);
        let idx = index(
            vec![a, b],
            vec![link("FACT_gw_a", "FACT_gw_b", Relation::Contradicts)],
        );
        let plan = run(&idx, PlanCheck::Conflicts);
        assert_eq!(plan.len(), 1);
        let action = &plan.actions[0];
        assert_eq!(action.kind, ActionKind::Add);
        let ActionPayload::Add { ref draft } = action.payload else {
            panic!("expected add");
        };
        assert_eq!(draft.memory_type, MemoryType::Question);
        assert_eq!(draft.links.relates, vec!["FACT_gw_a", "FACT_gw_b"]);
        assert!(draft.tags.contains(&"topic:gateway".to_string()));
    }

    #[test]
    fn existing_question_suppresses_proposal() {
        let a = mem("FACT_a", "Cache is shared", &["topic:cache"]);
        let b = mem("FACT_b", "Cache is per pod", &["topic:cache"]);
        let mut q = mem("Q_which", "Which cache model?", &["topic:cache"]);
        q.links.insert(Relation::Relates, "FACT_a");
        q.links.insert(Relation::Relates, "FACT_b");
        let idx = index(
            vec![a, b, q],
            vec![
                link("FACT_a", "FACT_b", Relation::Contradicts),
                link("Q_which", "FACT_a", Relation::Relates),
                link("Q_which", "FACT_b", Relation::Relates),
            ],
        );
        assert!(run(&idx, PlanCheck::Conflicts).is_empty());
    }

    #[test]
    fn textual_conflict_between_high_confidence_facts() {
        let mut a = mem("FACT_port_a", "API port is 8080", &["topic:api"]);
        let mut b = mem("FACT_port_b", "API port is 9090", &["topic:api"]);
        a.confidence = Confidence::High;
        b.confidence = Confidence::High;
        let idx = index(vec![a, b], vec![]);
        assert_eq!(run(&idx, PlanCheck::Conflicts).len(), 1);
    }

    #[test]
    fn stale_records_are_flagged_or_deprecated() {
        let past = Utc::now() - Duration::days(2);
        let mut expired = mem("FACT_old", "Old limit", &["topic:x"]);
        expired.expires_at = Some(past);
        let mut review = mem("FACT_review", "Review me", &["topic:x"]);
        review.review_after = Some(past);
        let mut replaced = mem("FACT_replaced", "Replaced limit", &["topic:x"]);
        replaced.expires_at = Some(past);
        let mut successor = mem("FACT_successor", "New limit", &["topic:x"]);
        successor.links.insert(Relation::Supersedes, "FACT_replaced");
        let mut pending = mem("FACT_pending", "Already flagged", &["topic:x", REVIEW_PENDING_TAG]);
        pending.expires_at = Some(past);

        let idx = index(vec![expired, review, replaced, successor, pending], vec![]);
        let plan = run(&idx, PlanCheck::Stale);
        let summary: Vec<(ActionKind, &str)> = plan
            .actions
            .iter()
            .map(|a| (a.kind, a.target_id.as_deref().unwrap_or("")))
            .collect();
        assert_eq!(
            summary,
            vec![
                (ActionKind::Update, "FACT_old"),
                (ActionKind::Deprecate, "FACT_replaced"),
                (ActionKind::Update, "FACT_review"),
            ]
        );
    }

    #[test]
    fn missing_required_prefix_gets_placeholder() {
        let idx = index(vec![mem("DEC_x", "Use TOML", &["repo:amp"])], vec![]);
        let plan = run(&idx, PlanCheck::MissingTags);
        let ActionPayload::Update { ref patch } = plan.actions[0].payload else {
            panic!("expected update");
        };
        assert_eq!(patch.add_tags, vec!["topic:needs-triage"]);
        assert_eq!(patch.confidence, None);
        assert!(plan.actions[0].rationale.contains("low-confidence"));
    }

    #[test]
    fn orphans_link_to_best_tag_neighbor_once() {
        let idx = index(
            vec![
                mem("DEC_a", "Adopt shards", &["topic:store", "repo:amp"]),
                mem("FACT_b", "Shards hold 50", &["topic:store", "repo:amp"]),
                mem("FACT_c", "Unrelated", &["topic:other"]),
            ],
            vec![],
        );
        let plan = run(&idx, PlanCheck::Orphans);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.actions[0].target_id.as_deref(), Some("DEC_a"));
    }

    #[test]
    fn duplicates_keep_higher_confidence() {
        let mut a = mem("FACT_port", "API runs on port 8080", &["topic:api"]);
        a.confidence = Confidence::Low;
        let b = mem("FACT_port_2", "API runs on port 8080.", &["topic:api"]);
        let idx = index(vec![a, b], vec![]);
        let plan = run(&idx, PlanCheck::Duplicates);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.actions[0].target_id.as_deref(), Some("FACT_port"));
        let ActionPayload::Deprecate { ref superseded_by, .. } = plan.actions[0].payload else {
            panic!("expected deprecate");
        };
        assert_eq!(superseded_by.as_deref(), Some("FACT_port_2"));
    }

    #[test]
    fn contradicting_near_duplicates_become_a_question_not_a_deprecation() {
        let a = mem("FACT_gateway_timeout_is_30s", "Gateway timeout is 30s", &["topic:gateway"]);
        let mut b = mem("FACT_gateway_timeout_is_60s", "Gateway timeout is 60s", &["topic:gateway"]);
        b.links.insert(Relation::Contradicts, "FACT_gateway_timeout_is_30s");
        let idx = index(
            vec![a, b],
            vec![link(
                "FACT_gateway_timeout_is_60s",
                "FACT_gateway_timeout_is_30s",
                Relation::Contradicts,
            )],
        );

        assert!(run(&idx, PlanCheck::Duplicates).is_empty());
        let plan = Planner::new(&idx, &WorkspaceConfig::default(), Utc::now()).plan().unwrap();
        assert!(plan.actions.iter().all(|a| a.kind != ActionKind::Deprecate));
        let question = plan
            .actions
            .iter()
            .find(|a| a.kind == ActionKind::Add)
            .and_then(|a| a.target_id.as_deref());
        assert_eq!(
            question,
            Some("Q_resolve_fact_gateway_timeout_is_30s_vs_fact_gateway_timeout_is_60s")
        );
    }

    #[test]
    fn tag_case_variants_normalize_to_most_common() {
        let idx = index(
            vec![
                mem("FACT_a", "a", &["topic:API"]),
                mem("FACT_b", "b", &["topic:api"]),
                mem("FACT_c", "c", &["topic:api"]),
            ],
            vec![],
        );
        let plan = run(&idx, PlanCheck::TagNormalize);
        assert_eq!(plan.len(), 1);
        let ActionPayload::Update { ref patch } = plan.actions[0].payload else {
            panic!("expected update");
        };
        assert_eq!(patch.remove_tags, vec!["topic:API"]);
        assert_eq!(patch.add_tags, vec!["topic:api"]);
    }

    #[test]
    fn deprecated_records_are_ignored() {
        let mut gone = mem("DEC_gone", "Old", &[]);
        gone.status = Status::Deprecated;
        gone.deprecation_note = Some("obsolete".into());
        let idx = index(vec![gone], vec![]);
        let plan = Planner::new(&idx, &WorkspaceConfig::default(), Utc::now()).plan().unwrap();
        assert!(plan.is_empty());
    }
}
