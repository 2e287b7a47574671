//! Conversation transcript source.
//!
//! Each line is a span. Quote and list markers, timestamps, and a leading
//! `Speaker:` label are stripped before classification; if the unlabelled
//! text matches nothing the line is retried with the label kept, so
//! `TODO: ...` style lines still classify.

use std::collections::HashSet;
use std::sync::OnceLock;

use amp_store::MemoryDraft;
use regex::Regex;

use super::classifier::Classifier;
use super::{Candidate, CaptureOptions, Origin};

const MIN_LINE_LEN: usize = 10;
const BODY_LEN: usize = 500;

fn markers() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:[>*\-]\s*|\d{1,2}:\d{2}(?::\d{2})?\s*)+").expect("static marker pattern")
    })
}

fn speaker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\w+:\s*").expect("static speaker pattern"))
}

/// Scan a transcript. `label` names it in provenance as
/// `transcript:<label>#L<n>`.
pub fn capture_transcript(
    text: &str,
    label: &str,
    classifier: &dyn Classifier,
    options: &CaptureOptions,
) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    let max_lines = options.limit.max_items.unwrap_or(usize::MAX);
    for (idx, raw) in text.lines().enumerate().take(max_lines) {
        let line = raw.trim();
        if line.chars().count() < MIN_LINE_LEN {
            continue;
        }
        let unmarked = markers().replace(line, "").trim().to_string();
        let unlabelled = speaker().replace(&unmarked, "").trim().to_string();

        let attempt = [unlabelled, unmarked]
            .into_iter()
            .filter(|span| span.chars().count() >= MIN_LINE_LEN)
            .find_map(|span| classifier.classify(&span).map(|c| (span, c)));
        let Some((span, found)) = attempt else {
            continue;
        };
        if !seen.insert(found.title.to_lowercase()) {
            continue;
        }

        let number = idx + 1;
        let body: String = span.chars().take(BODY_LEN).collect();
        let draft = MemoryDraft::new(found.memory_type, found.title)
            .with_body(body)
            .with_tag("topic:discussion")
            .with_confidence(found.confidence)
            .with_source(format!("transcript:{label}#L{number}"));
        candidates.push(Candidate::new(draft, Origin::Transcript, line, found.rule));
    }

    options.finish(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::RuleClassifier;
    use amp_store::{Confidence, MemoryType};

    const CHAT: &str = "\
10:02 alice: We decided to use Postgres for the ledger.
bob: ok
> TODO: add retries to the gateway client
- Should we shard by tenant?
carol: we decided to use postgres for the ledger
Risk: the migration might lock the users table
";

    fn run() -> Vec<Candidate> {
        capture_transcript(CHAT, "standup", &RuleClassifier::transcripts(), &CaptureOptions::new())
    }

    #[test]
    fn classifies_and_strips_markers() {
        let out = run();
        let summary: Vec<(MemoryType, &str)> = out
            .iter()
            .map(|c| (c.draft.memory_type, c.draft.title.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (MemoryType::Decision, "use Postgres for the ledger"),
                (MemoryType::Goal, "add retries to the gateway client"),
                (MemoryType::Question, "shard by tenant"),
                (MemoryType::Risk, "the migration might lock the users table"),
            ]
        );
        assert_eq!(out[0].draft.source, "transcript:standup#L1");
        assert_eq!(out[0].draft.body, "We decided to use Postgres for the ledger.");
        assert_eq!(out[0].draft.confidence, Confidence::High);
        assert!(out.iter().all(|c| c.draft.tags.contains(&"topic:discussion".to_string())));
    }

    #[test]
    fn repeated_statements_are_dropped_within_a_transcript() {
        let decisions = run()
            .into_iter()
            .filter(|c| c.draft.memory_type == MemoryType::Decision)
            .count();
        assert_eq!(decisions, 1);
    }
}
