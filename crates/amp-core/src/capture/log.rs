//! CI and test log source. One candidate per matching line, at most one
//! rule per line, and each title only once per log.

use std::collections::HashSet;

use amp_store::MemoryDraft;

use super::classifier::Classifier;
use super::{Candidate, CaptureOptions, Origin};

const DETAIL_LEN: usize = 200;

/// Scan `text` line by line. `label` names the log in each candidate's
/// provenance as `log:<label>#L<n>`.
pub fn capture_log(
    text: &str,
    label: &str,
    classifier: &dyn Classifier,
    options: &CaptureOptions,
) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    let lines = text.lines().enumerate();
    let lines: Box<dyn Iterator<Item = (usize, &str)>> = match options.limit.max_items {
        Some(n) => Box::new(lines.take(n)),
        None => Box::new(lines),
    };

    for (idx, raw) in lines {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let Some(found) = classifier.classify(line) else {
            continue;
        };
        if !seen.insert(found.title.clone()) {
            continue;
        }

        let number = idx + 1;
        let detail: String = line.chars().take(DETAIL_LEN).collect();
        let draft = MemoryDraft::new(found.memory_type, found.title)
            .with_body(format!("Line {number}: {detail}"))
            .with_tag("topic:ci")
            .with_confidence(found.confidence)
            .with_source(format!("log:{label}#L{number}"));
        candidates.push(Candidate::new(draft, Origin::Log, line, found.rule));
    }

    options.finish(candidates)
}
