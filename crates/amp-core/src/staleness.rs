//! Lifecycle classification against a point in time. Pure; never mutates.

use std::fmt;

use amp_store::Memory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::index::Index;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Staleness {
    Fresh,
    ReviewDue,
    Expired,
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        !matches!(self, Self::Fresh)
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::ReviewDue => write!(f, "review_due"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Expired once `expires_at` is reached; otherwise review-due once
/// `review_after` is reached; otherwise fresh.
pub fn classify(memory: &Memory, now: DateTime<Utc>) -> Staleness {
    if memory.expires_at.is_some_and(|at| at <= now) {
        Staleness::Expired
    } else if memory.review_after.is_some_and(|at| at <= now) {
        Staleness::ReviewDue
    } else {
        Staleness::Fresh
    }
}

/// A stale record with the date that made it stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaleEntry {
    pub id: String,
    pub title: String,
    pub staleness: Staleness,
    pub since: DateTime<Utc>,
}

/// Non-deprecated stale records: expired ones first ordered by expiry, then
/// review-due ones ordered by review date.
pub fn stale(index: &Index, now: DateTime<Utc>) -> Vec<StaleEntry> {
    let mut expired = Vec::new();
    let mut review = Vec::new();

    for memory in index.memories().filter(|m| !m.is_deprecated()) {
        let entry = |staleness, since| StaleEntry {
            id: memory.id.clone(),
            title: memory.title.clone(),
            staleness,
            since,
        };
        match (classify(memory, now), memory.expires_at, memory.review_after) {
            (Staleness::Expired, Some(at), _) => expired.push(entry(Staleness::Expired, at)),
            (Staleness::ReviewDue, _, Some(at)) => review.push(entry(Staleness::ReviewDue, at)),
            _ => {}
        }
    }

    expired.sort_by(|a, b| a.since.cmp(&b.since).then_with(|| a.id.cmp(&b.id)));
    review.sort_by(|a, b| a.since.cmp(&b.since).then_with(|| a.id.cmp(&b.id)));
    expired.extend(review);
    expired
}

#[cfg(test)]
mod tests {
    use super::*;
    use amp_store::{MemoryDraft, MemoryType};
    use chrono::Duration;

    fn memory() -> Memory {
        MemoryDraft::new(MemoryType::Fact, "x")
            .into_memory("FACT_x".into(), Utc::now())
            .unwrap()
    }

    #[test]
    fn no_dates_is_always_fresh() {
        let far = Utc::now() + Duration::days(10_000);
        assert_eq!(classify(&memory(), far), Staleness::Fresh);
    }

    #[test]
    fn expiry_wins_over_review() {
        let now = Utc::now();
        let mut m = memory();
        m.review_after = Some(now - Duration::days(2));
        assert_eq!(classify(&m, now), Staleness::ReviewDue);
        m.expires_at = Some(now - Duration::days(1));
        assert_eq!(classify(&m, now), Staleness::Expired);
        m.expires_at = Some(now + Duration::days(1));
        assert_eq!(classify(&m, now), Staleness::ReviewDue);
    }

    #[test]
    fn boundary_instant_counts_as_reached() {
        let now = Utc::now();
        let mut m = memory();
        m.expires_at = Some(now);
        assert_eq!(classify(&m, now), Staleness::Expired);
    }
}
