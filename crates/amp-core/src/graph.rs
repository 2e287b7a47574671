//! Breadth-first walks over the link graph.
//!
//! Edges are traversed in both directions regardless of relation, so a
//! `contradicts` or `supersedes` link is discoverable from either endpoint.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{AmpError, AmpResult};
use crate::index::Index;

/// Distance from the seed mapped to the ids first reached at that distance.
pub type DistanceMap = BTreeMap<usize, BTreeSet<String>>;

/// Memories within `hops` links of `seed_id`, grouped by distance. Distance
/// `0` holds only the seed; every id appears at exactly one distance.
pub fn related(index: &Index, seed_id: &str, hops: usize) -> AmpResult<DistanceMap> {
    let seed = index.resolve(seed_id).ok_or_else(|| AmpError::NotFound {
        id: seed_id.to_string(),
    })?;

    let mut levels = DistanceMap::new();
    levels.insert(0, BTreeSet::from([seed.id.clone()]));
    let mut visited: BTreeSet<String> = BTreeSet::from([seed.id.clone()]);
    let mut frontier = vec![seed.id.clone()];

    for distance in 1..=hops {
        let mut next = BTreeSet::new();
        for id in &frontier {
            for neighbor in index.neighbors(id) {
                if visited.insert(neighbor.to_string()) {
                    next.insert(neighbor.to_string());
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next.iter().cloned().collect();
        levels.insert(distance, next);
    }

    Ok(levels)
}

/// Ids reachable within `hops` of any seed, excluding the seeds themselves.
pub fn neighborhood<'a, I>(index: &Index, seeds: I, hops: usize) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut visited: BTreeSet<String> = seeds.into_iter().map(str::to_string).collect();
    let seeds = visited.clone();
    let mut frontier: Vec<String> = seeds.iter().cloned().collect();

    for _ in 0..hops {
        let mut next = Vec::new();
        for id in &frontier {
            for neighbor in index.neighbors(id) {
                if visited.insert(neighbor.to_string()) {
                    next.push(neighbor.to_string());
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    visited.difference(&seeds).cloned().collect()
}
