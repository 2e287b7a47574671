//! String and set similarity used by capture dedup and the planner.

use std::collections::BTreeSet;

/// Case-fold, drop punctuation, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let kept: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Ratcliff/Obershelp similarity in `[0.0, 1.0]`: twice the number of
/// matched characters over the total length. Two empty strings are identical.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched(&a, &b) as f64 / total as f64
}

/// Similarity of two titles after normalization.
pub fn title_ratio(a: &str, b: &str) -> f64 {
    ratio(&normalize_title(a), &normalize_title(b))
}

fn matched(a: &[char], b: &[char]) -> usize {
    let (i, j, len) = longest_common_block(a, b);
    if len == 0 {
        return 0;
    }
    len + matched(&a[..i], &b[..j]) + matched(&a[i + len..], &b[j + len..])
}

/// Leftmost longest common substring as `(start_a, start_b, len)`.
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        let mut row = vec![0usize; b.len() + 1];
        for j in 0..b.len() {
            if a[i] == b[j] {
                row[j + 1] = prev[j] + 1;
                if row[j + 1] > best.2 {
                    best = (i + 1 - row[j + 1], j + 1 - row[j + 1], row[j + 1]);
                }
            }
        }
        prev = row;
    }
    best
}

/// |A ∩ B| / |A ∪ B|; two empty sets score `0.0`.
pub fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_case_and_punctuation() {
        assert_eq!(normalize_title("  Fix: the  API-port! "), "fix the api port");
    }

    #[test]
    fn ratio_bounds() {
        assert_eq!(ratio("", ""), 1.0);
        assert_eq!(ratio("abc", "abc"), 1.0);
        assert_eq!(ratio("abc", "xyz"), 0.0);
        let r = ratio("abcd", "bcde");
        assert!((r - 0.75).abs() < 1e-9, "{r}");
    }

    #[test]
    fn near_identical_titles_score_high() {
        assert!(title_ratio("API runs on port 8080", "api runs on port 8080.") > 0.99);
        assert!(title_ratio("API runs on port 8080", "API runs on port 9090") > 0.8);
        assert!(title_ratio("API runs on port 8080", "Use tabs") < 0.5);
    }

    #[test]
    fn jaccard_overlap() {
        let a: BTreeSet<_> = ["x", "y"].into_iter().collect();
        let b: BTreeSet<_> = ["y", "z"].into_iter().collect();
        assert!((jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(jaccard::<&str>(&BTreeSet::new(), &BTreeSet::new()), 0.0);
    }
}
