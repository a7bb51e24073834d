/*!
 * Normalized string-similarity ratios.
 *
 * Two metrics are available:
 * - `SequenceRatio`: Ratcliff/Obershelp "matching blocks" ratio, `2M / T`
 *   where `M` is the number of matched characters and `T` the total length
 * - `Levenshtein`: `1 - distance / max_len`
 *
 * Both return values in `[0, 1]` and 1.0 only for identical inputs.
 */

use serde::{Deserialize, Serialize};

/// Similarity metric used for fuzzy lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    SequenceRatio,
    Levenshtein,
}

impl SimilarityMetric {
    /// Similarity of two strings, case-sensitive
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }

        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        match self {
            SimilarityMetric::SequenceRatio => sequence_ratio(&a, &b),
            SimilarityMetric::Levenshtein => {
                let max_len = a.len().max(b.len());
                1.0 - levenshtein_distance(&a, &b) as f64 / max_len as f64
            }
        }
    }

    /// Similarity after lowercasing and trimming both sides
    pub fn similarity_ignore_case(&self, a: &str, b: &str) -> f64 {
        self.similarity(&a.trim().to_lowercase(), &b.trim().to_lowercase())
    }
}

/// Ratcliff/Obershelp ratio over char slices
fn sequence_ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched_chars(a, b) as f64 / total as f64
}

/// Sum of the matching blocks found by recursive longest-common-substring splits
fn matched_chars(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];

    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, len) = longest_match(a, b, alo, ahi, blo, bhi);
        if len == 0 {
            continue;
        }
        matched += len;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + len < ahi && j + len < bhi {
            pending.push((i + len, ahi, j + len, bhi));
        }
    }

    matched
}

/// Longest common substring of `a[alo..ahi]` and `b[blo..bhi]`, earliest on ties
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let width = bhi - blo + 1;
    let mut best = (alo, blo, 0);
    let mut prev = vec![0usize; width];
    let mut curr = vec![0usize; width];

    for i in alo..ahi {
        for j in blo..bhi {
            let k = j - blo + 1;
            curr[k] = if a[i] == b[j] { prev[k - 1] + 1 } else { 0 };
            if curr[k] > best.2 {
                best = (i + 1 - curr[k], j + 1 - curr[k], curr[k]);
            }
        }
        std::mem::swap(&mut prev, &mut curr);
        curr.iter_mut().for_each(|v| *v = 0);
    }

    best
}

/// Levenshtein distance between two char slices
fn levenshtein_distance(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev_row: Vec<usize> = (0..=b.len()).collect();
    let mut curr_row: Vec<usize> = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr_row[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr_row[j] = (prev_row[j] + 1)
                .min(curr_row[j - 1] + 1)
                .min(prev_row[j - 1] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b.len()]
}
