/*!
 * Heuristic hallucination detection.
 *
 * Three independent signals, any of which flags a candidate:
 * - embedding similarity to the source below a floor
 * - candidate/source length ratio outside configured bounds
 * - degenerate repetition loops (the same n-gram repeated back to back)
 */

use serde::{Deserialize, Serialize};

/// Thresholds for the hallucination heuristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallucinationConfig {
    /// Cross-lingual similarity below which a candidate is unfaithful
    #[serde(default = "default_min_source_similarity")]
    pub min_source_similarity: f64,

    /// Smallest acceptable candidate/source length ratio
    #[serde(default = "default_min_length_ratio")]
    pub min_length_ratio: f64,

    /// Largest acceptable candidate/source length ratio
    #[serde(default = "default_max_length_ratio")]
    pub max_length_ratio: f64,

    /// Sources shorter than this many characters skip the length check
    #[serde(default = "default_min_chars_for_ratio")]
    pub min_chars_for_ratio: usize,

    /// Back-to-back repeats of one n-gram that count as a loop
    #[serde(default = "default_max_repeats")]
    pub max_repeats: usize,
}

fn default_min_source_similarity() -> f64 {
    0.25
}

fn default_min_length_ratio() -> f64 {
    0.3
}

fn default_max_length_ratio() -> f64 {
    3.0
}

fn default_min_chars_for_ratio() -> usize {
    12
}

fn default_max_repeats() -> usize {
    4
}

impl Default for HallucinationConfig {
    fn default() -> Self {
        Self {
            min_source_similarity: default_min_source_similarity(),
            min_length_ratio: default_min_length_ratio(),
            max_length_ratio: default_max_length_ratio(),
            min_chars_for_ratio: default_min_chars_for_ratio(),
            max_repeats: default_max_repeats(),
        }
    }
}

/// Outcome of a hallucination check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HallucinationReport {
    pub detected: bool,
    pub reasons: Vec<String>,
}

/// Applies the hallucination heuristics
#[derive(Debug, Clone, Default)]
pub struct HallucinationDetector {
    config: HallucinationConfig,
}

impl HallucinationDetector {
    pub fn new(config: HallucinationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HallucinationConfig {
        &self.config
    }

    /// Check a candidate; `source_similarity` is the embedding cosine when known
    pub fn detect(&self, candidate: &str, source: &str, source_similarity: Option<f64>) -> HallucinationReport {
        let mut reasons = Vec::new();

        if let Some(similarity) = source_similarity {
            if similarity < self.config.min_source_similarity {
                reasons.push(format!(
                    "source similarity {:.2} below {:.2}",
                    similarity, self.config.min_source_similarity
                ));
            }
        }

        if let Some(ratio) = self.length_ratio(candidate, source) {
            if ratio < self.config.min_length_ratio || ratio > self.config.max_length_ratio {
                reasons.push(format!("length ratio {:.2} out of bounds", ratio));
            }
        }

        if let Some(loop_text) = find_repetition(candidate, self.config.max_repeats) {
            reasons.push(format!("repetition loop '{}'", loop_text));
        }

        HallucinationReport {
            detected: !reasons.is_empty(),
            reasons,
        }
    }

    fn length_ratio(&self, candidate: &str, source: &str) -> Option<f64> {
        let source_chars = source.trim().chars().count();
        if source_chars < self.config.min_chars_for_ratio {
            return None;
        }
        Some(candidate.trim().chars().count() as f64 / source_chars as f64)
    }
}

/// First n-gram (n = 1..=3) repeated `max_repeats` times back to back
pub fn find_repetition(text: &str, max_repeats: usize) -> Option<String> {
    if max_repeats < 2 {
        return None;
    }
    let tokens: Vec<String> = text
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    for n in 1..=3 {
        if tokens.len() < n * max_repeats {
            continue;
        }
        for start in 0..=tokens.len() - n * max_repeats {
            let gram = &tokens[start..start + n];
            let repeats = (1..max_repeats)
                .take_while(|k| &tokens[start + k * n..start + (k + 1) * n] == gram)
                .count()
                + 1;
            if repeats >= max_repeats {
                return Some(gram.join(" "));
            }
        }
    }
    None
}
