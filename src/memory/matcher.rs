use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::language_utils;
use crate::memory::index::{MemoryEntry, TmIndex, TmLoader, default_loaders, load_index};
use crate::memory::similarity::SimilarityMetric;

/// Highest similarity a non-exact match may report
const FUZZY_CEILING: f64 = 1.0 - 1e-9;

/// Kind of translation-memory hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Fuzzy,
    None,
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MatchType::Exact => "exact",
            MatchType::Fuzzy => "fuzzy",
            MatchType::None => "none",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a lookup
///
/// `similarity == 1.0` exactly when `match_type` is `Exact`, and a `None`
/// match never carries a translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub translation: Option<String>,
    pub match_type: MatchType,
    pub similarity: f64,
}

impl MatchResult {
    pub fn exact(translation: String) -> Self {
        Self {
            translation: Some(translation),
            match_type: MatchType::Exact,
            similarity: 1.0,
        }
    }

    pub fn fuzzy(translation: String, similarity: f64) -> Self {
        Self {
            translation: Some(translation),
            match_type: MatchType::Fuzzy,
            similarity: similarity.clamp(0.0, FUZZY_CEILING),
        }
    }

    pub fn none(similarity: f64) -> Self {
        Self {
            translation: None,
            match_type: MatchType::None,
            similarity: similarity.clamp(0.0, FUZZY_CEILING),
        }
    }
}

/// Classifies source segments against a translation memory
pub struct TmMatcher {
    index: TmIndex,
    fuzzy_threshold: f64,
    metric: SimilarityMetric,
    target_lang: Option<String>,
    loaders: Vec<Box<dyn TmLoader>>,
}

impl TmMatcher {
    pub fn new(fuzzy_threshold: f64, metric: SimilarityMetric) -> Self {
        Self {
            index: TmIndex::new(),
            fuzzy_threshold: fuzzy_threshold.clamp(f64::MIN_POSITIVE, 1.0),
            metric,
            target_lang: None,
            loaders: default_loaders(),
        }
    }

    /// Only consider entries translated into `lang`
    pub fn with_target_lang(mut self, lang: impl Into<String>) -> Self {
        self.target_lang = Some(lang.into());
        self
    }

    /// Replace the loaders tried by `load`
    pub fn with_loaders(mut self, loaders: Vec<Box<dyn TmLoader>>) -> Self {
        self.loaders = loaders;
        self
    }

    /// Use an already built index
    pub fn with_index(mut self, index: TmIndex) -> Self {
        self.index = index;
        self
    }

    pub fn fuzzy_threshold(&self) -> f64 {
        self.fuzzy_threshold
    }

    pub fn index(&self) -> &TmIndex {
        &self.index
    }

    pub fn is_loaded(&self) -> bool {
        !self.index.is_empty()
    }

    /// Populate the index from a file; failures are logged, not raised
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> bool {
        let path = path.as_ref();
        match load_index(path, &self.loaders) {
            Ok(index) => {
                info!(
                    "Loaded translation memory {} ({} segments, {} entries)",
                    path.display(),
                    index.key_count(),
                    index.entry_count()
                );
                self.index = index;
                true
            }
            Err(e) => {
                warn!("Failed to load translation memory: {:#}", e);
                false
            }
        }
    }

    fn applicable<'a>(&self, entries: &'a [MemoryEntry]) -> Vec<&'a MemoryEntry> {
        entries
            .iter()
            .filter(|entry| match &self.target_lang {
                Some(lang) if !entry.target_lang.is_empty() => {
                    language_utils::language_codes_match(&entry.target_lang, lang)
                }
                _ => true,
            })
            .collect()
    }

    fn preferred(entries: &[&MemoryEntry]) -> Option<String> {
        entries
            .iter()
            .find(|entry| entry.is_human)
            .or_else(|| entries.first())
            .map(|entry| entry.target_text.clone())
    }

    /// Classify a source segment as exact, fuzzy or no match
    pub fn match_segment(&self, source_text: &str) -> MatchResult {
        let query = source_text.trim();
        if query.is_empty() || self.index.is_empty() {
            return MatchResult::none(0.0);
        }

        for key in [source_text, query] {
            if let Some(entries) = self.index.get(key) {
                if let Some(translation) = Self::preferred(&self.applicable(entries)) {
                    return MatchResult::exact(translation);
                }
            }
        }

        let mut best: Option<(f64, Vec<&MemoryEntry>)> = None;
        for key in self.index.keys() {
            let entries = self.applicable(self.index.get(key).unwrap_or_default());
            if entries.is_empty() {
                continue;
            }
            let similarity = self.metric.similarity(query, key.trim());
            if best.as_ref().is_none_or(|(current, _)| similarity > *current) {
                best = Some((similarity, entries));
            }
        }

        match best {
            Some((similarity, entries)) if similarity >= self.fuzzy_threshold => {
                match Self::preferred(&entries) {
                    Some(translation) => MatchResult::fuzzy(translation, similarity),
                    None => MatchResult::none(similarity),
                }
            }
            Some((similarity, _)) => MatchResult::none(similarity),
            None => MatchResult::none(0.0),
        }
    }

    /// `fuzzy_threshold <= similarity < 1.0`
    pub fn should_repair(&self, similarity: f64) -> bool {
        self.fuzzy_threshold <= similarity && similarity < 1.0
    }

    /// `similarity < fuzzy_threshold`
    pub fn should_generate(&self, similarity: f64) -> bool {
        similarity < self.fuzzy_threshold
    }
}
