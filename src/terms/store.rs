/*!
 * Termbase storage and per-segment term extraction.
 *
 * Termbases are keyed by language pair, both codes normalized so `en-US`,
 * `en` and `eng` land on the same key. Two backing formats are read: a JSON
 * list of entries and TBX.
 */

use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::language_utils;
use crate::markup;
use crate::memory::similarity::SimilarityMetric;
use crate::terms::validation::{TermValidation, TermValidator};

/// Word tokens, keeping inner hyphens and apostrophes
static TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+(?:[-'’]\w+)*").unwrap());

/// One approved (or not) source to target term pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermEntry {
    #[serde(alias = "source")]
    pub source_term: String,
    #[serde(alias = "target")]
    pub target_term: String,
    #[serde(default = "default_approved")]
    pub approved: bool,
    #[serde(default)]
    pub variants: Vec<String>,
}

fn default_approved() -> bool {
    true
}

impl TermEntry {
    pub fn new(source_term: impl Into<String>, target_term: impl Into<String>, approved: bool) -> Self {
        Self {
            source_term: source_term.into(),
            target_term: target_term.into(),
            approved,
            variants: Vec::new(),
        }
    }

    /// The source term followed by its variants
    pub fn source_forms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.source_term.as_str()).chain(self.variants.iter().map(String::as_str))
    }
}

/// Lowercased word tokens of a text
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_REGEX
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// A strategy for reading a termbase file
pub trait TermLoader: Send + Sync {
    fn name(&self) -> &'static str;

    fn parse(&self, content: &str, source_lang: &str, target_lang: &str) -> Result<Vec<TermEntry>>;
}

/// `[{"source_term": ..., "target_term": ...}]` or `{"terms": [...]}`
pub struct JsonTermLoader;

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonTermbase {
    List(Vec<TermEntry>),
    Wrapped { terms: Vec<TermEntry> },
}

impl TermLoader for JsonTermLoader {
    fn name(&self) -> &'static str {
        "json"
    }

    fn parse(&self, content: &str, _source_lang: &str, _target_lang: &str) -> Result<Vec<TermEntry>> {
        let entries = match serde_json::from_str::<JsonTermbase>(content)? {
            JsonTermbase::List(entries) => entries,
            JsonTermbase::Wrapped { terms } => terms,
        };
        Ok(entries
            .into_iter()
            .filter(|e| !e.source_term.trim().is_empty() && !e.target_term.trim().is_empty())
            .collect())
    }
}

static TERM_ENTRY_REGEX: Lazy<Regex> = Lazy::new(|| markup::element_regex("termEntry"));
static CONCEPT_ENTRY_REGEX: Lazy<Regex> = Lazy::new(|| markup::element_regex("conceptEntry"));
static LANG_SET_REGEX: Lazy<Regex> = Lazy::new(|| markup::element_regex("langSet"));
static TERM_CONTAINER_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["tig", "ntig", "termSec"]
        .iter()
        .map(|name| markup::element_regex(name))
        .collect()
});
static TERM_REGEX: Lazy<Regex> = Lazy::new(|| markup::element_regex("term"));
static STATUS_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["termNote", "descrip", "note"]
        .iter()
        .map(|name| markup::element_regex(name))
        .collect()
});

/// Status values that mark a term as not approved
const UNAPPROVED_STATUSES: &[&str] = &[
    "deprecated",
    "superseded",
    "notrecommended",
    "not recommended",
    "rejected",
    "forbidden",
];

/// TBX (v2 `termEntry` and v3 `conceptEntry`) reader
pub struct TbxLoader;

impl TbxLoader {
    /// Terms of one langSet with their approval flag
    fn terms_of(lang_set_body: &str) -> Vec<(String, bool)> {
        let mut containers: Vec<&str> = TERM_CONTAINER_REGEXES
            .iter()
            .flat_map(|re| markup::elements(re, lang_set_body))
            .map(|(_, body)| body)
            .collect();
        if containers.is_empty() {
            containers.push(lang_set_body);
        }

        containers
            .into_iter()
            .filter_map(|container| {
                let (_, term) = markup::elements(&TERM_REGEX, container).into_iter().next()?;
                let term = markup::text_content(term);
                if term.is_empty() {
                    return None;
                }
                Some((term, Self::is_approved(container)))
            })
            .collect()
    }

    fn is_approved(container: &str) -> bool {
        for re in STATUS_REGEXES.iter() {
            for (attrs, body) in markup::elements(re, container) {
                let kind = markup::attribute(attrs, "type").unwrap_or_default().to_lowercase();
                if kind.contains("administrativestatus") || kind.contains("status") {
                    let value = markup::text_content(body).to_lowercase();
                    return !UNAPPROVED_STATUSES.iter().any(|s| value.contains(s));
                }
            }
        }
        true
    }
}

impl TermLoader for TbxLoader {
    fn name(&self) -> &'static str {
        "tbx"
    }

    fn parse(&self, content: &str, source_lang: &str, target_lang: &str) -> Result<Vec<TermEntry>> {
        if !content.contains("<martif") && !content.contains("<tbx") {
            return Err(anyhow!("Not a TBX document"));
        }

        let concepts: Vec<&str> = markup::elements(&TERM_ENTRY_REGEX, content)
            .into_iter()
            .chain(markup::elements(&CONCEPT_ENTRY_REGEX, content))
            .map(|(_, body)| body)
            .collect();

        let mut entries = Vec::new();
        for concept in concepts {
            let mut source_terms = Vec::new();
            let mut target_terms = Vec::new();
            for (attrs, body) in markup::elements(&LANG_SET_REGEX, concept) {
                let Some(lang) = markup::attribute(attrs, "xml:lang").or_else(|| markup::attribute(attrs, "lang"))
                else {
                    continue;
                };
                if language_utils::language_codes_match(&lang, source_lang) {
                    source_terms.extend(Self::terms_of(body));
                } else if language_utils::language_codes_match(&lang, target_lang) {
                    target_terms.extend(Self::terms_of(body));
                }
            }

            let Some((source_term, _)) = source_terms.first().cloned() else {
                continue;
            };
            let Some((target_term, approved)) = target_terms
                .iter()
                .find(|(_, approved)| *approved)
                .or_else(|| target_terms.first())
                .cloned()
            else {
                continue;
            };

            entries.push(TermEntry {
                source_term,
                target_term,
                approved,
                variants: source_terms.into_iter().skip(1).map(|(term, _)| term).collect(),
            });
        }

        if entries.is_empty() {
            return Err(anyhow!("TBX document has no entries for {} -> {}", source_lang, target_lang));
        }
        Ok(entries)
    }
}

/// Termbases for any number of language pairs
pub struct TermStore {
    bases: HashMap<(String, String), Vec<TermEntry>>,
    loaders: Vec<Box<dyn TermLoader>>,
    metric: SimilarityMetric,
    validator: TermValidator,
}

impl Default for TermStore {
    fn default() -> Self {
        Self::new(TermValidator::default())
    }
}

impl TermStore {
    pub fn new(validator: TermValidator) -> Self {
        Self {
            bases: HashMap::new(),
            loaders: vec![Box::new(JsonTermLoader), Box::new(TbxLoader)],
            metric: SimilarityMetric::SequenceRatio,
            validator,
        }
    }

    pub fn with_metric(mut self, metric: SimilarityMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Load a termbase for a language pair; failures are logged, not raised
    pub fn load<P: AsRef<Path>>(&mut self, path: P, source_lang: &str, target_lang: &str) -> bool {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read termbase {}: {}", path.display(), e);
                return false;
            }
        };

        for loader in &self.loaders {
            match loader.parse(&content, source_lang, target_lang) {
                Ok(entries) => {
                    info!(
                        "Loaded {} terms from {} ({} loader)",
                        entries.len(),
                        path.display(),
                        loader.name()
                    );
                    self.insert(source_lang, target_lang, entries);
                    return true;
                }
                Err(e) => debug!("{} loader rejected {}: {}", loader.name(), path.display(), e),
            }
        }

        warn!("No loader could read termbase {}", path.display());
        false
    }

    /// Add entries for a language pair
    pub fn insert(&mut self, source_lang: &str, target_lang: &str, entries: Vec<TermEntry>) {
        self.bases
            .entry(language_utils::language_pair_key(source_lang, target_lang))
            .or_default()
            .extend(entries);
    }

    /// Entries for a language pair
    pub fn entries(&self, source_lang: &str, target_lang: &str) -> &[TermEntry] {
        self.bases
            .get(&language_utils::language_pair_key(source_lang, target_lang))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn term_count(&self) -> usize {
        self.bases.values().map(Vec::len).sum()
    }

    /// Terms relevant to a segment: exact hits by first occurrence, then fuzzy hits by score
    pub fn extract_for_segment(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        max_terms: usize,
        fuzzy_threshold: f64,
    ) -> Vec<TermEntry> {
        let entries = self.entries(source_lang, target_lang);
        if entries.is_empty() || max_terms == 0 {
            return Vec::new();
        }
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Vec::new();
        }

        // Tokenized source form -> entry position
        let mut lookup: HashMap<String, usize> = HashMap::new();
        let mut longest = 1;
        for (pos, entry) in entries.iter().enumerate() {
            for form in entry.source_forms() {
                let form_tokens = tokenize(form);
                if form_tokens.is_empty() {
                    continue;
                }
                longest = longest.max(form_tokens.len());
                lookup.entry(form_tokens.join(" ")).or_insert(pos);
            }
        }

        let mut selected: Vec<usize> = Vec::new();
        let mut seen: HashSet<usize> = HashSet::new();
        let mut covered = vec![false; tokens.len()];
        let mut start = 0;
        'positions: while start < tokens.len() {
            let max_n = longest.min(tokens.len() - start);
            let mut advance = 1;
            for n in (1..=max_n).rev() {
                let phrase = tokens[start..start + n].join(" ");
                if let Some(&pos) = lookup.get(&phrase) {
                    covered[start..start + n].iter_mut().for_each(|c| *c = true);
                    if seen.insert(pos) {
                        selected.push(pos);
                        if selected.len() >= max_terms {
                            break 'positions;
                        }
                    }
                    advance = n;
                    break;
                }
            }
            start += advance;
        }

        if selected.len() < max_terms {
            let mut fuzzy: Vec<(usize, f64)> = entries
                .iter()
                .enumerate()
                .filter(|(pos, _)| !seen.contains(pos))
                .filter_map(|(pos, entry)| {
                    let score = entry
                        .source_forms()
                        .map(|form| self.best_window_similarity(&tokens, &covered, form))
                        .fold(0.0_f64, f64::max);
                    (score >= fuzzy_threshold).then_some((pos, score))
                })
                .collect();
            fuzzy.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            selected.extend(fuzzy.into_iter().map(|(pos, _)| pos).take(max_terms - selected.len()));
        }

        selected.into_iter().map(|pos| entries[pos].clone()).collect()
    }

    /// Best similarity of `form` against uncovered windows of the same token length
    fn best_window_similarity(&self, tokens: &[String], covered: &[bool], form: &str) -> f64 {
        let form_tokens = tokenize(form);
        let width = form_tokens.len();
        if width == 0 || width > tokens.len() {
            return 0.0;
        }
        let needle = form_tokens.join(" ");
        (0..=tokens.len() - width)
            .filter(|&start| !covered[start..start + width].iter().any(|c| *c))
            .map(|start| self.metric.similarity(&tokens[start..start + width].join(" "), &needle))
            .fold(0.0, f64::max)
    }

    /// Validate a candidate against the pair's termbase
    pub fn validate(&self, candidate: &str, source: &str, source_lang: &str, target_lang: &str) -> TermValidation {
        self.validator
            .validate(self.entries(source_lang, target_lang), candidate, source)
    }

    pub fn validator(&self) -> &TermValidator {
        &self.validator
    }
}
