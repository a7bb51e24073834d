/*!
 * Translation-memory index and its loaders.
 *
 * The index maps a source text to every entry recorded for it, in document
 * order, and remembers the order in which source texts were first seen so
 * fuzzy ties resolve to the earliest key.
 *
 * Loaders are tried in a fixed order (JSON index, then TMX); the first one
 * that parses the file wins.
 */

use anyhow::{Result, anyhow};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::language_utils;
use crate::markup;

/// One recorded translation of a source text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub source_text: String,
    pub target_text: String,
    #[serde(default)]
    pub target_lang: String,
    #[serde(default)]
    pub is_human: bool,
    #[serde(default)]
    pub origin_tool: Option<String>,
}

/// Source text to entries, with key insertion order
#[derive(Debug, Clone, Default)]
pub struct TmIndex {
    entries: HashMap<String, Vec<MemoryEntry>>,
    order: Vec<String>,
}

impl TmIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry under its source text
    pub fn insert(&mut self, entry: MemoryEntry) {
        let key = entry.source_text.clone();
        match self.entries.get_mut(&key) {
            Some(list) => list.push(entry),
            None => {
                self.order.push(key.clone());
                self.entries.insert(key, vec![entry]);
            }
        }
    }

    pub fn get(&self, source_text: &str) -> Option<&[MemoryEntry]> {
        self.entries.get(source_text).map(Vec::as_slice)
    }

    /// Source texts in first-seen order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Number of distinct source texts
    pub fn key_count(&self) -> usize {
        self.order.len()
    }

    /// Number of entries across all keys
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// A strategy for reading a translation-memory file
pub trait TmLoader: Send + Sync {
    fn name(&self) -> &'static str;

    /// Parse the file content into an index
    fn parse(&self, content: &str) -> Result<TmIndex>;
}

/// The loaders in the order they are tried
pub fn default_loaders() -> Vec<Box<dyn TmLoader>> {
    vec![Box::new(JsonTmLoader), Box::new(TmxLoader)]
}

/// Read `path` with the first loader that succeeds
pub fn load_index(path: &Path, loaders: &[Box<dyn TmLoader>]) -> Result<TmIndex> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("Failed to read translation memory {}: {}", path.display(), e))?;

    let mut failures = Vec::new();
    for loader in loaders {
        match loader.parse(&content) {
            Ok(index) => {
                debug!(
                    "Loaded {} with the {} loader ({} keys)",
                    path.display(),
                    loader.name(),
                    index.key_count()
                );
                return Ok(index);
            }
            Err(e) => failures.push(format!("{}: {}", loader.name(), e)),
        }
    }

    Err(anyhow!(
        "No loader could read {} ({})",
        path.display(),
        failures.join("; ")
    ))
}

/// Entry as it appears in a JSON index
#[derive(Debug, Deserialize)]
struct JsonEntry {
    #[serde(alias = "target_text", alias = "translation")]
    target: String,
    #[serde(default, alias = "lang")]
    target_lang: Option<String>,
    #[serde(default)]
    is_human: Option<bool>,
    #[serde(default, alias = "creationtool", alias = "tool")]
    origin_tool: Option<String>,
    #[serde(default)]
    notes: Vec<String>,
}

/// `{"source text": [{"target": ..., "is_human": ...}, ...]}`
pub struct JsonTmLoader;

impl TmLoader for JsonTmLoader {
    fn name(&self) -> &'static str {
        "json"
    }

    fn parse(&self, content: &str) -> Result<TmIndex> {
        // Preserve key order as written
        let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(content)?;
        let mut index = TmIndex::new();

        for (source, value) in raw {
            let entries: Vec<JsonEntry> = match value {
                serde_json::Value::Array(_) => serde_json::from_value(value)?,
                serde_json::Value::Object(_) => vec![serde_json::from_value(value)?],
                _ => return Err(anyhow!("Entry for '{}' is neither an object nor a list", source)),
            };

            for entry in entries {
                let is_human = entry
                    .is_human
                    .unwrap_or_else(|| classify_human(entry.origin_tool.as_deref(), &entry.notes));
                index.insert(MemoryEntry {
                    source_text: source.clone(),
                    target_text: entry.target,
                    target_lang: entry.target_lang.unwrap_or_default(),
                    is_human,
                    origin_tool: entry.origin_tool,
                });
            }
        }

        Ok(index)
    }
}

static HEADER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<header(\s[^>]*)?/?>").unwrap());
static TU_REGEX: Lazy<Regex> = Lazy::new(|| markup::element_regex("tu"));
static TUV_REGEX: Lazy<Regex> = Lazy::new(|| markup::element_regex("tuv"));
static SEG_REGEX: Lazy<Regex> = Lazy::new(|| markup::element_regex("seg"));
static PROP_REGEX: Lazy<Regex> = Lazy::new(|| markup::element_regex("prop"));
static NOTE_REGEX: Lazy<Regex> = Lazy::new(|| markup::element_regex("note"));

/// TMX 1.4 reader
pub struct TmxLoader;

impl TmxLoader {
    fn tuv_lang(attrs: &str) -> Option<String> {
        markup::attribute(attrs, "xml:lang").or_else(|| markup::attribute(attrs, "lang"))
    }
}

impl TmLoader for TmxLoader {
    fn name(&self) -> &'static str {
        "tmx"
    }

    fn parse(&self, content: &str) -> Result<TmIndex> {
        if !content.contains("<tmx") {
            return Err(anyhow!("Not a TMX document"));
        }

        let header = HEADER_REGEX
            .captures(content)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or("");
        let header_lang = markup::attribute(header, "srclang").filter(|l| !l.eq_ignore_ascii_case("*all*"));
        let header_tool = markup::attribute(header, "creationtool");

        let mut index = TmIndex::new();
        for (tu_attrs, tu_body) in markup::elements(&TU_REGEX, content) {
            let origin_tool = markup::attribute(tu_attrs, "creationtool").or_else(|| header_tool.clone());

            let mut notes: Vec<String> = markup::elements(&NOTE_REGEX, tu_body)
                .into_iter()
                .map(|(_, body)| markup::text_content(body))
                .collect();
            for (prop_attrs, body) in markup::elements(&PROP_REGEX, tu_body) {
                let kind = markup::attribute(prop_attrs, "type").unwrap_or_default();
                notes.push(format!("{} {}", kind, markup::text_content(body)));
            }
            if let Some(changer) = markup::attribute(tu_attrs, "changeid") {
                notes.push(format!("changeid {}", changer));
            }

            let variants: Vec<(String, String)> = markup::elements(&TUV_REGEX, tu_body)
                .into_iter()
                .filter_map(|(attrs, body)| {
                    let lang = Self::tuv_lang(attrs)?;
                    let (_, seg) = markup::elements(&SEG_REGEX, body).into_iter().next()?;
                    Some((lang, markup::text_content(seg)))
                })
                .collect();
            if variants.len() < 2 {
                continue;
            }

            let source_lang = header_lang.clone().unwrap_or_else(|| variants[0].0.clone());
            let Some(source_pos) = variants
                .iter()
                .position(|(lang, _)| language_utils::language_codes_match(lang, &source_lang))
            else {
                continue;
            };
            let source_text = variants[source_pos].1.clone();
            if source_text.is_empty() {
                continue;
            }

            let is_human = classify_human(origin_tool.as_deref(), &notes);
            for (pos, (lang, text)) in variants.into_iter().enumerate() {
                if pos == source_pos || text.is_empty() {
                    continue;
                }
                index.insert(MemoryEntry {
                    source_text: source_text.clone(),
                    target_text: text,
                    target_lang: lang,
                    is_human,
                    origin_tool: origin_tool.clone(),
                });
            }
        }

        if index.is_empty() {
            return Err(anyhow!("TMX document has no usable translation units"));
        }
        Ok(index)
    }
}

/// What a human-classification rule inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleTarget {
    Tool,
    Notes,
    Either,
}

/// One rule of the human-translation classifier
#[derive(Debug, Clone, Copy)]
pub struct HumanRule {
    pub name: &'static str,
    pub target: RuleTarget,
    pub markers: &'static [&'static str],
    pub verdict: bool,
}

/// Classifier rules, first match wins
///
/// This is a best-effort heuristic over free text, not a guarantee.
pub const HUMAN_RULES: &[HumanRule] = &[
    HumanRule {
        name: "machine-translation marker",
        target: RuleTarget::Either,
        markers: &[
            "machine translation",
            "machine-translated",
            "machine translated",
            "mt",
            "nmt",
            "deepl",
            "google translate",
            "opus-mt",
            "marian",
            "llm",
            "gpt",
        ],
        verdict: false,
    },
    HumanRule {
        name: "human or review marker",
        target: RuleTarget::Notes,
        markers: &["human", "reviewed", "post-edited", "approved", "translator", "proofread"],
        verdict: true,
    },
    HumanRule {
        name: "known CAT tool",
        target: RuleTarget::Tool,
        markers: &[
            "trados", "memoq", "wordfast", "memsource", "phrase", "smartcat", "omegat", "xtm",
            "across", "deja vu", "déjà vu", "cafetran", "matecat",
        ],
        verdict: true,
    },
];

fn contains_marker(haystack: &str, marker: &str) -> bool {
    if marker.chars().count() <= 3 {
        haystack
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == marker)
    } else {
        haystack.contains(marker)
    }
}

/// Rule that decides for the given provenance, if any
pub fn matching_rule(origin_tool: Option<&str>, notes: &[String]) -> Option<&'static HumanRule> {
    let tool = origin_tool.unwrap_or("").to_lowercase();
    let notes = notes.join("\n").to_lowercase();

    HUMAN_RULES.iter().find(|rule| {
        rule.markers.iter().any(|marker| match rule.target {
            RuleTarget::Tool => contains_marker(&tool, marker),
            RuleTarget::Notes => contains_marker(&notes, marker),
            RuleTarget::Either => contains_marker(&tool, marker) || contains_marker(&notes, marker),
        })
    })
}

/// Whether an entry looks human-translated; no matching rule means not human
pub fn classify_human(origin_tool: Option<&str>, notes: &[String]) -> bool {
    matching_rule(origin_tool, notes)
        .map(|rule| rule.verdict)
        .unwrap_or(false)
}

/// Entries grouped per target language, for diagnostics
pub fn language_breakdown(index: &TmIndex) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for key in index.keys() {
        for entry in index.get(key).unwrap_or_default() {
            *counts.entry(language_utils::primary_subtag(&entry.target_lang)).or_insert(0) += 1;
        }
    }
    counts
}
