/*!
 * Prompt templates for candidate generation.
 *
 * Four mutually exclusive templates cover new translations and fuzzy-match
 * repairs, each with and without injected terminology. Templates use
 * `{variable}` placeholders and are substituted in a single pass, so text
 * coming from documents is never re-expanded.
 */

use anyhow::{Context, Result, anyhow};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::language_utils;
use crate::terms::TermEntry;

static PLACEHOLDER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([a-z_]+)\}").unwrap());

/// Which template a request uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    New,
    NewWithTerms,
    Repair,
    RepairWithTerms,
}

impl PromptKind {
    pub const ALL: [PromptKind; 4] = [
        PromptKind::New,
        PromptKind::NewWithTerms,
        PromptKind::Repair,
        PromptKind::RepairWithTerms,
    ];

    /// Template for a request shape
    pub fn select(has_terms: bool, has_seed: bool) -> Self {
        match (has_seed, has_terms) {
            (false, false) => PromptKind::New,
            (false, true) => PromptKind::NewWithTerms,
            (true, false) => PromptKind::Repair,
            (true, true) => PromptKind::RepairWithTerms,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            PromptKind::New => "new",
            PromptKind::NewWithTerms => "new_with_terms",
            PromptKind::Repair => "repair",
            PromptKind::RepairWithTerms => "repair_with_terms",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.key() == key)
    }
}

/// Variables available to templates
#[derive(Debug, Clone, Default)]
pub struct PromptVars<'a> {
    pub source_lang: &'a str,
    pub target_lang: &'a str,
    pub source_text: &'a str,
    pub terms: &'a [TermEntry],
    pub fuzzy_translation: Option<&'a str>,
    pub similarity: Option<f64>,
}

const NEW_TEMPLATE: &str = "You are a professional translator. Translate the following text from {source_lang} to {target_lang}.
Preserve meaning, tone, formatting and placeholders. Reply with the translation only.

Text:
{source_text}";

const NEW_WITH_TERMS_TEMPLATE: &str = "You are a professional translator. Translate the following text from {source_lang} to {target_lang}.
Use the required terminology exactly as given. Preserve meaning, tone, formatting and placeholders. Reply with the translation only.

Required terminology:
{terms}

Text:
{source_text}";

const REPAIR_TEMPLATE: &str = "You are a professional translator. A translation memory returned a similar segment ({similarity}% match).
Edit the existing {target_lang} translation so it matches the new {source_lang} text exactly in meaning. Change only what differs. Reply with the translation only.

New text:
{source_text}

Existing translation:
{fuzzy_translation}";

const REPAIR_WITH_TERMS_TEMPLATE: &str = "You are a professional translator. A translation memory returned a similar segment ({similarity}% match).
Edit the existing {target_lang} translation so it matches the new {source_lang} text exactly in meaning. Change only what differs and use the required terminology exactly as given. Reply with the translation only.

Required terminology:
{terms}

New text:
{source_text}

Existing translation:
{fuzzy_translation}";

/// Template store keyed by the four template names
#[derive(Debug, Clone)]
pub struct PromptStore {
    templates: HashMap<PromptKind, String>,
}

impl Default for PromptStore {
    fn default() -> Self {
        let templates = [
            (PromptKind::New, NEW_TEMPLATE),
            (PromptKind::NewWithTerms, NEW_WITH_TERMS_TEMPLATE),
            (PromptKind::Repair, REPAIR_TEMPLATE),
            (PromptKind::RepairWithTerms, REPAIR_WITH_TERMS_TEMPLATE),
        ]
        .into_iter()
        .map(|(kind, template)| (kind, template.to_string()))
        .collect();
        Self { templates }
    }
}

impl PromptStore {
    /// Built-in templates overridden by a JSON object `{"new": "...", ...}`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt templates {}", path.display()))?;
        let overrides: HashMap<String, String> = serde_json::from_str(&content)
            .with_context(|| format!("Invalid prompt template file {}", path.display()))?;

        let mut store = Self::default();
        for (key, template) in overrides {
            let kind = PromptKind::from_key(&key)
                .ok_or_else(|| anyhow!("Unknown prompt template '{}' in {}", key, path.display()))?;
            store.set(kind, template)?;
        }
        Ok(store)
    }

    /// Replace one template
    pub fn set(&mut self, kind: PromptKind, template: String) -> Result<()> {
        if !template.contains("{source_text}") {
            return Err(anyhow!("Template '{}' must contain {{source_text}}", kind.key()));
        }
        self.templates.insert(kind, template);
        Ok(())
    }

    pub fn template(&self, kind: PromptKind) -> &str {
        self.templates.get(&kind).map(String::as_str).unwrap_or("{source_text}")
    }

    /// Pick the template for `vars` and substitute it
    pub fn build(&self, vars: &PromptVars<'_>) -> (PromptKind, String) {
        let kind = PromptKind::select(!vars.terms.is_empty(), vars.fuzzy_translation.is_some());
        (kind, self.render(kind, vars))
    }

    /// Substitute `vars` into the template of `kind`
    pub fn render(&self, kind: PromptKind, vars: &PromptVars<'_>) -> String {
        let source_lang = language_utils::display_name(vars.source_lang);
        let target_lang = language_utils::display_name(vars.target_lang);
        let terms = format_terms(vars.terms);
        let similarity = vars
            .similarity
            .map(|s| format!("{:.0}", s * 100.0))
            .unwrap_or_default();

        PLACEHOLDER_REGEX
            .replace_all(self.template(kind), |caps: &regex::Captures| {
                match &caps[1] {
                    "source_lang" => source_lang.clone(),
                    "target_lang" => target_lang.clone(),
                    "source_text" => vars.source_text.to_string(),
                    "terms" => terms.clone(),
                    "fuzzy_translation" => vars.fuzzy_translation.unwrap_or_default().to_string(),
                    "similarity" => similarity.clone(),
                    _ => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

/// One `- source → target` line per term
fn format_terms(terms: &[TermEntry]) -> String {
    terms
        .iter()
        .map(|t| format!("- {} → {}", t.source_term, t.target_term))
        .collect::<Vec<_>>()
        .join("\n")
}
