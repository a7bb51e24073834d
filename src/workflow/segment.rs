use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Pipeline state of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentState {
    Detected,
    Exact,
    Repair,
    Generate,
    FallbackExisting,
    Unresolved,
    Skipped,
}

impl SegmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentState::Detected => "DETECTED",
            SegmentState::Exact => "EXACT",
            SegmentState::Repair => "REPAIR",
            SegmentState::Generate => "GENERATE",
            SegmentState::FallbackExisting => "FALLBACK_EXISTING",
            SegmentState::Unresolved => "UNRESOLVED",
            SegmentState::Skipped => "SKIPPED",
        }
    }

    /// Whether a resumed run may leave the segment as it is
    pub fn is_resolved(&self) -> bool {
        !matches!(self, SegmentState::Detected | SegmentState::Unresolved)
    }
}

impl fmt::Display for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            SegmentState::Detected,
            SegmentState::Exact,
            SegmentState::Repair,
            SegmentState::Generate,
            SegmentState::FallbackExisting,
            SegmentState::Unresolved,
            SegmentState::Skipped,
        ]
        .into_iter()
        .find(|state| state.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| format!("Unknown segment state: {}", s))
    }
}

/// Keys the pipeline may write into segment metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKey {
    State,
    MatchType,
    Similarity,
    WeightedScore,
    Accuracy,
    Fluency,
    Tone,
    Decision,
    Hallucination,
    Candidates,
    TermScore,
    TermViolations,
    Provenance,
    Error,
}

impl PipelineKey {
    pub const ALL: [PipelineKey; 14] = [
        PipelineKey::State,
        PipelineKey::MatchType,
        PipelineKey::Similarity,
        PipelineKey::WeightedScore,
        PipelineKey::Accuracy,
        PipelineKey::Fluency,
        PipelineKey::Tone,
        PipelineKey::Decision,
        PipelineKey::Hallucination,
        PipelineKey::Candidates,
        PipelineKey::TermScore,
        PipelineKey::TermViolations,
        PipelineKey::Provenance,
        PipelineKey::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKey::State => "state",
            PipelineKey::MatchType => "match_type",
            PipelineKey::Similarity => "similarity",
            PipelineKey::WeightedScore => "weighted_score",
            PipelineKey::Accuracy => "accuracy",
            PipelineKey::Fluency => "fluency",
            PipelineKey::Tone => "tone",
            PipelineKey::Decision => "decision",
            PipelineKey::Hallucination => "hallucination",
            PipelineKey::Candidates => "candidates",
            PipelineKey::TermScore => "term_score",
            PipelineKey::TermViolations => "term_violations",
            PipelineKey::Provenance => "provenance",
            PipelineKey::Error => "error",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }
}

/// Segment metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentMetadata {
    /// Format-specific fields, carried through untouched
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Values written by the pipeline
    #[serde(default)]
    pub pipeline: BTreeMap<PipelineKey, String>,
}

impl SegmentMetadata {
    pub fn set(&mut self, key: PipelineKey, value: impl ToString) {
        self.pipeline.insert(key, value.to_string());
    }

    pub fn get(&self, key: PipelineKey) -> Option<&str> {
        self.pipeline.get(&key).map(String::as_str)
    }

    /// State recorded by an earlier run
    pub fn state(&self) -> Option<SegmentState> {
        self.get(PipelineKey::State).and_then(|s| s.parse().ok())
    }

    /// Drop everything the pipeline wrote
    pub fn clear_pipeline(&mut self) {
        self.pipeline.clear();
    }
}

/// One translatable unit of a document
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub id: String,
    /// Id as the document spelled it; `None` when `id` was synthesized
    pub raw_id: Option<Value>,
    pub source_text: String,
    pub target_text: Option<String>,
    pub source_lang: String,
    pub target_lang: String,
    pub metadata: SegmentMetadata,
}

impl Segment {
    pub fn new(id: impl Into<String>, source_text: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            raw_id: Some(Value::String(id.clone())),
            id,
            source_text: source_text.into(),
            target_text: None,
            source_lang: String::new(),
            target_lang: String::new(),
            metadata: SegmentMetadata::default(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_text = Some(target.into());
        self
    }

    pub fn with_langs(mut self, source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        self.source_lang = source_lang.into();
        self.target_lang = target_lang.into();
        self
    }

    /// Pre-existing target, when it has content
    pub fn existing_target(&self) -> Option<&str> {
        self.target_text.as_deref().filter(|t| !t.trim().is_empty())
    }
}
