/*!
 * Document codecs.
 *
 * The JSON codec accepts three layouts, tried in order:
 * - an object with a `segments` array (other top-level keys are kept)
 * - a bare array of segment objects
 * - JSON Lines, one segment object per line
 *
 * Unknown segment fields become metadata attributes and are written back
 * unchanged. Pipeline metadata is written under a `pipeline` key.
 */

use anyhow::{Context, Result, anyhow};
use log::debug;
use serde_json::{Map, Value};
use std::path::Path;

use crate::file_utils::FileManager;
use crate::workflow::segment::{PipelineKey, Segment, SegmentMetadata};

const ID_KEY: &str = "id";
const SOURCE_KEYS: [&str; 2] = ["source", "source_text"];
const TARGET_KEYS: [&str; 2] = ["target", "target_text"];
const SOURCE_LANG_KEY: &str = "source_lang";
const TARGET_LANG_KEY: &str = "target_lang";
const PIPELINE_KEY: &str = "pipeline";

/// How a document was laid out on disk
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentLayout {
    /// Object with a `segments` array plus other top-level fields
    Object { header: Map<String, Value> },
    /// Bare array of segments
    Array,
    /// One segment per line
    JsonLines,
}

/// Field names a document used for segment text
#[derive(Debug, Clone, PartialEq)]
pub struct FieldNames {
    pub source: String,
    pub target: String,
    /// Whether segments carried their own language fields
    pub segment_langs: bool,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            source: SOURCE_KEYS[0].to_string(),
            target: TARGET_KEYS[0].to_string(),
            segment_langs: false,
        }
    }
}

/// A parsed document
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub segments: Vec<Segment>,
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
    pub layout: DocumentLayout,
    pub fields: FieldNames,
}

impl Document {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            source_lang: None,
            target_lang: None,
            layout: DocumentLayout::Array,
            fields: FieldNames::default(),
        }
    }

    /// Fill in segment languages that the document left blank
    pub fn apply_languages(&mut self, source_lang: &str, target_lang: &str) {
        for segment in &mut self.segments {
            if segment.source_lang.is_empty() {
                segment.source_lang = source_lang.to_string();
            }
            if segment.target_lang.is_empty() {
                segment.target_lang = target_lang.to_string();
            }
        }
    }
}

/// Reads and writes documents
pub trait DocumentCodec: Send + Sync {
    fn name(&self) -> &str;

    fn parse(&self, path: &Path) -> Result<Document>;

    fn write(&self, document: &Document, path: &Path) -> Result<()>;
}

/// One way of reading a JSON document
pub trait ParseStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn parse(&self, content: &str) -> Result<Document>;
}

/// `{"segments": [...], ...}`
pub struct ObjectStrategy;

impl ParseStrategy for ObjectStrategy {
    fn name(&self) -> &'static str {
        "object"
    }

    fn parse(&self, content: &str) -> Result<Document> {
        let value: Value = serde_json::from_str(content)?;
        let Value::Object(mut header) = value else {
            return Err(anyhow!("not a JSON object"));
        };
        let Some(Value::Array(items)) = header.remove("segments") else {
            return Err(anyhow!("missing segments array"));
        };

        let source_lang = header.get(SOURCE_LANG_KEY).and_then(Value::as_str).map(str::to_string);
        let target_lang = header.get(TARGET_LANG_KEY).and_then(Value::as_str).map(str::to_string);
        let mut document = build_document(items, DocumentLayout::Object { header })?;
        document.source_lang = source_lang;
        document.target_lang = target_lang;
        Ok(document)
    }
}

/// `[{...}, {...}]`
pub struct ArrayStrategy;

impl ParseStrategy for ArrayStrategy {
    fn name(&self) -> &'static str {
        "array"
    }

    fn parse(&self, content: &str) -> Result<Document> {
        match serde_json::from_str::<Value>(content)? {
            Value::Array(items) => build_document(items, DocumentLayout::Array),
            _ => Err(anyhow!("not a JSON array")),
        }
    }
}

/// One JSON object per line
pub struct JsonLinesStrategy;

impl ParseStrategy for JsonLinesStrategy {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn parse(&self, content: &str) -> Result<Document> {
        let items = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| serde_json::from_str::<Value>(line).with_context(|| format!("line {}", n + 1)))
            .collect::<Result<Vec<_>>>()?;
        if items.is_empty() {
            return Err(anyhow!("no JSON lines"));
        }
        build_document(items, DocumentLayout::JsonLines)
    }
}

fn build_document(items: Vec<Value>, layout: DocumentLayout) -> Result<Document> {
    let mut fields = FieldNames::default();
    let mut segments = Vec::with_capacity(items.len());

    for (index, item) in items.into_iter().enumerate() {
        let Value::Object(map) = item else {
            return Err(anyhow!("segment {} is not an object", index + 1));
        };
        if index == 0 {
            if let Some(key) = SOURCE_KEYS.iter().find(|k| map.contains_key(**k)) {
                fields.source = key.to_string();
            }
            if let Some(key) = TARGET_KEYS.iter().find(|k| map.contains_key(**k)) {
                fields.target = key.to_string();
            }
        }
        fields.segment_langs |= map.contains_key(SOURCE_LANG_KEY) || map.contains_key(TARGET_LANG_KEY);
        segments.push(parse_segment(map, index)?);
    }

    Ok(Document {
        segments,
        source_lang: None,
        target_lang: None,
        layout,
        fields,
    })
}

fn take_string(map: &mut Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.remove(*key) {
        Some(Value::String(s)) => Some(s),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

fn parse_segment(mut map: Map<String, Value>, index: usize) -> Result<Segment> {
    let raw_id = map.remove(ID_KEY).filter(|v| !v.is_null());
    let id = match &raw_id {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => (index + 1).to_string(),
    };
    let source_text = take_string(&mut map, &SOURCE_KEYS)
        .ok_or_else(|| anyhow!("segment {} has no source text", id))?;
    let target_text = take_string(&mut map, &TARGET_KEYS);
    let source_lang = take_string(&mut map, &[SOURCE_LANG_KEY]).unwrap_or_default();
    let target_lang = take_string(&mut map, &[TARGET_LANG_KEY]).unwrap_or_default();

    let mut metadata = SegmentMetadata::default();
    if let Some(Value::Object(pipeline)) = map.remove(PIPELINE_KEY) {
        for (key, value) in pipeline {
            let Some(key) = PipelineKey::from_key(&key) else {
                debug!("Ignoring unknown pipeline key '{}' on segment {}", key, id);
                continue;
            };
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            metadata.pipeline.insert(key, value);
        }
    }
    metadata.attributes = map;

    Ok(Segment {
        id,
        raw_id,
        source_text,
        target_text,
        source_lang,
        target_lang,
        metadata,
    })
}

fn segment_to_value(segment: &Segment, fields: &FieldNames) -> Value {
    let mut map = Map::new();
    if let Some(raw_id) = &segment.raw_id {
        map.insert(ID_KEY.to_string(), raw_id.clone());
    }
    map.insert(fields.source.clone(), Value::String(segment.source_text.clone()));
    map.insert(
        fields.target.clone(),
        segment.target_text.clone().map(Value::String).unwrap_or(Value::Null),
    );
    if fields.segment_langs {
        map.insert(SOURCE_LANG_KEY.to_string(), Value::String(segment.source_lang.clone()));
        map.insert(TARGET_LANG_KEY.to_string(), Value::String(segment.target_lang.clone()));
    }
    for (key, value) in &segment.metadata.attributes {
        map.insert(key.clone(), value.clone());
    }
    if !segment.metadata.pipeline.is_empty() {
        let pipeline: Map<String, Value> = segment
            .metadata
            .pipeline
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), Value::String(v.clone())))
            .collect();
        map.insert(PIPELINE_KEY.to_string(), Value::Object(pipeline));
    }
    Value::Object(map)
}

/// JSON document codec with prioritized parse strategies
pub struct JsonDocumentCodec {
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl Default for JsonDocumentCodec {
    fn default() -> Self {
        Self {
            strategies: vec![
                Box::new(ObjectStrategy),
                Box::new(ArrayStrategy),
                Box::new(JsonLinesStrategy),
            ],
        }
    }
}

impl JsonDocumentCodec {
    pub fn with_strategies(strategies: Vec<Box<dyn ParseStrategy>>) -> Self {
        Self { strategies }
    }

    /// Parse document text with the first strategy that accepts it
    pub fn parse_str(&self, content: &str) -> Result<Document> {
        let mut failures = Vec::new();
        for strategy in &self.strategies {
            match strategy.parse(content) {
                Ok(document) => {
                    debug!("Parsed document as {} ({} segments)", strategy.name(), document.segments.len());
                    return Ok(document);
                }
                Err(e) => failures.push(format!("{}: {}", strategy.name(), e)),
            }
        }
        Err(anyhow!("Unrecognized document format ({})", failures.join("; ")))
    }

    /// Serialize a document in its original layout
    pub fn render(&self, document: &Document) -> Result<String> {
        let segments = document.segments.iter().map(|s| segment_to_value(s, &document.fields));
        let text = match &document.layout {
            DocumentLayout::Object { header } => {
                let mut root = header.clone();
                root.insert("segments".to_string(), Value::Array(segments.collect()));
                serde_json::to_string_pretty(&Value::Object(root))?
            }
            DocumentLayout::Array => serde_json::to_string_pretty(&Value::Array(segments.collect()))?,
            DocumentLayout::JsonLines => {
                let mut lines = segments
                    .map(|v| serde_json::to_string(&v))
                    .collect::<std::result::Result<Vec<_>, _>>()?
                    .join("\n");
                lines.push('\n');
                lines
            }
        };
        Ok(text)
    }
}

impl DocumentCodec for JsonDocumentCodec {
    fn name(&self) -> &str {
        "json"
    }

    fn parse(&self, path: &Path) -> Result<Document> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read document {}", path.display()))?;
        self.parse_str(&content)
            .with_context(|| format!("Failed to parse document {}", path.display()))
    }

    fn write(&self, document: &Document, path: &Path) -> Result<()> {
        let text = self.render(document)?;
        FileManager::atomic_write(path, text.as_bytes())
            .with_context(|| format!("Failed to write document {}", path.display()))
    }
}
