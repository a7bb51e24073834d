/*!
 * Common test utilities for the tmqe test suite
 */

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use tmqe::generation::{CandidateGenerator, GeneratorSettings, PromptStore};
use tmqe::memory::{MemoryEntry, SimilarityMetric, TmIndex, TmMatcher};
use tmqe::quality::{ScoringBackends, TqeEngine, TqeSettings};
use tmqe::recovery::RetryPolicy;
use tmqe::resources::{ResourceManager, StaticProbe};
use tmqe::terms::{EnforcementPolicy, TermEntry, TermStore, TermValidator};
use tmqe::workflow::{WorkflowManager, WorkflowSettings};

pub mod mock_backends;

use mock_backends::ScriptedBackend;

/// Route `log` output through the test harness; set RUST_LOG to see it
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    fs::write(&file_path, content)?;
    Ok(file_path)
}

/// Four segments: one exact TM hit, one fuzzy hit, one unknown, one empty
pub const SAMPLE_DOCUMENT: &str = r#"{
  "source_lang": "en",
  "target_lang": "fr",
  "segments": [
    {"id": "1", "source": "Hello world"},
    {"id": "2", "source": "Hello world again"},
    {"id": "3", "source": "The invoice is overdue", "target": "La facture est en retard"},
    {"id": "4", "source": "   "}
  ]
}"#;

pub fn create_sample_document(dir: &Path) -> Result<PathBuf> {
    create_test_file(dir, "doc.json", SAMPLE_DOCUMENT)
}

/// JSON translation memory matching `SAMPLE_DOCUMENT`
pub const SAMPLE_MEMORY: &str = r#"{
  "Hello world": [
    {"target": "Salut le monde", "target_lang": "fr", "is_human": false},
    {"target": "Bonjour le monde", "target_lang": "fr", "is_human": true}
  ]
}"#;

pub fn memory_entry(source: &str, target: &str, is_human: bool) -> MemoryEntry {
    MemoryEntry {
        source_text: source.to_string(),
        target_text: target.to_string(),
        target_lang: "fr".to_string(),
        is_human,
        origin_tool: None,
    }
}

/// Matcher over `Hello world -> Bonjour le monde`
pub fn sample_matcher(threshold: f64) -> TmMatcher {
    let mut index = TmIndex::new();
    index.insert(memory_entry("Hello world", "Bonjour le monde", true));
    TmMatcher::new(threshold, SimilarityMetric::SequenceRatio)
        .with_target_lang("fr")
        .with_index(index)
}

pub fn empty_terms() -> TermStore {
    TermStore::new(TermValidator::new(EnforcementPolicy::Soft, 0.1))
}

pub fn terms_with(policy: EnforcementPolicy, entries: Vec<TermEntry>) -> TermStore {
    let mut store = TermStore::new(TermValidator::new(policy, 0.1));
    store.insert("en", "fr", entries);
    store
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(1), 2.0)
}

/// Resource manager over a fixed device of `total_gb`
pub fn static_resources(total_gb: f64) -> Arc<ResourceManager> {
    Arc::new(ResourceManager::new(Arc::new(StaticProbe::new(total_gb, 0.0, 0.0)), 1.0))
}

pub fn generator_settings(candidates_seed: u64) -> GeneratorSettings {
    GeneratorSettings {
        model_id: "test-model".to_string(),
        estimated_gb: 4.0,
        temperature: 0.3,
        temperature_step: 0.2,
        max_tokens: 128,
        seed: candidates_seed,
        attempt_timeout: Duration::from_secs(5),
        retry: fast_retry(),
    }
}

pub fn build_generator(backend: Arc<ScriptedBackend>, resources: Arc<ResourceManager>) -> Arc<CandidateGenerator> {
    Arc::new(CandidateGenerator::new(
        backend,
        resources,
        PromptStore::default(),
        generator_settings(7),
    ))
}

pub fn workflow_settings(candidates: usize) -> WorkflowSettings {
    WorkflowSettings {
        candidates,
        max_error_rate: 0.5,
        min_error_sample: 2,
        ..WorkflowSettings::default()
    }
}

/// Workflow manager over a scripted backend and the given scorers
pub fn build_manager(
    matcher: TmMatcher,
    terms: TermStore,
    backend: Arc<ScriptedBackend>,
    scoring: ScoringBackends,
    settings: WorkflowSettings,
) -> WorkflowManager {
    let resources = static_resources(24.0);
    let generator = build_generator(backend, resources.clone());
    let engine = Arc::new(TqeEngine::new(scoring, TqeSettings::default()));
    WorkflowManager::new(
        Arc::new(matcher),
        Arc::new(terms),
        generator,
        engine,
        resources,
        settings,
    )
}
