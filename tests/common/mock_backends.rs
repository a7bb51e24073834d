/*!
 * Mock backends for testing
 *
 * These stand in for the Ollama server and scoring models so no test makes
 * a network call. Each mock returns predetermined responses and records how
 * it was called.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tmqe::errors::{GenerationError, RegistryError, ScoringError};
use tmqe::generation::{GenerationBackend, SamplingParams};
use tmqe::quality::{EmbeddingBackend, NeuralMetric, PerplexityBackend};
use tmqe::resources::ArtifactFetcher;

/// Generation backend replaying a script of replies
pub struct ScriptedBackend {
    available: AtomicBool,
    replies: Mutex<VecDeque<Result<String, GenerationError>>>,
    /// Used once the script runs out; `None` fails permanently
    default_reply: Option<String>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
    params: Mutex<Vec<SamplingParams>>,
    loads: AtomicUsize,
    releases: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(default_reply: Option<&str>) -> Self {
        Self {
            available: AtomicBool::new(true),
            replies: Mutex::new(VecDeque::new()),
            default_reply: default_reply.map(str::to_string),
            delay: None,
            prompts: Mutex::new(Vec::new()),
            params: Mutex::new(Vec::new()),
            loads: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    /// Always answers `reply`
    pub fn replying(reply: &str) -> Self {
        Self::new(Some(reply))
    }

    /// Fails every decode with a permanent backend error
    pub fn failing() -> Self {
        Self::new(None)
    }

    pub fn unavailable() -> Self {
        let backend = Self::new(None);
        backend.available.store(false, Ordering::SeqCst);
        backend
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue replies served before the default
    pub fn push(&self, reply: Result<&str, GenerationError>) {
        self.replies.lock().push_back(reply.map(str::to_string));
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn params(&self) -> Vec<SamplingParams> {
        self.params.lock().clone()
    }

    pub fn decode_calls(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn load(&self) -> Result<(), GenerationError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn decode(&self, prompt: &str, params: SamplingParams) -> Result<String, GenerationError> {
        self.prompts.lock().push(prompt.to_string());
        self.params.lock().push(params);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reply) = self.replies.lock().pop_front() {
            return reply;
        }
        self.default_reply.clone().ok_or_else(|| GenerationError::Backend {
            status: Some(400),
            message: "script exhausted".to_string(),
        })
    }

    async fn release(&self) -> Result<(), GenerationError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Embedder with a fixed vector per text
pub struct FixedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    default: Vec<f32>,
    calls: AtomicUsize,
}

impl FixedEmbedder {
    pub fn new(default: Vec<f32>) -> Self {
        Self {
            vectors: HashMap::new(),
            default,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingBackend for FixedEmbedder {
    fn name(&self) -> &str {
        "fixed-embedder"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vectors.get(text).cloned().unwrap_or_else(|| self.default.clone()))
    }
}

/// Metric answering a fixed score, or failing
pub struct FixedMetric {
    name: String,
    value: Result<f64, ScoringError>,
}

impl FixedMetric {
    pub fn scoring(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value: Ok(value),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: Err(ScoringError::Backend("metric crashed".to_string())),
        }
    }
}

#[async_trait]
impl NeuralMetric for FixedMetric {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(&self, _source: &str, _hypothesis: &str, _reference: Option<&str>) -> Result<f64, ScoringError> {
        self.value.clone()
    }
}

/// Perplexity model answering a fixed value
pub struct FixedPerplexity(pub f64);

#[async_trait]
impl PerplexityBackend for FixedPerplexity {
    fn name(&self) -> &str {
        "fixed-perplexity"
    }

    async fn perplexity(&self, _text: &str) -> Result<f64, ScoringError> {
        Ok(self.0)
    }
}

/// What a mock fetch should do
#[derive(Debug, Clone)]
pub enum FetchBehavior {
    /// Write a file of this many bytes
    Write(usize),
    /// Create the directory but leave it empty
    Empty,
    /// Fail with a fetch error
    Fail,
    /// Sleep past any reasonable timeout
    Hang,
}

/// Artifact fetcher writing into the destination without a network
pub struct MockFetcher {
    behaviors: Mutex<VecDeque<FetchBehavior>>,
    fallback: FetchBehavior,
    calls: AtomicUsize,
}

impl MockFetcher {
    pub fn new(fallback: FetchBehavior) -> Self {
        Self {
            behaviors: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue behaviours for the next calls
    pub fn then(self, behavior: FetchBehavior) -> Self {
        self.behaviors.lock().push_back(behavior);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactFetcher for MockFetcher {
    async fn fetch(&self, repo_id: &str, dest: &Path) -> Result<PathBuf, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behaviors.lock().pop_front().unwrap_or_else(|| self.fallback.clone());
        match behavior {
            FetchBehavior::Write(bytes) => {
                std::fs::create_dir_all(dest)?;
                std::fs::write(dest.join("model.bin"), vec![0u8; bytes])?;
                Ok(dest.to_path_buf())
            }
            FetchBehavior::Empty => {
                std::fs::create_dir_all(dest)?;
                Ok(dest.to_path_buf())
            }
            FetchBehavior::Fail => Err(RegistryError::Fetch {
                model_id: repo_id.to_string(),
                reason: "connection reset".to_string(),
            }),
            FetchBehavior::Hang => {
                std::fs::create_dir_all(dest)?;
                std::fs::write(dest.join("partial.bin"), [1u8; 4])?;
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(dest.to_path_buf())
            }
        }
    }
}
