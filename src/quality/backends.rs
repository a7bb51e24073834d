/*!
 * Scoring backends consumed by the TQE engine.
 *
 * Each backend is optional. The engine falls through to the next accuracy
 * tier or to a neutral default whenever a backend is missing or fails.
 */

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::ScoringError;

/// Sentence embeddings
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ScoringError>;

    /// Cosine similarity of two texts
    async fn similarity(&self, a: &str, b: &str) -> Result<f64, ScoringError> {
        let left = self.embed(a).await?;
        let right = self.embed(b).await?;
        cosine(&left, &right)
    }
}

/// Language-model perplexity of a text
#[async_trait]
pub trait PerplexityBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn perplexity(&self, text: &str) -> Result<f64, ScoringError>;
}

/// Learned translation metric returning a score in [0, 1]
#[async_trait]
pub trait NeuralMetric: Send + Sync {
    fn name(&self) -> &str;

    async fn score(&self, source: &str, hypothesis: &str, reference: Option<&str>) -> Result<f64, ScoringError>;
}

/// Cosine similarity of two vectors
pub fn cosine(a: &[f32], b: &[f32]) -> Result<f64, ScoringError> {
    if a.is_empty() || b.is_empty() {
        return Err(ScoringError::InvalidInput("empty embedding".to_string()));
    }
    if a.len() != b.len() {
        return Err(ScoringError::InvalidInput(format!(
            "embedding dimensions differ: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}

/// The backends available to one engine
#[derive(Clone, Default)]
pub struct ScoringBackends {
    /// Reference-based metric, used when a reference is present
    pub reference_metric: Option<Arc<dyn NeuralMetric>>,
    /// Reference-free quality estimation metric
    pub qe_metric: Option<Arc<dyn NeuralMetric>>,
    pub embedder: Option<Arc<dyn EmbeddingBackend>>,
    pub perplexity: Option<Arc<dyn PerplexityBackend>>,
}

impl ScoringBackends {
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingBackend>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_perplexity(mut self, backend: Arc<dyn PerplexityBackend>) -> Self {
        self.perplexity = Some(backend);
        self
    }

    pub fn with_reference_metric(mut self, metric: Arc<dyn NeuralMetric>) -> Self {
        self.reference_metric = Some(metric);
        self
    }

    pub fn with_qe_metric(mut self, metric: Arc<dyn NeuralMetric>) -> Self {
        self.qe_metric = Some(metric);
        self
    }
}

/// Per-score embedding memo so each text is embedded at most once
pub(crate) struct EmbeddingCache<'a> {
    embedder: &'a dyn EmbeddingBackend,
    vectors: HashMap<String, Vec<f32>>,
}

impl<'a> EmbeddingCache<'a> {
    pub(crate) fn new(embedder: &'a dyn EmbeddingBackend) -> Self {
        Self {
            embedder,
            vectors: HashMap::new(),
        }
    }

    pub(crate) async fn embed(&mut self, text: &str) -> Result<Vec<f32>, ScoringError> {
        if let Some(vector) = self.vectors.get(text) {
            return Ok(vector.clone());
        }
        let vector = self.embedder.embed(text).await?;
        self.vectors.insert(text.to_string(), vector.clone());
        Ok(vector)
    }

    pub(crate) async fn similarity(&mut self, a: &str, b: &str) -> Result<f64, ScoringError> {
        let left = self.embed(a).await?;
        let right = self.embed(b).await?;
        cosine(&left, &right)
    }
}
