use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GenerationError;

/// Sampling parameters for one decode call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 512,
            seed: None,
        }
    }
}

/// A causal language model the generator can drive
///
/// Implementations must be safe to share; the generator serializes `decode`
/// calls itself.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Backend name for logs and provenance
    fn name(&self) -> &str;

    /// Whether the backend can serve requests at all
    async fn is_available(&self) -> bool;

    /// Bring the model into memory
    async fn load(&self) -> Result<(), GenerationError>;

    /// Generate a completion for `prompt`
    async fn decode(&self, prompt: &str, params: SamplingParams) -> Result<String, GenerationError>;

    /// Release the model's memory
    async fn release(&self) -> Result<(), GenerationError>;
}
