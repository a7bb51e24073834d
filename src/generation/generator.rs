/*!
 * Candidate generation.
 *
 * The generator owns one generation model for its whole lifetime. The model is
 * loaded lazily behind the resource manager's capacity gate and registered
 * there while held. Decode calls are serialized through an async mutex, so
 * segments processed by concurrent documents never overlap on the model.
 */

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::app_config::GenerationConfig;
use crate::errors::{Classify, ErrorClass, GenerationError, ResourceError};
use crate::generation::backend::{GenerationBackend, SamplingParams};
use crate::generation::prompts::{PromptStore, PromptVars};
use crate::recovery::RetryPolicy;
use crate::resources::ResourceManager;
use crate::terms::TermEntry;

static CODE_FENCE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*\n(.*?)\n?```$").unwrap());
static LABEL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(translation|translated text|output)\s*:\s*").unwrap());

const MAX_TEMPERATURE: f32 = 2.0;

/// One generation request
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub source_text: String,
    pub source_lang: String,
    pub target_lang: String,
    /// Terms to inject into the prompt
    pub terms: Vec<TermEntry>,
    /// Fuzzy translation to repair
    pub fuzzy_seed: Option<String>,
    /// Similarity of the fuzzy seed
    pub similarity: Option<f64>,
    /// Candidates wanted
    pub n: usize,
}

/// Sampling and timing settings of a generator
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub model_id: String,
    pub estimated_gb: f64,
    pub temperature: f32,
    pub temperature_step: f32,
    pub max_tokens: u32,
    pub seed: u64,
    pub attempt_timeout: Duration,
    pub retry: RetryPolicy,
}

impl From<&GenerationConfig> for GeneratorSettings {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            model_id: config.model_id.clone(),
            estimated_gb: config.estimated_gb,
            temperature: config.temperature,
            temperature_step: config.temperature_step,
            max_tokens: config.max_tokens,
            seed: config.seed,
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs.max(1)),
            retry: RetryPolicy::from_config(&config.retry),
        }
    }
}

impl GeneratorSettings {
    /// Sampling parameters for the candidate at `index`
    pub fn sampling_for(&self, index: usize) -> SamplingParams {
        let temperature = self.temperature + self.temperature_step * index as f32;
        SamplingParams {
            temperature: temperature.clamp(0.0, MAX_TEMPERATURE),
            max_tokens: self.max_tokens,
            seed: Some(self.seed.wrapping_add(index as u64)),
        }
    }
}

/// Registry handle of the loaded generation model
#[derive(Debug)]
pub struct LoadedGenerator {
    pub backend_name: String,
    pub loaded_at: DateTime<Utc>,
}

/// Produces candidate translations through a generation backend
pub struct CandidateGenerator {
    backend: Arc<dyn GenerationBackend>,
    resources: Arc<ResourceManager>,
    prompts: PromptStore,
    settings: GeneratorSettings,
    load_lock: Mutex<()>,
    decode_lock: Mutex<()>,
}

impl CandidateGenerator {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        resources: Arc<ResourceManager>,
        prompts: PromptStore,
        settings: GeneratorSettings,
    ) -> Self {
        Self {
            backend,
            resources,
            prompts,
            settings,
            load_lock: Mutex::new(()),
            decode_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    pub fn model_id(&self) -> &str {
        &self.settings.model_id
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Whether the model is currently held
    pub fn is_loaded(&self) -> bool {
        self.resources.handle::<LoadedGenerator>(&self.settings.model_id).is_some()
    }

    /// Load the model unless it is already held
    pub async fn ensure_loaded(&self) -> Result<(), GenerationError> {
        let _guard = self.load_lock.lock().await;
        if self.is_loaded() {
            return Ok(());
        }

        let model_id = &self.settings.model_id;
        let estimated_gb = self.settings.estimated_gb;
        if !self.resources.can_load(estimated_gb) {
            return Err(ResourceError::InsufficientResource {
                model_id: model_id.clone(),
                required_gb: estimated_gb,
                available_gb: self.resources.available_gb(),
            }
            .into());
        }
        let risk = self.resources.check_oom_risk(estimated_gb);
        if !risk.safe {
            warn!(
                "Refusing to load {}: {}",
                model_id,
                risk.warning.as_deref().unwrap_or("unsafe")
            );
            return Err(ResourceError::InsufficientResource {
                model_id: model_id.clone(),
                required_gb: estimated_gb,
                available_gb: self.resources.available_gb(),
            }
            .into());
        }
        if let Some(warning) = risk.warning {
            warn!("Loading {}: {}", model_id, warning);
        }

        let backend = &self.backend;
        self.settings
            .retry
            .run("model load", |_| async move { backend.load().await })
            .await?;

        let handle = LoadedGenerator {
            backend_name: self.backend.name().to_string(),
            loaded_at: Utc::now(),
        };
        self.resources.register(model_id, Arc::new(handle), estimated_gb);
        info!("Loaded generation model {} via {}", model_id, self.backend.name());
        Ok(())
    }

    /// Release the model and drop its registry entry
    pub async fn unload(&self) -> Result<bool, GenerationError> {
        let _guard = self.load_lock.lock().await;
        if self.resources.unregister(&self.settings.model_id).is_none() {
            return Ok(false);
        }
        self.backend.release().await?;
        info!("Unloaded generation model {}", self.settings.model_id);
        Ok(true)
    }

    /// Generate up to `request.n` distinct candidates
    pub async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>, GenerationError> {
        if request.n == 0 {
            return Ok(Vec::new());
        }
        if request.source_text.trim().is_empty() {
            return Err(GenerationError::InvalidRequest("empty source text".to_string()));
        }
        if !self.backend.is_available().await {
            info!("Generation backend {} is unavailable; no candidates", self.backend.name());
            return Ok(Vec::new());
        }

        self.ensure_loaded().await?;

        let vars = PromptVars {
            source_lang: &request.source_lang,
            target_lang: &request.target_lang,
            source_text: &request.source_text,
            terms: &request.terms,
            fuzzy_translation: request.fuzzy_seed.as_deref(),
            similarity: request.similarity,
        };
        let (kind, prompt) = self.prompts.build(&vars);
        debug!("Generating {} candidates with the {} template", request.n, kind.key());

        let _decode = self.decode_lock.lock().await;
        let mut candidates: Vec<String> = Vec::with_capacity(request.n);
        let mut last_error = None;

        for index in 0..request.n {
            let params = self.settings.sampling_for(index);
            match self.decode_with_retry(&prompt, params).await {
                Ok(raw) => {
                    let cleaned = clean_output(&raw);
                    if cleaned.is_empty() {
                        debug!("Candidate {} was empty after cleaning", index);
                    } else if !candidates.contains(&cleaned) {
                        candidates.push(cleaned);
                    }
                }
                Err(e) if e.class() == ErrorClass::Permanent => return Err(e),
                Err(e) => {
                    warn!("Candidate {} failed: {}", index, e);
                    last_error = Some(e);
                    break;
                }
            }
        }

        match last_error {
            Some(e) if candidates.is_empty() => Err(e),
            _ => Ok(candidates),
        }
    }

    async fn decode_with_retry(&self, prompt: &str, params: SamplingParams) -> Result<String, GenerationError> {
        let backend = &self.backend;
        let timeout = self.settings.attempt_timeout;
        self.settings
            .retry
            .run("decode", |_| async move {
                match tokio::time::timeout(timeout, backend.decode(prompt, params)).await {
                    Ok(result) => result,
                    Err(_) => Err(GenerationError::Timeout(timeout.as_secs())),
                }
            })
            .await
    }
}

/// Strip wrappers models add around a translation
pub fn clean_output(raw: &str) -> String {
    let mut text = raw.trim().to_string();

    if let Some(caps) = CODE_FENCE_REGEX.captures(&text) {
        text = caps[1].trim().to_string();
    }
    text = LABEL_REGEX.replace(&text, "").trim().to_string();

    for (open, close) in [('"', '"'), ('“', '”'), ('«', '»'), ('\'', '\'')] {
        if text.chars().count() >= 2 && text.starts_with(open) && text.ends_with(close) {
            let inner: String = {
                let mut chars = text.chars();
                chars.next();
                chars.next_back();
                chars.collect()
            };
            if !inner.contains(close) {
                text = inner.trim().to_string();
            }
            break;
        }
    }

    text
}
