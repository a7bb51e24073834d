use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::default::Default;
use std::path::{Path, PathBuf};

use crate::file_utils::FileManager;
use crate::memory::similarity::SimilarityMetric;
use crate::quality::decision::{DecisionThresholds, ScoreWeights};
use crate::quality::hallucination::HallucinationConfig;
use crate::recovery::RetryConfig;
use crate::resources::registry::ModelKind;
use crate::terms::validation::EnforcementPolicy;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings, and the profile store
/// that layers named profiles over a global file over built-in defaults.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Accelerator accounting
    #[serde(default)]
    pub resources: ResourceConfig,

    /// Model cache and catalogue
    #[serde(default)]
    pub models: ModelsConfig,

    /// Translation-memory matching
    #[serde(default)]
    pub matcher: MatcherConfig,

    /// Terminology extraction and enforcement
    #[serde(default)]
    pub terms: TermsConfig,

    /// Candidate generation
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Quality estimation
    #[serde(default)]
    pub quality: QualityConfig,

    /// Document workflow
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Audit trail
    #[serde(default)]
    pub audit: AuditConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Which accelerator probe to use
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    // @device: nvidia-smi
    #[default]
    Nvidia,
    // @device: Fixed figures from config
    Static,
}

/// Accelerator memory accounting
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResourceConfig {
    // @field: Probe used to read device memory
    #[serde(default)]
    pub device: DeviceKind,

    // @field: Memory kept free on top of every load, in GB
    #[serde(default = "default_safety_margin_gb")]
    pub safety_margin_gb: f64,

    // @field: Projected utilization that triggers an OOM warning, in percent
    #[serde(default = "default_warn_utilization_pct")]
    pub warn_utilization_pct: f64,

    // @field: Total memory reported by the static probe
    #[serde(default)]
    pub static_total_gb: f64,

    // @field: Accelerator index queried by nvidia-smi
    #[serde(default)]
    pub device_index: u32,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            device: DeviceKind::default(),
            safety_margin_gb: default_safety_margin_gb(),
            warn_utilization_pct: default_warn_utilization_pct(),
            static_total_gb: 0.0,
            device_index: 0,
        }
    }
}

/// A model the registry knows how to fetch
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Identifier used throughout the pipeline
    pub model_id: String,

    /// Role of the model
    pub kind: ModelKind,

    /// Repository on the hub
    pub repo_id: String,

    /// Expected accelerator footprint; overrides `generation.estimated_gb`
    /// when this entry is the generation model
    #[serde(default)]
    pub estimated_gb: Option<f64>,
}

/// Model cache configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelsConfig {
    /// Cache directory, defaults to the platform cache dir
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Hub base URL
    #[serde(default = "default_hub_endpoint")]
    pub hub_endpoint: String,

    /// Download timeout in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Known models
    #[serde(default = "default_catalog")]
    pub catalog: Vec<CatalogEntry>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            hub_endpoint: default_hub_endpoint(),
            download_timeout_secs: default_download_timeout_secs(),
            catalog: default_catalog(),
        }
    }
}

impl ModelsConfig {
    /// Resolved cache directory
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tmqe")
                .join("models")
        })
    }
}

/// Translation-memory matching
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MatcherConfig {
    // @field: Lowest similarity treated as a fuzzy match
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,

    // @field: String-similarity ratio used for fuzzy lookup
    #[serde(default)]
    pub metric: SimilarityMetric,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: default_fuzzy_threshold(),
            metric: SimilarityMetric::default(),
        }
    }
}

/// Terminology handling
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TermsConfig {
    /// Maximum number of terms injected into a prompt
    #[serde(default = "default_max_terms")]
    pub max_terms: usize,

    /// Lowest similarity for a fuzzy term hit
    #[serde(default = "default_term_fuzzy_threshold")]
    pub fuzzy_threshold: f64,

    /// Enforcement policy for validation
    #[serde(default)]
    pub policy: EnforcementPolicy,

    /// Points subtracted per missing term under the soft policy
    #[serde(default = "default_soft_penalty")]
    pub soft_penalty: f64,
}

impl Default for TermsConfig {
    fn default() -> Self {
        Self {
            max_terms: default_max_terms(),
            fuzzy_threshold: default_term_fuzzy_threshold(),
            policy: EnforcementPolicy::default(),
            soft_penalty: default_soft_penalty(),
        }
    }
}

/// Candidate generation
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Ollama service endpoint URL
    #[serde(default = "default_ollama_endpoint")]
    pub endpoint: String,

    /// Generation model name
    #[serde(default = "default_generation_model")]
    pub model_id: String,

    /// Expected accelerator footprint of the generation model
    #[serde(default = "default_generation_estimated_gb")]
    pub estimated_gb: f64,

    /// Temperature of the first candidate
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Temperature increase per additional candidate
    #[serde(default = "default_temperature_step")]
    pub temperature_step: f32,

    /// Token budget per candidate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Candidates requested per segment
    #[serde(default = "default_candidates")]
    pub candidates: usize,

    /// Base sampling seed, offset per candidate
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Time budget for a single decode attempt
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Estimated memory per batch item, used to size batches
    #[serde(default = "default_per_item_mb")]
    pub per_item_mb: f64,

    /// Retry policy around each decode
    #[serde(default)]
    pub retry: RetryConfig,

    /// JSON file overriding the prompt templates
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_ollama_endpoint(),
            model_id: default_generation_model(),
            estimated_gb: default_generation_estimated_gb(),
            temperature: default_temperature(),
            temperature_step: default_temperature_step(),
            max_tokens: default_max_tokens(),
            candidates: default_candidates(),
            seed: default_seed(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            per_item_mb: default_per_item_mb(),
            retry: RetryConfig::default(),
            prompt_file: None,
        }
    }
}

/// Quality estimation
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QualityConfig {
    /// Sub-score weights
    #[serde(default)]
    pub weights: ScoreWeights,

    /// Decision bands
    #[serde(default)]
    pub thresholds: DecisionThresholds,

    /// Multiplier applied to accuracy when a hallucination is detected
    #[serde(default = "default_hallucination_penalty")]
    pub hallucination_penalty: f64,

    /// Run hallucination checks on generated candidates
    #[serde(default = "default_true")]
    pub hallucination_check: bool,

    /// Hallucination heuristics
    #[serde(default)]
    pub hallucination: HallucinationConfig,

    /// Embedding model used for similarity and tone
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Whether the embedding backend is enabled
    #[serde(default = "default_true")]
    pub embeddings_enabled: bool,

    /// Use an existing target as reference when scoring
    #[serde(default)]
    pub use_reference: bool,

    /// Texts defining the desired register
    #[serde(default)]
    pub tone_exemplars: Vec<String>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            thresholds: DecisionThresholds::default(),
            hallucination_penalty: default_hallucination_penalty(),
            hallucination_check: true,
            hallucination: HallucinationConfig::default(),
            embedding_model: default_embedding_model(),
            embeddings_enabled: true,
            use_reference: false,
            tone_exemplars: Vec::new(),
        }
    }
}

/// Document workflow
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkflowConfig {
    // @field: Base batch size before memory-based scaling
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    // @field: Processed segments between checkpoints
    #[serde(default = "default_save_interval")]
    pub save_interval: usize,

    // @field: Error rate that triggers a preemptive checkpoint
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,

    // @field: Segments processed before the error rate is trusted
    #[serde(default = "default_min_error_sample")]
    pub min_error_sample: usize,

    // @field: Resume from an existing checkpoint
    #[serde(default = "default_true")]
    pub resume: bool,

    // @field: Documents processed concurrently
    #[serde(default = "default_max_parallel_documents")]
    pub max_parallel_documents: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            save_interval: default_save_interval(),
            max_error_rate: default_max_error_rate(),
            min_error_sample: default_min_error_sample(),
            resume: true,
            max_parallel_documents: default_max_parallel_documents(),
        }
    }
}

/// Audit trail
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditConfig {
    /// Record runs and segment outcomes
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Database path, defaults to the platform data dir
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database_path: None,
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    // @returns: Matching log crate filter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(anyhow!("Invalid log level: {}", s)),
        }
    }
}

fn default_safety_margin_gb() -> f64 {
    1.0
}

fn default_warn_utilization_pct() -> f64 {
    90.0
}

fn default_hub_endpoint() -> String {
    "https://huggingface.co".to_string()
}

fn default_download_timeout_secs() -> u64 {
    1800
}

fn default_catalog() -> Vec<CatalogEntry> {
    vec![
        CatalogEntry {
            model_id: "comet-da".to_string(),
            kind: ModelKind::Quality,
            repo_id: "Unbabel/wmt22-comet-da".to_string(),
            estimated_gb: Some(2.3),
        },
        CatalogEntry {
            model_id: "cometkiwi-da".to_string(),
            kind: ModelKind::Quality,
            repo_id: "Unbabel/wmt22-cometkiwi-da".to_string(),
            estimated_gb: Some(2.3),
        },
        CatalogEntry {
            model_id: "labse".to_string(),
            kind: ModelKind::Embedding,
            repo_id: "sentence-transformers/LaBSE".to_string(),
            estimated_gb: Some(1.9),
        },
    ]
}

fn default_fuzzy_threshold() -> f64 {
    0.75
}

fn default_max_terms() -> usize {
    10
}

fn default_term_fuzzy_threshold() -> f64 {
    0.85
}

fn default_soft_penalty() -> f64 {
    10.0
}

fn default_ollama_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_generation_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_generation_estimated_gb() -> f64 {
    6.0
}

fn default_temperature() -> f32 {
    0.3
}

fn default_temperature_step() -> f32 {
    0.15
}

fn default_max_tokens() -> u32 {
    512
}

fn default_candidates() -> usize {
    3
}

fn default_seed() -> u64 {
    42
}

fn default_attempt_timeout_secs() -> u64 {
    120
}

fn default_per_item_mb() -> f64 {
    256.0
}

fn default_hallucination_penalty() -> f64 {
    0.25
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_batch_size() -> usize {
    8
}

fn default_save_interval() -> usize {
    50
}

fn default_max_error_rate() -> f64 {
    0.2
}

fn default_min_error_sample() -> usize {
    10
}

fn default_max_parallel_documents() -> usize {
    2
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        let threshold = self.matcher.fuzzy_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(anyhow!("matcher.fuzzy_threshold must be in (0, 1], got {}", threshold));
        }
        if !(0.0..=1.0).contains(&self.terms.fuzzy_threshold) {
            return Err(anyhow!("terms.fuzzy_threshold must be in [0, 1]"));
        }
        if self.resources.safety_margin_gb < 0.0 {
            return Err(anyhow!("resources.safety_margin_gb must not be negative"));
        }
        if self.resources.device == DeviceKind::Static && self.resources.static_total_gb < 0.0 {
            return Err(anyhow!("resources.static_total_gb must not be negative"));
        }

        self.quality.weights.validate()?;
        self.quality.thresholds.validate()?;
        if !(0.0..=1.0).contains(&self.quality.hallucination_penalty) {
            return Err(anyhow!("quality.hallucination_penalty must be in [0, 1]"));
        }

        if self.generation.retry.max_attempts == 0 {
            return Err(anyhow!("generation.retry.max_attempts must be at least 1"));
        }
        if self.generation.model_id.trim().is_empty() {
            return Err(anyhow!("generation.model_id is required"));
        }
        url::Url::parse(&self.generation.endpoint)
            .with_context(|| format!("Invalid generation endpoint: {}", self.generation.endpoint))?;

        if self.workflow.save_interval == 0 {
            return Err(anyhow!("workflow.save_interval must be at least 1"));
        }
        if self.workflow.batch_size == 0 {
            return Err(anyhow!("workflow.batch_size must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.workflow.max_error_rate) {
            return Err(anyhow!("workflow.max_error_rate must be in [0, 1]"));
        }

        let mut seen = std::collections::HashSet::new();
        for entry in &self.models.catalog {
            if !seen.insert(entry.model_id.as_str()) {
                return Err(anyhow!("Duplicate catalogue entry: {}", entry.model_id));
            }
        }

        Ok(())
    }

    /// Load a single config file layered over the defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let layer: Value = FileManager::read_json_optional(path)?
            .ok_or_else(|| anyhow!("Config file not found: {}", path.display()))?;
        let mut base = serde_json::to_value(Config::default())?;
        deep_merge(&mut base, layer);
        let config: Config = serde_json::from_value(base)
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Audit database path
    pub fn audit_database_path(&self) -> PathBuf {
        self.audit.database_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tmqe")
                .join("audit.db")
        })
    }
}

/// Merge `overlay` into `base`; objects merge key by key, everything else replaces
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Profile store: `profiles/<name>.json` over `global.json` over defaults
pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    /// Store rooted at an explicit directory
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Store under the platform config directory
    pub fn default_location() -> Result<Self> {
        let dir = dirs::config_dir().ok_or_else(|| anyhow!("No configuration directory on this platform"))?;
        Ok(Self::new(dir.join("tmqe")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn global_path(&self) -> PathBuf {
        self.root.join("global.json")
    }

    fn profile_path(&self, name: &str) -> PathBuf {
        self.root.join("profiles").join(format!("{}.json", name))
    }

    /// Resolve a profile; a missing profile file is an error, a missing global file is not
    pub fn load(&self, profile: Option<&str>) -> Result<Config> {
        let mut merged = serde_json::to_value(Config::default())?;

        if let Some(global) = FileManager::read_json_optional::<_, Value>(self.global_path())? {
            deep_merge(&mut merged, global);
        }

        if let Some(name) = profile {
            validate_profile_name(name)?;
            let path = self.profile_path(name);
            let layer: Value = FileManager::read_json_optional(&path)?
                .ok_or_else(|| anyhow!("Profile '{}' not found at {}", name, path.display()))?;
            deep_merge(&mut merged, layer);
        }

        let config: Config = serde_json::from_value(merged).context("Invalid merged configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Persist a named profile
    pub fn save_profile(&self, name: &str, config: &Config) -> Result<PathBuf> {
        validate_profile_name(name)?;
        config.validate()?;
        let path = self.profile_path(name);
        FileManager::atomic_write_json(&path, config)?;
        Ok(path)
    }

    /// Persist the global tier
    pub fn save_global(&self, config: &Config) -> Result<PathBuf> {
        config.validate()?;
        let path = self.global_path();
        FileManager::atomic_write_json(&path, config)?;
        Ok(path)
    }

    /// Names of stored profiles, sorted
    pub fn list_profiles(&self) -> Result<Vec<String>> {
        let dir = self.root.join("profiles");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect();
        names.sort();
        Ok(names)
    }
}

fn validate_profile_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(anyhow!("Invalid profile name: {}", name))
    }
}
