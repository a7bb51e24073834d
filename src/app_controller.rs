use anyhow::{Context, Result, anyhow};
use futures::stream::{self, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::app_config::Config;
use crate::audit::{AuditConnection, AuditObserver, AuditRepository, RunRecord, RunStatus};
use crate::file_utils::FileManager;
use crate::generation::{CandidateGenerator, GenerationBackend, GeneratorSettings, PromptStore};
use crate::language_utils;
use crate::memory::TmMatcher;
use crate::providers::{OllamaBackend, OllamaClient, OllamaEmbedder};
use crate::quality::{ScoreRequest, ScoreResult, ScoringBackends, TqeEngine};
use crate::recovery::RetryPolicy;
use crate::resources::{ArtifactFetcher, HubFetcher, MemorySnapshot, ModelDescriptor, ModelRegistry, ResourceManager};
use crate::terms::{TermStore, TermValidator};
use crate::workflow::{
    CancellationFlag, Document, DocumentCodec, FileCheckpoint, JsonDocumentCodec, WorkflowManager,
    WorkflowSettings, WorkflowStats,
};

// @module: Application controller wiring the pipeline together

/// One document to translate
#[derive(Debug, Clone)]
pub struct DocumentJob {
    pub input: PathBuf,
    /// Defaults to `<stem>.<target>.<ext>` next to the input
    pub output: Option<PathBuf>,
    pub tmx: Option<PathBuf>,
    pub tbx: Option<PathBuf>,
    pub source_lang: String,
    pub target_lang: String,
}

impl DocumentJob {
    pub fn new(input: impl Into<PathBuf>, source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: None,
            tmx: None,
            tbx: None,
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
        }
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_memory(mut self, tmx: impl Into<PathBuf>) -> Self {
        self.tmx = Some(tmx.into());
        self
    }

    pub fn with_termbase(mut self, tbx: impl Into<PathBuf>) -> Self {
        self.tbx = Some(tbx.into());
        self
    }

    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| FileManager::output_path(&self.input, &self.target_lang))
    }
}

/// Components the controller runs on; `with_config` builds the production set
pub struct ControllerParts {
    pub resources: Arc<ResourceManager>,
    pub fetcher: Arc<dyn ArtifactFetcher>,
    pub generation: Arc<dyn GenerationBackend>,
    pub scoring: ScoringBackends,
    pub audit: Option<AuditRepository>,
}

/// Main application controller
pub struct Controller {
    // @field: App configuration
    config: Config,
    resources: Arc<ResourceManager>,
    registry: Arc<ModelRegistry>,
    generator: Arc<CandidateGenerator>,
    engine: Arc<TqeEngine>,
    codec: Arc<dyn DocumentCodec>,
    audit: Option<AuditRepository>,
    cancel: CancellationFlag,
    multi_progress: MultiProgress,
    show_progress: bool,
}

impl Controller {
    /// Controller over default settings with audit off and a temporary model cache
    pub fn new_for_test() -> Result<Self> {
        let mut config = Config::default();
        config.audit.enabled = false;
        config.models.cache_dir = Some(std::env::temp_dir().join("tmqe-test-models"));
        Ok(Self::with_config(config)?.with_progress(false))
    }

    // @method: Create a controller backed by Ollama and the model hub
    pub fn with_config(config: Config) -> Result<Self> {
        config.validate()?;

        let timeout = Duration::from_secs(config.generation.attempt_timeout_secs.max(1));
        let client = OllamaClient::new(&config.generation.endpoint, timeout)?;
        let generation: Arc<dyn GenerationBackend> =
            Arc::new(OllamaBackend::new(client.clone(), config.generation.model_id.clone()));

        let mut scoring = ScoringBackends::default();
        if config.quality.embeddings_enabled {
            scoring = scoring.with_embedder(Arc::new(OllamaEmbedder::new(
                client,
                config.quality.embedding_model.clone(),
            )));
        }

        let audit = if config.audit.enabled {
            let path = config.audit_database_path();
            match AuditConnection::open(&path) {
                Ok(db) => Some(AuditRepository::new(db)),
                Err(e) => {
                    warn!("Audit trail disabled: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        let parts = ControllerParts {
            resources: Arc::new(ResourceManager::from_config(&config.resources)),
            fetcher: Arc::new(HubFetcher::new(&config.models.hub_endpoint)?),
            generation,
            scoring,
            audit,
        };
        Self::from_parts(config, parts)
    }

    /// Assemble a controller from explicit components
    pub fn from_parts(config: Config, parts: ControllerParts) -> Result<Self> {
        let registry = ModelRegistry::new(
            config.models.resolved_cache_dir(),
            config.models.catalog.clone(),
            parts.fetcher,
            Duration::from_secs(config.models.download_timeout_secs),
        )?;

        let prompts = match &config.generation.prompt_file {
            Some(path) => PromptStore::from_file(path)
                .with_context(|| format!("Failed to load prompt templates from {}", path.display()))?,
            None => PromptStore::default(),
        };

        let mut settings = GeneratorSettings::from(&config.generation);
        if let Some(estimated_gb) = registry
            .catalog_entry(&config.generation.model_id)
            .and_then(|entry| entry.estimated_gb)
        {
            settings.estimated_gb = estimated_gb;
        }
        let generator = CandidateGenerator::new(parts.generation, parts.resources.clone(), prompts, settings);
        let engine = TqeEngine::from_config(&config.quality, parts.scoring);

        Ok(Self {
            config,
            resources: parts.resources,
            registry: Arc::new(registry),
            generator: Arc::new(generator),
            engine: Arc::new(engine),
            codec: Arc::new(JsonDocumentCodec::default()),
            audit: parts.audit,
            cancel: CancellationFlag::new(),
            multi_progress: MultiProgress::new(),
            show_progress: true,
        })
    }

    /// Toggle the terminal progress bars
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Flag shared by every run of this controller
    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    pub fn audit(&self) -> Option<&AuditRepository> {
        self.audit.as_ref()
    }

    /// Translate one document, writing `<stem>.<target>.<ext>` next to it
    #[allow(clippy::too_many_arguments)]
    pub async fn translate_document(
        &self,
        doc_path: &Path,
        tmx_path: Option<&Path>,
        tbx_path: Option<&Path>,
        source_lang: &str,
        target_lang: &str,
        batch_size: usize,
        save_interval: usize,
    ) -> Result<WorkflowStats> {
        let mut job = DocumentJob::new(doc_path, source_lang, target_lang);
        job.tmx = tmx_path.map(Path::to_path_buf);
        job.tbx = tbx_path.map(Path::to_path_buf);
        self.run_job(&job, batch_size, save_interval).await
    }

    /// Translate several documents, at most `max_parallel_documents` at a time.
    /// Results keep the order of `jobs`.
    pub async fn translate_documents(
        &self,
        jobs: Vec<DocumentJob>,
        batch_size: usize,
        save_interval: usize,
    ) -> Vec<Result<WorkflowStats>> {
        let parallel = self.config.workflow.max_parallel_documents.max(1);
        info!("Translating {} documents ({} at a time)", jobs.len(), parallel);

        stream::iter(jobs)
            .map(|job| async move {
                let result = self.run_job(&job, batch_size, save_interval).await;
                if let Err(e) = &result {
                    error!("Failed to translate {}: {:#}", job.input.display(), e);
                }
                result
            })
            .buffered(parallel)
            .collect()
            .await
    }

    /// Run a single job end to end
    pub async fn run_job(&self, job: &DocumentJob, batch_size: usize, save_interval: usize) -> Result<WorkflowStats> {
        let start_time = std::time::Instant::now();

        if !FileManager::file_exists(&job.input) {
            return Err(anyhow!("Input document does not exist: {}", job.input.display()));
        }
        let (source_lang, target_lang) = normalize_pair(&job.source_lang, &job.target_lang)?;

        let output_path = job.output_path();
        let checkpoint_path = FileManager::checkpoint_path(&output_path);

        let mut document = self.open_document(&job.input, &checkpoint_path)?;
        document.apply_languages(&source_lang, &target_lang);

        let mut matcher = TmMatcher::new(self.config.matcher.fuzzy_threshold, self.config.matcher.metric)
            .with_target_lang(target_lang.clone());
        if let Some(tmx) = &job.tmx {
            matcher.load(tmx);
        }

        let mut terms = TermStore::new(TermValidator::new(self.config.terms.policy, self.config.terms.soft_penalty))
            .with_metric(self.config.matcher.metric);
        if let Some(tbx) = &job.tbx {
            terms.load(tbx, &source_lang, &target_lang);
        }

        let mut run = self.start_run(job, &source_lang, &target_lang, document.segments.len()).await;
        let observer = run.as_ref().map(|r| Arc::new(AuditObserver::new(r.id.clone())));

        let progress_bar = self.progress_bar(document.segments.len() as u64, &job.input);
        let pb = progress_bar.clone();

        let mut manager = WorkflowManager::new(
            Arc::new(matcher),
            Arc::new(terms),
            self.generator.clone(),
            self.engine.clone(),
            self.resources.clone(),
            WorkflowSettings::from_config(&self.config),
        )
        .with_cancellation(self.cancel.clone())
        .with_checkpoint(Arc::new(FileCheckpoint::new(self.codec.clone(), checkpoint_path.clone())))
        .with_progress(Arc::new(move |completed, _total| {
            pb.set_position(completed as u64);
        }));
        if let Some(observer) = &observer {
            manager = manager.with_observer(observer.clone());
        }

        let stats = manager.process(&mut document, batch_size, save_interval).await;
        progress_bar.finish_and_clear();

        let written = if stats.cancelled {
            warn!(
                "Run cancelled; partial results kept in {}",
                checkpoint_path.display()
            );
            Ok(())
        } else {
            self.codec.write(&document, &output_path).map(|()| {
                if let Err(e) = FileManager::remove_path(&checkpoint_path) {
                    warn!("Failed to remove checkpoint {}: {:#}", checkpoint_path.display(), e);
                }
            })
        };

        if let (Some(run), Some(observer)) = (run.as_mut(), &observer) {
            run.apply_stats(&stats);
            if written.is_err() {
                run.status = RunStatus::Failed;
            }
            self.finish_run(run, observer).await;
        }

        written.with_context(|| format!("Failed to write {}", output_path.display()))?;
        info!(
            "{} -> {}: {} in {}",
            job.input.display(),
            output_path.display(),
            stats,
            format_duration(start_time.elapsed())
        );
        Ok(stats)
    }

    /// Parse the checkpoint when resuming, otherwise the input
    fn open_document(&self, input: &Path, checkpoint: &Path) -> Result<Document> {
        if self.config.workflow.resume && FileManager::file_exists(checkpoint) {
            match self.codec.parse(checkpoint) {
                Ok(document) => {
                    info!("Resuming from checkpoint {}", checkpoint.display());
                    return Ok(document);
                }
                Err(e) => warn!("Ignoring unreadable checkpoint {}: {:#}", checkpoint.display(), e),
            }
        }
        self.codec
            .parse(input)
            .with_context(|| format!("Failed to parse {}", input.display()))
    }

    /// Record the start of a run; audit failures never stop a translation
    async fn start_run(&self, job: &DocumentJob, source_lang: &str, target_lang: &str, total: usize) -> Option<RunRecord> {
        let audit = self.audit.as_ref()?;
        let hash = match FileManager::hash_file(&job.input) {
            Ok(hash) => hash,
            Err(e) => {
                warn!("Audit skipped: {:#}", e);
                return None;
            }
        };
        let run = RunRecord::new(
            job.input.to_string_lossy(),
            hash,
            source_lang,
            target_lang,
            total,
        );
        match audit.create_run(&run).await {
            Ok(()) => {
                debug!("Audit run {}", run.id);
                Some(run)
            }
            Err(e) => {
                warn!("Audit skipped: {:#}", e);
                None
            }
        }
    }

    async fn finish_run(&self, run: &RunRecord, observer: &AuditObserver) {
        let Some(audit) = &self.audit else {
            return;
        };
        if let Err(e) = audit.insert_outcomes(observer.drain()).await {
            warn!("Failed to record segment outcomes: {:#}", e);
        }
        if let Err(e) = audit.finish_run(run).await {
            warn!("Failed to finish audit run {}: {:#}", run.id, e);
        }
    }

    fn progress_bar(&self, len: u64, input: &Path) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let progress_bar = self.multi_progress.add(ProgressBar::new(len));
        let template_result = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} segments ({percent}%) {msg} {eta}")
            .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress_bar.set_style(template_result.progress_chars("█▓▒░"));
        progress_bar.set_message(
            input
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        );
        progress_bar
    }

    /// Score one candidate outside a document run
    pub async fn score_segment(&self, candidate: &str, source: &str, reference: Option<&str>) -> ScoreResult {
        self.engine
            .score(&ScoreRequest {
                candidate,
                source,
                reference,
                tone_exemplars: &self.config.quality.tone_exemplars,
                hallucination_check: self.config.quality.hallucination_check,
            })
            .await
    }

    pub fn get_resource_summary(&self) -> Option<MemorySnapshot> {
        self.resources.snapshot()
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    pub fn list_models(&self) -> Vec<ModelDescriptor> {
        self.registry.list()
    }

    /// Download a catalogued model, retrying transient failures
    pub async fn download_model(&self, model_id: &str) -> Result<PathBuf> {
        let policy = RetryPolicy::from_config(&self.config.generation.retry);
        let registry = &self.registry;
        let path = policy
            .run("model download", |_attempt| async move { registry.download(model_id).await })
            .await?;
        Ok(path)
    }

    /// Evict a model from memory and disk
    ///
    /// The generation model is released through its backend before the
    /// artifact goes; any other model is unregistered only once the
    /// artifact is gone.
    pub async fn delete_model(&self, model_id: &str) -> Result<bool> {
        if model_id == self.generator.model_id() && self.generator.unload().await? {
            info!("Released {} before deletion", model_id);
        }
        let deleted = self.registry.delete(model_id)?;
        if self.resources.unregister(model_id).is_some() {
            info!("Released {} after deletion", model_id);
        }
        Ok(deleted)
    }

    /// Release the generation model
    pub async fn unload_generator(&self) -> Result<bool> {
        Ok(self.generator.unload().await?)
    }
}

/// Validate both tags and reduce them to their primary subtag
fn normalize_pair(source_lang: &str, target_lang: &str) -> Result<(String, String)> {
    for code in [source_lang, target_lang] {
        language_utils::validate_language_code(code)
            .with_context(|| format!("Unsupported language: {}", code))?;
    }
    let source = language_utils::primary_subtag(source_lang);
    let target = language_utils::primary_subtag(target_lang);
    if language_utils::language_codes_match(&source, &target) {
        return Err(anyhow!("Source and target languages are both {}", source));
    }
    Ok((source, target))
}

// @returns: Human-readable duration
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    if total_secs >= 3600 {
        format!("{}h {}m {}s", total_secs / 3600, (total_secs % 3600) / 60, total_secs % 60)
    } else if total_secs >= 60 {
        format!("{}m {}s", total_secs / 60, total_secs % 60)
    } else {
        format!("{}.{:03}s", total_secs, duration.subsec_millis())
    }
}
