/*!
 * Document workflow.
 *
 * Drives every segment of a document through the decision tree:
 *
 * ```text
 * DETECTED -> EXACT                      TM exact hit, TQE skipped
 *          -> REPAIR                     fuzzy hit above threshold, seeded generation
 *          -> GENERATE                   no usable hit, fresh generation
 *          -> FALLBACK_EXISTING          no candidates, pre-existing target kept
 *          -> UNRESOLVED                 no candidates and nothing to keep
 *          -> SKIPPED                    empty source, or resolved by an earlier run
 * ```
 *
 * Segments run sequentially in document order. A failing segment is recorded
 * and never aborts the document.
 */

use anyhow::Result;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::app_config::Config;
use crate::generation::{CandidateGenerator, GenerationRequest};
use crate::memory::{MatchResult, MatchType, TmMatcher};
use crate::quality::{ScoreRequest, ScoreResult, TqeEngine};
use crate::resources::ResourceManager;
use crate::terms::{TermStore, TermValidation};
use crate::workflow::codec::{Document, DocumentCodec};
use crate::workflow::segment::{PipelineKey, Segment, SegmentState};
use crate::workflow::stats::WorkflowStats;

/// Cooperative cancellation shared between a run and its owner
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Destination of partial results
pub trait CheckpointSink: Send + Sync {
    fn save(&self, document: &Document) -> Result<()>;
}

/// Writes checkpoints next to the output through a codec
pub struct FileCheckpoint {
    codec: Arc<dyn DocumentCodec>,
    path: PathBuf,
}

impl FileCheckpoint {
    pub fn new(codec: Arc<dyn DocumentCodec>, path: impl Into<PathBuf>) -> Self {
        Self {
            codec,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointSink for FileCheckpoint {
    fn save(&self, document: &Document) -> Result<()> {
        self.codec.write(document, &self.path)
    }
}

/// What happened to one segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentOutcome {
    pub segment_id: String,
    pub state: SegmentState,
    pub decision: Option<String>,
    pub weighted_score: Option<f64>,
    /// Provenance as a JSON object
    pub provenance: Option<String>,
    pub error: Option<String>,
    /// Resolved by an earlier run
    pub resumed: bool,
}

impl SegmentOutcome {
    fn from_segment(segment: &Segment, state: SegmentState, resumed: bool) -> Self {
        let metadata = &segment.metadata;
        Self {
            segment_id: segment.id.clone(),
            state,
            decision: metadata.get(PipelineKey::Decision).map(str::to_string),
            weighted_score: metadata.get(PipelineKey::WeightedScore).and_then(|s| s.parse().ok()),
            provenance: metadata.get(PipelineKey::Provenance).map(str::to_string),
            error: metadata.get(PipelineKey::Error).map(str::to_string),
            resumed,
        }
    }
}

/// Receives per-segment events
pub trait WorkflowObserver: Send + Sync {
    fn on_segment(&self, _outcome: &SegmentOutcome) {}

    fn on_checkpoint(&self, _processed: usize) {}
}

/// Progress callback: (processed, total)
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Settings of a workflow run
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub max_error_rate: f64,
    pub min_error_sample: usize,
    pub per_item_mb: f64,
    pub candidates: usize,
    pub max_terms: usize,
    pub term_fuzzy_threshold: f64,
    /// Score against the pre-existing target when there is one
    pub use_reference: bool,
    pub hallucination_check: bool,
    pub tone_exemplars: Vec<String>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl WorkflowSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_error_rate: config.workflow.max_error_rate,
            min_error_sample: config.workflow.min_error_sample,
            per_item_mb: config.generation.per_item_mb,
            candidates: config.generation.candidates,
            max_terms: config.terms.max_terms,
            term_fuzzy_threshold: config.terms.fuzzy_threshold,
            use_reference: config.quality.use_reference,
            hallucination_check: config.quality.hallucination_check,
            tone_exemplars: config.quality.tone_exemplars.clone(),
        }
    }
}

/// Result of one segment before it is counted
struct SegmentRun {
    state: SegmentState,
    errored: bool,
    resumed: bool,
}

/// Best candidate with its scores
struct Selection {
    candidate: String,
    score: ScoreResult,
    validation: TermValidation,
}

/// Processes one document at a time
pub struct WorkflowManager {
    matcher: Arc<TmMatcher>,
    terms: Arc<TermStore>,
    generator: Arc<CandidateGenerator>,
    engine: Arc<TqeEngine>,
    resources: Arc<ResourceManager>,
    settings: WorkflowSettings,
    cancel: CancellationFlag,
    checkpoint: Option<Arc<dyn CheckpointSink>>,
    observers: Vec<Arc<dyn WorkflowObserver>>,
    progress: Option<ProgressCallback>,
}

impl WorkflowManager {
    pub fn new(
        matcher: Arc<TmMatcher>,
        terms: Arc<TermStore>,
        generator: Arc<CandidateGenerator>,
        engine: Arc<TqeEngine>,
        resources: Arc<ResourceManager>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            matcher,
            terms,
            generator,
            engine,
            resources,
            settings,
            cancel: CancellationFlag::new(),
            checkpoint: None,
            observers: Vec::new(),
            progress: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_checkpoint(mut self, sink: Arc<dyn CheckpointSink>) -> Self {
        self.checkpoint = Some(sink);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn WorkflowObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    /// Run every segment of `document`, writing results into it
    ///
    /// Segments are processed one at a time in document order. The batch
    /// size, widened by `optimal_batch_size` when memory allows, only groups
    /// segments for logging; it never changes what a segment resolves to.
    /// Checkpoints follow `save_interval` alone.
    pub async fn process(&self, document: &mut Document, batch_size: usize, save_interval: usize) -> WorkflowStats {
        let total = document.segments.len();
        let mut stats = WorkflowStats::new(total);
        let save_interval = save_interval.max(1);
        let batch = self.resources.optimal_batch_size(batch_size.max(1), self.settings.per_item_mb);

        info!(
            "Processing {} segments (batch {}, memory: {} entries, terms: {})",
            total,
            batch,
            self.matcher.index().entry_count(),
            self.terms.term_count()
        );

        let mut since_checkpoint = 0;
        let mut error_checkpoint_taken = false;
        let mut start = 0;

        'batches: while start < total {
            let end = (start + batch).min(total);
            debug!("Batch {}..{}", start, end);

            for index in start..end {
                if self.cancel.is_cancelled() {
                    warn!("Cancelled after {} of {} segments", stats.processed, total);
                    stats.cancelled = true;
                    break 'batches;
                }

                let segment = &mut document.segments[index];
                let run = self.process_segment(segment).await;
                stats.record(run.state, run.errored);

                let outcome = SegmentOutcome::from_segment(segment, run.state, run.resumed);
                for observer in &self.observers {
                    observer.on_segment(&outcome);
                }
                if let Some(progress) = &self.progress {
                    progress(stats.processed, total);
                }

                if run.resumed {
                    continue;
                }
                since_checkpoint += 1;
                if since_checkpoint >= save_interval {
                    self.write_checkpoint(document, &mut stats);
                    since_checkpoint = 0;
                }
                if !error_checkpoint_taken
                    && stats.processed >= self.settings.min_error_sample
                    && stats.error_rate() > self.settings.max_error_rate
                {
                    warn!(
                        "Error rate {:.1}% exceeds {:.1}%; checkpointing",
                        stats.error_rate() * 100.0,
                        self.settings.max_error_rate * 100.0
                    );
                    self.write_checkpoint(document, &mut stats);
                    error_checkpoint_taken = true;
                    since_checkpoint = 0;
                }
            }
            start = end;
        }

        if stats.cancelled {
            self.write_checkpoint(document, &mut stats);
        }

        info!("Workflow finished: {}", stats);
        stats
    }

    fn write_checkpoint(&self, document: &Document, stats: &mut WorkflowStats) {
        let Some(sink) = &self.checkpoint else {
            return;
        };
        match sink.save(document) {
            Ok(()) => {
                stats.checkpoints += 1;
                debug!("Checkpoint written at {} segments", stats.processed);
                for observer in &self.observers {
                    observer.on_checkpoint(stats.processed);
                }
            }
            Err(e) => error!("Failed to write checkpoint: {:#}", e),
        }
    }

    async fn process_segment(&self, segment: &mut Segment) -> SegmentRun {
        if let Some(previous) = segment.metadata.state() {
            if previous.is_resolved() {
                debug!("Segment {} already {}", segment.id, previous);
                return SegmentRun {
                    state: previous,
                    errored: false,
                    resumed: true,
                };
            }
        }
        segment.metadata.clear_pipeline();

        if segment.source_text.trim().is_empty() {
            return self.finish(segment, SegmentState::Skipped, false);
        }
        segment.metadata.set(PipelineKey::State, SegmentState::Detected);

        let matched = self.matcher.match_segment(&segment.source_text);
        segment.metadata.set(PipelineKey::MatchType, matched.match_type);
        segment.metadata.set(PipelineKey::Similarity, format!("{:.4}", matched.similarity));

        match matched {
            MatchResult {
                match_type: MatchType::Exact,
                translation: Some(translation),
                ..
            } => {
                segment.target_text = Some(translation);
                self.finish(segment, SegmentState::Exact, false)
            }
            MatchResult {
                match_type: MatchType::Fuzzy,
                translation: Some(translation),
                similarity,
            } if self.matcher.should_repair(similarity) => {
                self.generate(segment, Some((translation, similarity)), SegmentState::Repair)
                    .await
            }
            _ => self.generate(segment, None, SegmentState::Generate).await,
        }
    }

    async fn generate(
        &self,
        segment: &mut Segment,
        seed: Option<(String, f64)>,
        state: SegmentState,
    ) -> SegmentRun {
        let terms = self.terms.extract_for_segment(
            &segment.source_text,
            &segment.source_lang,
            &segment.target_lang,
            self.settings.max_terms,
            self.settings.term_fuzzy_threshold,
        );
        let (fuzzy_seed, similarity) = match seed {
            Some((translation, similarity)) => (Some(translation), Some(similarity)),
            None => (None, None),
        };
        let request = GenerationRequest {
            source_text: segment.source_text.clone(),
            source_lang: segment.source_lang.clone(),
            target_lang: segment.target_lang.clone(),
            terms,
            fuzzy_seed,
            similarity,
            n: self.settings.candidates,
        };

        match self.generator.generate(&request).await {
            Ok(candidates) => {
                let count = candidates.len();
                match self.select(segment, candidates).await {
                    Some(selection) => {
                        self.apply_selection(segment, selection, count);
                        self.finish(segment, state, false)
                    }
                    None => self.fall_back(segment, false),
                }
            }
            Err(e) => {
                error!("Generation failed for segment {}: {}", segment.id, e);
                segment.metadata.set(PipelineKey::Error, e);
                self.fall_back(segment, true)
            }
        }
    }

    /// Score every candidate and keep the best
    async fn select(&self, segment: &Segment, candidates: Vec<String>) -> Option<Selection> {
        let reference = if self.settings.use_reference {
            segment.existing_target()
        } else {
            None
        };

        let mut best: Option<Selection> = None;
        for candidate in candidates {
            let request = ScoreRequest {
                candidate: &candidate,
                source: &segment.source_text,
                reference,
                tone_exemplars: &self.settings.tone_exemplars,
                hallucination_check: self.settings.hallucination_check,
            };
            let mut score = self.engine.score(&request).await;
            let validation = self.terms.validate(
                &candidate,
                &segment.source_text,
                &segment.source_lang,
                &segment.target_lang,
            );
            if validation.is_blocking() {
                score.downgrade(&format!("term violations: {}", validation.violations.join(", ")));
            }

            if best.as_ref().is_none_or(|b| score.beats(&b.score)) {
                best = Some(Selection {
                    candidate,
                    score,
                    validation,
                });
            }
        }

        best
    }

    fn apply_selection(&self, segment: &mut Segment, selection: Selection, candidates: usize) {
        let Selection {
            candidate,
            score,
            validation,
        } = selection;
        let metadata = &mut segment.metadata;
        metadata.set(PipelineKey::WeightedScore, format!("{:.2}", score.weighted));
        metadata.set(PipelineKey::Accuracy, format!("{:.2}", score.accuracy));
        metadata.set(PipelineKey::Fluency, format!("{:.2}", score.fluency));
        metadata.set(PipelineKey::Tone, format!("{:.2}", score.tone));
        metadata.set(PipelineKey::Decision, score.decision);
        metadata.set(PipelineKey::Hallucination, score.hallucination);
        metadata.set(PipelineKey::Candidates, candidates);
        metadata.set(PipelineKey::TermScore, format!("{:.2}", validation.term_match_score));
        if !validation.violations.is_empty() {
            metadata.set(PipelineKey::TermViolations, validation.violations.join(", "));
        }
        if let Ok(provenance) = serde_json::to_string(&score.provenance) {
            metadata.set(PipelineKey::Provenance, provenance);
        }
        segment.target_text = Some(candidate);
    }

    fn fall_back(&self, segment: &mut Segment, errored: bool) -> SegmentRun {
        if segment.existing_target().is_some() {
            debug!("Segment {} keeps its existing target", segment.id);
            return self.finish(segment, SegmentState::FallbackExisting, errored);
        }
        if segment.metadata.get(PipelineKey::Error).is_none() {
            segment.metadata.set(PipelineKey::Error, "no candidates and no existing target");
        }
        warn!("Segment {} is unresolved", segment.id);
        self.finish(segment, SegmentState::Unresolved, errored)
    }

    fn finish(&self, segment: &mut Segment, state: SegmentState, errored: bool) -> SegmentRun {
        segment.metadata.set(PipelineKey::State, state);
        SegmentRun {
            state,
            errored,
            resumed: false,
        }
    }
}
