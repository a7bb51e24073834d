/*!
 * Integration tests for the per-segment workflow over whole documents
 */

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;

use tmqe::errors::GenerationError;
use tmqe::quality::ScoringBackends;
use tmqe::terms::{EnforcementPolicy, TermEntry};
use tmqe::workflow::{
    CancellationFlag, CheckpointSink, Document, JsonDocumentCodec, PipelineKey, Segment, SegmentOutcome,
    SegmentState, WorkflowObserver,
};

use crate::common;
use crate::common::mock_backends::{FixedMetric, FixedPerplexity, ScriptedBackend};

/// Checkpoint sink keeping the segment states of every save
#[derive(Default)]
struct RecordingSink {
    saves: Mutex<Vec<Document>>,
}

impl RecordingSink {
    fn count(&self) -> usize {
        self.saves.lock().len()
    }

    fn last(&self) -> Option<Document> {
        self.saves.lock().last().cloned()
    }
}

impl CheckpointSink for RecordingSink {
    fn save(&self, document: &Document) -> Result<()> {
        self.saves.lock().push(document.clone());
        Ok(())
    }
}

/// Observer collecting outcomes, optionally cancelling after `cancel_after` segments
#[derive(Default)]
struct Recorder {
    outcomes: Mutex<Vec<SegmentOutcome>>,
    checkpoints: Mutex<Vec<usize>>,
    cancel: Option<(CancellationFlag, usize)>,
}

impl WorkflowObserver for Recorder {
    fn on_segment(&self, outcome: &SegmentOutcome) {
        let mut outcomes = self.outcomes.lock();
        outcomes.push(outcome.clone());
        if let Some((flag, after)) = &self.cancel {
            if outcomes.len() >= *after {
                flag.cancel();
            }
        }
    }

    fn on_checkpoint(&self, processed: usize) {
        self.checkpoints.lock().push(processed);
    }
}

fn sample_document() -> Document {
    let mut document = JsonDocumentCodec::default().parse_str(common::SAMPLE_DOCUMENT).unwrap();
    document.apply_languages("en", "fr");
    document
}

fn state_of(document: &Document, id: &str) -> Option<SegmentState> {
    document
        .segments
        .iter()
        .find(|s| s.id == id)
        .and_then(|s| s.metadata.state())
}

fn target_of<'a>(document: &'a Document, id: &str) -> Option<&'a str> {
    document
        .segments
        .iter()
        .find(|s| s.id == id)
        .and_then(|s| s.target_text.as_deref())
}

#[tokio::test]
async fn test_process_sampleDocument_shouldRouteEverySegment() {
    let backend = Arc::new(ScriptedBackend::replying("unused"));
    backend.push(Ok("Bonjour le monde encore"));
    backend.push(Ok("La facture est impayée"));
    let manager = common::build_manager(
        common::sample_matcher(0.75),
        common::empty_terms(),
        backend.clone(),
        ScoringBackends::default(),
        common::workflow_settings(1),
    );
    let mut document = sample_document();

    let stats = manager.process(&mut document, 8, 100).await;

    assert_eq!(state_of(&document, "1"), Some(SegmentState::Exact));
    assert_eq!(target_of(&document, "1"), Some("Bonjour le monde"));
    assert_eq!(state_of(&document, "2"), Some(SegmentState::Repair));
    assert_eq!(target_of(&document, "2"), Some("Bonjour le monde encore"));
    assert_eq!(state_of(&document, "3"), Some(SegmentState::Generate));
    assert_eq!(target_of(&document, "3"), Some("La facture est impayée"));
    assert_eq!(state_of(&document, "4"), Some(SegmentState::Skipped));

    assert_eq!(stats.processed, 4);
    assert_eq!(stats.exact_matches, 1);
    assert_eq!(stats.fuzzy_repairs, 1);
    assert_eq!(stats.new_translations, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.errors, 0);

    // The exact hit never reaches the model
    let prompts = backend.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("Existing translation:\nBonjour le monde"));
    assert!(!prompts[1].contains("Existing translation"));

    let repaired = &document.segments[1].metadata;
    assert_eq!(repaired.get(PipelineKey::MatchType), Some("fuzzy"));
    assert_eq!(repaired.get(PipelineKey::Candidates), Some("1"));
    assert!(repaired.get(PipelineKey::Decision).is_some());
    assert!(repaired.get(PipelineKey::Provenance).unwrap().contains("accuracy_source"));
}

#[tokio::test]
async fn test_process_unavailableBackend_shouldFallBackOrLeaveUnresolved() {
    let backend = Arc::new(ScriptedBackend::unavailable());
    let manager = common::build_manager(
        common::sample_matcher(0.75),
        common::empty_terms(),
        backend.clone(),
        ScoringBackends::default(),
        common::workflow_settings(2),
    );
    let mut document = sample_document();

    let stats = manager.process(&mut document, 8, 100).await;

    assert_eq!(state_of(&document, "2"), Some(SegmentState::Unresolved));
    assert_eq!(target_of(&document, "2"), None);
    assert_eq!(state_of(&document, "3"), Some(SegmentState::FallbackExisting));
    assert_eq!(target_of(&document, "3"), Some("La facture est en retard"));
    assert_eq!(stats.fallbacks, 1);
    assert_eq!(stats.errors, 1);
    assert_eq!(backend.decode_calls(), 0);
}

#[tokio::test]
async fn test_process_failingBackend_shouldRecordErrors() {
    let backend = Arc::new(ScriptedBackend::failing());
    let manager = common::build_manager(
        common::sample_matcher(0.75),
        common::empty_terms(),
        backend,
        ScoringBackends::default(),
        common::workflow_settings(1),
    );
    let mut document = sample_document();

    let stats = manager.process(&mut document, 8, 100).await;

    let unresolved = &document.segments[1];
    assert_eq!(unresolved.metadata.state(), Some(SegmentState::Unresolved));
    assert!(unresolved.metadata.get(PipelineKey::Error).unwrap().contains("script exhausted"));
    assert_eq!(state_of(&document, "3"), Some(SegmentState::FallbackExisting));
    assert!(document.segments[2].metadata.get(PipelineKey::Error).is_some());

    assert_eq!(stats.errors, 2);
    assert_eq!(stats.fallbacks, 1);
    assert_eq!(stats.exact_matches, 1);
}

#[tokio::test]
async fn test_process_cancelledMidway_shouldStopAndCheckpoint() {
    let backend = Arc::new(ScriptedBackend::replying("Traduction"));
    let cancel = CancellationFlag::new();
    let sink = Arc::new(RecordingSink::default());
    let recorder = Arc::new(Recorder {
        cancel: Some((cancel.clone(), 2)),
        ..Default::default()
    });
    let manager = common::build_manager(
        common::sample_matcher(0.75),
        common::empty_terms(),
        backend,
        ScoringBackends::default(),
        common::workflow_settings(1),
    )
    .with_cancellation(cancel)
    .with_checkpoint(sink.clone())
    .with_observer(recorder.clone());
    let mut document = sample_document();

    let stats = manager.process(&mut document, 8, 100).await;

    assert!(stats.cancelled);
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.checkpoints, 1);
    assert_eq!(recorder.outcomes.lock().len(), 2);

    let saved = sink.last().unwrap();
    assert_eq!(state_of(&saved, "2"), Some(SegmentState::Repair));
    assert_eq!(state_of(&saved, "3"), None);
}

#[tokio::test]
async fn test_process_saveInterval_shouldCheckpointPeriodically() {
    let backend = Arc::new(ScriptedBackend::replying("Traduction"));
    let sink = Arc::new(RecordingSink::default());
    let manager = common::build_manager(
        common::sample_matcher(0.75),
        common::empty_terms(),
        backend,
        ScoringBackends::default(),
        common::workflow_settings(1),
    )
    .with_checkpoint(sink.clone());
    let mut document = sample_document();

    let stats = manager.process(&mut document, 1, 2).await;

    assert_eq!(stats.checkpoints, 2);
    assert_eq!(sink.count(), 2);
    assert!(!stats.cancelled);
}

fn numbered_document(count: usize) -> Document {
    let segments = (1..=count)
        .map(|i| Segment::new(i.to_string(), format!("Paragraph {} of the quarterly report", i)))
        .collect();
    let mut document = Document::new(segments);
    document.apply_languages("en", "fr");
    document
}

fn resolved_count(document: &Document) -> usize {
    document
        .segments
        .iter()
        .filter(|s| s.metadata.state().is_some())
        .count()
}

#[tokio::test]
async fn test_process_hundredSegments_shouldCheckpointEveryFifty() {
    let sink = Arc::new(RecordingSink::default());
    let recorder = Arc::new(Recorder::default());
    let manager = common::build_manager(
        common::sample_matcher(0.75),
        common::empty_terms(),
        Arc::new(ScriptedBackend::replying("Paragraphe du rapport")),
        ScoringBackends::default(),
        common::workflow_settings(1),
    )
    .with_checkpoint(sink.clone())
    .with_observer(recorder.clone());
    let mut document = numbered_document(100);

    let stats = manager.process(&mut document, 8, 50).await;

    assert_eq!(stats.processed, 100);
    assert_eq!(stats.new_translations, 100);
    assert_eq!(stats.checkpoints, 2);
    assert_eq!(*recorder.checkpoints.lock(), vec![50, 100]);

    let saves = sink.saves.lock();
    assert_eq!(saves.len(), 2);
    assert_eq!(resolved_count(&saves[0]), 50);
    assert_eq!(resolved_count(&saves[1]), 100);
}

#[tokio::test]
async fn test_process_batchSize_shouldNotChangeOutcomes() {
    let run = |batch_size: usize| async move {
        let backend = Arc::new(ScriptedBackend::replying("Paragraphe du rapport"));
        let manager = common::build_manager(
            common::sample_matcher(0.75),
            common::empty_terms(),
            backend.clone(),
            ScoringBackends::default(),
            common::workflow_settings(1),
        );
        let mut document = numbered_document(12);
        let stats = manager.process(&mut document, batch_size, 100).await;
        let states: Vec<_> = document.segments.iter().map(|s| s.metadata.state()).collect();
        (stats, states, backend.prompts().len())
    };

    let (small_stats, small_states, small_calls) = run(1).await;
    let (large_stats, large_states, large_calls) = run(64).await;

    assert_eq!(small_stats, large_stats);
    assert_eq!(small_states, large_states);
    assert_eq!(small_calls, 12);
    assert_eq!(large_calls, 12);
}

#[tokio::test]
async fn test_process_resumedDocument_shouldOnlyRetryUnresolved() {
    let mut document = sample_document();
    let first = common::build_manager(
        common::sample_matcher(0.75),
        common::empty_terms(),
        Arc::new(ScriptedBackend::failing()),
        ScoringBackends::default(),
        common::workflow_settings(1),
    );
    first.process(&mut document, 8, 100).await;
    assert_eq!(state_of(&document, "2"), Some(SegmentState::Unresolved));

    let backend = Arc::new(ScriptedBackend::replying("Bonjour le monde encore"));
    let recorder = Arc::new(Recorder::default());
    let second = common::build_manager(
        common::sample_matcher(0.75),
        common::empty_terms(),
        backend.clone(),
        ScoringBackends::default(),
        common::workflow_settings(1),
    )
    .with_observer(recorder.clone());

    let stats = second.process(&mut document, 8, 100).await;

    assert_eq!(backend.decode_calls(), 1);
    assert_eq!(state_of(&document, "2"), Some(SegmentState::Repair));
    assert!(document.segments[1].metadata.get(PipelineKey::Error).is_none());
    assert_eq!(state_of(&document, "3"), Some(SegmentState::FallbackExisting));
    assert_eq!(stats.processed, 4);
    assert_eq!(stats.fuzzy_repairs, 1);
    assert_eq!(stats.fallbacks, 1);
    assert_eq!(stats.errors, 0);

    let resumed: Vec<bool> = recorder.outcomes.lock().iter().map(|o| o.resumed).collect();
    assert_eq!(resumed, vec![true, false, true, true]);
}

#[tokio::test]
async fn test_process_highErrorRate_shouldCheckpointOnce() {
    let segments = (1..=5)
        .map(|i| Segment::new(i.to_string(), format!("Sentence number {}", i)).with_langs("en", "fr"))
        .collect();
    let mut document = Document::new(segments);
    let sink = Arc::new(RecordingSink::default());
    let manager = common::build_manager(
        common::sample_matcher(0.75),
        common::empty_terms(),
        Arc::new(ScriptedBackend::failing()),
        ScoringBackends::default(),
        common::workflow_settings(1),
    )
    .with_checkpoint(sink.clone());

    let stats = manager.process(&mut document, 8, 100).await;

    assert_eq!(stats.errors, 5);
    assert_eq!(stats.checkpoints, 1);
    // Taken once the minimum sample of two segments was reached
    let saved = sink.last().unwrap();
    assert_eq!(state_of(&saved, "2"), Some(SegmentState::Unresolved));
    assert_eq!(state_of(&saved, "3"), None);
}

#[tokio::test]
async fn test_process_strictTerms_shouldPreferCompliantCandidate() {
    let scoring = ScoringBackends::default()
        .with_qe_metric(Arc::new(FixedMetric::scoring("qe", 0.95)))
        .with_perplexity(Arc::new(FixedPerplexity(1.0)));
    let terms = common::terms_with(EnforcementPolicy::Strict, vec![TermEntry::new("invoice", "facture", true)]);
    let backend = Arc::new(ScriptedBackend::replying("unused"));
    backend.push(Ok("Le bordereau est en retard"));
    backend.push(Ok("La facture est en retard"));
    let manager = common::build_manager(
        common::sample_matcher(0.75),
        terms,
        backend.clone(),
        scoring,
        common::workflow_settings(2),
    );
    let mut document = Document::new(vec![
        Segment::new("1", "The invoice is overdue").with_langs("en", "fr"),
    ]);

    manager.process(&mut document, 8, 100).await;

    let segment = &document.segments[0];
    assert_eq!(segment.target_text.as_deref(), Some("La facture est en retard"));
    assert_eq!(segment.metadata.get(PipelineKey::Decision), Some("accept_auto"));
    assert!(segment.metadata.get(PipelineKey::TermViolations).is_none());
    assert!(backend.prompts()[0].contains("Required terminology"));
}

#[tokio::test]
async fn test_process_strictViolationOnly_shouldNeedHumanRevision() {
    let scoring = ScoringBackends::default()
        .with_qe_metric(Arc::new(FixedMetric::scoring("qe", 0.95)))
        .with_perplexity(Arc::new(FixedPerplexity(1.0)));
    let terms = common::terms_with(EnforcementPolicy::Strict, vec![TermEntry::new("invoice", "facture", true)]);
    let backend = Arc::new(ScriptedBackend::replying("Le bordereau est en retard"));
    let manager = common::build_manager(
        common::sample_matcher(0.75),
        terms,
        backend,
        scoring,
        common::workflow_settings(1),
    );
    let mut document = Document::new(vec![
        Segment::new("1", "The invoice is overdue").with_langs("en", "fr"),
    ]);

    manager.process(&mut document, 8, 100).await;

    let metadata = &document.segments[0].metadata;
    assert_eq!(metadata.state(), Some(SegmentState::Generate));
    assert_eq!(metadata.get(PipelineKey::Decision), Some("needs_human_revision"));
    assert_eq!(metadata.get(PipelineKey::TermViolations), Some("invoice"));
    assert!(metadata.get(PipelineKey::Provenance).unwrap().contains("term violations"));
}

#[tokio::test]
async fn test_process_transientThenSuccess_shouldNotCountError() {
    let backend = Arc::new(ScriptedBackend::replying("Bonjour le monde encore"));
    backend.push(Err(GenerationError::Network("reset".to_string())));
    let manager = common::build_manager(
        common::sample_matcher(0.75),
        common::empty_terms(),
        backend.clone(),
        ScoringBackends::default(),
        common::workflow_settings(1),
    );
    let mut document = Document::new(vec![
        Segment::new("1", "Hello world again").with_langs("en", "fr"),
    ]);

    let stats = manager.process(&mut document, 8, 100).await;

    assert_eq!(stats.fuzzy_repairs, 1);
    assert_eq!(stats.errors, 0);
    assert_eq!(backend.decode_calls(), 2);
}
