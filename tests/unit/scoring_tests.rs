/*!
 * Tests for the quality estimation engine with mock scorers
 */

use std::sync::Arc;

use tmqe::quality::{Decision, ProvenanceKey, ScoreRequest, ScoringBackends, TqeEngine, TqeSettings};

use crate::common::mock_backends::{FixedEmbedder, FixedMetric, FixedPerplexity};

fn engine(backends: ScoringBackends) -> TqeEngine {
    TqeEngine::new(backends, TqeSettings::default())
}

fn approx(left: f64, right: f64) -> bool {
    (left - right).abs() < 1e-3
}

#[test]
fn test_aggregate_documentedScenario_shouldAcceptAutomatically() {
    let engine = engine(ScoringBackends::default());

    let (weighted, decision) = engine.aggregate(90.0, 85.0, 80.0, false);

    assert!(approx(weighted, 87.25));
    assert_eq!(decision, Decision::AcceptAuto);

    let (_, flagged) = engine.aggregate(90.0, 85.0, 80.0, true);
    assert_eq!(flagged, Decision::NeedsHumanRevision);
}

#[tokio::test]
async fn test_score_withReference_shouldUseReferenceMetricAndExemplarTone() {
    let embedder = FixedEmbedder::new(vec![1.0, 0.0]).with("Merci pour votre patience.", vec![0.6, 0.8]);
    let backends = ScoringBackends::default()
        .with_reference_metric(Arc::new(FixedMetric::scoring("ref", 0.9)))
        .with_qe_metric(Arc::new(FixedMetric::scoring("qe", 0.4)))
        .with_embedder(Arc::new(embedder));
    let exemplars = vec!["Merci pour votre patience.".to_string()];

    let result = engine(backends)
        .score(&ScoreRequest {
            candidate: "La facture est en retard",
            source: "The invoice is overdue",
            reference: Some("La facture est en retard"),
            tone_exemplars: &exemplars,
            hallucination_check: false,
        })
        .await;

    assert!(approx(result.accuracy, 90.0));
    assert!(approx(result.fluency, 50.0));
    assert!(approx(result.tone, 80.0));
    assert!(approx(result.weighted, 78.5));
    assert_eq!(result.decision, Decision::AcceptWithReview);
    assert_eq!(result.provenance[&ProvenanceKey::AccuracySource], "reference:ref");
    assert_eq!(result.provenance[&ProvenanceKey::ToneSource], "exemplars");
    assert_eq!(result.provenance[&ProvenanceKey::FluencySource], "default");
}

#[tokio::test]
async fn test_score_withoutReference_shouldUseQeMetric() {
    let backends = ScoringBackends::default()
        .with_reference_metric(Arc::new(FixedMetric::scoring("ref", 0.9)))
        .with_qe_metric(Arc::new(FixedMetric::scoring("qe", 0.4)));

    let result = engine(backends)
        .score(&ScoreRequest {
            candidate: "Bonjour",
            source: "Hello",
            ..Default::default()
        })
        .await;

    assert!(approx(result.accuracy, 40.0));
    assert_eq!(result.provenance[&ProvenanceKey::AccuracySource], "qe:qe");
    assert!(!result.provenance.contains_key(&ProvenanceKey::FallbackNotes));
}

#[tokio::test]
async fn test_score_failingMetrics_shouldFallThroughToEmbeddings() {
    let embedder = FixedEmbedder::new(vec![1.0, 0.0]).with("Bonjour tout le monde", vec![0.8, 0.6]);
    let backends = ScoringBackends::default()
        .with_reference_metric(Arc::new(FixedMetric::failing("ref")))
        .with_qe_metric(Arc::new(FixedMetric::failing("qe")))
        .with_embedder(Arc::new(embedder));

    let result = engine(backends)
        .score(&ScoreRequest {
            candidate: "Bonjour le monde",
            source: "Hello world",
            reference: Some("Bonjour tout le monde"),
            ..Default::default()
        })
        .await;

    assert!(approx(result.accuracy, 80.0));
    assert_eq!(result.provenance[&ProvenanceKey::AccuracySource], "embedding:reference");
    let notes = &result.provenance[&ProvenanceKey::FallbackNotes];
    assert!(notes.contains("reference metric failed"));
    assert!(notes.contains("qe metric failed"));
}

#[tokio::test]
async fn test_score_sharedTexts_shouldEmbedEachTextOnce() {
    let embedder = Arc::new(FixedEmbedder::new(vec![1.0, 0.0]));
    let backends = ScoringBackends::default().with_embedder(embedder.clone());
    let exemplars = vec!["Cordialement".to_string(), "Bien à vous".to_string(), "  ".to_string()];

    let result = engine(backends)
        .score(&ScoreRequest {
            candidate: "Merci",
            source: "Thanks",
            tone_exemplars: &exemplars,
            hallucination_check: true,
            ..Default::default()
        })
        .await;

    // candidate, source and the two non-blank exemplars
    assert_eq!(embedder.calls(), 4);
    assert!(approx(result.tone, 100.0));
    assert_eq!(result.provenance[&ProvenanceKey::AccuracySource], "embedding:source");
}

#[tokio::test]
async fn test_score_perplexityBackend_shouldDriveFluency() {
    let fluent = engine(ScoringBackends::default().with_perplexity(Arc::new(FixedPerplexity(1.0))))
        .score(&ScoreRequest {
            candidate: "Bonjour",
            source: "Hello",
            ..Default::default()
        })
        .await;
    let garbled = engine(ScoringBackends::default().with_perplexity(Arc::new(FixedPerplexity(900.0))))
        .score(&ScoreRequest {
            candidate: "Bonjour",
            source: "Hello",
            ..Default::default()
        })
        .await;

    assert!(approx(fluent.fluency, 100.0));
    assert!(garbled.fluency < 10.0);
    assert_eq!(fluent.provenance[&ProvenanceKey::FluencySource], "perplexity:fixed-perplexity");
    assert!(fluent.weighted > garbled.weighted);
}
