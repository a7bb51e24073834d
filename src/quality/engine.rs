/*!
 * Translation quality estimation engine.
 *
 * Accuracy is taken from the first tier that produces a score:
 * reference-based metric, reference-free QE metric, embedding similarity
 * (against the reference, else the source), then a neutral 50. Fluency comes
 * from perplexity and tone from similarity to exemplar texts; both default to
 * 50 without a backend. Every fallback is recorded in the provenance.
 */

use log::{debug, warn};
use std::collections::BTreeMap;

use crate::app_config::QualityConfig;
use crate::errors::ScoringError;
use crate::quality::backends::{EmbeddingCache, ScoringBackends};
use crate::quality::decision::{Decision, DecisionThresholds, ProvenanceKey, ScoreResult, ScoreWeights};
use crate::quality::hallucination::{HallucinationConfig, HallucinationDetector};

/// Neutral score used when a signal is unavailable
pub const DEFAULT_SUB_SCORE: f64 = 50.0;

/// Inputs of one scoring call
#[derive(Debug, Clone, Default)]
pub struct ScoreRequest<'a> {
    pub candidate: &'a str,
    pub source: &'a str,
    pub reference: Option<&'a str>,
    pub tone_exemplars: &'a [String],
    pub hallucination_check: bool,
}

/// Engine settings
#[derive(Debug, Clone)]
pub struct TqeSettings {
    pub weights: ScoreWeights,
    pub thresholds: DecisionThresholds,
    pub hallucination_penalty: f64,
    pub hallucination: HallucinationConfig,
}

impl Default for TqeSettings {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            thresholds: DecisionThresholds::default(),
            hallucination_penalty: 0.25,
            hallucination: HallucinationConfig::default(),
        }
    }
}

impl From<&QualityConfig> for TqeSettings {
    fn from(config: &QualityConfig) -> Self {
        Self {
            weights: config.weights,
            thresholds: config.thresholds,
            hallucination_penalty: config.hallucination_penalty,
            hallucination: config.hallucination.clone(),
        }
    }
}

/// Map a perplexity to a 0-100 fluency score
pub fn fluency_from_perplexity(perplexity: f64) -> f64 {
    if !perplexity.is_finite() {
        return 0.0;
    }
    let ln = perplexity.max(1.0).ln();
    (100.0 * (1.0 - (ln / 1.5).tanh())).clamp(0.0, 100.0)
}

/// Stateless scorer of candidate translations
pub struct TqeEngine {
    backends: ScoringBackends,
    settings: TqeSettings,
    detector: HallucinationDetector,
}

impl TqeEngine {
    pub fn new(backends: ScoringBackends, settings: TqeSettings) -> Self {
        let detector = HallucinationDetector::new(settings.hallucination.clone());
        Self {
            backends,
            settings,
            detector,
        }
    }

    pub fn from_config(config: &QualityConfig, backends: ScoringBackends) -> Self {
        Self::new(backends, TqeSettings::from(config))
    }

    pub fn settings(&self) -> &TqeSettings {
        &self.settings
    }

    /// Weighted score and decision for known sub-scores
    pub fn aggregate(&self, accuracy: f64, fluency: f64, tone: f64, hallucination: bool) -> (f64, Decision) {
        let weighted = self.settings.weights.combine(accuracy, fluency, tone);
        (weighted, self.settings.thresholds.decide(weighted, hallucination))
    }

    /// Score one candidate
    pub async fn score(&self, request: &ScoreRequest<'_>) -> ScoreResult {
        let mut provenance = BTreeMap::new();
        let mut notes: Vec<String> = Vec::new();
        let mut cache = self.backends.embedder.as_deref().map(EmbeddingCache::new);

        let (mut accuracy, accuracy_source) = self.score_accuracy(request, cache.as_mut(), &mut notes).await;

        let mut hallucination = false;
        if request.hallucination_check {
            let source_similarity = match cache.as_mut() {
                Some(cache) => match cache.similarity(request.candidate, request.source).await {
                    Ok(similarity) => Some(similarity),
                    Err(e) => {
                        notes.push(format!("hallucination similarity unavailable: {}", e));
                        None
                    }
                },
                None => None,
            };
            let report = self.detector.detect(request.candidate, request.source, source_similarity);
            if report.detected {
                hallucination = true;
                accuracy *= self.settings.hallucination_penalty;
                debug!("Hallucination detected: {}", report.reasons.join("; "));
                provenance.insert(ProvenanceKey::HallucinationReasons, report.reasons.join("; "));
            }
        }

        let (fluency, fluency_source) = self.score_fluency(request.candidate, &mut notes).await;
        let (tone, tone_source) = self
            .score_tone(request.candidate, request.tone_exemplars, cache.as_mut(), &mut notes)
            .await;

        let accuracy = accuracy.clamp(0.0, 100.0);
        let (weighted, decision) = self.aggregate(accuracy, fluency, tone, hallucination);

        provenance.insert(ProvenanceKey::AccuracySource, accuracy_source);
        provenance.insert(ProvenanceKey::FluencySource, fluency_source);
        provenance.insert(ProvenanceKey::ToneSource, tone_source);
        provenance.insert(ProvenanceKey::Weights, self.settings.weights.to_string());
        if !notes.is_empty() {
            provenance.insert(ProvenanceKey::FallbackNotes, notes.join("; "));
        }

        ScoreResult {
            accuracy,
            fluency,
            tone,
            weighted,
            decision,
            hallucination,
            provenance,
        }
    }

    async fn score_accuracy(
        &self,
        request: &ScoreRequest<'_>,
        cache: Option<&mut EmbeddingCache<'_>>,
        notes: &mut Vec<String>,
    ) -> (f64, String) {
        if let (Some(reference), Some(metric)) = (request.reference, &self.backends.reference_metric) {
            match metric.score(request.source, request.candidate, Some(reference)).await {
                Ok(score) => return (unit_to_percent(score), format!("reference:{}", metric.name())),
                Err(e) => {
                    warn!("Reference metric {} failed: {}", metric.name(), e);
                    notes.push(format!("reference metric failed: {}", e));
                }
            }
        }

        if let Some(metric) = &self.backends.qe_metric {
            match metric.score(request.source, request.candidate, None).await {
                Ok(score) => return (unit_to_percent(score), format!("qe:{}", metric.name())),
                Err(e) => {
                    warn!("QE metric {} failed: {}", metric.name(), e);
                    notes.push(format!("qe metric failed: {}", e));
                }
            }
        }

        if let Some(cache) = cache {
            let (against, label) = match request.reference {
                Some(reference) => (reference, "reference"),
                None => (request.source, "source"),
            };
            match cache.similarity(request.candidate, against).await {
                Ok(cos) => return (cos.clamp(0.0, 1.0) * 100.0, format!("embedding:{}", label)),
                Err(e) => notes.push(format!("embedding accuracy failed: {}", e)),
            }
        }

        notes.push("accuracy defaulted".to_string());
        (DEFAULT_SUB_SCORE, "default".to_string())
    }

    async fn score_fluency(&self, candidate: &str, notes: &mut Vec<String>) -> (f64, String) {
        let Some(backend) = &self.backends.perplexity else {
            return (DEFAULT_SUB_SCORE, "default".to_string());
        };
        match backend.perplexity(candidate).await {
            Ok(ppl) => (fluency_from_perplexity(ppl), format!("perplexity:{}", backend.name())),
            Err(e) => {
                notes.push(format!("fluency failed: {}", e));
                (DEFAULT_SUB_SCORE, "default".to_string())
            }
        }
    }

    async fn score_tone(
        &self,
        candidate: &str,
        exemplars: &[String],
        cache: Option<&mut EmbeddingCache<'_>>,
        notes: &mut Vec<String>,
    ) -> (f64, String) {
        let exemplars: Vec<&String> = exemplars.iter().filter(|e| !e.trim().is_empty()).collect();
        let Some(cache) = cache.filter(|_| !exemplars.is_empty()) else {
            return (DEFAULT_SUB_SCORE, "default".to_string());
        };

        match mean_similarity(cache, candidate, &exemplars).await {
            Ok(mean) => (((mean + 1.0) / 2.0 * 100.0).clamp(0.0, 100.0), "exemplars".to_string()),
            Err(e) => {
                notes.push(format!("tone failed: {}", e));
                (DEFAULT_SUB_SCORE, "default".to_string())
            }
        }
    }
}

async fn mean_similarity(
    cache: &mut EmbeddingCache<'_>,
    candidate: &str,
    exemplars: &[&String],
) -> Result<f64, ScoringError> {
    let mut total = 0.0;
    for exemplar in exemplars {
        total += cache.similarity(candidate, exemplar).await?;
    }
    Ok(total / exemplars.len() as f64)
}

fn unit_to_percent(score: f64) -> f64 {
    score.clamp(0.0, 1.0) * 100.0
}
