/*!
 * Translation quality estimation (TQE).
 *
 * - `backends`: embedding, perplexity and neural-metric traits
 * - `hallucination`: heuristic unfaithfulness checks
 * - `decision`: weights, thresholds, decisions and score results
 * - `engine`: tiered scoring and aggregation
 */

pub mod backends;
pub mod decision;
pub mod engine;
pub mod hallucination;

pub use backends::{EmbeddingBackend, NeuralMetric, PerplexityBackend, ScoringBackends, cosine};
pub use decision::{Decision, DecisionThresholds, ProvenanceKey, ScoreResult, ScoreWeights};
pub use engine::{ScoreRequest, TqeEngine, TqeSettings, fluency_from_perplexity};
pub use hallucination::{HallucinationConfig, HallucinationDetector, HallucinationReport};
