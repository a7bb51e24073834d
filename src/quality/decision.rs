use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Discrete outcome of quality estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    AcceptAuto,
    AcceptWithReview,
    NeedsHumanRevision,
}

impl Decision {
    /// Higher is better; used to break ties between equal scores
    pub fn rank(&self) -> u8 {
        match self {
            Decision::AcceptAuto => 2,
            Decision::AcceptWithReview => 1,
            Decision::NeedsHumanRevision => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::AcceptAuto => "accept_auto",
            Decision::AcceptWithReview => "accept_with_review",
            Decision::NeedsHumanRevision => "needs_human_revision",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weights of the three sub-scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_accuracy_weight")]
    pub accuracy: f64,
    #[serde(default = "default_fluency_weight")]
    pub fluency: f64,
    #[serde(default = "default_tone_weight")]
    pub tone: f64,
}

fn default_accuracy_weight() -> f64 {
    0.6
}

fn default_fluency_weight() -> f64 {
    0.25
}

fn default_tone_weight() -> f64 {
    0.15
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            accuracy: default_accuracy_weight(),
            fluency: default_fluency_weight(),
            tone: default_tone_weight(),
        }
    }
}

impl ScoreWeights {
    pub fn validate(&self) -> Result<()> {
        for (name, weight) in [("accuracy", self.accuracy), ("fluency", self.fluency), ("tone", self.tone)] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(anyhow!("quality.weights.{} must be a non-negative number", name));
            }
        }
        if self.sum() <= 0.0 {
            return Err(anyhow!("quality.weights must not all be zero"));
        }
        Ok(())
    }

    pub fn sum(&self) -> f64 {
        self.accuracy + self.fluency + self.tone
    }

    /// Weighted mean of the sub-scores, normalized by the weight sum
    pub fn combine(&self, accuracy: f64, fluency: f64, tone: f64) -> f64 {
        let sum = self.sum();
        if sum <= 0.0 {
            return 0.0;
        }
        ((self.accuracy * accuracy + self.fluency * fluency + self.tone * tone) / sum).clamp(0.0, 100.0)
    }
}

impl fmt::Display for ScoreWeights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accuracy={} fluency={} tone={}",
            self.accuracy, self.fluency, self.tone
        )
    }
}

/// Score bands of the decision policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionThresholds {
    #[serde(default = "default_accept_auto")]
    pub accept_auto: f64,
    #[serde(default = "default_accept_with_review")]
    pub accept_with_review: f64,
}

fn default_accept_auto() -> f64 {
    85.0
}

fn default_accept_with_review() -> f64 {
    70.0
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            accept_auto: default_accept_auto(),
            accept_with_review: default_accept_with_review(),
        }
    }
}

impl DecisionThresholds {
    pub fn validate(&self) -> Result<()> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(self.accept_auto) || !in_range(self.accept_with_review) {
            return Err(anyhow!("quality.thresholds must be within [0, 100]"));
        }
        if self.accept_with_review > self.accept_auto {
            return Err(anyhow!(
                "quality.thresholds.accept_with_review ({}) exceeds accept_auto ({})",
                self.accept_with_review,
                self.accept_auto
            ));
        }
        Ok(())
    }

    /// Decision for a weighted score
    pub fn decide(&self, weighted: f64, hallucination: bool) -> Decision {
        if hallucination {
            Decision::NeedsHumanRevision
        } else if weighted >= self.accept_auto {
            Decision::AcceptAuto
        } else if weighted >= self.accept_with_review {
            Decision::AcceptWithReview
        } else {
            Decision::NeedsHumanRevision
        }
    }
}

/// Keys allowed in score provenance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceKey {
    AccuracySource,
    FluencySource,
    ToneSource,
    HallucinationReasons,
    Weights,
    FallbackNotes,
}

/// Quality estimate of one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub accuracy: f64,
    pub fluency: f64,
    pub tone: f64,
    pub weighted: f64,
    pub decision: Decision,
    pub hallucination: bool,
    pub provenance: BTreeMap<ProvenanceKey, String>,
}

impl ScoreResult {
    /// Whether `self` beats `other`: higher weighted, then better decision
    pub fn beats(&self, other: &ScoreResult) -> bool {
        if self.weighted != other.weighted {
            return self.weighted > other.weighted;
        }
        self.decision.rank() > other.decision.rank()
    }

    /// Force a manual review, recording why
    pub fn downgrade(&mut self, reason: &str) {
        self.decision = Decision::NeedsHumanRevision;
        let notes = self.provenance.entry(ProvenanceKey::FallbackNotes).or_default();
        if !notes.is_empty() {
            notes.push_str("; ");
        }
        notes.push_str(reason);
    }
}
