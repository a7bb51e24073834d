/*!
 * Audit records.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::workflow::{SegmentOutcome, WorkflowStats};

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    /// Stopped by cancellation; a checkpoint was left behind
    Cancelled,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "cancelled" => Ok(RunStatus::Cancelled),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid run status: {}", s)),
        }
    }
}

/// One document run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// UUID v4
    pub id: String,
    pub document_path: String,
    /// SHA256 of the input document
    pub document_hash: String,
    pub source_language: String,
    pub target_language: String,
    pub status: RunStatus,
    /// RFC 3339
    pub started_at: String,
    pub finished_at: Option<String>,
    pub total: i64,
    pub processed: i64,
    pub exact_matches: i64,
    pub fuzzy_repairs: i64,
    pub new_translations: i64,
    pub errors: i64,
    pub fallbacks: i64,
    pub skipped: i64,
    pub checkpoints: i64,
}

impl RunRecord {
    pub fn new(
        document_path: impl Into<String>,
        document_hash: impl Into<String>,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
        total: usize,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_path: document_path.into(),
            document_hash: document_hash.into(),
            source_language: source_language.into(),
            target_language: target_language.into(),
            status: RunStatus::Running,
            started_at: chrono::Utc::now().to_rfc3339(),
            finished_at: None,
            total: total as i64,
            processed: 0,
            exact_matches: 0,
            fuzzy_repairs: 0,
            new_translations: 0,
            errors: 0,
            fallbacks: 0,
            skipped: 0,
            checkpoints: 0,
        }
    }

    /// Copy the final counters of a run
    pub fn apply_stats(&mut self, stats: &WorkflowStats) {
        self.total = stats.total as i64;
        self.processed = stats.processed as i64;
        self.exact_matches = stats.exact_matches as i64;
        self.fuzzy_repairs = stats.fuzzy_repairs as i64;
        self.new_translations = stats.new_translations as i64;
        self.errors = stats.errors as i64;
        self.fallbacks = stats.fallbacks as i64;
        self.skipped = stats.skipped as i64;
        self.checkpoints = stats.checkpoints as i64;
        self.status = if stats.cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        self.finished_at = Some(chrono::Utc::now().to_rfc3339());
    }

    pub fn is_finished(&self) -> bool {
        self.status != RunStatus::Running
    }
}

/// One recorded segment decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub id: Option<i64>,
    pub run_id: String,
    pub segment_id: String,
    pub state: String,
    pub decision: Option<String>,
    pub weighted_score: Option<f64>,
    pub provenance: Option<String>,
    pub error: Option<String>,
    pub resumed: bool,
    pub recorded_at: String,
}

impl OutcomeRecord {
    pub fn from_outcome(run_id: &str, outcome: &SegmentOutcome) -> Self {
        Self {
            id: None,
            run_id: run_id.to_string(),
            segment_id: outcome.segment_id.clone(),
            state: outcome.state.to_string(),
            decision: outcome.decision.clone(),
            weighted_score: outcome.weighted_score,
            provenance: outcome.provenance.clone(),
            error: outcome.error.clone(),
            resumed: outcome.resumed,
            recorded_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
