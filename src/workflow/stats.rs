use serde::{Deserialize, Serialize};
use std::fmt;

use crate::workflow::segment::SegmentState;

/// Counters of one document run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub total: usize,
    pub processed: usize,
    pub exact_matches: usize,
    pub fuzzy_repairs: usize,
    pub new_translations: usize,
    pub errors: usize,
    pub fallbacks: usize,
    pub skipped: usize,
    pub checkpoints: usize,
    pub cancelled: bool,
}

impl WorkflowStats {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Count a finished segment; `errored` marks a failure on the way there
    pub fn record(&mut self, state: SegmentState, errored: bool) {
        self.processed += 1;
        match state {
            SegmentState::Exact => self.exact_matches += 1,
            SegmentState::Repair => self.fuzzy_repairs += 1,
            SegmentState::Generate => self.new_translations += 1,
            SegmentState::FallbackExisting => self.fallbacks += 1,
            SegmentState::Skipped => self.skipped += 1,
            SegmentState::Unresolved | SegmentState::Detected => {}
        }
        if errored || state == SegmentState::Unresolved {
            self.errors += 1;
        }
    }

    /// Errors over processed segments
    pub fn error_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.errors as f64 / self.processed as f64
        }
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.processed)
    }
}

impl fmt::Display for WorkflowStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} processed: {} exact, {} repaired, {} new, {} fallback, {} skipped, {} errors",
            self.processed,
            self.total,
            self.exact_matches,
            self.fuzzy_repairs,
            self.new_translations,
            self.fallbacks,
            self.skipped,
            self.errors
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}
