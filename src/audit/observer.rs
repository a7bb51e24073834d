use parking_lot::Mutex;

use crate::audit::models::OutcomeRecord;
use crate::workflow::{SegmentOutcome, WorkflowObserver};

/// Buffers segment outcomes of one run until the controller flushes them
pub struct AuditObserver {
    run_id: String,
    pending: Mutex<Vec<OutcomeRecord>>,
}

impl AuditObserver {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Take everything recorded so far
    pub fn drain(&self) -> Vec<OutcomeRecord> {
        std::mem::take(&mut *self.pending.lock())
    }
}

impl WorkflowObserver for AuditObserver {
    fn on_segment(&self, outcome: &SegmentOutcome) {
        self.pending.lock().push(OutcomeRecord::from_outcome(&self.run_id, outcome));
    }
}
