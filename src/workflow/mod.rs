/*!
 * Document-level workflow: segments, codecs, statistics and the manager that
 * drives the matcher, generator and TQE engine per segment.
 */

pub mod codec;
pub mod manager;
pub mod segment;
pub mod stats;

pub use codec::{Document, DocumentCodec, DocumentLayout, JsonDocumentCodec};
pub use manager::{
    CancellationFlag, CheckpointSink, FileCheckpoint, ProgressCallback, SegmentOutcome, WorkflowManager,
    WorkflowObserver, WorkflowSettings,
};
pub use segment::{PipelineKey, Segment, SegmentMetadata, SegmentState};
pub use stats::WorkflowStats;
