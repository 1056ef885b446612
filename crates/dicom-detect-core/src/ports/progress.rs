//! Progress reporting port for observing a batch.

use crate::domain::SkipReason;

/// Events emitted while a batch is processed.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Processing started for an instance.
    Started {
        /// Index in the batch (0-based).
        index: usize,
        /// Total instances in the batch.
        total: usize,
    },
    /// An instance produced result records.
    Completed {
        /// Index in the batch.
        index: usize,
        /// `SOPInstanceUID` of the instance.
        instance_uid: String,
        /// Number of annotations (0 means a `NONE` record was emitted).
        detections: usize,
    },
    /// An instance was dropped from the results.
    Skipped {
        /// Index in the batch.
        index: usize,
        /// Reason for skipping.
        reason: SkipReason,
    },
    /// All instances have been processed.
    Finished {
        /// Instances that produced records.
        processed: usize,
        /// Instances dropped from the results.
        skipped: usize,
    },
}

/// Port for receiving progress events.
pub trait ProgressSink: Send + Sync {
    /// Called when a progress event occurs.
    fn on_event(&self, event: ProgressEvent);
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_event(&self, _event: ProgressEvent) {}
}
