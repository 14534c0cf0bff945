use crate::broadcast::{FileProgressTracker, ImportPhase};
use crate::pipeline::job::{JobProgress, OutcomeKind};

/// Events emitted by the pipeline while it processes one file.
pub enum ProgressEvent {
    Phase {
        phase: ImportPhase,
        message: String,
    },
    Finished {
        outcome: OutcomeKind,
        progress: JobProgress,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Reporter for callers that do not stream progress.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bridges pipeline events to the broadcast channel.
pub struct BroadcastProgress {
    tracker: FileProgressTracker,
}

impl BroadcastProgress {
    pub fn new(tracker: FileProgressTracker) -> Self {
        Self { tracker }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Phase { phase, message } => {
                self.tracker.update_phase(phase, &message);
            }
            ProgressEvent::Finished { outcome, progress } => {
                self.tracker.finished(&outcome, progress);
            }
        }
    }
}
