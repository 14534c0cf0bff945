//! Import progress broadcaster for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::pipeline::job::{JobProgress, JobStatus, OutcomeKind};

/// Phase of an import, per file or for the whole job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Scanning,
    Queued,
    Hashing,
    Thumbnailing,
    Classifying,
    Storing,
    Imported,
    Skipped,
    Failed,
    Finished,
}

impl std::fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportPhase::Scanning => write!(f, "Scanning"),
            ImportPhase::Queued => write!(f, "Queued"),
            ImportPhase::Hashing => write!(f, "Hashing"),
            ImportPhase::Thumbnailing => write!(f, "Generating thumbnail"),
            ImportPhase::Classifying => write!(f, "Classifying"),
            ImportPhase::Storing => write!(f, "Storing"),
            ImportPhase::Imported => write!(f, "Imported"),
            ImportPhase::Skipped => write!(f, "Skipped"),
            ImportPhase::Failed => write!(f, "Failed"),
            ImportPhase::Finished => write!(f, "Finished"),
        }
    }
}

/// Progress event for an import.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgressEvent {
    pub job_id: String,
    /// File the event is about; `None` for job-level events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub phase: ImportPhase,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Resolved category (set when a file is imported).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Job counters after this event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    /// Job status (set on job-level events).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
}

impl ImportProgressEvent {
    pub fn new(job_id: &str, path: Option<&str>, phase: ImportPhase, message: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            path: path.map(|p| p.to_string()),
            phase,
            message: message.to_string(),
            timestamp: Utc::now(),
            category: None,
            error: None,
            progress: None,
            status: None,
        }
    }

    /// Job-level event carrying the current counters and status.
    pub fn job(
        job_id: &str,
        phase: ImportPhase,
        message: &str,
        progress: JobProgress,
        status: JobStatus,
    ) -> Self {
        Self {
            progress: Some(progress),
            status: Some(status),
            ..Self::new(job_id, None, phase, message)
        }
    }

    /// Final event for one file.
    pub fn file_finished(
        job_id: &str,
        path: &str,
        outcome: &OutcomeKind,
        progress: JobProgress,
    ) -> Self {
        let (phase, message, category) = match outcome {
            OutcomeKind::Skipped => (ImportPhase::Skipped, "Already known".to_string(), None),
            OutcomeKind::Imported {
                status,
                category,
                duplicate,
                ..
            } => {
                let message = if *duplicate {
                    format!("Imported ({}), duplicate content", status)
                } else {
                    format!("Imported ({})", status)
                };
                (ImportPhase::Imported, message, category.clone())
            }
            OutcomeKind::Failed { stage, .. } => {
                (ImportPhase::Failed, format!("Failed at {}", stage), None)
            }
        };

        Self {
            category,
            error: outcome.failure_reason(),
            progress: Some(progress),
            ..Self::new(job_id, Some(path), phase, &message)
        }
    }
}

/// Broadcasts import progress events for streaming.
#[derive(Clone)]
pub struct ImportProgressBroadcaster {
    sender: Arc<broadcast::Sender<ImportProgressEvent>>,
}

impl ImportProgressBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: ImportProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ImportProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker for one file of a job.
    pub fn tracker(&self, job_id: &str, path: &str) -> FileProgressTracker {
        FileProgressTracker::new(job_id, path, Arc::clone(&self.sender))
    }

    pub fn sender(&self) -> Arc<broadcast::Sender<ImportProgressEvent>> {
        Arc::clone(&self.sender)
    }
}

impl Default for ImportProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Tracks progress for a single file.
pub struct FileProgressTracker {
    job_id: String,
    path: String,
    sender: Arc<broadcast::Sender<ImportProgressEvent>>,
}

impl FileProgressTracker {
    pub fn new(
        job_id: &str,
        path: &str,
        sender: Arc<broadcast::Sender<ImportProgressEvent>>,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            path: path.to_string(),
            sender,
        }
    }

    pub fn update_phase(&self, phase: ImportPhase, message: &str) {
        let event = ImportProgressEvent::new(&self.job_id, Some(&self.path), phase, message);
        let _ = self.sender.send(event);
    }

    pub fn finished(&self, outcome: &OutcomeKind, progress: JobProgress) {
        let event =
            ImportProgressEvent::file_finished(&self.job_id, &self.path, outcome, progress);
        let _ = self.sender.send(event);
    }
}
