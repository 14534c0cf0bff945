//! In-process state of one bulk import.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::options::ImportOptions;
use crate::store::ClassificationStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Job counters. `errors` counts every file with a failure, including
/// files whose record was kept after a classification failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub total: usize,
    pub processed: usize,
    pub imported: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Step at which a file failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Hash,
    Read,
    Classify,
    Store,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureStage::Hash => write!(f, "hash"),
            FailureStage::Read => write!(f, "read"),
            FailureStage::Classify => write!(f, "classify"),
            FailureStage::Store => write!(f, "store"),
        }
    }
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Already known and left untouched.
    Skipped,
    /// A record was written. `failure` is set when classification (or the
    /// read feeding it) failed but the record was kept for dedup.
    Imported {
        status: ClassificationStatus,
        category: Option<String>,
        duplicate: bool,
        failure: Option<(FailureStage, String)>,
    },
    /// The file did not yield a usable record.
    Failed { stage: FailureStage, reason: String },
}

impl OutcomeKind {
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            OutcomeKind::Skipped => None,
            OutcomeKind::Imported { failure, .. } => failure
                .as_ref()
                .map(|(stage, reason)| format!("{}: {}", stage, reason)),
            OutcomeKind::Failed { stage, reason } => Some(format!("{}: {}", stage, reason)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    #[serde(flatten)]
    pub kind: OutcomeKind,
    pub finished_at: DateTime<Utc>,
}

/// What the walk tripped over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanErrorKind {
    /// A directory whose entries could not be listed.
    Directory,
    /// A single entry that could not be inspected, such as a dangling symlink.
    Entry,
    SymlinkLoop,
}

impl std::fmt::Display for ScanErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ScanErrorKind::Directory => "unreadable directory",
            ScanErrorKind::Entry => "unreadable entry",
            ScanErrorKind::SymlinkLoop => "symlink loop",
        })
    }
}

/// A path the walk could not read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanError {
    pub path: PathBuf,
    pub kind: ScanErrorKind,
    pub reason: String,
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    progress: JobProgress,
    /// One slot per discovered file, in discovery order.
    outcomes: Vec<Option<FileOutcome>>,
    scan_errors: Vec<ScanError>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

/// Cloned, consistent view of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub root: PathBuf,
    pub status: JobStatus,
    pub progress: JobProgress,
    /// Outcomes of finished files, in discovery order.
    pub outcomes: Vec<FileOutcome>,
    pub scan_errors: Vec<ScanError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl JobSnapshot {
    /// Every file that hit a failure, with its reason.
    pub fn failures(&self) -> Vec<(&Path, String)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.kind.failure_reason().map(|r| (o.path.as_path(), r)))
            .collect()
    }
}

/// A running or finished import. Shared between the coordinator, the
/// workers and any number of pollers.
#[derive(Debug)]
pub struct ImportJob {
    id: String,
    root: PathBuf,
    options: ImportOptions,
    started_at: DateTime<Utc>,
    cancel: AtomicBool,
    state: RwLock<JobState>,
}

impl ImportJob {
    pub fn new(root: PathBuf, options: ImportOptions) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            root,
            options,
            started_at: Utc::now(),
            cancel: AtomicBool::new(false),
            state: RwLock::new(JobState {
                status: JobStatus::Running,
                progress: JobProgress::default(),
                outcomes: Vec::new(),
                scan_errors: Vec::new(),
                finished_at: None,
                error: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Requests a stop. Files already being processed finish normally.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn set_discovered(&self, total: usize, scan_errors: Vec<ScanError>) {
        let mut state = self.write();
        state.progress.total = total;
        state.outcomes = vec![None; total];
        state.scan_errors = scan_errors;
    }

    /// Stores the outcome of the file at discovery position `index` and
    /// updates the counters in the same critical section.
    pub fn record(&self, index: usize, outcome: FileOutcome) -> JobProgress {
        let mut state = self.write();

        let progress = &mut state.progress;
        progress.processed += 1;
        match &outcome.kind {
            OutcomeKind::Skipped => progress.skipped += 1,
            OutcomeKind::Imported { failure, .. } => {
                progress.imported += 1;
                if failure.is_some() {
                    progress.errors += 1;
                }
            }
            OutcomeKind::Failed { .. } => progress.errors += 1,
        }

        if index >= state.outcomes.len() {
            log::warn!(
                "Outcome index {} out of range for job {} ({} slots)",
                index,
                self.id,
                state.outcomes.len()
            );
            state.outcomes.resize(index + 1, None);
        }
        state.outcomes[index] = Some(outcome);
        state.progress
    }

    /// Moves the job to a terminal status. Ignored if already terminal.
    pub fn finish(&self, status: JobStatus) {
        let mut state = self.write();
        if state.status.is_terminal() {
            return;
        }
        state.status = status;
        state.finished_at = Some(Utc::now());
    }

    /// Ends the job as failed with a job-level reason.
    pub fn fail(&self, reason: impl Into<String>) {
        let mut state = self.write();
        if state.status.is_terminal() {
            return;
        }
        state.status = JobStatus::Failed;
        state.error = Some(reason.into());
        state.finished_at = Some(Utc::now());
    }

    pub fn status(&self) -> JobStatus {
        self.read().status
    }

    pub fn progress(&self) -> JobProgress {
        self.read().progress
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.read();
        JobSnapshot {
            id: self.id.clone(),
            root: self.root.clone(),
            status: state.status,
            progress: state.progress,
            outcomes: state.outcomes.iter().flatten().cloned().collect(),
            scan_errors: state.scan_errors.clone(),
            started_at: self.started_at,
            finished_at: state.finished_at,
            error: state.error.clone(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, JobState> {
        self.state.read().unwrap_or_else(|poisoned| {
            log::warn!("Job {} state lock was poisoned, recovering", self.id);
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, JobState> {
        self.state.write().unwrap_or_else(|poisoned| {
            log::warn!("Job {} state lock was poisoned, recovering", self.id);
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn outcome(path: &str, kind: OutcomeKind) -> FileOutcome {
        FileOutcome {
            path: PathBuf::from(path),
            kind,
            finished_at: Utc::now(),
        }
    }

    fn imported() -> OutcomeKind {
        OutcomeKind::Imported {
            status: ClassificationStatus::Classified,
            category: Some("Nature".to_string()),
            duplicate: false,
            failure: None,
        }
    }

    #[test]
    fn test_new_job_is_running() {
        let job = ImportJob::new(PathBuf::from("/photos"), ImportOptions::default());
        assert_eq!(job.status(), JobStatus::Running);
        assert_eq!(job.progress(), JobProgress::default());
        assert!(!job.is_cancelled());
        assert_eq!(job.id().len(), 36);
    }

    #[test]
    fn test_outcomes_keep_discovery_order() {
        let job = ImportJob::new(PathBuf::from("/photos"), ImportOptions::default());
        job.set_discovered(3, vec![]);

        job.record(2, outcome("/photos/c.jpg", OutcomeKind::Skipped));
        job.record(0, outcome("/photos/a.jpg", imported()));
        let progress = job.record(
            1,
            outcome(
                "/photos/b.jpg",
                OutcomeKind::Failed {
                    stage: FailureStage::Hash,
                    reason: "denied".to_string(),
                },
            ),
        );

        assert_eq!(
            progress,
            JobProgress {
                total: 3,
                processed: 3,
                imported: 1,
                skipped: 1,
                errors: 1,
            }
        );

        let snapshot = job.snapshot();
        let paths: Vec<_> = snapshot.outcomes.iter().map(|o| o.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/photos/a.jpg"),
                PathBuf::from("/photos/b.jpg"),
                PathBuf::from("/photos/c.jpg"),
            ]
        );
        let failures = snapshot.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, Path::new("/photos/b.jpg"));
        assert_eq!(failures[0].1, "hash: denied");
    }

    #[test]
    fn test_kept_record_failure_counts_as_error() {
        let job = ImportJob::new(PathBuf::from("/photos"), ImportOptions::default());
        job.set_discovered(1, vec![]);
        let progress = job.record(
            0,
            outcome(
                "/photos/d.jpg",
                OutcomeKind::Imported {
                    status: ClassificationStatus::Failed,
                    category: None,
                    duplicate: false,
                    failure: Some((FailureStage::Classify, "timed out".to_string())),
                },
            ),
        );
        assert_eq!(progress.imported, 1);
        assert_eq!(progress.errors, 1);
    }

    #[test]
    fn test_finish_is_sticky() {
        let job = ImportJob::new(PathBuf::from("/photos"), ImportOptions::default());
        job.finish(JobStatus::Cancelled);
        job.finish(JobStatus::Completed);
        job.fail("late");
        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatus::Cancelled);
        assert!(snapshot.finished_at.is_some());
        assert!(snapshot.error.is_none());
    }

    #[test]
    fn test_concurrent_records_are_consistent() {
        let job = Arc::new(ImportJob::new(PathBuf::from("/p"), ImportOptions::default()));
        job.set_discovered(400, vec![]);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let job = Arc::clone(&job);
                thread::spawn(move || {
                    for i in 0..100 {
                        let index = t * 100 + i;
                        job.record(index, outcome(&format!("/p/{:04}.jpg", index), imported()));
                        let progress = job.progress();
                        assert_eq!(progress.processed, progress.imported);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = job.snapshot();
        assert_eq!(snapshot.progress.processed, 400);
        assert_eq!(snapshot.outcomes.len(), 400);
        assert!(snapshot
            .outcomes
            .windows(2)
            .all(|w| w[0].path < w[1].path));
    }
}
