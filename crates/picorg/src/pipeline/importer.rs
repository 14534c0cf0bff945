//! Background bulk imports with a pollable job handle.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, info, warn};

use crate::broadcast::{ImportPhase, ImportProgressBroadcaster, ImportProgressEvent};
use crate::error::ImportError;
use crate::worker::{Task, WorkerPool};

use super::job::{ImportJob, JobSnapshot, JobStatus};
use super::options::{ImportOptions, ScanRules};
use super::runner::IngestionPipeline;
use super::walker;

/// Starts imports. Each import runs on its own coordinator thread with a
/// dedicated worker pool.
#[derive(Clone)]
pub struct Importer {
    pipeline: Arc<IngestionPipeline>,
    worker_count: usize,
    broadcaster: Option<ImportProgressBroadcaster>,
}

impl Importer {
    pub fn new(pipeline: Arc<IngestionPipeline>, worker_count: usize) -> Self {
        Self {
            pipeline,
            worker_count: worker_count.max(1),
            broadcaster: None,
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: ImportProgressBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn pipeline(&self) -> &Arc<IngestionPipeline> {
        &self.pipeline
    }

    /// Validates `root` and `options`, then starts the import in the
    /// background. Nothing is read or written if validation fails.
    pub fn start(&self, root: &Path, options: ImportOptions) -> Result<ImportHandle, ImportError> {
        let rules = options.scan_rules()?;

        if !root.exists() {
            return Err(ImportError::RootNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ImportError::RootNotDirectory(root.to_path_buf()));
        }
        let root = root.canonicalize().map_err(|e| ImportError::ResolveRoot {
            path: root.to_path_buf(),
            source: e,
        })?;

        let job = Arc::new(ImportJob::new(root, options));
        info!("Starting import {} of {}", job.id(), job.root().display());

        let coordinator = Coordinator {
            job: Arc::clone(&job),
            pipeline: Arc::clone(&self.pipeline),
            worker_count: self.worker_count,
            broadcaster: self.broadcaster.clone(),
        };
        let thread = thread::Builder::new()
            .name(format!("picorg-import-{}", &job.id()[..8]))
            .spawn(move || coordinator.run(rules))
            .map_err(|e| ImportError::SpawnFailed(e.to_string()))?;

        Ok(ImportHandle {
            job,
            thread: Some(thread),
        })
    }

    /// Runs an import to completion on the calling thread's behalf.
    pub fn run(&self, root: &Path, options: ImportOptions) -> Result<JobSnapshot, ImportError> {
        Ok(self.start(root, options)?.wait())
    }
}

struct Coordinator {
    job: Arc<ImportJob>,
    pipeline: Arc<IngestionPipeline>,
    worker_count: usize,
    broadcaster: Option<ImportProgressBroadcaster>,
}

impl Coordinator {
    fn run(self, rules: ScanRules) {
        let job = &self.job;

        self.announce(ImportPhase::Scanning, format!("Scanning {}", job.root().display()));
        let walker::Discovery { files, errors } = walker::discover(job.root(), &rules);
        let total = files.len();
        job.set_discovered(total, errors);
        self.announce(ImportPhase::Queued, format!("{} file(s) to import", total));

        let pool = match WorkerPool::start(
            Arc::clone(&self.pipeline),
            Arc::clone(job),
            self.broadcaster.clone(),
            self.worker_count,
        ) {
            Ok(pool) => pool,
            Err(e) => {
                error!("Import {} could not start workers: {}", job.id(), e);
                job.fail(e.to_string());
                self.announce(ImportPhase::Finished, e.to_string());
                return;
            }
        };

        let mut submit_error = None;
        for (index, path) in files.into_iter().enumerate() {
            if job.is_cancelled() {
                info!("Import {} cancelled after dispatching {} file(s)", job.id(), index);
                break;
            }
            if let Err(e) = pool.submit(Task { index, path }) {
                submit_error = Some(e);
                break;
            }
        }

        let panicked = pool.wait();

        if panicked > 0 {
            job.fail(format!("{} import worker(s) panicked", panicked));
        } else if let Some(e) = submit_error {
            job.fail(e.to_string());
        } else if job.is_cancelled() {
            job.finish(JobStatus::Cancelled);
        } else {
            job.finish(JobStatus::Completed);
        }

        let snapshot = job.snapshot();
        let p = snapshot.progress;
        let summary = format!(
            "{}: {} processed, {} imported, {} skipped, {} error(s), {} scan error(s)",
            snapshot.status,
            p.processed,
            p.imported,
            p.skipped,
            p.errors,
            snapshot.scan_errors.len()
        );
        if snapshot.status == JobStatus::Completed {
            info!("Import {} {}", job.id(), summary);
        } else {
            warn!("Import {} {}", job.id(), summary);
        }
        self.announce(ImportPhase::Finished, summary);
    }

    fn announce(&self, phase: ImportPhase, message: String) {
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.send(ImportProgressEvent::job(
                self.job.id(),
                phase,
                &message,
                self.job.progress(),
                self.job.status(),
            ));
        }
    }
}

/// Handle to a background import.
#[derive(Debug)]
pub struct ImportHandle {
    job: Arc<ImportJob>,
    thread: Option<JoinHandle<()>>,
}

impl ImportHandle {
    pub fn job(&self) -> &Arc<ImportJob> {
        &self.job
    }

    pub fn id(&self) -> &str {
        self.job.id()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.job.snapshot()
    }

    /// Requests cooperative cancellation. Files in flight finish normally.
    pub fn cancel(&self) {
        info!("Cancellation requested for import {}", self.job.id());
        self.job.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Blocks until the import ends and returns its final state.
    pub fn wait(mut self) -> JobSnapshot {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Import coordinator {} panicked", self.job.id());
                self.job.fail("import coordinator panicked");
            }
        }
        self.job.snapshot()
    }
}
