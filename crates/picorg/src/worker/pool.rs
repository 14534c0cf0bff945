use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};

use crate::broadcast::{ImportPhase, ImportProgressBroadcaster};
use crate::error::ImportError;
use crate::pipeline::job::{FileOutcome, ImportJob};
use crate::pipeline::progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
use crate::pipeline::IngestionPipeline;

/// One discovered file and its position in discovery order.
#[derive(Debug, Clone)]
pub struct Task {
    pub index: usize,
    pub path: PathBuf,
}

/// Fixed set of threads draining a bounded task queue for one job.
pub struct WorkerPool {
    task_sender: Sender<Task>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `worker_count` workers (at least one) for `job`.
    pub fn start(
        pipeline: Arc<IngestionPipeline>,
        job: Arc<ImportJob>,
        broadcaster: Option<ImportProgressBroadcaster>,
        worker_count: usize,
    ) -> Result<Self, ImportError> {
        let worker_count = worker_count.max(1);
        let (task_sender, task_receiver) = bounded::<Task>(worker_count * 2);

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let task_rx = task_receiver.clone();
            let worker_pipeline = Arc::clone(&pipeline);
            let worker_job = Arc::clone(&job);
            let worker_broadcaster = broadcaster.clone();

            let handle = thread::Builder::new()
                .name(format!("picorg-import-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        task_rx,
                        worker_pipeline,
                        worker_job,
                        worker_broadcaster,
                    );
                })
                .map_err(|e| ImportError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} import workers for job {}", worker_count, job.id());

        Ok(Self {
            task_sender,
            workers,
        })
    }

    /// Queues a task, blocking while the queue is full.
    pub fn submit(&self, task: Task) -> Result<(), ImportError> {
        self.task_sender
            .send(task)
            .map_err(|_| ImportError::WorkersStopped)
    }

    /// Closes the queue and joins every worker. Returns the number of
    /// workers that panicked.
    pub fn wait(self) -> usize {
        // Drop sender to signal workers to exit
        drop(self.task_sender);

        let mut panicked = 0;
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
                panicked += 1;
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All import workers have stopped");
        panicked
    }
}

fn run_worker(
    worker_id: usize,
    task_receiver: Receiver<Task>,
    pipeline: Arc<IngestionPipeline>,
    job: Arc<ImportJob>,
    broadcaster: Option<ImportProgressBroadcaster>,
) {
    debug!("Worker {} started", worker_id);

    for task in task_receiver.iter() {
        // Drain queued tasks without touching them once cancelled.
        if job.is_cancelled() {
            debug!("Worker {} dropping {:?} (cancelled)", worker_id, task.path);
            continue;
        }

        debug!("Worker {} processing {:?}", worker_id, task.path);

        let progress: Box<dyn ProgressReporter> = match &broadcaster {
            Some(broadcaster) => {
                let tracker = broadcaster.tracker(job.id(), &task.path.to_string_lossy());
                Box::new(BroadcastProgress::new(tracker))
            }
            None => Box::new(NoopProgress),
        };
        progress.report(ProgressEvent::Phase {
            phase: ImportPhase::Queued,
            message: "Picked up by worker".to_string(),
        });

        let outcome = pipeline.process_file(&task.path, job.options(), progress.as_ref());
        let counters = job.record(
            task.index,
            FileOutcome {
                path: task.path,
                kind: outcome.clone(),
                finished_at: Utc::now(),
            },
        );

        progress.report(ProgressEvent::Finished {
            outcome,
            progress: counters,
        });
    }

    debug!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::dedup::DuplicateIndex;
    use crate::pipeline::job::{JobStatus, OutcomeKind};
    use crate::pipeline::ImportOptions;
    use crate::store::MetadataStore;
    use tempfile::TempDir;

    fn pipeline() -> Arc<IngestionPipeline> {
        let store: Arc<dyn MetadataStore> = Arc::new(Database::open_in_memory().unwrap());
        Arc::new(IngestionPipeline::new(store, Arc::new(DuplicateIndex::new())))
    }

    fn options() -> ImportOptions {
        ImportOptions {
            classify: false,
            thumbnails: false,
            ..ImportOptions::default()
        }
    }

    #[test]
    fn test_pool_processes_every_task() {
        let dir = TempDir::new().unwrap();
        let job = Arc::new(ImportJob::new(dir.path().to_path_buf(), options()));
        job.set_discovered(5, vec![]);

        let pool = WorkerPool::start(pipeline(), Arc::clone(&job), None, 3).unwrap();
        for index in 0..5 {
            let path = dir.path().join(format!("{}.jpg", index));
            std::fs::write(&path, format!("image {}", index)).unwrap();
            pool.submit(Task { index, path }).unwrap();
        }
        assert_eq!(pool.wait(), 0);

        let snapshot = job.snapshot();
        assert_eq!(snapshot.progress.processed, 5);
        assert_eq!(snapshot.progress.imported, 5);
        assert_eq!(snapshot.status, JobStatus::Running);
        let paths: Vec<_> = snapshot.outcomes.iter().map(|o| o.path.clone()).collect();
        let expected: Vec<_> = (0..5)
            .map(|i| dir.path().join(format!("{}.jpg", i)))
            .collect();
        assert_eq!(paths, expected);
    }

    #[test]
    fn test_cancelled_job_skips_queued_tasks() {
        let dir = TempDir::new().unwrap();
        let job = Arc::new(ImportJob::new(dir.path().to_path_buf(), options()));
        job.set_discovered(3, vec![]);
        job.cancel();

        let pool = WorkerPool::start(pipeline(), Arc::clone(&job), None, 1).unwrap();
        for index in 0..3 {
            let path = dir.path().join(format!("{}.jpg", index));
            pool.submit(Task { index, path }).unwrap();
        }
        pool.wait();

        assert_eq!(job.progress().processed, 0);
    }

    #[test]
    fn test_pool_broadcasts_file_events() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, b"a").unwrap();
        let job = Arc::new(ImportJob::new(dir.path().to_path_buf(), options()));
        job.set_discovered(1, vec![]);
        let broadcaster = ImportProgressBroadcaster::new(64);
        let mut rx = broadcaster.subscribe();

        let pool =
            WorkerPool::start(pipeline(), Arc::clone(&job), Some(broadcaster.clone()), 1).unwrap();
        pool.submit(Task { index: 0, path }).unwrap();
        pool.wait();

        let mut phases = Vec::new();
        while let Ok(event) = rx.try_recv() {
            phases.push(event.phase);
        }
        assert_eq!(phases.first(), Some(&ImportPhase::Queued));
        assert_eq!(phases.last(), Some(&ImportPhase::Imported));
        assert!(matches!(
            job.snapshot().outcomes[0].kind,
            OutcomeKind::Imported { .. }
        ));
    }
}
