pub mod importer;
pub mod job;
pub mod locks;
pub mod options;
pub mod progress;
pub mod runner;
pub mod walker;

pub use importer::{ImportHandle, Importer};
pub use job::{
    FailureStage, FileOutcome, ImportJob, JobProgress, JobSnapshot, JobStatus, OutcomeKind,
    ScanError, ScanErrorKind,
};
pub use locks::{PathGuard, PathLocks};
pub use options::{ImportOptions, ScanRules};
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::{CategoryPolicy, IngestionPipeline, PruneSummary, RetrySummary};
pub use walker::{discover, Discovery};
