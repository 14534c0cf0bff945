pub mod broadcast;
pub mod capture;
pub mod categories;
pub mod classifier;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod hash;
pub mod library;
pub mod pipeline;
pub mod store;
pub mod thumbnail;
pub mod worker;

pub use broadcast::{ImportPhase, ImportProgressBroadcaster, ImportProgressEvent};
pub use capture::{CaptureMetadata, GeoPoint};
pub use categories::{CategoryRegistry, CategorySummary};
pub use classifier::{Classification, ModelClient, OllamaClient, TimeoutClient};
pub use config::{load_config, load_effective_config, Config};
pub use db::{Database, DatabaseError};
pub use dedup::{DuplicateGroup, DuplicateIndex};
pub use error::{
    CategoryError, ClassificationError, ConfigError, FileError, ImportError, PicorgError, Result,
};
pub use hash::{Fingerprint, HashComputer};
pub use library::Library;
pub use pipeline::{
    ImportHandle, ImportJob, ImportOptions, Importer, IngestionPipeline, JobSnapshot, JobStatus,
    OutcomeKind,
};
pub use store::{
    Category, ClassificationStatus, ImageFilter, ImageIter, ImageRecord, MetadataStore,
    MonthCount, UNCATEGORIZED,
};
pub use thumbnail::Thumbnailer;
