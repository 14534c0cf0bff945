use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::broadcast::ImportPhase;
use crate::capture::{read_capture_metadata, CaptureMetadata};
use crate::categories::CategoryRegistry;
use crate::classifier::ModelClient;
use crate::config::CategoriesConfig;
use crate::db::DatabaseError;
use crate::dedup::DuplicateIndex;
use crate::error::{ConfigError, PicorgError};
use crate::hash::{Fingerprint, HashComputer};
use crate::store::{
    ClassificationStatus, ImageFilter, ImageIter, ImageRecord, MetadataStore, UNCATEGORIZED,
};
use crate::thumbnail::{probe_dimensions, Thumbnailer};

use super::job::{FailureStage, OutcomeKind};
use super::locks::PathLocks;
use super::options::ImportOptions;
use super::progress::{ProgressEvent, ProgressReporter};

const MAINTENANCE_PAGE_SIZE: u32 = 500;

/// How model-suggested categories are applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryPolicy {
    pub auto_create: bool,
    pub min_confidence: f32,
}

impl Default for CategoryPolicy {
    fn default() -> Self {
        Self {
            auto_create: true,
            min_confidence: 0.0,
        }
    }
}

impl From<&CategoriesConfig> for CategoryPolicy {
    fn from(config: &CategoriesConfig) -> Self {
        Self {
            auto_create: config.auto_create,
            min_confidence: config.min_confidence,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrySummary {
    pub attempted: usize,
    pub classified: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneSummary {
    pub checked: usize,
    pub removed: usize,
}

/// Per-file ingestion: hash, register, classify, persist.
///
/// One instance is shared by every worker of every import. Work on a single
/// path is serialized through `locks`; user edits that bypass the pipeline
/// are protected by the compare-and-set in `MetadataStore::save_analysis`.
pub struct IngestionPipeline {
    store: Arc<dyn MetadataStore>,
    index: Arc<DuplicateIndex>,
    categories: CategoryRegistry,
    classifier: Option<Arc<dyn ModelClient>>,
    thumbnailer: Option<Thumbnailer>,
    hasher: HashComputer,
    policy: CategoryPolicy,
    locks: PathLocks,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn MetadataStore>, index: Arc<DuplicateIndex>) -> Self {
        let categories = CategoryRegistry::new(Arc::clone(&store));
        Self {
            store,
            index,
            categories,
            classifier: None,
            thumbnailer: None,
            hasher: HashComputer::new(),
            policy: CategoryPolicy::default(),
            locks: PathLocks::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ModelClient>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_thumbnailer(mut self, thumbnailer: Thumbnailer) -> Self {
        self.thumbnailer = Some(thumbnailer);
        self
    }

    pub fn with_category_policy(mut self, policy: CategoryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_hasher(mut self, hasher: HashComputer) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<DuplicateIndex> {
        &self.index
    }

    pub fn categories(&self) -> &CategoryRegistry {
        &self.categories
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    /// Runs one file through the pipeline. Never panics on bad input and
    /// never returns an error: every failure becomes part of the outcome.
    pub fn process_file(
        &self,
        path: &Path,
        options: &ImportOptions,
        progress: &dyn ProgressReporter,
    ) -> OutcomeKind {
        let path = absolute(path);
        let _file_span = info_span!("import_file", path = %path.display()).entered();
        let _guard = self.locks.lock(&path);

        // Step 1: Skip known paths
        let existing = match self.store.get_image(&path) {
            Ok(existing) => existing,
            Err(e) => return failed(FailureStage::Store, e),
        };
        if existing.is_some() && options.skip_known {
            debug!("Already known, skipping");
            return OutcomeKind::Skipped;
        }
        let seen_category = existing.as_ref().and_then(|r| r.category.clone());

        // Step 2: Fingerprint
        let (fingerprint, file_size) = {
            let _step = info_span!("hash").entered();
            progress.report(ProgressEvent::Phase {
                phase: ImportPhase::Hashing,
                message: "Computing fingerprint...".to_string(),
            });
            match self.fingerprint(&path) {
                Ok(found) => found,
                Err(reason) => return self.persist_hash_failure(&path, existing, reason),
            }
        };

        // Step 3: Register for dedup
        let previous = existing.as_ref().and_then(|r| r.fingerprint.clone());
        let mut record = match existing {
            Some(mut record) => {
                if record.fingerprint.as_ref() != Some(&fingerprint) {
                    debug!("Content changed since last import, resetting classification");
                    reset_classification(&mut record);
                }
                record
            }
            None => ImageRecord::new(path.clone(), file_size),
        };
        record.file_size = file_size;
        record.fingerprint = Some(fingerprint.clone());
        self.index.register(fingerprint.clone(), path.clone());
        let duplicate = self.index.paths_for(&fingerprint).len() > 1;
        if duplicate {
            info!("Duplicate content {}", fingerprint.short());
        }

        // Step 4: Dimensions, capture metadata and thumbnail (best effort)
        {
            let _step = info_span!("thumbnail").entered();
            match probe_dimensions(&path) {
                Ok(dimensions) => record.dimensions = Some(dimensions),
                Err(e) => warn!("Could not read dimensions: {}", e),
            }
            match read_capture_metadata(&path) {
                Ok(capture) => record.capture = capture,
                Err(e) => warn!("Could not read EXIF metadata: {}", e),
            }
            if let (true, Some(thumbnailer)) = (options.thumbnails, &self.thumbnailer) {
                progress.report(ProgressEvent::Phase {
                    phase: ImportPhase::Thumbnailing,
                    message: "Generating thumbnail...".to_string(),
                });
                match thumbnailer.generate(&path, &fingerprint) {
                    Ok(thumb) => record.thumbnail_path = Some(thumb),
                    Err(e) => warn!("Thumbnail generation failed: {}", e),
                }
            }
        }

        // Step 5: Classify
        let mut failure = None;
        if options.classify {
            let _step = info_span!("classify").entered();
            progress.report(ProgressEvent::Phase {
                phase: ImportPhase::Classifying,
                message: "Classifying image...".to_string(),
            });
            failure = self.classify_record(&mut record);
        }

        // Step 6: Persist
        {
            let _step = info_span!("store").entered();
            progress.report(ProgressEvent::Phase {
                phase: ImportPhase::Storing,
                message: "Saving record...".to_string(),
            });
            record.updated_at = chrono::Utc::now();
            if let Err(e) = self.store.save_analysis(&record, seen_category.as_deref()) {
                warn!("Failed to persist record: {}", e);
                match previous {
                    Some(old) if old != fingerprint => {
                        self.index.register(old, path.clone());
                    }
                    Some(_) => {}
                    None => {
                        self.index.unregister(&path);
                    }
                }
                return failed(FailureStage::Store, e);
            }
        }

        OutcomeKind::Imported {
            status: record.status,
            category: record.category,
            duplicate,
            failure,
        }
    }

    /// Re-classifies failed (and optionally pending) records. Only records
    /// without a fingerprint are hashed again.
    pub fn retry_failed(&self, include_pending: bool) -> Result<RetrySummary, PicorgError> {
        if self.classifier.is_none() {
            return Err(ConfigError::Validation {
                message: "cannot retry classification: no model is configured".to_string(),
            }
            .into());
        }

        let mut statuses = vec![ClassificationStatus::Failed];
        if include_pending {
            statuses.push(ClassificationStatus::Pending);
        }

        // Collect first: updating records while paging over the same filter
        // would shift the pages.
        let mut paths = Vec::new();
        for &status in &statuses {
            for record in ImageIter::new(
                self.store.as_ref(),
                ImageFilter::with_status(status),
                MAINTENANCE_PAGE_SIZE,
            ) {
                paths.push(record?.path);
            }
        }
        paths.sort();

        let mut summary = RetrySummary::default();
        for path in paths {
            let _span = info_span!("retry_file", path = %path.display()).entered();
            let _guard = self.locks.lock(&path);
            let Some(mut record) = self.store.get_image(&path)? else {
                continue;
            };
            if !statuses.contains(&record.status) {
                debug!("Status changed to {} meanwhile, skipping", record.status);
                continue;
            }
            let seen_category = record.category.clone();
            summary.attempted += 1;

            if record.fingerprint.is_none() {
                match self.fingerprint(&path) {
                    Ok((fingerprint, size)) => {
                        record.fingerprint = Some(fingerprint.clone());
                        record.file_size = size;
                        self.index.register(fingerprint, path.clone());
                    }
                    Err(reason) => {
                        record.mark_failed(reason);
                        record.updated_at = chrono::Utc::now();
                        self.store
                            .save_analysis(&record, seen_category.as_deref())?;
                        summary.failed += 1;
                        continue;
                    }
                }
            }

            let failure = self.classify_record(&mut record);
            record.updated_at = chrono::Utc::now();
            self.store
                .save_analysis(&record, seen_category.as_deref())?;
            match failure {
                Some(_) => summary.failed += 1,
                None => summary.classified += 1,
            }
        }

        info!(
            "Retry finished: {} attempted, {} classified, {} failed",
            summary.attempted, summary.classified, summary.failed
        );
        Ok(summary)
    }

    /// Deletes records whose files no longer exist, optionally limited to
    /// records under `prefix`.
    pub fn prune_missing(&self, prefix: Option<&Path>) -> Result<PruneSummary, DatabaseError> {
        let filter = ImageFilter {
            path_prefix: prefix.map(absolute),
            ..ImageFilter::default()
        };

        let mut summary = PruneSummary::default();
        let mut missing = Vec::new();
        for record in ImageIter::new(self.store.as_ref(), filter, MAINTENANCE_PAGE_SIZE) {
            let record = record?;
            summary.checked += 1;
            match record.path.try_exists() {
                Ok(true) => {}
                Ok(false) => missing.push(record.path),
                Err(e) => warn!(
                    "Cannot tell whether {} exists, keeping it: {}",
                    record.path.display(),
                    e
                ),
            }
        }

        for path in missing {
            if self.remove_image(&path)? {
                summary.removed += 1;
            }
        }

        info!(
            "Prune finished: {} checked, {} removed",
            summary.checked, summary.removed
        );
        Ok(summary)
    }

    /// Deletes one record and drops it from the duplicate index. Returns
    /// false if the path was unknown.
    pub fn remove_image(&self, path: &Path) -> Result<bool, DatabaseError> {
        let path = absolute(path);
        let _guard = self.locks.lock(&path);
        let deleted = self.store.delete_image(&path)?;
        if let Some(fingerprint) = self.index.unregister(&path) {
            self.drop_orphaned_thumbnail(&fingerprint);
        }
        if deleted {
            info!("Removed {}", path.display());
        }
        Ok(deleted)
    }

    fn fingerprint(&self, path: &Path) -> Result<(Fingerprint, u64), String> {
        let size = fs::metadata(path).map_err(|e| e.to_string())?.len();
        let fingerprint = self.hasher.hash(path).map_err(|e| e.to_string())?;
        Ok((fingerprint, size))
    }

    fn persist_hash_failure(
        &self,
        path: &Path,
        existing: Option<ImageRecord>,
        reason: String,
    ) -> OutcomeKind {
        warn!("Hashing failed: {}", reason);
        let seen_category = existing.as_ref().and_then(|r| r.category.clone());
        let mut record = existing.unwrap_or_else(|| ImageRecord::new(path, 0));
        record.fingerprint = None;
        record.thumbnail_path = None;
        record.mark_failed(reason.clone());
        record.updated_at = chrono::Utc::now();
        self.index.unregister(path);
        if let Err(e) = self
            .store
            .save_analysis(&record, seen_category.as_deref())
        {
            warn!("Failed to persist failed record: {}", e);
        }
        OutcomeKind::Failed {
            stage: FailureStage::Hash,
            reason,
        }
    }

    /// Fills in description, category and confidence. On failure the
    /// record is marked failed and keeps its fingerprint.
    fn classify_record(&self, record: &mut ImageRecord) -> Option<(FailureStage, String)> {
        let Some(classifier) = &self.classifier else {
            debug!("No model configured, leaving record pending");
            return None;
        };

        let bytes = match fs::read(&record.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                let reason = e.to_string();
                warn!("Could not read image for classification: {}", reason);
                record.mark_failed(format!("read: {}", reason));
                return Some((FailureStage::Read, reason));
            }
        };
        let hint = mime_guess::from_path(&record.path)
            .first()
            .map(|m| m.essence_str().to_string());

        match classifier.classify(&bytes, hint.as_deref()) {
            Ok(classification) => {
                let category = self.resolve_category(
                    classification.category.as_deref(),
                    classification.confidence,
                );
                debug!(
                    "{} classified as '{}' ({:.2})",
                    classifier.name(),
                    category,
                    classification.confidence
                );
                record.description = Some(classification.description);
                record.category = Some(category);
                record.confidence = Some(classification.confidence);
                record.status = ClassificationStatus::Classified;
                record.error = None;
                None
            }
            Err(e) => {
                let reason = e.to_string();
                warn!("Classification failed: {}", reason);
                record.mark_failed(reason.clone());
                Some((FailureStage::Classify, reason))
            }
        }
    }

    /// Maps a suggestion onto an existing (or newly created) category name.
    fn resolve_category(&self, suggested: Option<&str>, confidence: f32) -> String {
        let Some(name) = suggested.map(str::trim).filter(|n| !n.is_empty()) else {
            return UNCATEGORIZED.to_string();
        };
        if confidence < self.policy.min_confidence {
            debug!(
                "Confidence {:.2} below {:.2}, filing '{}' under {}",
                confidence, self.policy.min_confidence, name, UNCATEGORIZED
            );
            return UNCATEGORIZED.to_string();
        }

        let resolved = if self.policy.auto_create {
            self.categories.ensure(name, "").map(Some)
        } else {
            self.categories.get(name)
        };
        match resolved {
            Ok(Some(category)) => category.name,
            Ok(None) => UNCATEGORIZED.to_string(),
            Err(e) => {
                warn!("Cannot use suggested category '{}': {}", name, e);
                UNCATEGORIZED.to_string()
            }
        }
    }

    /// Thumbnails are shared by fingerprint; delete only the last user's.
    fn drop_orphaned_thumbnail(&self, fingerprint: &Fingerprint) {
        let Some(thumbnailer) = &self.thumbnailer else {
            return;
        };
        if !self.index.paths_for(fingerprint).is_empty() {
            return;
        }
        let thumb = thumbnailer.path_for(fingerprint);
        match fs::remove_file(&thumb) {
            Ok(()) => debug!("Removed thumbnail {}", thumb.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove thumbnail {}: {}", thumb.display(), e),
        }
    }
}

fn reset_classification(record: &mut ImageRecord) {
    record.description = None;
    record.category = None;
    record.confidence = None;
    record.dimensions = None;
    record.thumbnail_path = None;
    record.capture = CaptureMetadata::default();
    record.status = ClassificationStatus::Pending;
    record.error = None;
}

fn failed(stage: FailureStage, error: impl std::fmt::Display) -> OutcomeKind {
    OutcomeKind::Failed {
        stage,
        reason: error.to_string(),
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}
