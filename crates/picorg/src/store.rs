//! The metadata store boundary.
//!
//! `MetadataStore` is the only way the pipeline, the duplicate index and the
//! category registry touch persisted state. `crate::db::Database` is the
//! SQLite implementation.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capture::CaptureMetadata;
use crate::db::DatabaseError;
use crate::hash::Fingerprint;

/// Name of the builtin sentinel category.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Classification state of an image record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStatus {
    Pending,
    Classified,
    Failed,
}

impl ClassificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationStatus::Pending => "pending",
            ClassificationStatus::Classified => "classified",
            ClassificationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ClassificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ClassificationStatus::Pending),
            "classified" => Ok(ClassificationStatus::Classified),
            "failed" => Ok(ClassificationStatus::Failed),
            other => Err(format!("unknown classification status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// One image known to the library, keyed by absolute path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub path: PathBuf,
    pub fingerprint: Option<Fingerprint>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub confidence: Option<f32>,
    pub file_size: u64,
    pub dimensions: Option<Dimensions>,
    pub imported_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: ClassificationStatus,
    pub error: Option<String>,
    pub thumbnail_path: Option<PathBuf>,
    #[serde(default)]
    pub capture: CaptureMetadata,
}

impl ImageRecord {
    /// A fresh `pending` record with nothing but identity and size.
    pub fn new(path: impl Into<PathBuf>, file_size: u64) -> Self {
        let now = Utc::now();
        Self {
            path: path.into(),
            fingerprint: None,
            description: None,
            category: None,
            confidence: None,
            file_size,
            dimensions: None,
            imported_at: now,
            updated_at: now,
            status: ClassificationStatus::Pending,
            error: None,
            thumbnail_path: None,
            capture: CaptureMetadata::default(),
        }
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = ClassificationStatus::Failed;
        self.error = Some(error.into());
    }
}

/// A user-visible category. Names are unique case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub name: String,
    pub description: String,
    pub is_builtin: bool,
    pub created_at: DateTime<Utc>,
}

impl Category {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            is_builtin: false,
            created_at: Utc::now(),
        }
    }
}

/// Filter for image listings. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct ImageFilter {
    pub category: Option<String>,
    pub status: Option<ClassificationStatus>,
    /// Substring match against description and path.
    pub search: Option<String>,
    /// Only records under this directory.
    pub path_prefix: Option<PathBuf>,
    /// Only records with (`Some(true)`) or without (`Some(false)`) a fingerprint.
    pub has_fingerprint: Option<bool>,
    /// Only records taken in this month, `YYYY-MM`.
    pub taken_month: Option<String>,
}

impl ImageFilter {
    pub fn with_status(status: ClassificationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Self::default()
        }
    }
}

/// One page of a listing. `next_cursor` is `None` on the last page.
#[derive(Debug, Clone, Default)]
pub struct ImagePage {
    pub images: Vec<ImageRecord>,
    pub next_cursor: Option<String>,
}

/// Number of records taken in one calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthCount {
    /// `YYYY-MM`.
    pub month: String,
    pub count: u64,
}

impl MonthCount {
    /// Human form, e.g. "July 2023". Falls back to the key itself.
    pub fn label(&self) -> String {
        chrono::NaiveDate::parse_from_str(&format!("{}-01", self.month), "%Y-%m-%d")
            .map(|d| d.format("%B %Y").to_string())
            .unwrap_or_else(|_| self.month.clone())
    }
}

/// Validates a `YYYY-MM` month key as used by [`ImageFilter::taken_month`].
pub fn parse_month(s: &str) -> Result<String, String> {
    let s = s.trim();
    let valid = s.len() == 7
        && chrono::NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d").is_ok();
    if valid {
        Ok(s.to_string())
    } else {
        Err(format!("'{}' is not a month (expected YYYY-MM)", s))
    }
}

/// Persistence capability used by the rest of the crate.
pub trait MetadataStore: Send + Sync {
    /// Inserts or replaces a record by path. The original import timestamp
    /// survives replacement.
    fn upsert_image(&self, record: &ImageRecord) -> Result<(), DatabaseError>;

    /// Writes the result of analysing a file without clobbering user edits
    /// made meanwhile. `seen_category` is the category read before the
    /// analysis began: the stored category is replaced only while it still
    /// equals that value. A category that no longer exists is stored as
    /// `Uncategorized`.
    fn save_analysis(
        &self,
        record: &ImageRecord,
        seen_category: Option<&str>,
    ) -> Result<(), DatabaseError>;

    fn get_image(&self, path: &Path) -> Result<Option<ImageRecord>, DatabaseError>;

    fn contains_image(&self, path: &Path) -> Result<bool, DatabaseError> {
        Ok(self.get_image(path)?.is_some())
    }

    /// Returns true if a record was deleted.
    fn delete_image(&self, path: &Path) -> Result<bool, DatabaseError>;

    /// Keyset-paginated listing ordered by path. `cursor` is the
    /// `next_cursor` of the previous page.
    fn list_images(
        &self,
        filter: &ImageFilter,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<ImagePage, DatabaseError>;

    /// Paths sharing `fingerprint`, ordered by path.
    fn find_by_fingerprint(&self, fingerprint: &Fingerprint)
        -> Result<Vec<PathBuf>, DatabaseError>;

    /// Sets a record's category (user edit). Returns false if the path is unknown.
    fn assign_category(&self, path: &Path, category: &str) -> Result<bool, DatabaseError>;

    fn list_categories(&self) -> Result<Vec<Category>, DatabaseError>;

    /// Case-insensitive lookup.
    fn get_category(&self, name: &str) -> Result<Option<Category>, DatabaseError>;

    fn upsert_category(&self, category: &Category) -> Result<(), DatabaseError>;

    /// Moves every record of `name` to `reassign_to` and deletes `name`, as
    /// one unit. Idempotent: a missing category yields `Ok(0)`.
    fn delete_category(&self, name: &str, reassign_to: &str) -> Result<u64, DatabaseError>;

    /// Renames `old` to `new`, moving every record with it, as one unit.
    fn rename_category(&self, old: &str, new: &str) -> Result<u64, DatabaseError>;

    /// Number of records per category name (categories without records
    /// report zero).
    fn category_counts(&self) -> Result<Vec<(String, u64)>, DatabaseError>;

    /// Records per capture month, newest first. Records without a capture
    /// date are not counted.
    fn month_counts(&self) -> Result<Vec<MonthCount>, DatabaseError>;
}

/// Lazy iterator over every record matching a filter, one page at a time.
///
/// Only the current page is held in memory; no lock is held between pages.
pub struct ImageIter<'a> {
    store: &'a dyn MetadataStore,
    filter: ImageFilter,
    page_size: u32,
    buffer: VecDeque<ImageRecord>,
    cursor: Option<String>,
    exhausted: bool,
}

impl<'a> ImageIter<'a> {
    pub fn new(store: &'a dyn MetadataStore, filter: ImageFilter, page_size: u32) -> Self {
        Self {
            store,
            filter,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            cursor: None,
            exhausted: false,
        }
    }

    fn fetch_next_page(&mut self) -> Result<(), DatabaseError> {
        let page = self
            .store
            .list_images(&self.filter, self.cursor.as_deref(), self.page_size)?;
        self.exhausted = page.next_cursor.is_none();
        self.cursor = page.next_cursor;
        self.buffer.extend(page.images);
        Ok(())
    }
}

impl Iterator for ImageIter<'_> {
    type Item = Result<ImageRecord, DatabaseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_next_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
