use std::path::{Path, PathBuf};

use super::{category_repo, image_repo, Database, DatabaseError};
use crate::hash::Fingerprint;
use crate::store::{Category, ImageFilter, ImagePage, ImageRecord, MetadataStore, MonthCount};

impl MetadataStore for Database {
    fn upsert_image(&self, record: &ImageRecord) -> Result<(), DatabaseError> {
        image_repo::upsert(self, record)
    }

    fn save_analysis(
        &self,
        record: &ImageRecord,
        seen_category: Option<&str>,
    ) -> Result<(), DatabaseError> {
        image_repo::save_analysis(self, record, seen_category)
    }

    fn get_image(&self, path: &Path) -> Result<Option<ImageRecord>, DatabaseError> {
        image_repo::find_by_path(self, path)
    }

    fn contains_image(&self, path: &Path) -> Result<bool, DatabaseError> {
        image_repo::exists(self, path)
    }

    fn delete_image(&self, path: &Path) -> Result<bool, DatabaseError> {
        image_repo::delete(self, path)
    }

    fn list_images(
        &self,
        filter: &ImageFilter,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<ImagePage, DatabaseError> {
        image_repo::list(self, filter, cursor, limit)
    }

    fn find_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<PathBuf>, DatabaseError> {
        image_repo::find_by_fingerprint(self, fingerprint)
    }

    fn assign_category(&self, path: &Path, category: &str) -> Result<bool, DatabaseError> {
        image_repo::set_category(self, path, category)
    }

    fn list_categories(&self) -> Result<Vec<Category>, DatabaseError> {
        category_repo::list(self)
    }

    fn get_category(&self, name: &str) -> Result<Option<Category>, DatabaseError> {
        category_repo::find(self, name)
    }

    fn upsert_category(&self, category: &Category) -> Result<(), DatabaseError> {
        category_repo::upsert(self, category)
    }

    fn delete_category(&self, name: &str, reassign_to: &str) -> Result<u64, DatabaseError> {
        category_repo::delete_reassigning(self, name, reassign_to)
    }

    fn rename_category(&self, old: &str, new: &str) -> Result<u64, DatabaseError> {
        category_repo::rename(self, old, new)
    }

    fn category_counts(&self) -> Result<Vec<(String, u64)>, DatabaseError> {
        category_repo::counts(self)
    }

    fn month_counts(&self) -> Result<Vec<MonthCount>, DatabaseError> {
        image_repo::month_counts(self)
    }
}
