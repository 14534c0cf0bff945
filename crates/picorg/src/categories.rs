//! Category registry.
//!
//! Owns the user-visible category set. Every mutation goes through the
//! store so reassignment and deletion commit together.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::db::DatabaseError;
use crate::error::CategoryError;
use crate::store::{Category, MetadataStore, UNCATEGORIZED};

const MAX_NAME_LEN: usize = 64;

/// A category with the number of images filed under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    #[serde(flatten)]
    pub category: Category,
    pub image_count: u64,
}

pub struct CategoryRegistry {
    store: Arc<dyn MetadataStore>,
}

impl CategoryRegistry {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Creates a new category. Fails if the name is taken in any casing.
    pub fn add(&self, name: &str, description: &str) -> Result<Category, CategoryError> {
        let name = normalize_name(name)?;
        if let Some(existing) = self.store.get_category(&name)? {
            return Err(CategoryError::AlreadyExists(existing.name));
        }
        let category = Category::new(name, description.trim());
        self.store.upsert_category(&category)?;
        log::info!("Added category '{}'", category.name);
        Ok(category)
    }

    /// Returns the existing category matching `name`, creating it if needed.
    pub fn ensure(&self, name: &str, description: &str) -> Result<Category, CategoryError> {
        let name = normalize_name(name)?;
        if let Some(existing) = self.store.get_category(&name)? {
            return Ok(existing);
        }
        let category = Category::new(name, description.trim());
        self.store.upsert_category(&category)?;
        log::info!("Created category '{}'", category.name);
        Ok(category)
    }

    pub fn get(&self, name: &str) -> Result<Option<Category>, CategoryError> {
        Ok(self.store.get_category(name.trim())?)
    }

    /// Renames a category and moves its images with it.
    ///
    /// Returns the number of images moved.
    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<u64, CategoryError> {
        let new_name = normalize_name(new_name)?;
        let current = self
            .store
            .get_category(old_name.trim())?
            .ok_or_else(|| CategoryError::NotFound(old_name.trim().to_string()))?;
        if current.is_builtin {
            return Err(CategoryError::Builtin(current.name));
        }
        if current.name == new_name {
            return Ok(0);
        }
        if !current.name.eq_ignore_ascii_case(&new_name) {
            if let Some(taken) = self.store.get_category(&new_name)? {
                return Err(CategoryError::AlreadyExists(taken.name));
            }
        }

        let moved = self
            .store
            .rename_category(&current.name, &new_name)
            .map_err(into_category_error)?;
        log::info!(
            "Renamed category '{}' to '{}' ({} image(s))",
            current.name,
            new_name,
            moved
        );
        Ok(moved)
    }

    /// Deletes a category, moving its images to "Uncategorized" first.
    ///
    /// Removing a category that does not exist returns `Ok(0)`.
    pub fn remove(&self, name: &str) -> Result<u64, CategoryError> {
        let name = name.trim();
        let Some(current) = self.store.get_category(name)? else {
            log::debug!("Category '{}' already absent", name);
            return Ok(0);
        };
        if current.is_builtin {
            return Err(CategoryError::Builtin(current.name));
        }

        let moved = self
            .store
            .delete_category(&current.name, UNCATEGORIZED)
            .map_err(into_category_error)?;
        log::info!(
            "Removed category '{}', {} image(s) reassigned to '{}'",
            current.name,
            moved,
            UNCATEGORIZED
        );
        Ok(moved)
    }

    /// All categories with their image counts.
    pub fn list(&self) -> Result<Vec<CategorySummary>, CategoryError> {
        let counts = self.store.category_counts()?;
        let summaries = self
            .store
            .list_categories()?
            .into_iter()
            .map(|category| {
                let image_count = counts
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(&category.name))
                    .map(|(_, n)| *n)
                    .unwrap_or(0);
                CategorySummary {
                    category,
                    image_count,
                }
            })
            .collect();
        Ok(summaries)
    }

    /// Files one image under an existing category (user edit).
    pub fn assign(&self, path: &Path, category: &str) -> Result<Category, CategoryError> {
        let target = self
            .store
            .get_category(category.trim())?
            .ok_or_else(|| CategoryError::NotFound(category.trim().to_string()))?;
        if !self.store.assign_category(path, &target.name)? {
            return Err(CategoryError::ImageNotFound(path.to_path_buf()));
        }
        Ok(target)
    }
}

fn normalize_name(name: &str) -> Result<String, CategoryError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed.chars().count() > MAX_NAME_LEN
        || trimmed.chars().any(char::is_control)
    {
        return Err(CategoryError::InvalidName(name.to_string()));
    }
    Ok(trimmed.to_string())
}

fn into_category_error(err: DatabaseError) -> CategoryError {
    match err {
        DatabaseError::DanglingReferences {
            category,
            references,
        } => {
            log::error!(
                "Category '{}' still has {} reference(s) after reassignment",
                category,
                references
            );
            CategoryError::Consistency {
                category,
                references,
            }
        }
        other => CategoryError::Database(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::{ImageFilter, ImageRecord};
    use std::path::PathBuf;

    fn registry() -> (Arc<Database>, CategoryRegistry) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = CategoryRegistry::new(db.clone());
        (db, registry)
    }

    fn image_in(db: &Database, path: &str, category: &str) {
        let mut rec = ImageRecord::new(path, 1);
        rec.category = Some(category.to_string());
        db.upsert_image(&rec).unwrap();
    }

    #[test]
    fn test_add_trims_and_rejects_duplicates() {
        let (_db, registry) = registry();
        let cat = registry.add("  Beach ", " sand ").unwrap();
        assert_eq!(cat.name, "Beach");
        assert_eq!(cat.description, "sand");

        assert!(matches!(
            registry.add("BEACH", ""),
            Err(CategoryError::AlreadyExists(name)) if name == "Beach"
        ));
    }

    #[test]
    fn test_invalid_names() {
        let (_db, registry) = registry();
        assert!(matches!(registry.add("   ", ""), Err(CategoryError::InvalidName(_))));
        assert!(matches!(
            registry.add("tab\there", ""),
            Err(CategoryError::InvalidName(_))
        ));
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(registry.add(&long, ""), Err(CategoryError::InvalidName(_))));
    }

    #[test]
    fn test_ensure_returns_existing_spelling() {
        let (_db, registry) = registry();
        registry.add("Beach", "").unwrap();
        assert_eq!(registry.ensure("beach", "ignored").unwrap().name, "Beach");
        assert_eq!(registry.ensure("City", "").unwrap().name, "City");
        assert_eq!(registry.list().unwrap().len(), 3);
    }

    #[test]
    fn test_remove_reassigns_to_uncategorized() {
        let (db, registry) = registry();
        registry.add("Beach", "").unwrap();
        image_in(&db, "/p/a.jpg", "Beach");
        image_in(&db, "/p/b.jpg", "Beach");
        image_in(&db, "/p/c.jpg", UNCATEGORIZED);

        assert_eq!(registry.remove("beach").unwrap(), 2);
        assert!(registry.get("Beach").unwrap().is_none());

        let remaining = db
            .list_images(&ImageFilter::with_category("Beach"), None, 10)
            .unwrap();
        assert!(remaining.images.is_empty());
        let moved = db
            .list_images(&ImageFilter::with_category(UNCATEGORIZED), None, 10)
            .unwrap();
        assert_eq!(moved.images.len(), 3);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (_db, registry) = registry();
        registry.add("Beach", "").unwrap();
        registry.remove("Beach").unwrap();
        assert_eq!(registry.remove("Beach").unwrap(), 0);
    }

    #[test]
    fn test_builtin_is_protected() {
        let (_db, registry) = registry();
        assert!(matches!(
            registry.remove("uncategorized"),
            Err(CategoryError::Builtin(_))
        ));
        assert!(matches!(
            registry.rename(UNCATEGORIZED, "Misc"),
            Err(CategoryError::Builtin(_))
        ));
    }

    #[test]
    fn test_rename_moves_images() {
        let (db, registry) = registry();
        registry.add("Beach", "sand").unwrap();
        image_in(&db, "/p/a.jpg", "Beach");

        assert_eq!(registry.rename("Beach", "Seaside").unwrap(), 1);
        let rec = db.get_image(Path::new("/p/a.jpg")).unwrap().unwrap();
        assert_eq!(rec.category.as_deref(), Some("Seaside"));
        assert_eq!(registry.get("seaside").unwrap().unwrap().description, "sand");
    }

    #[test]
    fn test_rename_conflicts_and_missing() {
        let (_db, registry) = registry();
        registry.add("Beach", "").unwrap();
        registry.add("City", "").unwrap();
        assert!(matches!(
            registry.rename("Beach", "city"),
            Err(CategoryError::AlreadyExists(_))
        ));
        assert!(matches!(
            registry.rename("Nope", "Other"),
            Err(CategoryError::NotFound(_))
        ));
        registry.rename("Beach", "BEACH").unwrap();
        assert_eq!(registry.get("beach").unwrap().unwrap().name, "BEACH");
    }

    #[test]
    fn test_list_reports_counts() {
        let (db, registry) = registry();
        registry.add("Beach", "").unwrap();
        image_in(&db, "/p/a.jpg", "Beach");

        let summaries = registry.list().unwrap();
        let beach = summaries
            .iter()
            .find(|s| s.category.name == "Beach")
            .unwrap();
        assert_eq!(beach.image_count, 1);
        let uncategorized = summaries
            .iter()
            .find(|s| s.category.name == UNCATEGORIZED)
            .unwrap();
        assert_eq!(uncategorized.image_count, 0);
    }

    #[test]
    fn test_assign() {
        let (db, registry) = registry();
        registry.add("Beach", "").unwrap();
        db.upsert_image(&ImageRecord::new("/p/a.jpg", 1)).unwrap();

        let cat = registry.assign(Path::new("/p/a.jpg"), "beach").unwrap();
        assert_eq!(cat.name, "Beach");
        assert!(matches!(
            registry.assign(Path::new("/p/a.jpg"), "Nope"),
            Err(CategoryError::NotFound(_))
        ));
        assert!(matches!(
            registry.assign(&PathBuf::from("/p/none.jpg"), "Beach"),
            Err(CategoryError::ImageNotFound(_))
        ));
    }

    #[test]
    fn test_dangling_references_map_to_consistency() {
        let err = into_category_error(DatabaseError::DanglingReferences {
            category: "Beach".to_string(),
            references: 3,
        });
        assert!(matches!(
            err,
            CategoryError::Consistency { references: 3, .. }
        ));
    }
}
