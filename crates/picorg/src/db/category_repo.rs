//! Category repository.
//!
//! Category names are unique case-insensitively (`COLLATE NOCASE` on the
//! key). Deletion and rename move image references inside the same
//! transaction as the category change.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row, Transaction};

use super::image_repo::{format_timestamp, parse_timestamp};
use super::{Database, DatabaseError};
use crate::store::Category;

fn category_from_row(row: &Row<'_>) -> Result<Category, rusqlite::Error> {
    let created_at: String = row.get("created_at")?;
    Ok(Category {
        name: row.get("name")?,
        description: row.get("description")?,
        is_builtin: row.get("is_builtin")?,
        created_at: parse_timestamp(&created_at),
    })
}

/// All categories, builtins first, then by name.
pub fn list(db: &Database) -> Result<Vec<Category>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM categories ORDER BY is_builtin DESC, name COLLATE NOCASE",
        )?;
        let categories = stmt
            .query_map([], category_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(categories)
    })
}

/// Case-insensitive lookup. Returns the stored spelling.
pub fn find(db: &Database, name: &str) -> Result<Option<Category>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM categories WHERE name = ?1",
                params![name],
                category_from_row,
            )
            .optional()?)
    })
}

/// Inserts a category, or updates the description of an existing one.
pub fn upsert(db: &Database, category: &Category) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO categories (name, description, is_builtin, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET description = excluded.description",
            params![
                category.name,
                category.description,
                category.is_builtin,
                format_timestamp(category.created_at),
            ],
        )?;
        Ok(())
    })
}

fn references(tx: &Transaction<'_>, name: &str) -> Result<u64, DatabaseError> {
    let n: i64 = tx.query_row(
        "SELECT COUNT(*) FROM images WHERE category = ?1",
        params![name],
        |r| r.get(0),
    )?;
    Ok(n.max(0) as u64)
}

fn move_images(tx: &Transaction<'_>, from: &str, to: &str) -> Result<u64, DatabaseError> {
    let moved = tx.execute(
        "UPDATE images SET
             category = (SELECT name FROM categories WHERE name = ?2),
             updated_at = ?3
         WHERE category = ?1",
        params![from, to, format_timestamp(Utc::now())],
    )?;
    Ok(moved as u64)
}

/// Reassigns every image of `name` to `reassign_to`, then deletes `name`.
///
/// Returns the number of reassigned images. A missing category is a no-op.
/// If any image still references `name` after the reassignment the whole
/// transaction is rolled back with `DanglingReferences`.
pub fn delete_reassigning(
    db: &Database,
    name: &str,
    reassign_to: &str,
) -> Result<u64, DatabaseError> {
    db.with_transaction(|tx| {
        let exists: Option<String> = tx
            .query_row(
                "SELECT name FROM categories WHERE name = ?1",
                params![name],
                |r| r.get(0),
            )
            .optional()?;
        let Some(stored) = exists else {
            return Ok(0);
        };

        let moved = move_images(tx, &stored, reassign_to)?;

        let remaining = references(tx, &stored)?;
        if remaining > 0 {
            return Err(DatabaseError::DanglingReferences {
                category: stored,
                references: remaining,
            });
        }

        tx.execute("DELETE FROM categories WHERE name = ?1", params![stored])?;
        log::debug!(
            "Deleted category '{}', {} image(s) moved to '{}'",
            stored,
            moved,
            reassign_to
        );
        Ok(moved)
    })
}

/// Renames `old` to `new` and moves every image with it.
///
/// A case-only change updates the key in place; otherwise the new row is
/// inserted, images are moved and the old row is removed.
pub fn rename(db: &Database, old: &str, new: &str) -> Result<u64, DatabaseError> {
    db.with_transaction(|tx| {
        let current = tx
            .query_row(
                "SELECT * FROM categories WHERE name = ?1",
                params![old],
                category_from_row,
            )
            .optional()?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)?;

        if current.name.eq_ignore_ascii_case(new) {
            tx.execute(
                "UPDATE categories SET name = ?2 WHERE name = ?1",
                params![current.name, new],
            )?;
            let moved = tx.execute(
                "UPDATE images SET category = ?2, updated_at = ?3 WHERE category = ?1",
                params![current.name, new, format_timestamp(Utc::now())],
            )?;
            return Ok(moved as u64);
        }

        tx.execute(
            "INSERT INTO categories (name, description, is_builtin, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                new,
                current.description,
                current.is_builtin,
                format_timestamp(current.created_at),
            ],
        )?;
        let moved = move_images(tx, &current.name, new)?;

        let remaining = references(tx, &current.name)?;
        if remaining > 0 {
            return Err(DatabaseError::DanglingReferences {
                category: current.name,
                references: remaining,
            });
        }

        tx.execute(
            "DELETE FROM categories WHERE name = ?1",
            params![current.name],
        )?;
        Ok(moved)
    })
}

/// Number of images per category, including empty categories.
pub fn counts(db: &Database) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT c.name, COUNT(i.path)
             FROM categories c
             LEFT JOIN images i ON i.category = c.name
             GROUP BY c.name
             ORDER BY c.name COLLATE NOCASE",
        )?;
        let rows = stmt
            .query_map([], |r| {
                let name: String = r.get(0)?;
                let n: i64 = r.get(1)?;
                Ok((name, n.max(0) as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::image_repo;
    use crate::store::{ImageRecord, UNCATEGORIZED};
    use std::path::Path;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn image_in(db: &Database, path: &str, category: &str) {
        let mut rec = ImageRecord::new(path, 1);
        rec.category = Some(category.to_string());
        image_repo::upsert(db, &rec).unwrap();
    }

    fn category_of(db: &Database, path: &str) -> Option<String> {
        image_repo::find_by_path(db, Path::new(path))
            .unwrap()
            .unwrap()
            .category
    }

    #[test]
    fn test_uncategorized_present() {
        let db = test_db();
        let all = list(&db).unwrap();
        assert_eq!(all[0].name, UNCATEGORIZED);
        assert!(all[0].is_builtin);
    }

    #[test]
    fn test_find_is_case_insensitive() {
        let db = test_db();
        upsert(&db, &Category::new("Beach", "sand and sea")).unwrap();
        let found = find(&db, "BEACH").unwrap().unwrap();
        assert_eq!(found.name, "Beach");
        assert_eq!(found.description, "sand and sea");
    }

    #[test]
    fn test_upsert_updates_description_only() {
        let db = test_db();
        upsert(&db, &Category::new("Beach", "old")).unwrap();
        upsert(&db, &Category::new("beach", "new")).unwrap();

        let all = list(&db).unwrap();
        assert_eq!(all.len(), 2);
        let beach = find(&db, "beach").unwrap().unwrap();
        assert_eq!(beach.name, "Beach");
        assert_eq!(beach.description, "new");
    }

    #[test]
    fn test_delete_reassigns_images() {
        let db = test_db();
        upsert(&db, &Category::new("Beach", "")).unwrap();
        image_in(&db, "/p/a.jpg", "Beach");
        image_in(&db, "/p/b.jpg", "Beach");

        let moved = delete_reassigning(&db, "beach", UNCATEGORIZED).unwrap();
        assert_eq!(moved, 2);
        assert!(find(&db, "Beach").unwrap().is_none());
        assert_eq!(category_of(&db, "/p/a.jpg").as_deref(), Some(UNCATEGORIZED));
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let db = test_db();
        assert_eq!(delete_reassigning(&db, "Nope", UNCATEGORIZED).unwrap(), 0);
    }

    #[test]
    fn test_rename_moves_images() {
        let db = test_db();
        upsert(&db, &Category::new("Beach", "sand")).unwrap();
        image_in(&db, "/p/a.jpg", "Beach");

        let moved = rename(&db, "Beach", "Seaside").unwrap();
        assert_eq!(moved, 1);
        assert!(find(&db, "Beach").unwrap().is_none());
        let renamed = find(&db, "Seaside").unwrap().unwrap();
        assert_eq!(renamed.description, "sand");
        assert_eq!(category_of(&db, "/p/a.jpg").as_deref(), Some("Seaside"));
    }

    #[test]
    fn test_rename_case_only() {
        let db = test_db();
        upsert(&db, &Category::new("beach", "")).unwrap();
        image_in(&db, "/p/a.jpg", "beach");

        rename(&db, "beach", "Beach").unwrap();
        assert_eq!(find(&db, "BEACH").unwrap().unwrap().name, "Beach");
        assert_eq!(category_of(&db, "/p/a.jpg").as_deref(), Some("Beach"));
    }

    #[test]
    fn test_rename_missing_fails() {
        let db = test_db();
        assert!(rename(&db, "Nope", "Other").is_err());
    }

    #[test]
    fn test_counts_include_empty_categories() {
        let db = test_db();
        upsert(&db, &Category::new("Beach", "")).unwrap();
        upsert(&db, &Category::new("City", "")).unwrap();
        image_in(&db, "/p/a.jpg", "Beach");
        image_in(&db, "/p/b.jpg", "beach");

        let counts = counts(&db).unwrap();
        assert_eq!(
            counts,
            vec![
                ("Beach".to_string(), 2),
                ("City".to_string(), 0),
                (UNCATEGORIZED.to_string(), 0),
            ]
        );
    }
}
