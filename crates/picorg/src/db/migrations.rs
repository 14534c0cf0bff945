//! Schema versioning for the library database.
//!
//! `_migrations` records the highest applied step. Each pending step runs
//! inside its own transaction together with its bookkeeping row, so a crash
//! never leaves a half-applied version behind.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    name: &'static str,
    step: Step,
}

enum Step {
    Script(&'static str),
    /// Columns appended to an existing table. Columns already present are
    /// left alone, which lets a database created by a newer `002` script
    /// pass through older steps.
    AddColumns {
        table: &'static str,
        columns: &'static [(&'static str, &'static str)],
    },
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_categories",
        step: Step::Script(include_str!("sql/001_create_categories.sql")),
    },
    Migration {
        version: 2,
        name: "create_images",
        step: Step::Script(include_str!("sql/002_create_images.sql")),
    },
    Migration {
        version: 3,
        name: "images_thumbnail_path",
        step: Step::AddColumns {
            table: "images",
            columns: &[("thumbnail_path", "BLOB")],
        },
    },
    Migration {
        version: 4,
        name: "binary_path_keys",
        step: Step::Script(include_str!("sql/004_binary_path_keys.sql")),
    },
    Migration {
        version: 5,
        name: "images_capture_metadata",
        step: Step::AddColumns {
            table: "images",
            columns: &[
                ("taken_at", "TEXT"),
                ("camera", "TEXT"),
                ("lens", "TEXT"),
                ("aperture", "REAL"),
                ("exposure", "TEXT"),
                ("iso", "INTEGER"),
                ("focal_length", "REAL"),
                ("gps_latitude", "REAL"),
                ("gps_longitude", "REAL"),
            ],
        },
    },
    Migration {
        version: 6,
        name: "index_taken_at",
        step: Step::Script(include_str!("sql/006_index_taken_at.sql")),
    },
];

/// Brings the schema up to the latest version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        log::info!("Applying schema v{} ({})", migration.version, migration.name);
        apply(conn, migration).map_err(|e| DatabaseError::Migration {
            version: migration.version,
            reason: e.to_string(),
        })?;
    }

    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    match &migration.step {
        Step::Script(sql) => tx.execute_batch(sql)?,
        Step::AddColumns { table, columns } => {
            for (column, decl) in columns.iter() {
                if has_column(&tx, table, column)? {
                    log::debug!("{}.{} already present", table, column);
                    continue;
                }
                tx.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {};",
                    table, column, decl
                ))?;
            }
        }
    }
    tx.execute(
        "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
        rusqlite::params![migration.version, migration.name],
    )?;
    tx.commit()?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::InvalidRow {
            column: "table",
            reason: format!("'{}' is not a plain identifier", table),
        });
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|name| name == column))
}
