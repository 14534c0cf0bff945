//! Image repository: CRUD and keyset listing for the `images` table.

use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError, PathKey};
use crate::capture::{CaptureMetadata, GeoPoint};
use crate::hash::Fingerprint;
use crate::store::{
    ClassificationStatus, Dimensions, ImageFilter, ImagePage, ImageRecord, MonthCount,
    UNCATEGORIZED,
};

/// Storage layout of `taken_at`; sorts chronologically as text.
const TAKEN_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const COLUMNS: &str = "path, fingerprint, description, category, confidence, file_size, \
    width, height, status, error, imported_at, updated_at, thumbnail_path, taken_at, camera, \
    lens, aperture, exposure, iso, focal_length, gps_latitude, gps_longitude";

const PLACEHOLDERS: &str =
    "?1, ?2, ?3, {category}, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22";

/// Every column but `path`, `category` and `imported_at`.
const UPDATE_FROM_EXCLUDED: &str = "fingerprint = excluded.fingerprint,
    description = excluded.description,
    confidence = excluded.confidence,
    file_size = excluded.file_size,
    width = excluded.width,
    height = excluded.height,
    status = excluded.status,
    error = excluded.error,
    updated_at = excluded.updated_at,
    thumbnail_path = excluded.thumbnail_path,
    taken_at = excluded.taken_at,
    camera = excluded.camera,
    lens = excluded.lens,
    aperture = excluded.aperture,
    exposure = excluded.exposure,
    iso = excluded.iso,
    focal_length = excluded.focal_length,
    gps_latitude = excluded.gps_latitude,
    gps_longitude = excluded.gps_longitude";

/// A raw image row from the database.
#[derive(Debug, Clone)]
pub struct ImageRow {
    pub path: PathKey,
    pub fingerprint: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub confidence: Option<f64>,
    pub file_size: i64,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub status: String,
    pub error: Option<String>,
    pub imported_at: String,
    pub updated_at: String,
    pub thumbnail_path: Option<PathKey>,
    pub taken_at: Option<String>,
    pub camera: Option<String>,
    pub lens: Option<String>,
    pub aperture: Option<f64>,
    pub exposure: Option<String>,
    pub iso: Option<i64>,
    pub focal_length: Option<f64>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
}

impl ImageRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            path: row.get("path")?,
            fingerprint: row.get("fingerprint")?,
            description: row.get("description")?,
            category: row.get("category")?,
            confidence: row.get("confidence")?,
            file_size: row.get("file_size")?,
            width: row.get("width")?,
            height: row.get("height")?,
            status: row.get("status")?,
            error: row.get("error")?,
            imported_at: row.get("imported_at")?,
            updated_at: row.get("updated_at")?,
            thumbnail_path: row.get("thumbnail_path")?,
            taken_at: row.get("taken_at")?,
            camera: row.get("camera")?,
            lens: row.get("lens")?,
            aperture: row.get("aperture")?,
            exposure: row.get("exposure")?,
            iso: row.get("iso")?,
            focal_length: row.get("focal_length")?,
            gps_latitude: row.get("gps_latitude")?,
            gps_longitude: row.get("gps_longitude")?,
        })
    }

    fn from_record(record: &ImageRecord) -> Self {
        let capture = &record.capture;
        Self {
            path: PathKey::from_path(&record.path),
            fingerprint: record.fingerprint.as_ref().map(|f| f.as_str().to_string()),
            description: record.description.clone(),
            category: record.category.clone(),
            confidence: record.confidence.map(f64::from),
            file_size: record.file_size as i64,
            width: record.dimensions.map(|d| i64::from(d.width)),
            height: record.dimensions.map(|d| i64::from(d.height)),
            status: record.status.as_str().to_string(),
            error: record.error.clone(),
            imported_at: format_timestamp(record.imported_at),
            updated_at: format_timestamp(record.updated_at),
            thumbnail_path: record.thumbnail_path.as_deref().map(PathKey::from_path),
            taken_at: capture
                .taken_at
                .map(|t| t.format(TAKEN_AT_FORMAT).to_string()),
            camera: capture.camera.clone(),
            lens: capture.lens.clone(),
            aperture: capture.aperture.map(f64::from),
            exposure: capture.exposure.clone(),
            iso: capture.iso.map(i64::from),
            focal_length: capture.focal_length.map(f64::from),
            gps_latitude: capture.gps.map(|g| g.latitude),
            gps_longitude: capture.gps.map(|g| g.longitude),
        }
    }

    /// Bind values in `COLUMNS` order.
    fn values(&self) -> Vec<&dyn ToSql> {
        vec![
            &self.path,
            &self.fingerprint,
            &self.description,
            &self.category,
            &self.confidence,
            &self.file_size,
            &self.width,
            &self.height,
            &self.status,
            &self.error,
            &self.imported_at,
            &self.updated_at,
            &self.thumbnail_path,
            &self.taken_at,
            &self.camera,
            &self.lens,
            &self.aperture,
            &self.exposure,
            &self.iso,
            &self.focal_length,
            &self.gps_latitude,
            &self.gps_longitude,
        ]
    }

    /// Decodes the raw row into a domain record.
    pub fn into_record(self) -> Result<ImageRecord, DatabaseError> {
        let fingerprint = match self.fingerprint {
            Some(ref hex) => Some(Fingerprint::parse(hex).ok_or_else(|| {
                DatabaseError::InvalidRow {
                    column: "fingerprint",
                    reason: format!("'{}' is not a SHA-256 hex digest", hex),
                }
            })?),
            None => None,
        };
        let status = self
            .status
            .parse::<ClassificationStatus>()
            .map_err(|reason| DatabaseError::InvalidRow {
                column: "status",
                reason,
            })?;
        let dimensions = match (self.width, self.height) {
            (Some(w), Some(h)) if w >= 0 && h >= 0 => Some(Dimensions {
                width: w as u32,
                height: h as u32,
            }),
            _ => None,
        };
        let capture = CaptureMetadata {
            taken_at: self.taken_at.as_deref().and_then(parse_taken_at),
            camera: self.camera,
            lens: self.lens,
            aperture: self.aperture.map(|v| v as f32),
            exposure: self.exposure,
            iso: self.iso.and_then(|v| u32::try_from(v).ok()),
            focal_length: self.focal_length.map(|v| v as f32),
            gps: match (self.gps_latitude, self.gps_longitude) {
                (Some(latitude), Some(longitude)) => Some(GeoPoint {
                    latitude,
                    longitude,
                }),
                _ => None,
            },
        };

        Ok(ImageRecord {
            path: self.path.into_path(),
            fingerprint,
            description: self.description,
            category: self.category,
            confidence: self.confidence.map(|c| c as f32),
            file_size: self.file_size.max(0) as u64,
            dimensions,
            imported_at: parse_timestamp(&self.imported_at),
            updated_at: parse_timestamp(&self.updated_at),
            status,
            error: self.error,
            thumbnail_path: self.thumbnail_path.map(PathKey::into_path),
            capture,
        })
    }
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_taken_at(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TAKEN_AT_FORMAT)
        .map_err(|e| log::warn!("Ignoring capture date '{}': {}", s, e))
        .ok()
}

/// Inserts or replaces a record by path. `imported_at` of an existing row is kept.
pub fn upsert(db: &Database, record: &ImageRecord) -> Result<(), DatabaseError> {
    let row = ImageRow::from_record(record);
    let sql = format!(
        "INSERT INTO images ({COLUMNS}) VALUES ({})
         ON CONFLICT(path) DO UPDATE SET category = excluded.category, {UPDATE_FROM_EXCLUDED}",
        PLACEHOLDERS.replace("{category}", "?4"),
    );
    db.with_conn(|conn| {
        conn.execute(&sql, row.values().as_slice())?;
        Ok(())
    })
}

/// Like [`upsert`], but `category` is compare-and-set against
/// `seen_category` and a category that vanished falls back to the builtin.
pub fn save_analysis(
    db: &Database,
    record: &ImageRecord,
    seen_category: Option<&str>,
) -> Result<(), DatabaseError> {
    let row = ImageRow::from_record(record);
    let category = "CASE WHEN ?4 IS NULL THEN NULL
         ELSE COALESCE((SELECT name FROM categories WHERE name = ?4), ?24) END";
    let sql = format!(
        "INSERT INTO images ({COLUMNS}) VALUES ({})
         ON CONFLICT(path) DO UPDATE SET
             category = CASE WHEN images.category IS ?23
                 THEN excluded.category ELSE images.category END,
             {UPDATE_FROM_EXCLUDED}",
        PLACEHOLDERS.replace("{category}", category),
    );
    let mut values = row.values();
    values.push(&seen_category);
    values.push(&UNCATEGORIZED);
    db.with_conn(|conn| {
        conn.execute(&sql, values.as_slice())?;
        Ok(())
    })
}

/// Finds a record by its path.
pub fn find_by_path(db: &Database, path: &Path) -> Result<Option<ImageRecord>, DatabaseError> {
    let row = db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM images WHERE path = ?1",
                params![PathKey::from_path(path)],
                ImageRow::from_row,
            )
            .optional()?)
    })?;
    row.map(ImageRow::into_record).transpose()
}

pub fn exists(db: &Database, path: &Path) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM images WHERE path = ?1",
                params![PathKey::from_path(path)],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    })
}

/// Deletes a record. Returns true if a row was removed.
pub fn delete(db: &Database, path: &Path) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "DELETE FROM images WHERE path = ?1",
            params![PathKey::from_path(path)],
        )?;
        Ok(affected > 0)
    })
}

/// Sets the category of one record. Returns false if the path is unknown.
pub fn set_category(db: &Database, path: &Path, category: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE images SET
                 category = (SELECT name FROM categories WHERE name = ?2),
                 updated_at = ?3
             WHERE path = ?1",
            params![
                PathKey::from_path(path),
                category,
                format_timestamp(Utc::now())
            ],
        )?;
        Ok(affected > 0)
    })
}

/// Paths sharing a fingerprint, ordered by path.
pub fn find_by_fingerprint(
    db: &Database,
    fingerprint: &Fingerprint,
) -> Result<Vec<PathBuf>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT path FROM images WHERE fingerprint = ?1 ORDER BY path")?;
        let paths = stmt
            .query_map(params![fingerprint.as_str()], |r| r.get::<_, PathKey>(0))?
            .map(|r| r.map(PathKey::into_path))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(paths)
    })
}

/// Lists one page of records ordered by path bytes, starting after `cursor`.
pub fn list(
    db: &Database,
    filter: &ImageFilter,
    cursor: Option<&str>,
    limit: u32,
) -> Result<ImagePage, DatabaseError> {
    let limit = limit.max(1);
    let (mut conditions, mut param_values) = filter_conditions(filter);

    if let Some(cursor) = cursor {
        conditions.push(format!("path > ?{}", param_values.len() + 1));
        param_values.push(Box::new(PathKey::from_cursor(cursor)?));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    // One extra row tells us whether another page exists.
    let sql = format!(
        "SELECT * FROM images {} ORDER BY path LIMIT {}",
        where_clause,
        u64::from(limit) + 1
    );

    let rows = db.with_conn(|conn| {
        let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), ImageRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    let has_more = rows.len() > limit as usize;
    let images = rows
        .into_iter()
        .take(limit as usize)
        .map(ImageRow::into_record)
        .collect::<Result<Vec<_>, _>>()?;

    let next_cursor = if has_more {
        images
            .last()
            .map(|r| PathKey::from_path(&r.path).to_cursor())
    } else {
        None
    };

    Ok(ImagePage {
        images,
        next_cursor,
    })
}

/// Counts records matching a filter.
pub fn count(db: &Database, filter: &ImageFilter) -> Result<u64, DatabaseError> {
    let (conditions, param_values) = filter_conditions(filter);
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    let sql = format!("SELECT COUNT(*) FROM images {}", where_clause);

    db.with_conn(|conn| {
        let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
        let n: i64 = conn.query_row(&sql, params_ref.as_slice(), |r| r.get(0))?;
        Ok(n.max(0) as u64)
    })
}

/// Records per capture month, newest first.
pub fn month_counts(db: &Database) -> Result<Vec<MonthCount>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT substr(taken_at, 1, 7) AS month, COUNT(*) FROM images
             WHERE taken_at IS NOT NULL
             GROUP BY month ORDER BY month DESC",
        )?;
        let months = stmt
            .query_map([], |r| {
                Ok(MonthCount {
                    month: r.get(0)?,
                    count: r.get::<_, i64>(1)?.max(0) as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(months)
    })
}

type SqlParams = Vec<Box<dyn ToSql>>;

fn filter_conditions(filter: &ImageFilter) -> (Vec<String>, SqlParams) {
    let mut conditions = Vec::new();
    let mut param_values: SqlParams = Vec::new();

    if let Some(ref category) = filter.category {
        conditions.push(format!("category = ?{}", param_values.len() + 1));
        param_values.push(Box::new(category.clone()));
    }
    if let Some(status) = filter.status {
        conditions.push(format!("status = ?{}", param_values.len() + 1));
        param_values.push(Box::new(status.as_str().to_string()));
    }
    if let Some(ref search) = filter.search {
        let n = param_values.len() + 1;
        conditions.push(format!(
            "(description LIKE ?{n} ESCAPE '\\' OR CAST(path AS TEXT) LIKE ?{n} ESCAPE '\\')"
        ));
        param_values.push(Box::new(format!("%{}%", escape_like(search))));
    }
    if let Some(ref prefix) = filter.path_prefix {
        let (lower, upper) = prefix_range(prefix);
        conditions.push(format!(
            "path >= ?{} AND path < ?{}",
            param_values.len() + 1,
            param_values.len() + 2
        ));
        param_values.push(Box::new(lower));
        param_values.push(Box::new(upper));
    }
    match filter.has_fingerprint {
        Some(true) => conditions.push("fingerprint IS NOT NULL".to_string()),
        Some(false) => conditions.push("fingerprint IS NULL".to_string()),
        None => {}
    }
    if let Some(ref month) = filter.taken_month {
        // "2023-07-" <= taken_at < "2023-07." keeps the taken_at index usable.
        conditions.push(format!(
            "taken_at >= ?{} AND taken_at < ?{}",
            param_values.len() + 1,
            param_values.len() + 2
        ));
        param_values.push(Box::new(format!("{}-", month)));
        param_values.push(Box::new(format!("{}.", month)));
    }

    (conditions, param_values)
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Half-open byte range `[dir/, dir<sep+1>)` covering every path below `dir`.
fn prefix_range(dir: &Path) -> (Vec<u8>, Vec<u8>) {
    let sep = MAIN_SEPARATOR as u8;
    let mut lower = PathKey::from_path(dir).into_bytes();
    while lower.len() > 1 && lower.last() == Some(&sep) {
        lower.pop();
    }
    if lower.last() != Some(&sep) {
        lower.push(sep);
    }
    let mut upper = lower.clone();
    if let Some(last) = upper.last_mut() {
        *last += 1;
    }
    (lower, upper)
}
