//! Record keys: paths stored as raw bytes.
//!
//! On Unix a path is an arbitrary byte string, so keys are the exact
//! `OsStr` bytes and two names that differ only in non-UTF-8 bytes stay
//! distinct. Elsewhere the UTF-8 form is used. Legacy rows written as TEXT
//! decode the same way.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use super::DatabaseError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PathKey(Vec<u8>);

impl PathKey {
    #[cfg(unix)]
    pub fn from_path(path: &Path) -> Self {
        use std::os::unix::ffi::OsStrExt;
        Self(path.as_os_str().as_bytes().to_vec())
    }

    #[cfg(not(unix))]
    pub fn from_path(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned().into_bytes())
    }

    #[cfg(unix)]
    pub fn into_path(self) -> PathBuf {
        use std::os::unix::ffi::OsStringExt;
        PathBuf::from(std::ffi::OsString::from_vec(self.0))
    }

    #[cfg(not(unix))]
    pub fn into_path(self) -> PathBuf {
        PathBuf::from(String::from_utf8_lossy(&self.0).into_owned())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Opaque, printable listing cursor.
    pub fn to_cursor(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }

    pub fn from_cursor(cursor: &str) -> Result<Self, DatabaseError> {
        URL_SAFE_NO_PAD
            .decode(cursor)
            .map(Self)
            .map_err(|e| DatabaseError::InvalidCursor(format!("'{}': {}", cursor, e)))
    }
}

impl ToSql for PathKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Blob(&self.0)))
    }
}

impl FromSql for PathKey {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Blob(bytes) | ValueRef::Text(bytes) => Ok(Self(bytes.to_vec())),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}
