//! Capture metadata read from an image's EXIF block.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::NaiveDateTime;
use exif::{Exif, In, Reader, Tag, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// EXIF date layout, e.g. `2023:07:14 09:30:00`.
const EXIF_DATETIME: &str = "%Y:%m:%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("EXIF parsing error: {0}")]
    Parse(#[from] exif::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// How and when a photo was taken. Every field is optional; most files
/// carry only some of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMetadata {
    pub taken_at: Option<NaiveDateTime>,
    /// Make and model, e.g. "Canon EOS R5".
    pub camera: Option<String>,
    pub lens: Option<String>,
    /// f-number.
    pub aperture: Option<f32>,
    /// Shutter speed as photographers write it, e.g. "1/250s".
    pub exposure: Option<String>,
    pub iso: Option<u32>,
    /// Millimetres.
    pub focal_length: Option<f32>,
    pub gps: Option<GeoPoint>,
}

impl CaptureMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Reads capture metadata from `path`.
///
/// Formats without EXIF support, and files without an EXIF block, yield an
/// empty value rather than an error.
pub fn read_capture_metadata(path: &Path) -> Result<CaptureMetadata, CaptureError> {
    let mut reader = BufReader::new(File::open(path)?);
    let exif = match Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(exif::Error::NotFound(_))
        | Err(exif::Error::InvalidFormat(_))
        | Err(exif::Error::NotSupported(_)) => return Ok(CaptureMetadata::default()),
        Err(e) => return Err(e.into()),
    };
    Ok(from_exif(&exif))
}

fn from_exif(exif: &Exif) -> CaptureMetadata {
    let taken_at = ascii(exif, Tag::DateTimeOriginal)
        .or_else(|| ascii(exif, Tag::DateTime))
        .and_then(|s| parse_datetime(&s));

    CaptureMetadata {
        taken_at,
        camera: camera(ascii(exif, Tag::Make), ascii(exif, Tag::Model)),
        lens: ascii(exif, Tag::LensModel),
        aperture: rational(exif, Tag::FNumber).map(|v| v as f32),
        exposure: rational(exif, Tag::ExposureTime).map(format_exposure),
        iso: exif
            .get_field(Tag::PhotographicSensitivity, In::PRIMARY)
            .and_then(|f| f.value.get_uint(0))
            .filter(|&iso| iso > 0),
        focal_length: rational(exif, Tag::FocalLength).map(|v| v as f32),
        gps: gps(exif),
    }
}

pub(crate) fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), EXIF_DATETIME).ok()
}

/// Joins make and model, dropping the make when the model already starts
/// with it ("Canon" + "Canon EOS R5").
fn camera(make: Option<String>, model: Option<String>) -> Option<String> {
    match (make, model) {
        (Some(make), Some(model)) if model.to_lowercase().starts_with(&make.to_lowercase()) => {
            Some(model)
        }
        (Some(make), Some(model)) => Some(format!("{} {}", make, model)),
        (make, model) => model.or(make),
    }
}

fn format_exposure(seconds: f64) -> String {
    if seconds < 1.0 {
        format!("1/{}s", (1.0 / seconds).round() as u64)
    } else {
        format!("{}s", seconds)
    }
}

fn ascii(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(parts) => parts
            .first()
            .map(|b| String::from_utf8_lossy(b).trim_end_matches('\0').trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

/// First rational of a field, when positive and finite.
fn rational(exif: &Exif, tag: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Rational(parts) => parts
            .first()
            .filter(|r| r.denom != 0)
            .map(|r| r.to_f64())
            .filter(|v| v.is_finite() && *v > 0.0),
        _ => None,
    }
}

fn gps(exif: &Exif) -> Option<GeoPoint> {
    Some(GeoPoint {
        latitude: degrees(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, "S")?,
        longitude: degrees(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, "W")?,
    })
}

/// Degrees/minutes/seconds to signed decimal degrees.
fn degrees(exif: &Exif, tag: Tag, reference: Tag, negative: &str) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let Value::Rational(dms) = &field.value else {
        return None;
    };
    if dms.len() < 3 || dms.iter().any(|r| r.denom == 0) {
        return None;
    }
    let value = dms[0].to_f64() + dms[1].to_f64() / 60.0 + dms[2].to_f64() / 3600.0;
    let sign = match ascii(exif, reference) {
        Some(r) if r.eq_ignore_ascii_case(negative) => -1.0,
        _ => 1.0,
    };
    Some(sign * value)
}
