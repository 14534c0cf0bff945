use std::collections::HashSet;
use std::path::Path;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::error::ImportError;

/// Caller-facing knobs of one import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Allowed file extensions, compared case-insensitively.
    pub extensions: Vec<String>,
    /// Ask the model for a description and category.
    pub classify: bool,
    /// Leave paths that already have a record untouched.
    pub skip_known: bool,
    /// Glob patterns, relative to the import root, for files and
    /// directories to leave out.
    pub exclude: Vec<String>,
    /// Write display thumbnails.
    pub thumbnails: bool,
}

pub fn default_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            extensions: default_extensions(),
            classify: true,
            skip_known: true,
            exclude: Vec::new(),
            thumbnails: true,
        }
    }
}

impl ImportOptions {
    /// Validates the filesystem-facing options.
    pub fn scan_rules(&self) -> Result<ScanRules, ImportError> {
        let extensions: HashSet<String> = self
            .extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        if extensions.is_empty() {
            return Err(ImportError::EmptyExtensionAllowlist);
        }

        let exclude = self
            .exclude
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| ImportError::InvalidPattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ScanRules {
            recursive: self.recursive,
            extensions,
            exclude,
        })
    }
}

/// Validated walk rules derived from [`ImportOptions`].
#[derive(Debug, Clone)]
pub struct ScanRules {
    pub recursive: bool,
    extensions: HashSet<String>,
    exclude: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

impl ScanRules {
    pub fn accepts_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    /// `relative` is the entry path relative to the import root.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        self.exclude
            .iter()
            .any(|p| p.matches_path_with(relative, MATCH_OPTIONS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ImportOptions::default();
        assert!(options.recursive);
        assert!(options.classify);
        assert!(options.skip_known);
        assert!(options.thumbnails);
        assert!(options.extensions.contains(&"webp".to_string()));
    }

    #[test]
    fn test_extensions_are_normalized() {
        let options = ImportOptions {
            extensions: vec![".JPG".to_string(), " png ".to_string()],
            ..ImportOptions::default()
        };
        let rules = options.scan_rules().unwrap();
        assert!(rules.accepts_extension(Path::new("/a/b.jpg")));
        assert!(rules.accepts_extension(Path::new("/a/b.PNG")));
        assert!(!rules.accepts_extension(Path::new("/a/b.gif")));
        assert!(!rules.accepts_extension(Path::new("/a/noext")));
    }

    #[test]
    fn test_empty_allowlist_rejected() {
        let options = ImportOptions {
            extensions: vec!["  ".to_string()],
            ..ImportOptions::default()
        };
        assert!(matches!(
            options.scan_rules(),
            Err(ImportError::EmptyExtensionAllowlist)
        ));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let options = ImportOptions {
            exclude: vec!["[oops".to_string()],
            ..ImportOptions::default()
        };
        assert!(matches!(
            options.scan_rules(),
            Err(ImportError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_exclude_matches_relative_paths() {
        let options = ImportOptions {
            exclude: vec!["raw".to_string(), "**/*.tmp.jpg".to_string()],
            ..ImportOptions::default()
        };
        let rules = options.scan_rules().unwrap();
        assert!(rules.is_excluded(Path::new("raw")));
        assert!(rules.is_excluded(Path::new("a/b/c.tmp.jpg")));
        assert!(!rules.is_excluded(Path::new("a/raw.jpg")));
    }

    #[test]
    fn test_partial_options_deserialize_with_defaults() {
        let options: ImportOptions = serde_json::from_str(r#"{ "classify": false }"#).unwrap();
        assert!(!options.classify);
        assert!(options.recursive);
        assert_eq!(options.extensions, default_extensions());
    }
}
