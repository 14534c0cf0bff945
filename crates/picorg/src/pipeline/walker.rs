//! Directory discovery for imports.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::WalkDir;

use super::job::{ScanError, ScanErrorKind};
use super::options::ScanRules;

/// Depth limit when following symlinks recursively.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Default)]
pub struct Discovery {
    /// Matching files, sorted by path.
    pub files: Vec<PathBuf>,
    /// Directories and entries that could not be read.
    pub errors: Vec<ScanError>,
}

/// Walks `root` and collects the files `rules` accept.
///
/// Symlinks are followed; loops are detected and reported instead of
/// descended into. Unreadable directories and entries are skipped and
/// reported.
pub fn discover(root: &Path, rules: &ScanRules) -> Discovery {
    let max_depth = if rules.recursive { MAX_DEPTH } else { 1 };
    let mut discovery = Discovery::default();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .min_depth(1)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|entry| {
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let excluded = rules.is_excluded(relative);
            if excluded {
                debug!("Excluded: {}", entry.path().display());
            }
            !excluded
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                let (kind, reason) = match e.loop_ancestor() {
                    Some(ancestor) => (
                        ScanErrorKind::SymlinkLoop,
                        format!("symlink loop back to {}", ancestor.display()),
                    ),
                    None => {
                        let reason = e
                            .io_error()
                            .map(|io| io.to_string())
                            .unwrap_or_else(|| e.to_string());
                        // A directory we can stat but not list; anything
                        // else (dangling link, vanished file) is one entry.
                        let kind = if path.is_dir() {
                            ScanErrorKind::Directory
                        } else {
                            ScanErrorKind::Entry
                        };
                        (kind, reason)
                    }
                };
                warn!("Skipping {} ({}): {}", path.display(), kind, reason);
                discovery.errors.push(ScanError { path, kind, reason });
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        if rules.accepts_extension(entry.path()) {
            discovery.files.push(entry.into_path());
        }
    }

    discovery.files.sort();
    discovery.files.dedup();

    info!(
        "Discovered {} image(s) under {} ({} scan error(s))",
        discovery.files.len(),
        root.display(),
        discovery.errors.len()
    );
    discovery
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::options::ImportOptions;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    fn rules(options: ImportOptions) -> ScanRules {
        options.scan_rules().unwrap()
    }

    #[test]
    fn test_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("b.jpg"));
        touch(&dir.path().join("a.PNG"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join("sub/c.jpeg"));

        let found = discover(dir.path(), &rules(ImportOptions::default()));
        let names: Vec<_> = found
            .files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.PNG"),
                PathBuf::from("b.jpg"),
                PathBuf::from("sub/c.jpeg"),
            ]
        );
        assert!(found.errors.is_empty());
    }

    #[test]
    fn test_non_recursive() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("a.jpg"));
        touch(&dir.path().join("sub/b.jpg"));

        let found = discover(
            dir.path(),
            &rules(ImportOptions {
                recursive: false,
                ..ImportOptions::default()
            }),
        );
        assert_eq!(found.files, vec![dir.path().join("a.jpg")]);
    }

    #[test]
    fn test_exclude_prunes_directories() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("keep/a.jpg"));
        touch(&dir.path().join("skip/b.jpg"));

        let found = discover(
            dir.path(),
            &rules(ImportOptions {
                exclude: vec!["skip".to_string()],
                ..ImportOptions::default()
            }),
        );
        assert_eq!(found.files, vec![dir.path().join("keep/a.jpg")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_is_reported_not_followed() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("sub/a.jpg"));
        std::os::unix::fs::symlink(dir.path(), dir.path().join("sub/loop")).unwrap();

        let found = discover(dir.path(), &rules(ImportOptions::default()));
        assert_eq!(found.files, vec![dir.path().join("sub/a.jpg")]);
        assert_eq!(found.errors.len(), 1);
        assert_eq!(found.errors[0].kind, ScanErrorKind::SymlinkLoop);
        assert!(found.errors[0].reason.contains("loop"));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_an_entry_error() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("a.jpg"));
        std::os::unix::fs::symlink(dir.path().join("missing.jpg"), dir.path().join("gone.jpg"))
            .unwrap();

        let found = discover(dir.path(), &rules(ImportOptions::default()));
        assert_eq!(found.files, vec![dir.path().join("a.jpg")]);
        assert_eq!(found.errors.len(), 1);
        assert_eq!(found.errors[0].kind, ScanErrorKind::Entry);
        assert_eq!(found.errors[0].path, dir.path().join("gone.jpg"));
    }

    #[cfg(unix)]
    #[test]
    fn test_permission_denied_directory() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("a.jpg"));
        let locked = dir.path().join("locked");
        touch(&locked.join("b.jpg"));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users can read anyway; nothing to observe then.
        let readable = fs::read_dir(&locked).is_ok();
        let found = discover(dir.path(), &rules(ImportOptions::default()));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        if readable {
            return;
        }
        assert_eq!(found.files, vec![dir.path().join("a.jpg")]);
        assert_eq!(found.errors.len(), 1);
        assert_eq!(found.errors[0].path, locked);
        assert_eq!(found.errors[0].kind, ScanErrorKind::Directory);
    }
}
