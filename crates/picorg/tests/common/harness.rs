//! Test harness for isolated library execution.
//!
//! Each `TestHarness` owns a temp directory holding the image tree, the
//! SQLite database and the thumbnail directory, plus a `Library` wired to a
//! `StubClassifier`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use picorg::config::schema::Config;
use picorg::{
    Classification, ClassificationError, Database, ImageRecord, ImportOptions, JobSnapshot,
    Library, ModelClient,
};

/// Model client that answers by the leading bytes of the image:
///
/// - `timeout...` fails with a timeout
/// - `garbage...` fails with a malformed response
/// - `slow...` sleeps before answering
/// - `cat:<category>...` answers with that category
/// - anything else is described with no category
#[derive(Default)]
pub struct StubClassifier {
    calls: AtomicUsize,
}

impl StubClassifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ModelClient for StubClassifier {
    fn classify(
        &self,
        image: &[u8],
        _format_hint: Option<&str>,
    ) -> Result<Classification, ClassificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if image.starts_with(b"timeout") {
            return Err(ClassificationError::Timeout(Duration::from_secs(30)));
        }
        if image.starts_with(b"garbage") {
            return Err(ClassificationError::MalformedResponse(
                "expected JSON object".to_string(),
            ));
        }
        if image.starts_with(b"slow") {
            std::thread::sleep(Duration::from_millis(50));
        }

        let text = String::from_utf8_lossy(image);
        let category = text
            .strip_prefix("cat:")
            .map(|rest| rest.split_whitespace().next().unwrap_or("").to_string());

        Ok(Classification {
            description: format!("An image of {} bytes", image.len()),
            category,
            confidence: 0.95,
        })
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// Isolated library for integration tests.
pub struct TestHarness {
    temp_dir: TempDir,
    /// Root of the image tree to import.
    pub images_dir: PathBuf,
    pub config: Config,
    pub classifier: Arc<StubClassifier>,
    pub library: Library,
}

impl TestHarness {
    /// A library with the default configuration and no seeded categories.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// A library whose configuration is adjusted by `customize` before
    /// opening. Paths are pointed into the temp directory first.
    pub fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = std::fs::canonicalize(temp_dir.path()).expect("Failed to resolve temp dir");

        let images_dir = base.join("images");
        std::fs::create_dir_all(&images_dir).expect("Failed to create images dir");

        let mut config = Config {
            database_path: base.join("picorg.db").to_string_lossy().to_string(),
            thumbnail_directory: base.join("thumbs").to_string_lossy().to_string(),
            worker_count: 2,
            ..Config::default()
        };
        config.import.thumbnails = false;
        customize(&mut config);

        let classifier = Arc::new(StubClassifier::default());
        let library = open_library(&config, &classifier);

        Self {
            temp_dir,
            images_dir,
            config,
            classifier,
            library,
        }
    }

    /// Closes the library and opens it again on the same database.
    pub fn reopen(&mut self) {
        self.library = open_library(&self.config, &self.classifier);
    }

    pub fn base(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `content` to `relative` under the image tree, creating
    /// parent directories.
    pub fn write_image(&self, relative: &str, content: &[u8]) -> PathBuf {
        let path = self.images_dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create image subdirectory");
        }
        std::fs::write(&path, content).expect("Failed to write image");
        path
    }

    /// Writes a file directly under the image tree with a name that need
    /// not be valid UTF-8.
    pub fn write_image_named(&self, name: &std::ffi::OsStr, content: &[u8]) -> PathBuf {
        let path = self.images_dir.join(name);
        std::fs::create_dir_all(&self.images_dir).expect("Failed to create image directory");
        std::fs::write(&path, content).expect("Failed to write image");
        path
    }

    pub fn options(&self) -> ImportOptions {
        self.config.import.clone()
    }

    /// Imports the whole image tree and waits for the job to finish.
    pub fn import(&self) -> JobSnapshot {
        self.import_with(self.options())
    }

    pub fn import_with(&self, options: ImportOptions) -> JobSnapshot {
        self.library
            .importer()
            .run(&self.images_dir, options)
            .expect("Import rejected")
    }

    pub fn record(&self, path: &Path) -> Option<ImageRecord> {
        self.library
            .store()
            .get_image(path)
            .expect("Failed to read record")
    }

    /// Every record in the store, ordered by path.
    pub fn records(&self) -> Vec<ImageRecord> {
        let mut records: Vec<ImageRecord> = picorg::ImageIter::new(
            self.library.store().as_ref(),
            picorg::ImageFilter::default(),
            100,
        )
        .collect::<Result<_, _>>()
        .expect("Failed to list records");
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }
}

fn open_library(config: &Config, classifier: &Arc<StubClassifier>) -> Library {
    let database = Database::open(&config.database_path()).expect("Failed to open database");
    let client: Arc<dyn ModelClient> = classifier.clone();
    Library::with_classifier(config.clone(), database, Some(client))
        .expect("Failed to open library")
}
