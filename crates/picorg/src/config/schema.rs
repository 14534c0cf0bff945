use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::pipeline::ImportOptions;

pub const CONFIG_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_thumbnail_directory")]
    pub thumbnail_directory: String,
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub import: ImportOptions,
    #[serde(default)]
    pub categories: CategoriesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            database_path: default_database_path(),
            thumbnail_directory: default_thumbnail_directory(),
            thumbnail_size: default_thumbnail_size(),
            worker_count: default_worker_count(),
            model: ModelConfig::default(),
            import: ImportOptions::default(),
            categories: CategoriesConfig::default(),
        }
    }
}

impl Config {
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database_path)
    }

    pub fn thumbnail_directory(&self) -> PathBuf {
        PathBuf::from(&self.thumbnail_directory)
    }
}

fn data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".picorg").join("data"))
        .unwrap_or_else(|| std::env::temp_dir().join("picorg"))
}

fn default_database_path() -> String {
    data_dir().join("picorg.db").to_string_lossy().to_string()
}

fn default_thumbnail_directory() -> String {
    data_dir().join("thumbnails").to_string_lossy().to_string()
}

fn default_thumbnail_size() -> u32 {
    crate::thumbnail::DEFAULT_THUMBNAIL_SIZE
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_true() -> bool {
    true
}

/// Local vision model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// When false, imports never call the model.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Base URL of the Ollama server.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Vision model name, e.g. `llava`.
    #[serde(default = "default_model")]
    pub model: String,
    /// Upper bound for one classification call, in seconds.
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
    /// Extra attempts after a connection failure.
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Replaces the built-in prompt.
    #[serde(default)]
    pub prompt: Option<String>,
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llava".to_string()
}

fn default_model_timeout() -> u64 {
    60
}

fn default_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    2000
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_endpoint(),
            model: default_model(),
            timeout_secs: default_model_timeout(),
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            prompt: None,
        }
    }
}

/// How model-suggested categories are applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoriesConfig {
    /// Create unknown suggested categories instead of filing the image
    /// under "Uncategorized".
    #[serde(default = "default_true")]
    pub auto_create: bool,
    /// Suggestions below this confidence go to "Uncategorized".
    #[serde(default)]
    pub min_confidence: f32,
    /// Categories created when the library is opened.
    #[serde(default)]
    pub seed: Vec<CategorySeed>,
}

impl Default for CategoriesConfig {
    fn default() -> Self {
        Self {
            auto_create: true,
            min_confidence: 0.0,
            seed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySeed {
    pub name: String,
    #[serde(default)]
    pub description: String,
}
