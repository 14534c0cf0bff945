use std::path::Path;

use crate::config::schema::{Config, CONFIG_VERSION};
use crate::error::ConfigError;

/// Overrides the configured database path.
pub const ENV_DATABASE: &str = "PICORG_DATABASE";
/// Overrides the model server endpoint.
pub const ENV_MODEL_ENDPOINT: &str = "PICORG_MODEL_ENDPOINT";
/// Overrides the model name.
pub const ENV_MODEL: &str = "PICORG_MODEL";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

/// Loads `path` (or the defaults when `None`), applies environment
/// overrides and validates the result.
pub fn load_effective_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn apply_env_overrides(config: &mut Config) {
    if let Some(value) = env_value(ENV_DATABASE) {
        log::debug!("{} overrides database_path", ENV_DATABASE);
        config.database_path = value;
    }
    if let Some(value) = env_value(ENV_MODEL_ENDPOINT) {
        log::debug!("{} overrides model.endpoint", ENV_MODEL_ENDPOINT);
        config.model.endpoint = value;
    }
    if let Some(value) = env_value(ENV_MODEL) {
        log::debug!("{} overrides model.model", ENV_MODEL);
        config.model.model = value;
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.database_path.trim().is_empty() {
        return Err(invalid("database_path must not be empty"));
    }

    if config.worker_count == 0 {
        return Err(invalid("worker_count must be at least 1"));
    }

    if config.thumbnail_size == 0 {
        return Err(invalid("thumbnail_size must be at least 1"));
    }

    if config.model.timeout_secs == 0 {
        return Err(invalid("model.timeout_secs must be at least 1"));
    }

    match reqwest::Url::parse(&config.model.endpoint) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => {
            return Err(invalid(format!(
                "model.endpoint must be http or https, got '{}'",
                url.scheme()
            )))
        }
        Err(e) => {
            return Err(invalid(format!(
                "model.endpoint '{}' is not a valid URL: {}",
                config.model.endpoint, e
            )))
        }
    }

    if config.model.model.trim().is_empty() {
        return Err(invalid("model.model must not be empty"));
    }

    config
        .import
        .scan_rules()
        .map_err(|e| invalid(format!("import: {}", e)))?;

    let min = config.categories.min_confidence;
    if !(0.0..=1.0).contains(&min) {
        return Err(invalid(format!(
            "categories.min_confidence must be within [0, 1], got {}",
            min
        )));
    }

    for seed in &config.categories.seed {
        if seed.name.trim().is_empty() {
            return Err(invalid("categories.seed entries need a name"));
        }
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}
