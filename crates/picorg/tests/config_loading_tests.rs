//! Table-driven tests for configuration loading and validation.

use std::path::PathBuf;

use serial_test::serial;
use tempfile::TempDir;

use picorg::config::loader::{ENV_DATABASE, ENV_MODEL};
use picorg::config::{load_config, load_config_from_str, load_effective_config};

/// A single config loading test case.
struct ConfigTestCase {
    name: &'static str,
    config_json: &'static str,
    should_succeed: bool,
    /// Expected error substring when loading fails.
    expected_error: Option<&'static str>,
}

const JSON_CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "valid_minimal",
        config_json: r#"{ "version": "1.0" }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_full",
        config_json: r#"{
            "version": "1.0",
            "database_path": "/data/picorg.db",
            "thumbnail_directory": "/data/thumbs",
            "thumbnail_size": 320,
            "worker_count": 8,
            "model": {
                "enabled": true,
                "endpoint": "http://gpu-box:11434",
                "model": "llava:13b",
                "timeout_secs": 120,
                "retries": 1,
                "retry_delay_ms": 250
            },
            "import": {
                "recursive": false,
                "extensions": ["jpg", "heic"],
                "exclude": ["**/.thumbnails"]
            },
            "categories": {
                "auto_create": false,
                "min_confidence": 0.4,
                "seed": [{ "name": "Nature", "description": "Outdoors" }]
            }
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "unsupported_version",
        config_json: r#"{ "version": "2.0" }"#,
        should_succeed: false,
        expected_error: Some("Unsupported config version"),
    },
    ConfigTestCase {
        name: "zero_workers",
        config_json: r#"{ "version": "1.0", "worker_count": 0 }"#,
        should_succeed: false,
        expected_error: Some("worker_count"),
    },
    ConfigTestCase {
        name: "empty_extension_list",
        config_json: r#"{ "version": "1.0", "import": { "extensions": [] } }"#,
        should_succeed: false,
        expected_error: Some("Extension allowlist is empty"),
    },
    ConfigTestCase {
        name: "broken_exclude_glob",
        config_json: r#"{ "version": "1.0", "import": { "exclude": ["[abc"] } }"#,
        should_succeed: false,
        expected_error: Some("Invalid exclude pattern"),
    },
    ConfigTestCase {
        name: "non_http_endpoint",
        config_json: r#"{ "version": "1.0", "model": { "endpoint": "ftp://host" } }"#,
        should_succeed: false,
        expected_error: Some("http or https"),
    },
    ConfigTestCase {
        name: "confidence_out_of_range",
        config_json: r#"{ "version": "1.0", "categories": { "min_confidence": 1.5 } }"#,
        should_succeed: false,
        expected_error: Some("min_confidence"),
    },
    ConfigTestCase {
        name: "missing_version",
        config_json: r#"{ "worker_count": 2 }"#,
        should_succeed: false,
        expected_error: Some("version"),
    },
];

#[test]
fn test_json_config_cases() {
    let mut failures = Vec::new();

    for case in JSON_CONFIG_TESTS {
        let result = load_config_from_str(case.config_json);
        match (result, case.should_succeed) {
            (Ok(_), true) => {}
            (Ok(_), false) => failures.push(format!("{}: expected an error", case.name)),
            (Err(e), true) => failures.push(format!("{}: unexpected error: {}", case.name, e)),
            (Err(e), false) => {
                if let Some(expected) = case.expected_error {
                    if !e.to_string().contains(expected) {
                        failures.push(format!(
                            "{}: error '{}' does not mention '{}'",
                            case.name, e, expected
                        ));
                    }
                }
            }
        }
    }

    assert!(failures.is_empty(), "Failed cases:\n{}", failures.join("\n"));
}

#[test]
fn test_full_config_values() {
    let config = load_config_from_str(JSON_CONFIG_TESTS[1].config_json).unwrap();

    assert_eq!(config.database_path(), PathBuf::from("/data/picorg.db"));
    assert_eq!(config.worker_count, 8);
    assert_eq!(config.model.model, "llava:13b");
    assert!(!config.import.recursive);
    // Unspecified import options keep their defaults.
    assert!(config.import.classify);
    assert!(config.import.skip_known);
    assert!(!config.categories.auto_create);
    assert_eq!(config.categories.seed[0].name, "Nature");
}

#[test]
#[serial]
fn test_config_file_with_env_overrides() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{ "version": "1.0", "database_path": "/from/file.db", "model": { "model": "llava" } }"#,
    )
    .unwrap();

    std::env::set_var(ENV_DATABASE, "/from/env.db");
    std::env::set_var(ENV_MODEL, "bakllava");
    let effective = load_effective_config(Some(&path));
    std::env::remove_var(ENV_DATABASE);
    std::env::remove_var(ENV_MODEL);

    let effective = effective.unwrap();
    assert_eq!(effective.database_path, "/from/env.db");
    assert_eq!(effective.model.model, "bakllava");

    // The plain loader ignores the environment.
    let plain = load_config(&path).unwrap();
    assert_eq!(plain.database_path, "/from/file.db");
}

#[test]
#[serial]
fn test_missing_config_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let err = load_effective_config(Some(&dir.path().join("absent.json"))).unwrap_err();
    assert!(err.to_string().contains("absent.json"));
}
