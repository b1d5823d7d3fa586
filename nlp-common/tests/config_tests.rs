//! Unit tests for configuration loading and resolution
//!
//! Covers:
//! - Priority order: overrides (CLI/ENV) → TOML → compiled defaults
//! - Missing model location is a fatal configuration error
//! - Explicit config files must exist, TOML parsing of every section

use nlp_common::config::{
    load_config_layer, load_toml_config, resolve_service_config, LogFormat, LoggingConfig,
    Overrides, ServerConfig, TomlConfig, DEFAULT_ADDRESS, DEFAULT_MAX_BODY_BYTES, DEFAULT_PORT,
};
use nlp_common::Error;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn write_toml(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(content.as_bytes()).expect("write temp file");
    file
}

#[test]
fn test_missing_model_is_config_error() {
    let result = resolve_service_config(&Overrides::default(), &TomlConfig::default());

    match result {
        Err(Error::Config(msg)) => assert!(msg.contains("MODEL"), "unexpected message: {msg}"),
        other => panic!("expected config error, got {:?}", other),
    }
}

#[test]
fn test_defaults_when_only_model_given() {
    let toml = TomlConfig {
        model: Some(PathBuf::from("/srv/models/ner")),
        ..Default::default()
    };

    let config = resolve_service_config(&Overrides::default(), &toml).unwrap();

    assert_eq!(config.model_path, PathBuf::from("/srv/models/ner"));
    assert_eq!(config.address, DEFAULT_ADDRESS);
    assert_eq!(config.port, DEFAULT_PORT);
    assert_eq!(config.log_level, "info");
    assert_eq!(config.log_format, LogFormat::Text);
    assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
}

#[test]
fn test_overrides_win_over_toml() {
    let toml = TomlConfig {
        model: Some(PathBuf::from("/from/toml")),
        server: ServerConfig {
            address: Some("127.0.0.1".to_string()),
            port: Some(9000),
            max_body_bytes: Some(1024),
        },
        logging: LoggingConfig {
            level: Some("debug".to_string()),
            format: Some(LogFormat::Json),
        },
    };
    let overrides = Overrides {
        model: Some(PathBuf::from("/from/env")),
        port: Some(9100),
        log_format: Some(LogFormat::Text),
        ..Default::default()
    };

    let config = resolve_service_config(&overrides, &toml).unwrap();

    assert_eq!(config.model_path, PathBuf::from("/from/env"));
    assert_eq!(config.port, 9100);
    assert_eq!(config.log_format, LogFormat::Text);
    // Not overridden: TOML values are kept
    assert_eq!(config.address, "127.0.0.1");
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.max_body_bytes, 1024);
}

#[test]
fn test_zero_body_limit_rejected() {
    let overrides = Overrides {
        model: Some(PathBuf::from("/m")),
        max_body_bytes: Some(0),
        ..Default::default()
    };
    assert!(resolve_service_config(&overrides, &TomlConfig::default()).is_err());
}

#[test]
fn test_toml_file_parsing() {
    let file = write_toml(
        r#"
model = "/srv/models/lexicon.json"

[server]
address = "127.0.0.1"
port = 8090

[logging]
level = "warn"
format = "json"
"#,
    );

    let config = load_toml_config(file.path()).unwrap();

    assert_eq!(config.model, Some(PathBuf::from("/srv/models/lexicon.json")));
    assert_eq!(config.server.port, Some(8090));
    assert_eq!(config.server.max_body_bytes, None);
    assert_eq!(config.logging.format, Some(LogFormat::Json));
}

#[test]
fn test_partial_toml_file_uses_section_defaults() {
    let file = write_toml("model = \"/m\"\n");
    let config = load_toml_config(file.path()).unwrap();

    assert_eq!(config.server, ServerConfig::default());
    assert_eq!(config.logging, LoggingConfig::default());
}

#[test]
fn test_invalid_toml_reports_parse_error() {
    let file = write_toml("model = [unterminated");
    assert!(matches!(load_toml_config(file.path()), Err(Error::TomlParse(_))));
}

#[test]
fn test_explicit_config_file_must_exist() {
    let missing = PathBuf::from("/nonexistent/nlp-api/config.toml");
    assert!(matches!(load_config_layer(Some(&missing)), Err(Error::Config(_))));
}

#[test]
fn test_explicit_config_file_loaded() {
    let file = write_toml("model = \"/m\"\n[server]\nport = 7000\n");
    let config = load_config_layer(Some(file.path())).unwrap();
    assert_eq!(config.server.port, Some(7000));
}
