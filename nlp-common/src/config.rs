//! Bootstrap configuration loading and resolution
//!
//! Resolution follows this priority order for every setting:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`MODEL`, `NLP_API_*`)
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! Steps 1 and 2 are collected by the binary into [`Overrides`]; this module
//! merges them with the TOML layer. The model location has no compiled
//! default: without it the service cannot start.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default bind address
pub const DEFAULT_ADDRESS: &str = "0.0.0.0";
/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8081;
/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Default request body limit (10 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Configuration file loaded from TOML
///
/// Every field is optional; missing fields fall back to compiled defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Model location (ONNX directory or lexicon JSON file)
    #[serde(default)]
    pub model: Option<PathBuf>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Largest request body accepted, in bytes
    #[serde(default)]
    pub max_body_bytes: Option<usize>,
}

/// Logging section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or full EnvFilter directive
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub format: Option<LogFormat>,
}

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::Config(format!(
                "Unknown log format '{}' (expected 'text' or 'json')",
                other
            ))),
        }
    }
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<PathBuf>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub max_body_bytes: Option<usize>,
}

/// Fully resolved service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub model_path: PathBuf,
    pub address: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub max_body_bytes: usize,
}

impl ServiceConfig {
    /// `address:port` string for the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Merge overrides with the TOML layer and compiled defaults
///
/// Fails when no model location is configured anywhere.
pub fn resolve_service_config(overrides: &Overrides, toml: &TomlConfig) -> Result<ServiceConfig> {
    let model_path = overrides
        .model
        .clone()
        .or_else(|| toml.model.clone())
        .ok_or_else(|| {
            Error::Config(
                "No model configured. Set one of:\n\
                 1. Command line: --model <path>\n\
                 2. Environment: MODEL=<path>\n\
                 3. TOML config: model = \"<path>\""
                    .to_string(),
            )
        })?;

    let max_body_bytes = overrides
        .max_body_bytes
        .or(toml.server.max_body_bytes)
        .unwrap_or(DEFAULT_MAX_BODY_BYTES);
    if max_body_bytes == 0 {
        return Err(Error::Config("max_body_bytes must be greater than 0".to_string()));
    }

    Ok(ServiceConfig {
        model_path,
        address: overrides
            .address
            .clone()
            .or_else(|| toml.server.address.clone())
            .unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
        port: overrides.port.or(toml.server.port).unwrap_or(DEFAULT_PORT),
        log_level: overrides
            .log_level
            .clone()
            .or_else(|| toml.logging.level.clone())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        log_format: overrides
            .log_format
            .or(toml.logging.format)
            .unwrap_or_default(),
        max_body_bytes,
    })
}

/// Read and parse a TOML configuration file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    Ok(config)
}

/// Load the TOML layer
///
/// An explicitly requested file must exist and parse. The platform default
/// file is optional: if missing or broken, a warning is logged and an empty
/// layer is used.
pub fn load_config_layer(explicit: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = explicit {
        let config = load_toml_config(path).map_err(|e| {
            Error::Config(format!("Failed to load config file {}: {}", path.display(), e))
        })?;
        info!("Loaded configuration from {}", path.display());
        return Ok(config);
    }

    let Some(path) = default_config_path() else {
        return Ok(TomlConfig::default());
    };

    match load_toml_config(&path) {
        Ok(config) => {
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        Err(e) => {
            warn!(
                "Ignoring config file {}: {}. Using defaults.",
                path.display(),
                e
            );
            Ok(TomlConfig::default())
        }
    }
}

/// Get the default configuration file path for the platform, if one exists
pub fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("nlp-api").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/nlp-api/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}
