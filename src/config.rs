use crate::core::error::{Error, Result};
use crate::core::rule::DEFAULT_PRIORITY;
use crate::utils::{ensure_config_dir, get_config_dir, write_atomic};
use crate::validators;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Output format for reduced rule sets
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One rule per line in the compact text form
    #[default]
    #[strum(serialize = "text")]
    Text,
    /// Array of rule records
    #[strum(serialize = "json")]
    Json,
}

/// CLI configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Priority for text rules that carry none
    #[serde(default = "default_priority")]
    pub default_priority: u8,
    /// Log level used when no `-v` flag is given (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub output_format: OutputFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_priority: default_priority(),
            log_level: default_log_level(),
            output_format: OutputFormat::default(),
        }
    }
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl AppConfig {
    /// # Errors
    ///
    /// Returns `Error::Validation` for a priority outside 1-100 or an unknown
    /// log level.
    pub fn validate(&self) -> Result<()> {
        validators::validate_priority(i64::from(self.default_priority))
            .map_err(|message| Error::validation("default_priority", message))?;
        if self.log_level.parse::<tracing::Level>().is_err() {
            return Err(Error::validation(
                "log_level",
                format!("unknown level '{}'", self.log_level),
            ));
        }
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.json"))
}

/// Loads the config at `path`, or the default location when `path` is `None`.
///
/// A missing file yields defaults; a malformed one is an error.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let Some(path) = path.map(Path::to_path_buf).or_else(default_config_path) else {
        return Ok(AppConfig::default());
    };

    let json = match std::fs::read_to_string(&path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(AppConfig::default());
        }
        Err(e) => return Err(e.into()),
    };

    let config: AppConfig = serde_json::from_str(&json)?;
    config.validate()?;
    Ok(config)
}

/// Saves the config using an atomic write.
///
/// Without an explicit `path` the default location is created if needed.
pub fn save_config(config: &AppConfig, path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => ensure_config_dir()?.join("config.json"),
    };
    let json = serde_json::to_string_pretty(config)?;
    write_atomic(&path, json.as_bytes())?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = AppConfig {
            default_priority: 40,
            log_level: "debug".to_string(),
            output_format: OutputFormat::Json,
        };
        save_config(&config, Some(&path)).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"output_format": "json"}"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.output_format, OutputFormat::Json);
        assert_eq!(config.default_priority, DEFAULT_PRIORITY);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(Error::Serialization(_))));

        std::fs::write(&path, r#"{"default_priority": 0}"#).unwrap();
        assert!(matches!(load_config(Some(&path)), Err(Error::Validation { .. })));

        std::fs::write(&path, r#"{"log_level": "loud"}"#).unwrap();
        assert!(matches!(load_config(Some(&path)), Err(Error::Validation { .. })));
    }
}
