//! Application configuration loaded from TOML.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use biokey_session::CaptureConfig;
use biokey_storage::DatabaseConfig;
use serde::Deserialize;

/// Top-level configuration file.
///
/// ```toml
/// [capture]
/// target_samples = 5
/// max_timeout_retries = 3
///
/// [database]
/// path = "fingerprints.db"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub database: DatabaseSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: PathBuf,
    pub max_connections: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("biokey.db"),
            max_connections: 4,
        }
    }
}

impl DatabaseSection {
    pub fn to_database_config(&self) -> DatabaseConfig {
        DatabaseConfig::new(&self.path)
            .max_connections(self.max_connections)
            .create_if_missing(true)
            .auto_migrate(true)
    }
}

impl AppConfig {
    /// Read `path`, or fall back to defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.capture.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biokey_core::{CaptureMode, DeviceModel};
    use std::io::Write;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.capture.target_samples, 10);
        assert_eq!(config.database.path, PathBuf::from("biokey.db"));
    }

    #[test]
    fn test_partial_sections_merge_with_defaults() {
        let config = AppConfig::parse(
            r#"
            [capture]
            target_samples = 3
            mode = "auto"
            device_model = "MARC10"
            hard_cancel_in_auto = true

            [database]
            path = "/var/lib/biokey/samples.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.capture.target_samples, 3);
        assert_eq!(config.capture.mode, CaptureMode::Auto);
        assert_eq!(config.capture.device_model, Some(DeviceModel::Marc10));
        assert!(config.capture.hard_cancel_in_auto);
        assert_eq!(config.capture.min_quality, 60);
        assert_eq!(config.database.max_connections, 4);
    }

    #[test]
    fn test_database_section_builds_pool_config() {
        let config = AppConfig::parse("[database]\npath = \":memory:\"\nmax_connections = 2\n")
            .unwrap()
            .database
            .to_database_config();

        assert!(config.is_memory());
        assert_eq!(config.max_connections, 2);
        assert!(config.create_if_missing);
        assert!(config.auto_migrate);
    }

    #[test]
    fn test_invalid_capture_settings_are_rejected() {
        let err = AppConfig::parse("[capture]\ntarget_samples = 0\n").unwrap_err();
        assert!(err.to_string().contains("target_samples"));
    }

    #[test]
    fn test_load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[database]\npath = \"other.db\"").unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.database.path, PathBuf::from("other.db"));
        assert!(AppConfig::load(None).is_ok());
    }
}
