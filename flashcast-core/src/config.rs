//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/flashcast/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/flashcast/` (~/.config/flashcast/)
//! - Data: `$XDG_DATA_HOME/flashcast/` (~/.local/share/flashcast/)
//! - State/Logs: `$XDG_STATE_HOME/flashcast/` (~/.local/state/flashcast/)

use crate::analytics::Period;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Analytics configuration
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Override path for the SQLite database file
    pub path: Option<PathBuf>,
}

/// Analytics configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    /// Country-code prefix stripped from phone numbers before roster matching
    #[serde(default = "default_country_code")]
    pub country_code: String,

    /// Days without activity before a student is listed as inactive
    #[serde(default = "default_inactivity_days")]
    pub inactivity_days: i64,

    /// Number of entries kept in ranked lists (top performers, easy/difficult)
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Period applied by CLI tools when no dates or period are given
    #[serde(default)]
    pub default_period: Option<Period>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            country_code: default_country_code(),
            inactivity_days: default_inactivity_days(),
            top_n: default_top_n(),
            default_period: None,
        }
    }
}

impl AnalyticsConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.country_code.is_empty() || !self.country_code.chars().all(|c| c.is_ascii_digit())
        {
            return Err(Error::Config(
                "analytics.country_code must be a non-empty string of digits".to_string(),
            ));
        }
        if !(0..=MAX_INACTIVITY_DAYS).contains(&self.inactivity_days) {
            return Err(Error::Config(format!(
                "analytics.inactivity_days must be between 0 and {}",
                MAX_INACTIVITY_DAYS
            )));
        }
        if self.top_n == 0 {
            return Err(Error::Config(
                "analytics.top_n must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Upper bound for `analytics.inactivity_days` (about a century)
pub const MAX_INACTIVITY_DAYS: i64 = 36_500;

fn default_country_code() -> String {
    crate::phone::DEFAULT_COUNTRY_CODE.to_string()
}

fn default_inactivity_days() -> i64 {
    7
}

fn default_top_n() -> usize {
    5
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.analytics.validate()?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/flashcast/config.toml` (~/.config/flashcast/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("flashcast").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("flashcast")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("flashcast")
    }

    /// Returns the default database file path
    ///
    /// `$XDG_DATA_HOME/flashcast/data.db` (~/.local/share/flashcast/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Returns the database path for this config, honoring `[database] path`.
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(Self::database_path)
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/flashcast/flashcast.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("flashcast.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.database.path.is_none());
        assert_eq!(config.analytics.country_code, "55");
        assert_eq!(config.analytics.inactivity_days, 7);
        assert_eq!(config.analytics.top_n, 5);
        assert!(config.analytics.default_period.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[database]
path = "/tmp/flashcast-test.db"

[analytics]
country_code = "351"
inactivity_days = 14
default_period = "15d"

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(
            config.resolved_database_path(),
            PathBuf::from("/tmp/flashcast-test.db")
        );
        assert_eq!(config.analytics.country_code, "351");
        assert_eq!(config.analytics.inactivity_days, 14);
        assert_eq!(config.analytics.top_n, 5);
        assert_eq!(config.analytics.default_period, Some(Period::FifteenDays));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_analytics_config_validation() {
        assert!(AnalyticsConfig::default().validate().is_ok());

        let config = AnalyticsConfig {
            country_code: "+55".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AnalyticsConfig {
            top_n: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inactivity_days_bounds() {
        let within = AnalyticsConfig {
            inactivity_days: MAX_INACTIVITY_DAYS,
            ..Default::default()
        };
        assert!(within.validate().is_ok());

        for days in [-1, MAX_INACTIVITY_DAYS + 1, 200_000_000_000] {
            let config = AnalyticsConfig {
                inactivity_days: days,
                ..Default::default()
            };
            assert!(
                matches!(config.validate(), Err(Error::Config(_))),
                "{days} should be rejected"
            );
        }
    }

    #[test]
    fn test_load_from_rejects_invalid_analytics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[analytics]\ncountry_code = \"\"\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
