use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::purge::PurgePolicy;

/// Main settings structure
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub document: DocumentSettings,
    #[serde(default)]
    pub purge: PurgeSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentSettings {
    /// File the runtime reads its configuration from
    #[serde(default = "default_document_path")]
    pub path: PathBuf,
}

fn default_document_path() -> PathBuf {
    PathBuf::from("vsomeip.json")
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            path: default_document_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurgeSettings {
    /// Remove stale runtime lock files before creating an application
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Glob matched against file names in the lock directory
    #[serde(default = "default_purge_pattern")]
    pub pattern: String,
    /// Lock directory (default: OS temp directory)
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Removal attempts per file
    #[serde(default = "default_purge_retries")]
    pub retries: u32,
    /// Delay between removal attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_purge_pattern() -> String {
    "vsomeip*.lck".to_string()
}

fn default_purge_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for PurgeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            pattern: default_purge_pattern(),
            directory: None,
            retries: default_purge_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl PurgeSettings {
    pub fn policy(&self) -> PurgePolicy {
        PurgePolicy {
            pattern: self.pattern.clone(),
            directory: self
                .directory
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            retries: self.retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            document: DocumentSettings::default(),
            purge: PurgeSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SessionSettings {
    /// Load settings from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load settings from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("document.path", "vsomeip.json")?
            .set_default("purge.enabled", true)?
            .set_default("purge.pattern", default_purge_pattern())?
            .set_default("purge.retries", default_purge_retries() as i64)?
            .set_default("purge.retry_delay_ms", default_retry_delay_ms() as i64)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SOMEIP_SESSION_ENV")
                        .unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SOMEIP_SESSION__PURGE__RETRIES, etc.)
            .add_source(
                Environment::with_prefix("SOMEIP_SESSION")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate settings values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.document.path.as_os_str().is_empty() {
            errors.push("document.path must not be empty".to_string());
        }

        if self.purge.enabled {
            if self.purge.pattern.trim().is_empty() {
                errors.push("purge.pattern must not be empty".to_string());
            }
            if self.purge.retries == 0 {
                errors.push("purge.retries must be at least 1".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = SessionSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.document.path, PathBuf::from("vsomeip.json"));
        assert_eq!(settings.purge.pattern, "vsomeip*.lck");
    }

    #[test]
    fn test_load_from_toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            "[document]\npath = \"/tmp/session.json\"\n\n[purge]\nretries = 5\n",
        )
        .unwrap();

        let settings = SessionSettings::load_from(dir.path()).unwrap();
        assert_eq!(settings.document.path, PathBuf::from("/tmp/session.json"));
        assert_eq!(settings.purge.retries, 5);
        assert_eq!(settings.purge.retry_delay_ms, 1000);
        assert!(settings.purge.enabled);
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let mut settings = SessionSettings::default();
        settings.purge.retries = 0;
        settings.purge.pattern = " ".to_string();

        let errors = settings.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_policy_uses_temp_dir_by_default() {
        let policy = SessionSettings::default().purge.policy();
        assert_eq!(policy.directory, std::env::temp_dir());
        assert_eq!(policy.retry_delay, Duration::from_millis(1000));
    }
}
