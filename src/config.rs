//! Configuration loading using Figment.
//!
//! Settings are loaded from:
//! 1. a `labscan.toml` file (base configuration)
//! 2. environment variables (prefixed with `LABSCAN_`, sections separated by
//!    double underscores, e.g. `LABSCAN_STORAGE__DATA_DIR=/tmp/runs`)
//!
//! Everything has a sensible default, so `Settings::default()` is a valid
//! configuration and the file is optional.
//!
//! # Example
//! ```no_run
//! use labscan::config::Settings;
//!
//! # fn main() -> Result<(), figment::Error> {
//! let settings = Settings::load()?;
//! println!("data dir: {}", settings.storage.data_dir.display());
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level crate settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Storage backend settings
    #[serde(default)]
    pub storage: StorageSettings,
    /// Run defaults applied when a run description leaves them unset
    #[serde(default)]
    pub run: RunSettings,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Where and how run files are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory run files are created in (created on demand)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Container backend: "binary" (always available) or "hdf5"
    /// (requires the `storage_hdf5` feature)
    #[serde(default = "default_backend")]
    pub backend: String,
}

/// Defaults for run descriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    /// Pause before the traversal loop starts, used when the run description
    /// does not set its own ("100ms", "2s", ...)
    #[serde(with = "humantime_serde", default)]
    pub initial_pause: Duration,
}

/// Logging settings consumed by [`crate::logging`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("measurements")
}

fn default_backend() -> String {
    "binary".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: default_backend(),
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            initial_pause: Duration::ZERO,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Settings {
    /// Load settings from `labscan.toml` and environment variables.
    ///
    /// Environment variables override the file with prefix `LABSCAN_` and `__`
    /// between sections: `LABSCAN_STORAGE__BACKEND=hdf5`.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("labscan.toml")
    }

    /// Load settings from a specific file path, with env overrides applied.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LABSCAN_").split("__"))
            .extract()
    }

    /// Validate settings after loading.
    pub fn validate(&self) -> Result<(), String> {
        let valid_backends = ["binary", "hdf5"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(format!(
                "Invalid storage backend '{}'. Must be one of: {}",
                self.storage.backend,
                valid_backends.join(", ")
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            ));
        }

        if self.storage.data_dir.as_os_str().is_empty() {
            return Err("storage.data_dir must not be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.storage.backend, "binary");
        assert_eq!(settings.storage.data_dir, PathBuf::from("measurements"));
        assert_eq!(settings.run.initial_pause, Duration::ZERO);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::load_from("does-not-exist.toml").unwrap();
        assert_eq!(settings.storage.backend, "binary");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labscan.toml");
        std::fs::write(
            &path,
            "[storage]\ndata_dir = \"/tmp/runs\"\n\n[run]\ninitial_pause = \"250ms\"\n",
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.storage.data_dir, PathBuf::from("/tmp/runs"));
        assert_eq!(settings.run.initial_pause, Duration::from_millis(250));
        // Sections the file does not mention keep their defaults.
        assert_eq!(settings.storage.backend, "binary");
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn invalid_backend_is_rejected() {
        let mut settings = Settings::default();
        settings.storage.backend = "parquet".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn invalid_log_format_is_rejected() {
        let mut settings = Settings::default();
        settings.logging.format = "xml".to_string();
        assert!(settings.validate().is_err());
    }
}
