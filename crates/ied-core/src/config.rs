//! User configuration.
//!
//! Loaded from `~/.ied.yaml`:
//!
//! ```yaml
//! Registry: https://registry.npmjs.com
//! Log Level: warn
//! Log Format: text
//! ```

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Default registry root URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.com";

/// Environment variable that overrides the configured registry.
pub const REGISTRY_ENV: &str = "IED_REGISTRY";

/// Name of the config file in the user's home directory.
pub const CONFIG_FILE_NAME: &str = ".ied.yaml";

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root URL of the CommonJS registry.
    #[serde(rename = "Registry")]
    pub registry: String,

    #[serde(rename = "Log Level")]
    pub log_level: LogLevel,

    #[serde(rename = "Log Format")]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Lower the threshold by `steps` levels (more output), saturating at `Debug`.
    #[must_use]
    pub fn raised_by(self, steps: u8) -> Self {
        let mut level = self;
        for _ in 0..steps {
            level = match level {
                Self::Error => Self::Warn,
                Self::Warn => Self::Info,
                Self::Info | Self::Debug => Self::Debug,
            };
        }
        level
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl LogFormat {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: DEFAULT_REGISTRY.to_string(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Path of the per-user config file.
    pub fn default_path() -> Result<PathBuf, Error> {
        dirs_next::home_dir()
            .map(|home| home.join(CONFIG_FILE_NAME))
            .ok_or(Error::HomeNotFound)
    }

    /// Load configuration from a YAML file.
    ///
    /// Keys missing from the file keep their defaults. A missing file yields
    /// the default configuration.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(Error::ConfigRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        Self::parse(&raw).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from YAML source.
    pub fn parse(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Apply the `IED_REGISTRY` environment override, if set.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(registry) = std::env::var(REGISTRY_ENV) {
            if !registry.is_empty() {
                self.registry = registry;
            }
        }
        self
    }

    /// Set the registry URL.
    #[must_use]
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into();
        self
    }

    /// Set the log level.
    #[must_use]
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Set the log format.
    #[must_use]
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Check that the registry is a usable absolute URL.
    pub fn validate(&self) -> Result<(), Error> {
        if self.registry.is_empty() {
            return Err(Error::MissingRegistry);
        }
        Url::parse(&self.registry).map_err(|source| Error::InvalidRegistry {
            url: self.registry.clone(),
            source,
        })?;
        Ok(())
    }
}
