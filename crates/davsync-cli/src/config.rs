//! CLI configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/davsync/config.toml` by default. Connections themselves are
//! not configured here; they live in the state file, created by
//! `davsync connect`.
//!
//! `master_key` supports secret references (`pass::…`, `env::…`).

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use davsync_core::{TracingConfig, TracingOutputFormat};
use davsync_engine::EngineConfig;
use davsync_providers::caldav::CalDavConfig;
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::error::{CliError, CliResult};

/// Configuration for the davsync CLI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DavsyncConfig {
    /// Base64 AES-256 key protecting stored passwords (supports `pass::`
    /// and `env::` prefixes). Falls back to `$DAVSYNC_MASTER_KEY`.
    pub master_key: Option<String>,

    /// Where connections and events are kept.
    pub state_file: Option<PathBuf>,

    pub caldav: CalDavSettings,

    pub sync: SyncSettings,

    pub log: LogSettings,
}

/// HTTP settings for CalDAV servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalDavSettings {
    /// Request timeout in seconds.
    pub timeout: u64,

    pub user_agent: Option<String>,

    /// Set to false for self-signed test servers only.
    pub verify_tls: bool,

    /// Hrefs per `calendar-multiget` request.
    pub multiget_batch_size: usize,
}

impl Default for CalDavSettings {
    fn default() -> Self {
        Self {
            timeout: CalDavConfig::DEFAULT_TIMEOUT_SECS,
            user_agent: None,
            verify_tls: true,
            multiget_batch_size: CalDavConfig::DEFAULT_MULTIGET_BATCH_SIZE,
        }
    }
}

/// Sync behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Refresh the calendar list on every sync.
    pub discover_calendars: bool,

    /// Calendars of one connection synced at the same time.
    pub max_concurrent_calendars: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            discover_calendars: true,
            max_concurrent_calendars: 1,
        }
    }
}

/// Log output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `error`, `warn`, `info`, `debug` or `trace`.
    pub level: String,

    /// `pretty`, `compact` or `json`.
    pub format: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl DavsyncConfig {
    /// Loads configuration from the default path, or defaults if absent.
    pub fn load() -> CliResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> CliResult<Self> {
        toml::from_str(content).map_err(|e| CliError::Config(format!("failed to parse config: {e}")))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("davsync")
    }

    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("davsync")
    }

    /// The state file in use.
    pub fn state_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("state.json"))
    }

    /// Engine settings derived from this file.
    pub fn engine_config(&self) -> EngineConfig {
        let mut caldav = CalDavConfig::new()
            .with_timeout(Duration::from_secs(self.caldav.timeout.max(1)))
            .with_multiget_batch_size(self.caldav.multiget_batch_size);
        if let Some(ref user_agent) = self.caldav.user_agent {
            caldav = caldav.with_user_agent(user_agent.clone());
        }
        if !self.caldav.verify_tls {
            caldav = caldav.with_insecure_tls();
        }

        EngineConfig::new()
            .with_caldav(caldav)
            .with_discovery(self.sync.discover_calendars)
            .with_max_concurrent_calendars(self.sync.max_concurrent_calendars)
    }

    /// Log setup; `debug` forces debug level.
    pub fn tracing_config(&self, debug: bool) -> CliResult<TracingConfig> {
        let format = TracingOutputFormat::from_str(&self.log.format).map_err(CliError::Config)?;
        if debug {
            return Ok(TracingConfig::verbose().with_format(format));
        }
        let level = Level::from_str(&self.log.level)
            .map_err(|_| CliError::Config(format!("unknown log level: {}", self.log.level)))?;
        Ok(TracingConfig::default()
            .with_level(level)
            .with_format(format))
    }

    /// A copy safe to print: a literal master key is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let literal = copy
            .master_key
            .as_deref()
            .is_some_and(|key| !key.starts_with("pass::") && !key.starts_with("env::"));
        if literal {
            copy.master_key = Some("<redacted>".to_string());
        }
        copy
    }
}
