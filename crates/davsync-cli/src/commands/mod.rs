//! Subcommand implementations.

pub mod config;
pub mod connection;
pub mod event;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use davsync_engine::SyncService;
use serde::Serialize;

use crate::config::DavsyncConfig;
use crate::error::CliResult;
use crate::file_store::FileStore;
use crate::secret;

/// What every command works with: settings, the state file, output mode.
pub struct App {
    pub config: DavsyncConfig,
    pub store: Arc<FileStore>,
    pub json: bool,
}

impl App {
    /// Opens the state file named by `state`, or the configured one.
    pub fn open(config: DavsyncConfig, state: Option<PathBuf>, json: bool) -> CliResult<Self> {
        let path = state.unwrap_or_else(|| config.state_path());
        let store = Arc::new(FileStore::open(path)?);
        Ok(Self {
            config,
            store,
            json,
        })
    }

    /// A sync service over the state file. Needs the master key.
    pub fn service(&self) -> CliResult<SyncService> {
        let decryptor = secret::master_key(&self.config)?;
        Ok(SyncService::new(
            self.config.engine_config(),
            self.store.clone(),
            Arc::new(decryptor),
        ))
    }

    /// Prints `value` as JSON in `--json` mode, otherwise runs `human`.
    pub fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> CliResult<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human(value);
        }
        Ok(())
    }
}
