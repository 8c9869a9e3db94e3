//! Command-line front-end for davsync.
//!
//! Connections and synced events are kept in a JSON state file; settings
//! come from `config.toml`. See [`cli::Cli`] for the available commands.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod file_store;
pub mod secret;

pub use cli::Cli;
pub use config::DavsyncConfig;
pub use error::{CliError, CliResult};
pub use file_store::FileStore;
