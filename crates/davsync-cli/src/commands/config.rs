//! Configuration and key commands.

use std::path::Path;

use davsync_engine::AesGcmDecryptor;

use crate::config::DavsyncConfig;
use crate::error::{CliError, CliResult};

/// Prints the effective configuration as TOML, with a literal key masked.
pub fn dump(config: &DavsyncConfig) -> CliResult<()> {
    let toml = toml::to_string_pretty(&config.redacted())
        .map_err(|e| CliError::Config(format!("failed to serialize config: {e}")))?;
    print!("{toml}");
    Ok(())
}

pub fn paths(config_path: &Path, config: &DavsyncConfig, state: Option<&Path>) {
    let state = state
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.state_path());
    println!("config: {}", config_path.display());
    println!("state:  {}", state.display());
}

/// Prints a new master key. Existing credentials stay encrypted with the
/// old one, so connections must be re-added after switching.
pub fn generate_key() {
    println!("{}", AesGcmDecryptor::generate_key());
}
