//! Secret references and the master key.
//!
//! Values in `config.toml` may point at a secret kept elsewhere:
//!
//! - `pass::path/in/store`: first line of `pass show path/in/store`
//! - `env::VAR_NAME`: the value of `$VAR_NAME`
//! - anything else is taken literally

use std::process::Command;

use davsync_engine::AesGcmDecryptor;

use crate::config::DavsyncConfig;
use crate::error::{CliError, CliResult};

/// Environment variable consulted when the config names no master key.
pub const MASTER_KEY_ENV: &str = "DAVSYNC_MASTER_KEY";

/// Where a configured secret lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretRef<'a> {
    Pass(&'a str),
    Env(&'a str),
    Plain(&'a str),
}

impl<'a> SecretRef<'a> {
    pub fn parse(value: &'a str) -> Self {
        if let Some(path) = value.strip_prefix("pass::") {
            Self::Pass(path)
        } else if let Some(var) = value.strip_prefix("env::") {
            Self::Env(var)
        } else {
            Self::Plain(value)
        }
    }

    pub fn resolve(self) -> CliResult<String> {
        match self {
            Self::Plain(value) => Ok(value.to_string()),
            Self::Env(var) => std::env::var(var)
                .map_err(|_| CliError::Config(format!("environment variable `{var}` is not set"))),
            Self::Pass(path) => pass_show(path),
        }
    }
}

/// Resolves a value that may be a secret reference.
pub fn resolve(value: &str) -> CliResult<String> {
    SecretRef::parse(value).resolve()
}

/// Builds the credential cipher from the configured master key.
///
/// The `master_key` setting wins; otherwise `$DAVSYNC_MASTER_KEY` is read.
pub fn master_key(config: &DavsyncConfig) -> CliResult<AesGcmDecryptor> {
    let encoded = match config.master_key.as_deref() {
        Some(reference) => resolve(reference)?,
        None => SecretRef::Env(MASTER_KEY_ENV).resolve().map_err(|_| {
            CliError::Config(format!(
                "no master key: set master_key in config.toml or ${MASTER_KEY_ENV} \
                 (`davsync key generate` prints a fresh one)"
            ))
        })?,
    };
    Ok(AesGcmDecryptor::from_base64(&encoded)?)
}

fn pass_show(path: &str) -> CliResult<String> {
    let output = Command::new("pass")
        .args(["show", path])
        .output()
        .map_err(|e| CliError::Config(format!("cannot run `pass show {path}`: {e}")))?;

    if !output.status.success() {
        return Err(CliError::Config(format!(
            "`pass show {path}` exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_string)
        .ok_or_else(|| CliError::Config(format!("`pass show {path}` printed nothing")))
}
