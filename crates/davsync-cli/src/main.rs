//! davsync CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use davsync_core::init_tracing;

use davsync_cli::cli::{Cli, Command, ConfigAction, KeyAction};
use davsync_cli::commands::{self, App};
use davsync_cli::config::DavsyncConfig;
use davsync_cli::error::{CliError, CliResult};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(DavsyncConfig::default_path);
    let config = match cli.config {
        Some(ref path) => DavsyncConfig::load_from(path)?,
        None => DavsyncConfig::load()?,
    };

    init_tracing(config.tracing_config(cli.debug)?)
        .map_err(|e| CliError::Config(e.to_string()))?;

    // Commands that never touch the state file.
    match cli.command {
        Command::Key {
            action: KeyAction::Generate,
        } => {
            commands::config::generate_key();
            return Ok(());
        }
        Command::Config { action } => {
            return match action {
                ConfigAction::Dump => commands::config::dump(&config),
                ConfigAction::Path => {
                    commands::config::paths(&config_path, &config, cli.state.as_deref());
                    Ok(())
                }
            };
        }
        _ => {}
    }

    let app = App::open(config, cli.state, cli.json)?;
    match cli.command {
        Command::Connect {
            id,
            url,
            username,
            password,
            force,
        } => commands::connection::connect(&app, &id, &url, &username, password, force).await,
        Command::Disconnect { id } => commands::connection::disconnect(&app, &id).await,
        Command::Calendars { id, action } => {
            commands::connection::calendars(&app, &id, action).await
        }
        Command::Sync { id, full } => commands::sync::sync(&app, id.as_deref(), full).await,
        Command::Status { id } => commands::sync::status(&app, id.as_deref()).await,
        Command::Events { id, calendar } => {
            commands::event::events(&app, &id, calendar.as_deref()).await
        }
        Command::Push { id, file, calendar } => {
            commands::event::push(&app, &id, &file, calendar.as_deref()).await
        }
        Command::Delete {
            id,
            event_id,
            calendar,
        } => commands::event::delete(&app, &id, &event_id, calendar.as_deref()).await,
        Command::Key { .. } | Command::Config { .. } => Ok(()),
    }
}
