//! Connection and calendar commands.

use std::io::BufRead;

use davsync_core::{CalendarRef, ProviderConnection, ProviderKind};
use davsync_engine::ConnectionStore;
use tracing::{info, warn};

use super::App;
use crate::cli::CalendarAction;
use crate::error::{CliError, CliResult};
use crate::secret;

/// Stores a new connection, then authenticates and discovers its calendars.
///
/// Nothing is kept if the server rejects the credentials; a replaced
/// connection is restored.
pub async fn connect(
    app: &App,
    id: &str,
    url: &str,
    username: &str,
    password: Option<String>,
    force: bool,
) -> CliResult<()> {
    let previous = app.store.snapshot().await.connections.remove(id);
    if previous.is_some() && !force {
        return Err(CliError::Input(format!(
            "connection {id} already exists; pass --force to replace it"
        )));
    }
    url::Url::parse(url).map_err(|e| CliError::Input(format!("invalid server URL {url}: {e}")))?;

    let password = match password {
        Some(password) => password,
        None => read_password()?,
    };
    let credential = secret::master_key(&app.config)?.encrypt(&password)?;
    let mut connection =
        ProviderConnection::new(id, ProviderKind::CalDav, username, credential, url);
    // New credentials for the same server keep the calendars and their cursors.
    if let Some(previous) = previous.as_ref().filter(|p| p.server_url == url) {
        connection.calendars = previous.calendars.clone();
        connection.last_sync = previous.last_sync;
    }
    app.store.insert_connection(connection).await?;

    match app.service()?.refresh_calendars(id).await {
        Ok(connection) => {
            info!(connection = id, calendars = connection.calendars.len(), "connected");
            app.emit(&connection.calendars, |calendars| {
                println!("Connected {id} ({} calendars)", calendars.len());
                print_calendars(calendars);
            })
        }
        Err(e) => {
            warn!(connection = id, error = %e, "connect failed, discarding connection");
            match previous {
                Some(previous) => app.store.insert_connection(previous).await?,
                None => {
                    app.store.remove_connection(id).await?;
                }
            }
            Err(e.into())
        }
    }
}

/// Forgets a connection and everything synced from it.
pub async fn disconnect(app: &App, id: &str) -> CliResult<()> {
    let removed = app.store.remove_connection(id).await?;
    if removed.is_none() {
        return Err(CliError::NotFound(format!("connection {id}")));
    }
    if !app.json {
        println!("Removed {id}");
    }
    Ok(())
}

pub async fn calendars(app: &App, id: &str, action: Option<CalendarAction>) -> CliResult<()> {
    let connection = match action.unwrap_or(CalendarAction::List) {
        CalendarAction::List => app.store.load_connection(id).await?,
        CalendarAction::Refresh => app.service()?.refresh_calendars(id).await?,
        CalendarAction::Enable { calendar } => {
            app.store.set_sync_enabled(id, &calendar, true).await?;
            app.store.load_connection(id).await?
        }
        CalendarAction::Disable { calendar } => {
            app.store.set_sync_enabled(id, &calendar, false).await?;
            app.store.load_connection(id).await?
        }
    };
    app.emit(&connection.calendars, |calendars| print_calendars(calendars))
}

pub(crate) fn print_calendars(calendars: &[CalendarRef]) {
    for calendar in calendars {
        let mut flags = Vec::new();
        if calendar.is_primary {
            flags.push("primary");
        }
        if !calendar.sync_enabled {
            flags.push("disabled");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!("  {}  {}{}", calendar.id, calendar.display_name, flags);
    }
}

fn read_password() -> CliResult<String> {
    eprint!("Password: ");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(CliError::Input("empty password".into()));
    }
    Ok(password)
}
