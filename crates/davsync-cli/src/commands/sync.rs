//! Sync and status commands.

use chrono::{DateTime, Utc};
use davsync_engine::{CalendarSyncReport, ProviderSyncReport, SyncMode, SyncStrategy};
use serde::Serialize;
use tracing::error;

use super::App;
use crate::error::{CliError, CliResult};

/// Syncs one connection, or every stored connection when `id` is `None`.
///
/// With a single connection, errors that stop the whole connection are
/// returned as-is so the exit code reflects them. Across all connections
/// such errors are logged and counted.
pub async fn sync(app: &App, id: Option<&str>, full: bool) -> CliResult<()> {
    let mode = if full { SyncMode::Full } else { SyncMode::Auto };
    let service = app.service()?;

    let ids: Vec<String> = match id {
        Some(id) => vec![id.to_string()],
        None => app.store.snapshot().await.connections.into_keys().collect(),
    };
    if ids.is_empty() {
        return Err(CliError::Config(
            "no connections; add one with `davsync connect`".into(),
        ));
    }

    let mut reports = Vec::with_capacity(ids.len());
    let mut failed = 0;
    let mut total = 0;
    for provider_id in &ids {
        match service.invoke(provider_id, mode).await {
            Ok(report) => {
                total += report.calendars.len();
                failed += report.failed().count();
                reports.push(report);
            }
            Err(e) if id.is_some() => return Err(e.into()),
            Err(e) => {
                error!(connection = %provider_id, error = %e, "sync failed");
                if !app.json {
                    eprintln!("{provider_id}: {e}");
                }
                total += 1;
                failed += 1;
            }
        }
    }

    app.emit(&reports, |reports| {
        for report in reports {
            print_report(report);
        }
    })?;

    if failed > 0 {
        return Err(CliError::Incomplete { failed, total });
    }
    Ok(())
}

fn print_report(report: &ProviderSyncReport) {
    println!(
        "{}: {} upserted, {} deleted, {} skipped",
        report.provider_id,
        report.total_upserts(),
        report.total_deletes(),
        report.total_skipped()
    );
    for calendar in &report.calendars {
        println!("  {}", calendar_line(calendar));
        for skip in &calendar.skipped {
            println!(
                "    skipped {} ({}): {}",
                skip.href,
                skip.uid.as_deref().unwrap_or("no uid"),
                skip.reason
            );
        }
    }
}

fn calendar_line(calendar: &CalendarSyncReport) -> String {
    if let Some(ref error) = calendar.error {
        return format!("{}  failed ({}): {}", calendar.calendar_id, error.kind, error.message);
    }
    let strategy = match calendar.strategy {
        Some(SyncStrategy::Unchanged) => return format!("{}  unchanged", calendar.calendar_id),
        Some(SyncStrategy::Full) if calendar.token_fallback => "full, token rejected",
        Some(SyncStrategy::Full) => "full",
        Some(SyncStrategy::Incremental) => "incremental",
        None => "not run",
    };
    format!(
        "{}  {strategy}: +{} -{}",
        calendar.calendar_id, calendar.upserts, calendar.deletes
    )
}

#[derive(Debug, Serialize)]
struct ConnectionStatus {
    id: String,
    kind: String,
    username: String,
    server_url: String,
    last_sync: Option<DateTime<Utc>>,
    needs_reauth: bool,
    calendars: Vec<CalendarStatus>,
}

#[derive(Debug, Serialize)]
struct CalendarStatus {
    id: String,
    name: String,
    sync_enabled: bool,
    ctag: Option<String>,
    sync_token: Option<String>,
    events: usize,
}

/// Shows what the state file knows; never talks to a server.
pub async fn status(app: &App, id: Option<&str>) -> CliResult<()> {
    let snapshot = app.store.snapshot().await;
    if let Some(id) = id {
        snapshot.connection(id)?;
    }

    let statuses: Vec<ConnectionStatus> = snapshot
        .connections
        .values()
        .filter(|c| id.is_none_or(|id| c.id == id))
        .map(|connection| ConnectionStatus {
            id: connection.id.clone(),
            kind: connection.kind.to_string(),
            username: connection.username.clone(),
            server_url: connection.server_url.clone(),
            last_sync: connection.last_sync,
            needs_reauth: connection.needs_reauth,
            calendars: connection
                .calendars
                .iter()
                .map(|calendar| CalendarStatus {
                    id: calendar.id.clone(),
                    name: calendar.display_name.clone(),
                    sync_enabled: calendar.sync_enabled,
                    ctag: calendar.ctag.clone(),
                    sync_token: calendar.sync_token.clone(),
                    events: snapshot.events(&connection.id, &calendar.id).len(),
                })
                .collect(),
        })
        .collect();

    app.emit(&statuses, |statuses| {
        if statuses.is_empty() {
            println!("No connections");
        }
        for status in statuses {
            print_status(status);
        }
    })
}

fn print_status(status: &ConnectionStatus) {
    let last_sync = status
        .last_sync
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "{} ({}) {}@{}",
        status.id, status.kind, status.username, status.server_url
    );
    println!("  last sync: {last_sync}");
    if status.needs_reauth {
        println!("  credentials rejected; run `davsync connect {} --force`", status.id);
    }
    for calendar in &status.calendars {
        let cursor = match (&calendar.sync_token, &calendar.ctag) {
            (Some(_), _) => "token",
            (None, Some(_)) => "ctag only",
            (None, None) => "unsynced",
        };
        println!(
            "  {}  {}  {} events, {}{}",
            calendar.id,
            calendar.name,
            calendar.events,
            cursor,
            if calendar.sync_enabled { "" } else { ", disabled" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use davsync_engine::{ReportedError, SyncErrorKind, SyncState};

    #[test]
    fn calendar_lines() {
        let mut report = CalendarSyncReport::new("/cal/");
        report.state = SyncState::Synced;
        report.strategy = Some(SyncStrategy::Full);
        report.token_fallback = true;
        report.upserts = 3;
        assert_eq!(calendar_line(&report), "/cal/  full, token rejected: +3 -0");

        report.strategy = Some(SyncStrategy::Unchanged);
        assert_eq!(calendar_line(&report), "/cal/  unchanged");

        report.error = Some(ReportedError {
            kind: SyncErrorKind::TransientNetwork,
            message: "timed out".into(),
        });
        assert!(calendar_line(&report).starts_with("/cal/  failed ("));
        assert!(calendar_line(&report).ends_with("timed out"));
    }
}
