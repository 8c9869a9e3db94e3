//! Event commands: list stored events, push and delete remote ones.

use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use davsync_core::{CanonicalEvent, Recurrence};
use davsync_engine::{ConnectionStore, select_calendar};
use serde::Deserialize;

use super::App;
use crate::error::{CliError, CliResult};

/// Event fields accepted by `davsync push`.
///
/// Leaving `id` empty creates a new event with a generated UID.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventDraft {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub all_day: bool,
    pub description: Option<String>,
    pub location: Option<String>,
    pub timezone: Option<String>,
    /// An `RRULE` value, e.g. `FREQ=WEEKLY;BYDAY=MO`.
    pub rrule: Option<String>,
    /// Etag of the version being replaced, for a conditional update.
    pub etag: Option<String>,
}

impl EventDraft {
    pub fn parse(json: &str) -> CliResult<Self> {
        let draft: Self = serde_json::from_str(json)?;
        if draft.end < draft.start {
            return Err(CliError::Input("event ends before it starts".into()));
        }
        Ok(draft)
    }

    pub fn into_event(self, calendar_id: &str) -> CanonicalEvent {
        let mut event = CanonicalEvent::new(self.id, self.start, self.end, calendar_id)
            .with_title(self.title)
            .with_all_day(self.all_day);
        event.description = self.description;
        event.location = self.location;
        event.timezone = self.timezone;
        event.recurrence = self.rrule.map(Recurrence::new);
        event.etag = self.etag;
        event
    }
}

pub async fn events(app: &App, id: &str, calendar: Option<&str>) -> CliResult<()> {
    let connection = app.store.load_connection(id).await?;
    let calendar = select_calendar(&connection, calendar)?;
    let snapshot = app.store.snapshot().await;
    let mut events = snapshot.events(id, &calendar.id);
    events.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| a.provider_event_id.cmp(&b.provider_event_id))
    });

    app.emit(&events, |events| {
        for event in events {
            let when = if event.all_day {
                event.start.format("%Y-%m-%d").to_string()
            } else {
                event.start.format("%Y-%m-%d %H:%M").to_string()
            };
            let title = if event.title.is_empty() {
                "(no title)"
            } else {
                &event.title
            };
            println!("{when}  {title}  [{}]", event.provider_event_id);
        }
    })
}

/// Sends the event in `file` (`-` for stdin) to the server.
pub async fn push(app: &App, id: &str, file: &Path, calendar: Option<&str>) -> CliResult<()> {
    let json = if file == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(file)?
    };
    let draft = EventDraft::parse(&json)?;

    // The calendar is resolved again by the engine; this only fills metadata.
    let event = draft.into_event(calendar.unwrap_or_default());
    let write = app
        .service()?
        .create_or_update_remote_event(id, &event, calendar)
        .await?;

    app.emit(&write, |write| {
        let verb = if write.created { "Created" } else { "Updated" };
        println!("{verb} {} at {}", write.provider_event_id, write.href);
    })
}

pub async fn delete(app: &App, id: &str, event_id: &str, calendar: Option<&str>) -> CliResult<()> {
    app.service()?
        .delete_remote_event(id, event_id, calendar)
        .await?;
    if !app.json {
        println!("Deleted {event_id}");
    }
    Ok(())
}
