//! Canonical event types.
//!
//! This module provides the provider-agnostic event schema every provider
//! normalizes into and every store persists:
//! - [`CanonicalEvent`]: one event (or one recurrence override)
//! - [`Recurrence`]: the master rule plus its explicit exceptions
//! - [`Attendee`], [`Organizer`], [`Reminder`]: people and alarms
//! - [`EventMetadata`]: where the event lives on the remote side

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of an event.
///
/// Vocabulary outside the four known values maps to [`EventStatus::Unknown`]
/// rather than a guessed default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// The event is confirmed.
    Confirmed,
    /// The event is tentative.
    Tentative,
    /// The event has been cancelled.
    Cancelled,
    /// The provider sent a status we do not recognise.
    Unknown,
}

impl EventStatus {
    /// Maps an iCalendar `STATUS` value.
    pub fn from_ics(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "CONFIRMED" => Self::Confirmed,
            "TENTATIVE" => Self::Tentative,
            "CANCELLED" => Self::Cancelled,
            _ => Self::Unknown,
        }
    }

    /// Returns the iCalendar `STATUS` value, if this status has one.
    pub fn as_ics(&self) -> Option<&'static str> {
        match self {
            Self::Confirmed => Some("CONFIRMED"),
            Self::Tentative => Some("TENTATIVE"),
            Self::Cancelled => Some("CANCELLED"),
            Self::Unknown => None,
        }
    }
}

/// Whether an event blocks time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transparency {
    /// The event blocks time (busy).
    #[default]
    Opaque,
    /// The event does not block time (free).
    Transparent,
}

impl Transparency {
    /// Maps an iCalendar `TRANSP` value. Anything but `TRANSPARENT` is opaque.
    pub fn from_ics(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("TRANSPARENT") {
            Self::Transparent
        } else {
            Self::Opaque
        }
    }

    /// Returns the iCalendar `TRANSP` value.
    pub fn as_ics(&self) -> &'static str {
        match self {
            Self::Opaque => "OPAQUE",
            Self::Transparent => "TRANSPARENT",
        }
    }
}

/// Participation status of an attendee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendeeStatus {
    /// The attendee has accepted.
    Accepted,
    /// The attendee has declined.
    Declined,
    /// The attendee has tentatively accepted.
    Tentative,
    /// The attendee has delegated.
    Delegated,
    /// The attendee has not responded yet.
    NeedsAction,
    /// No status, or one we do not recognise.
    #[default]
    Unknown,
}

impl AttendeeStatus {
    /// Maps an iCalendar `PARTSTAT` parameter value.
    pub fn from_ics(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "ACCEPTED" => Self::Accepted,
            "DECLINED" => Self::Declined,
            "TENTATIVE" => Self::Tentative,
            "DELEGATED" => Self::Delegated,
            "NEEDS-ACTION" => Self::NeedsAction,
            _ => Self::Unknown,
        }
    }

    /// Returns the iCalendar `PARTSTAT` value, if this status has one.
    pub fn as_ics(&self) -> Option<&'static str> {
        match self {
            Self::Accepted => Some("ACCEPTED"),
            Self::Declined => Some("DECLINED"),
            Self::Tentative => Some("TENTATIVE"),
            Self::Delegated => Some("DELEGATED"),
            Self::NeedsAction => Some("NEEDS-ACTION"),
            Self::Unknown => None,
        }
    }
}

/// An attendee of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    /// Email address, without the `mailto:` prefix.
    pub email: String,
    /// Display name (`CN`).
    pub name: Option<String>,
    /// Participation status (`PARTSTAT`).
    pub status: AttendeeStatus,
    /// Whether the attendee is optional (`ROLE=OPT-PARTICIPANT`).
    pub optional: bool,
}

impl Attendee {
    /// Creates a required attendee with an unknown status.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
            status: AttendeeStatus::Unknown,
            optional: false,
        }
    }

    /// Builder method to set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder method to set the participation status.
    pub fn with_status(mut self, status: AttendeeStatus) -> Self {
        self.status = status;
        self
    }

    /// Builder method to mark the attendee optional.
    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }
}

/// The organizer of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organizer {
    /// Email address, without the `mailto:` prefix.
    pub email: String,
    /// Display name (`CN`).
    pub name: Option<String>,
}

/// Kind of reminder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    /// On-screen notification (`ACTION:DISPLAY`).
    #[default]
    Display,
    /// Email (`ACTION:EMAIL`).
    Email,
    /// Sound (`ACTION:AUDIO`).
    Audio,
}

impl ReminderKind {
    /// Maps an iCalendar `ACTION` value. Unknown actions are displayed.
    pub fn from_ics(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "EMAIL" => Self::Email,
            "AUDIO" => Self::Audio,
            _ => Self::Display,
        }
    }

    /// Returns the iCalendar `ACTION` value.
    pub fn as_ics(&self) -> &'static str {
        match self {
            Self::Display => "DISPLAY",
            Self::Email => "EMAIL",
            Self::Audio => "AUDIO",
        }
    }
}

/// A reminder relative to the event start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    /// How the reminder is delivered.
    #[serde(rename = "type")]
    pub kind: ReminderKind,
    /// Minutes before the start. Negative values fire after the start.
    pub minutes_before: i64,
}

/// A recurrence rule with its explicit exceptions.
///
/// Occurrences are never materialized; the rule is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    /// The `RRULE` value, e.g. `FREQ=WEEKLY;BYDAY=MO`.
    pub rule: String,
    /// Excluded occurrence instants (`EXDATE`).
    pub exceptions: Vec<DateTime<Utc>>,
}

impl Recurrence {
    /// Creates a recurrence without exceptions.
    pub fn new(rule: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            exceptions: Vec::new(),
        }
    }
}

/// Where an event lives on the remote side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// The calendar collection the event belongs to.
    pub calendar_id: String,
    /// Display name of that calendar.
    pub calendar_name: Option<String>,
    /// The resource URL holding the event document.
    pub remote_url: Option<String>,
}

/// Separator between the UID and the recurrence id of an override.
pub const OVERRIDE_SEPARATOR: &str = "::";

/// A provider-agnostic event.
///
/// `provider_event_id` is the stable remote identity and is unique within a
/// provider and calendar. For a recurrence override it is
/// `"{uid}::{recurrence-id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Stable remote identity.
    pub provider_event_id: String,
    /// Event title (`SUMMARY`). Empty when the source had none.
    pub title: String,
    /// Description.
    pub description: Option<String>,
    /// Start instant. All-day events start at midnight UTC of their date.
    pub start: DateTime<Utc>,
    /// End instant (exclusive).
    pub end: DateTime<Utc>,
    /// Whether the event is date-only.
    pub all_day: bool,
    /// Source timezone identifier (`TZID`), if one was given.
    pub timezone: Option<String>,
    /// Location.
    pub location: Option<String>,
    /// Status, `None` when the source did not say.
    pub status: Option<EventStatus>,
    /// Recurrence rule and exceptions, for masters only.
    pub recurrence: Option<Recurrence>,
    /// Original start of the occurrence this override replaces.
    pub recurrence_id: Option<DateTime<Utc>>,
    /// Reminders.
    pub reminders: Vec<Reminder>,
    /// Attendees.
    pub attendees: Vec<Attendee>,
    /// Organizer.
    pub organizer: Option<Organizer>,
    /// Busy/free.
    pub transparency: Transparency,
    /// Revision counter (`SEQUENCE`).
    pub sequence: Option<i64>,
    /// Last modification (`LAST-MODIFIED`).
    pub last_modified: Option<DateTime<Utc>>,
    /// Remote fingerprint of the containing resource.
    pub etag: Option<String>,
    /// Remote location.
    pub metadata: EventMetadata,
}

impl CanonicalEvent {
    /// Creates an event with the minimum required fields.
    pub fn new(
        provider_event_id: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        calendar_id: impl Into<String>,
    ) -> Self {
        Self {
            provider_event_id: provider_event_id.into(),
            title: String::new(),
            description: None,
            start,
            end,
            all_day: false,
            timezone: None,
            location: None,
            status: None,
            recurrence: None,
            recurrence_id: None,
            reminders: Vec::new(),
            attendees: Vec::new(),
            organizer: None,
            transparency: Transparency::Opaque,
            sequence: None,
            last_modified: None,
            etag: None,
            metadata: EventMetadata {
                calendar_id: calendar_id.into(),
                ..Default::default()
            },
        }
    }

    /// Builds the id of a recurrence override.
    pub fn override_id(uid: &str, recurrence_id: DateTime<Utc>) -> String {
        format!(
            "{}{}{}",
            uid,
            OVERRIDE_SEPARATOR,
            recurrence_id.format("%Y%m%dT%H%M%SZ")
        )
    }

    /// Returns the UID part of the provider event id.
    pub fn uid(&self) -> &str {
        self.provider_event_id
            .split_once(OVERRIDE_SEPARATOR)
            .map(|(uid, _)| uid)
            .unwrap_or(&self.provider_event_id)
    }

    /// Returns true if this event overrides one occurrence of a series.
    pub fn is_override(&self) -> bool {
        self.recurrence_id.is_some()
    }

    /// Returns true if the event has a recurrence rule.
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    /// Builder method to set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Builder method to set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder method to set the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Builder method to set the status.
    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Builder method to mark the event all-day.
    pub fn with_all_day(mut self, all_day: bool) -> Self {
        self.all_day = all_day;
        self
    }

    /// Builder method to set the recurrence.
    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = Some(recurrence);
        self
    }

    /// Builder method to add an attendee.
    pub fn with_attendee(mut self, attendee: Attendee) -> Self {
        self.attendees.push(attendee);
        self
    }

    /// Builder method to add a reminder.
    pub fn with_reminder(mut self, reminder: Reminder) -> Self {
        self.reminders.push(reminder);
        self
    }

    /// Builder method to set the etag.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Builder method to set the remote URL.
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.metadata.remote_url = Some(url.into());
        self
    }

    /// Builder method to set the calendar display name.
    pub fn with_calendar_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.calendar_name = Some(name.into());
        self
    }
}
