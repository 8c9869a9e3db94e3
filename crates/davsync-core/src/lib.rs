//! Core types: canonical events, change-sets, connections, tracing

pub mod change;
pub mod connection;
pub mod event;
pub mod tracing;

pub use change::{ChangeAction, ChangeSetEntry, SyncCursor};
pub use connection::{CalendarRef, EncryptedCredential, ProviderConnection, ProviderKind};
pub use event::{
    Attendee, AttendeeStatus, CanonicalEvent, EventMetadata, EventStatus, Organizer, Recurrence,
    OVERRIDE_SEPARATOR, Reminder, ReminderKind, Transparency,
};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
