//! Change-sets and sync cursors.

use serde::{Deserialize, Serialize};

use crate::event::CanonicalEvent;

/// What a change-set entry does to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Upsert,
    Delete,
}

/// One keyed instruction against the event store.
///
/// Applying the same entry twice leaves the store in the same state as
/// applying it once: upserts replace by `provider_event_id`, deletes of a
/// missing id do nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetEntry {
    pub action: ChangeAction,
    pub provider_event_id: String,
    /// Present for upserts, absent for deletes.
    pub event_data: Option<CanonicalEvent>,
}

impl ChangeSetEntry {
    /// Upsert of `event`, keyed by its provider id.
    pub fn upsert(event: CanonicalEvent) -> Self {
        Self {
            action: ChangeAction::Upsert,
            provider_event_id: event.provider_event_id.clone(),
            event_data: Some(event),
        }
    }

    /// Delete of `provider_event_id`.
    pub fn delete(provider_event_id: impl Into<String>) -> Self {
        Self {
            action: ChangeAction::Delete,
            provider_event_id: provider_event_id.into(),
            event_data: None,
        }
    }

    pub fn is_upsert(&self) -> bool {
        self.action == ChangeAction::Upsert
    }

    pub fn is_delete(&self) -> bool {
        self.action == ChangeAction::Delete
    }
}

/// Per-calendar position in the remote change stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub calendar_id: String,
    /// Collection fingerprint at the last applied sync.
    pub ctag: Option<String>,
    /// Opaque token for the next incremental fetch.
    pub sync_token: Option<String>,
}

impl SyncCursor {
    /// An empty cursor: nothing has been synced yet.
    pub fn new(calendar_id: impl Into<String>) -> Self {
        Self {
            calendar_id: calendar_id.into(),
            ctag: None,
            sync_token: None,
        }
    }

    #[must_use]
    pub fn with_ctag(mut self, ctag: Option<String>) -> Self {
        self.ctag = ctag;
        self
    }

    #[must_use]
    pub fn with_sync_token(mut self, sync_token: Option<String>) -> Self {
        self.sync_token = sync_token;
        self
    }

    /// True when neither a ctag nor a token was ever stored.
    pub fn is_empty(&self) -> bool {
        self.ctag.is_none() && self.sync_token.is_none()
    }

    /// True when an incremental fetch can be attempted.
    pub fn has_token(&self) -> bool {
        self.sync_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}
