//! What a sync invocation did.

use chrono::{DateTime, Utc};
use davsync_providers::ParseSkip;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncErrorKind};
use crate::state::{SyncMode, SyncState};

/// How a calendar was brought up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// The remote ctag matched; nothing was fetched or written.
    Unchanged,
    Full,
    Incremental,
}

/// A sub-document that could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDocument {
    pub href: String,
    pub uid: Option<String>,
    pub reason: String,
}

impl From<ParseSkip> for SkippedDocument {
    fn from(skip: ParseSkip) -> Self {
        Self {
            href: skip.href,
            uid: skip.uid,
            reason: skip.reason,
        }
    }
}

/// Error recorded against a calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedError {
    pub kind: SyncErrorKind,
    pub message: String,
}

impl From<&SyncError> for ReportedError {
    fn from(error: &SyncError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Outcome for one calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSyncReport {
    pub calendar_id: String,
    pub state: SyncState,
    pub strategy: Option<SyncStrategy>,
    pub upserts: usize,
    pub deletes: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedDocument>,
    /// The stored token was rejected and a full sync ran instead.
    pub token_fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportedError>,
}

impl CalendarSyncReport {
    pub fn new(calendar_id: impl Into<String>) -> Self {
        Self {
            calendar_id: calendar_id.into(),
            state: SyncState::Unsynced,
            strategy: None,
            upserts: 0,
            deletes: 0,
            skipped: Vec::new(),
            token_fallback: false,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.state == SyncState::Synced
    }
}

/// Outcome of one `invoke(provider, mode)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSyncReport {
    pub provider_id: String,
    pub mode: SyncMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub calendars: Vec<CalendarSyncReport>,
}

impl ProviderSyncReport {
    pub fn is_success(&self) -> bool {
        self.calendars.iter().all(CalendarSyncReport::is_success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &CalendarSyncReport> {
        self.calendars.iter().filter(|c| !c.is_success())
    }

    pub fn total_upserts(&self) -> usize {
        self.calendars.iter().map(|c| c.upserts).sum()
    }

    pub fn total_deletes(&self) -> usize {
        self.calendars.iter().map(|c| c.deletes).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.calendars.iter().map(|c| c.skipped.len()).sum()
    }
}
