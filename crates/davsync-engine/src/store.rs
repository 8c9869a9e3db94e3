//! Event and connection persistence.
//!
//! The engine talks to storage through [`EventStore`] and
//! [`ConnectionStore`]. [`StoreSnapshot`] holds the whole state in plain
//! maps and implements the semantics once; [`MemoryStore`] keeps it in
//! memory and file-backed stores serialize it.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use davsync_core::{
    CalendarRef, CanonicalEvent, ChangeAction, ChangeSetEntry, ProviderConnection, SyncCursor,
};
use davsync_providers::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("invalid change-set: {message}")]
    InvalidChangeSet { message: String },

    #[error("storage backend error: {message}")]
    Backend { message: String },
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Hrefs of the remote resources a calendar's events came from, mapped to
/// the event ids each one produced.
pub type ResourceIndex = HashMap<String, Vec<String>>;

/// Storage for canonical events.
pub trait EventStore: Send + Sync {
    /// Applies a change-set and records `cursor` with it, all or nothing.
    ///
    /// Upserts replace by `provider_event_id`; deleting an unknown id is a
    /// no-op, so applying the same change-set twice leaves the same state.
    fn sync_events<'a>(
        &'a self,
        provider_id: &'a str,
        calendar_id: &'a str,
        entries: &'a [ChangeSetEntry],
        cursor: &'a SyncCursor,
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Remote href to event ids for one calendar.
    fn resource_index<'a>(
        &'a self,
        provider_id: &'a str,
        calendar_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<ResourceIndex>>;

    /// The stored events among `event_ids`; unknown ids are left out.
    fn load_events<'a>(
        &'a self,
        provider_id: &'a str,
        calendar_id: &'a str,
        event_ids: &'a [String],
    ) -> BoxFuture<'a, StoreResult<Vec<CanonicalEvent>>>;
}

/// Storage for provider connections and their calendars.
pub trait ConnectionStore: Send + Sync {
    fn load_connection<'a>(
        &'a self,
        provider_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<ProviderConnection>>;

    /// Merges discovered calendars into the connection and returns the result.
    fn merge_calendars<'a>(
        &'a self,
        provider_id: &'a str,
        discovered: Vec<CalendarRef>,
    ) -> BoxFuture<'a, StoreResult<ProviderConnection>>;

    fn update_cursor<'a>(
        &'a self,
        provider_id: &'a str,
        cursor: &'a SyncCursor,
    ) -> BoxFuture<'a, StoreResult<()>>;

    fn update_last_sync<'a>(
        &'a self,
        provider_id: &'a str,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, StoreResult<()>>;

    fn mark_needs_reauth<'a>(
        &'a self,
        provider_id: &'a str,
        needs_reauth: bool,
    ) -> BoxFuture<'a, StoreResult<()>>;
}

/// Both halves of the storage contract.
pub trait Store: EventStore + ConnectionStore {}

impl<T: EventStore + ConnectionStore> Store for T {}

/// The complete stored state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub connections: BTreeMap<String, ProviderConnection>,
    /// provider id, then calendar id, then event id.
    pub events: BTreeMap<String, BTreeMap<String, BTreeMap<String, CanonicalEvent>>>,
}

impl StoreSnapshot {
    pub fn connection(&self, provider_id: &str) -> StoreResult<&ProviderConnection> {
        self.connections
            .get(provider_id)
            .ok_or_else(|| StoreError::not_found(format!("connection {provider_id}")))
    }

    fn connection_mut(&mut self, provider_id: &str) -> StoreResult<&mut ProviderConnection> {
        self.connections
            .get_mut(provider_id)
            .ok_or_else(|| StoreError::not_found(format!("connection {provider_id}")))
    }

    pub fn insert_connection(&mut self, connection: ProviderConnection) {
        self.connections.insert(connection.id.clone(), connection);
    }

    /// Removes a connection together with its events.
    pub fn remove_connection(&mut self, provider_id: &str) -> Option<ProviderConnection> {
        self.events.remove(provider_id);
        self.connections.remove(provider_id)
    }

    /// Events of one calendar, ordered by id.
    pub fn events(&self, provider_id: &str, calendar_id: &str) -> Vec<&CanonicalEvent> {
        self.events
            .get(provider_id)
            .and_then(|cals| cals.get(calendar_id))
            .map(|events| events.values().collect())
            .unwrap_or_default()
    }

    pub fn event(
        &self,
        provider_id: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Option<&CanonicalEvent> {
        self.events
            .get(provider_id)?
            .get(calendar_id)?
            .get(event_id)
    }

    /// Applies a change-set. Nothing is changed if any entry is invalid.
    /// Within the batch an upsert beats a delete of the same id.
    pub fn apply(
        &mut self,
        provider_id: &str,
        calendar_id: &str,
        entries: &[ChangeSetEntry],
        cursor: &SyncCursor,
    ) -> StoreResult<()> {
        self.connection(provider_id)?;
        if let Some(entry) = entries
            .iter()
            .find(|e| e.action == ChangeAction::Upsert && e.event_data.is_none())
        {
            return Err(StoreError::InvalidChangeSet {
                message: format!("upsert of {} carries no event", entry.provider_event_id),
            });
        }

        let events = self
            .events
            .entry(provider_id.to_string())
            .or_default()
            .entry(calendar_id.to_string())
            .or_default();

        // Entries are unordered: deletes go first so an upsert of the same
        // id in the batch always wins.
        for entry in entries.iter().filter(|e| e.is_delete()) {
            events.remove(&entry.provider_event_id);
        }
        for entry in entries {
            if let (ChangeAction::Upsert, Some(event)) = (&entry.action, &entry.event_data) {
                events.insert(entry.provider_event_id.clone(), event.clone());
            }
        }

        self.set_cursor(provider_id, cursor)
    }

    pub fn load_events(
        &self,
        provider_id: &str,
        calendar_id: &str,
        event_ids: &[String],
    ) -> Vec<CanonicalEvent> {
        event_ids
            .iter()
            .filter_map(|id| self.event(provider_id, calendar_id, id).cloned())
            .collect()
    }

    pub fn resource_index(&self, provider_id: &str, calendar_id: &str) -> ResourceIndex {
        let mut index = ResourceIndex::new();
        for event in self.events(provider_id, calendar_id) {
            if let Some(ref href) = event.metadata.remote_url {
                index
                    .entry(href.clone())
                    .or_default()
                    .push(event.provider_event_id.clone());
            }
        }
        index
    }

    pub fn merge_calendars(
        &mut self,
        provider_id: &str,
        discovered: Vec<CalendarRef>,
    ) -> StoreResult<ProviderConnection> {
        let connection = self.connection_mut(provider_id)?;
        connection.merge_calendars(discovered);
        Ok(connection.clone())
    }

    pub fn set_cursor(&mut self, provider_id: &str, cursor: &SyncCursor) -> StoreResult<()> {
        let connection = self.connection_mut(provider_id)?;
        let calendar = connection
            .calendar_mut(&cursor.calendar_id)
            .ok_or_else(|| StoreError::not_found(format!("calendar {}", cursor.calendar_id)))?;
        calendar.set_cursor(cursor);
        Ok(())
    }

    pub fn set_last_sync(&mut self, provider_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.connection_mut(provider_id)?.last_sync = Some(at);
        Ok(())
    }

    pub fn set_needs_reauth(&mut self, provider_id: &str, needs_reauth: bool) -> StoreResult<()> {
        self.connection_mut(provider_id)?.needs_reauth = needs_reauth;
        Ok(())
    }
}

/// In-memory store.
///
/// Counts writes and can be told to fail the next apply, which makes it the
/// store of choice for exercising the engine.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreSnapshot>,
    fail_next_apply: AtomicBool,
    event_writes: AtomicUsize,
    cursor_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    pub async fn insert_connection(&self, connection: ProviderConnection) {
        self.state.lock().await.insert_connection(connection);
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.state.lock().await.clone()
    }

    /// The next [`EventStore::sync_events`] fails without changing anything.
    pub fn fail_next_apply(&self) {
        self.fail_next_apply.store(true, Ordering::SeqCst);
    }

    /// Successful change-set applications so far.
    pub fn event_writes(&self) -> usize {
        self.event_writes.load(Ordering::SeqCst)
    }

    /// Cursor updates so far, through either trait.
    pub fn cursor_writes(&self) -> usize {
        self.cursor_writes.load(Ordering::SeqCst)
    }
}

impl EventStore for MemoryStore {
    fn sync_events<'a>(
        &'a self,
        provider_id: &'a str,
        calendar_id: &'a str,
        entries: &'a [ChangeSetEntry],
        cursor: &'a SyncCursor,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            if self.fail_next_apply.swap(false, Ordering::SeqCst) {
                return Err(StoreError::backend("injected apply failure"));
            }
            let mut state = self.state.lock().await;
            // Apply on a copy so a failure leaves the state untouched.
            let mut next = state.clone();
            next.apply(provider_id, calendar_id, entries, cursor)?;
            *state = next;

            self.event_writes.fetch_add(1, Ordering::SeqCst);
            self.cursor_writes.fetch_add(1, Ordering::SeqCst);
            debug!(
                provider = provider_id,
                calendar = calendar_id,
                entries = entries.len(),
                "applied change-set"
            );
            Ok(())
        })
    }

    fn resource_index<'a>(
        &'a self,
        provider_id: &'a str,
        calendar_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<ResourceIndex>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .await
                .resource_index(provider_id, calendar_id))
        })
    }

    fn load_events<'a>(
        &'a self,
        provider_id: &'a str,
        calendar_id: &'a str,
        event_ids: &'a [String],
    ) -> BoxFuture<'a, StoreResult<Vec<CanonicalEvent>>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .await
                .load_events(provider_id, calendar_id, event_ids))
        })
    }
}

impl ConnectionStore for MemoryStore {
    fn load_connection<'a>(
        &'a self,
        provider_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<ProviderConnection>> {
        Box::pin(async move { self.state.lock().await.connection(provider_id).cloned() })
    }

    fn merge_calendars<'a>(
        &'a self,
        provider_id: &'a str,
        discovered: Vec<CalendarRef>,
    ) -> BoxFuture<'a, StoreResult<ProviderConnection>> {
        Box::pin(async move {
            self.state
                .lock()
                .await
                .merge_calendars(provider_id, discovered)
        })
    }

    fn update_cursor<'a>(
        &'a self,
        provider_id: &'a str,
        cursor: &'a SyncCursor,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.state.lock().await.set_cursor(provider_id, cursor)?;
            self.cursor_writes.fetch_add(1, Ordering::SeqCst);
            trace!(provider = provider_id, calendar = %cursor.calendar_id, "cursor updated");
            Ok(())
        })
    }

    fn update_last_sync<'a>(
        &'a self,
        provider_id: &'a str,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move { self.state.lock().await.set_last_sync(provider_id, at) })
    }

    fn mark_needs_reauth<'a>(
        &'a self,
        provider_id: &'a str,
        needs_reauth: bool,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.state
                .lock()
                .await
                .set_needs_reauth(provider_id, needs_reauth)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use davsync_core::{EncryptedCredential, ProviderKind};

    const CAL: &str = "https://dav.example.com/cal/";

    fn connection() -> ProviderConnection {
        let mut conn = ProviderConnection::new(
            "p1",
            ProviderKind::CalDav,
            "alice",
            EncryptedCredential::default(),
            "https://dav.example.com/",
        );
        conn.calendars.push(CalendarRef::new(CAL, "Work"));
        conn
    }

    fn event(id: &str, href: &str) -> CanonicalEvent {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        CanonicalEvent::new(id, start, start, CAL).with_remote_url(href)
    }

    fn cursor(token: &str) -> SyncCursor {
        SyncCursor::new(CAL).with_sync_token(Some(token.to_string()))
    }

    #[tokio::test]
    async fn apply_is_idempotent() {
        let store = MemoryStore::new();
        store.insert_connection(connection()).await;

        let entries = vec![
            ChangeSetEntry::upsert(event("a", "/cal/a.ics")),
            ChangeSetEntry::upsert(event("b", "/cal/b.ics")),
            ChangeSetEntry::delete("missing"),
        ];
        store.sync_events("p1", CAL, &entries, &cursor("t1")).await.unwrap();
        let once = store.snapshot().await;
        store.sync_events("p1", CAL, &entries, &cursor("t1")).await.unwrap();
        let twice = store.snapshot().await;

        assert_eq!(once, twice);
        assert_eq!(once.events("p1", CAL).len(), 2);
        assert_eq!(
            once.connection("p1").unwrap().calendars[0].sync_token.as_deref(),
            Some("t1")
        );
    }

    #[tokio::test]
    async fn upsert_wins_over_delete_in_either_order() {
        let store = MemoryStore::new();
        store.insert_connection(connection()).await;
        store
            .sync_events("p1", CAL, &[ChangeSetEntry::upsert(event("m", "/cal/old.ics"))], &cursor("t1"))
            .await
            .unwrap();

        let moved = ChangeSetEntry::upsert(event("m", "/cal/new.ics"));
        for entries in [
            vec![moved.clone(), ChangeSetEntry::delete("m")],
            vec![ChangeSetEntry::delete("m"), moved.clone()],
        ] {
            store.sync_events("p1", CAL, &entries, &cursor("t2")).await.unwrap();
            let snapshot = store.snapshot().await;
            let stored = snapshot.event("p1", CAL, "m").expect("event kept");
            assert_eq!(stored.metadata.remote_url.as_deref(), Some("/cal/new.ics"));
        }
    }

    #[tokio::test]
    async fn invalid_change_set_changes_nothing() {
        let store = MemoryStore::new();
        store.insert_connection(connection()).await;

        let mut bad = ChangeSetEntry::upsert(event("a", "/cal/a.ics"));
        bad.event_data = None;
        let entries = vec![ChangeSetEntry::upsert(event("b", "/cal/b.ics")), bad];

        let err = store
            .sync_events("p1", CAL, &entries, &cursor("t1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidChangeSet { .. }));

        let snapshot = store.snapshot().await;
        assert!(snapshot.events("p1", CAL).is_empty());
        assert!(snapshot.connection("p1").unwrap().calendars[0].sync_token.is_none());
        assert_eq!(store.event_writes(), 0);
    }

    #[tokio::test]
    async fn injected_failure_hits_once() {
        let store = MemoryStore::new();
        store.insert_connection(connection()).await;
        store.fail_next_apply();

        let entries = vec![ChangeSetEntry::upsert(event("a", "/cal/a.ics"))];
        assert!(store.sync_events("p1", CAL, &entries, &cursor("t1")).await.is_err());
        assert!(store.sync_events("p1", CAL, &entries, &cursor("t1")).await.is_ok());
        assert_eq!(store.event_writes(), 1);
    }

    #[tokio::test]
    async fn resource_index_groups_by_href() {
        let store = MemoryStore::new();
        store.insert_connection(connection()).await;

        let entries = vec![
            ChangeSetEntry::upsert(event("series", "/cal/series.ics")),
            ChangeSetEntry::upsert(event("series::20250108T090000Z", "/cal/series.ics")),
            ChangeSetEntry::upsert(event("solo", "/cal/solo.ics")),
        ];
        store.sync_events("p1", CAL, &entries, &cursor("t1")).await.unwrap();

        let index = store.resource_index("p1", CAL).await.unwrap();
        assert_eq!(index.len(), 2);
        let mut series = index["/cal/series.ics"].clone();
        series.sort();
        assert_eq!(series, vec!["series", "series::20250108T090000Z"]);
    }

    #[tokio::test]
    async fn connection_bookkeeping() {
        let store = MemoryStore::new();
        store.insert_connection(connection()).await;

        let merged = store
            .merge_calendars("p1", vec![CalendarRef::new("https://dav.example.com/home/", "Home")])
            .await
            .unwrap();
        assert_eq!(merged.calendars.len(), 2);

        let at = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        store.update_last_sync("p1", at).await.unwrap();
        store.mark_needs_reauth("p1", true).await.unwrap();
        store.update_cursor("p1", &cursor("t9")).await.unwrap();

        let conn = store.load_connection("p1").await.unwrap();
        assert_eq!(conn.last_sync, Some(at));
        assert!(conn.needs_reauth);
        assert_eq!(conn.calendars[0].sync_token.as_deref(), Some("t9"));
        assert_eq!(store.cursor_writes(), 1);

        assert!(matches!(
            store.load_connection("nope").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn removing_a_connection_cascades() {
        let mut snapshot = StoreSnapshot::default();
        snapshot.insert_connection(connection());
        snapshot
            .apply(
                "p1",
                CAL,
                &[ChangeSetEntry::upsert(event("a", "/cal/a.ics"))],
                &cursor("t1"),
            )
            .unwrap();

        assert!(snapshot.remove_connection("p1").is_some());
        assert!(snapshot.events.is_empty());
        assert!(snapshot.connections.is_empty());
    }
}
