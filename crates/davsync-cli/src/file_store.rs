//! JSON state file.
//!
//! The whole [`StoreSnapshot`] is rewritten on every change: written to a
//! temporary file in the same directory, then renamed over the old one. A
//! crash leaves either the old or the new state, never a mix. The temporary
//! file is created owner-only, which the rename preserves.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use davsync_core::{CalendarRef, CanonicalEvent, ChangeSetEntry, ProviderConnection, SyncCursor};
use davsync_engine::{
    ConnectionStore, EventStore, ResourceIndex, StoreError, StoreResult, StoreSnapshot,
};
use davsync_providers::BoxFuture;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// A store persisted as one JSON file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: Mutex<StoreSnapshot>,
}

impl FileStore {
    /// Opens the state file, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let snapshot = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                StoreError::backend(format!("cannot parse {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => StoreSnapshot::default(),
            Err(e) => {
                return Err(StoreError::backend(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };
        debug!(path = %path.display(), connections = snapshot.connections.len(), "state loaded");
        Ok(Self {
            path,
            state: Mutex::new(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.state.lock().await.clone()
    }

    pub async fn insert_connection(&self, connection: ProviderConnection) -> StoreResult<()> {
        self.update(|state| {
            state.insert_connection(connection);
            Ok(())
        })
        .await
    }

    /// Drops a connection and its events.
    pub async fn remove_connection(
        &self,
        provider_id: &str,
    ) -> StoreResult<Option<ProviderConnection>> {
        self.update(|state| Ok(state.remove_connection(provider_id)))
            .await
    }

    /// Includes or excludes a calendar from sync.
    pub async fn set_sync_enabled(
        &self,
        provider_id: &str,
        calendar_id: &str,
        enabled: bool,
    ) -> StoreResult<()> {
        self.update(|state| {
            let calendar = state
                .connections
                .get_mut(provider_id)
                .ok_or_else(|| StoreError::not_found(format!("connection {provider_id}")))?
                .calendar_mut(calendar_id)
                .ok_or_else(|| StoreError::not_found(format!("calendar {calendar_id}")))?;
            calendar.sync_enabled = enabled;
            Ok(())
        })
        .await
    }

    /// Applies `change` to a copy of the state and persists it. Nothing
    /// changes, in memory or on disk, if either step fails.
    ///
    /// The file is written on the blocking pool; the lock is held until the
    /// write lands so updates reach the disk in order.
    async fn update<T>(
        &self,
        change: impl FnOnce(&mut StoreSnapshot) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let value = change(&mut next)?;

        let path = self.path.clone();
        let next = tokio::task::spawn_blocking(move || {
            write_atomically(&path, &next).map(|()| next)
        })
        .await
        .map_err(|e| StoreError::backend(format!("state write task failed: {e}")))??;

        *state = next;
        Ok(value)
    }
}

fn write_atomically(path: &Path, snapshot: &StoreSnapshot) -> StoreResult<()> {
    let io_error =
        |e: std::io::Error| StoreError::backend(format!("cannot write {}: {e}", path.display()));

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(io_error)?;

    let mut file = NamedTempFile::new_in(dir).map_err(io_error)?;
    serde_json::to_writer_pretty(&mut file, snapshot)
        .map_err(|e| StoreError::backend(format!("cannot serialize state: {e}")))?;
    file.flush().map_err(io_error)?;
    file.as_file().sync_all().map_err(io_error)?;
    file.persist(path).map_err(|e| io_error(e.error))?;

    trace!(path = %path.display(), "state written");
    Ok(())
}

impl EventStore for FileStore {
    fn sync_events<'a>(
        &'a self,
        provider_id: &'a str,
        calendar_id: &'a str,
        entries: &'a [ChangeSetEntry],
        cursor: &'a SyncCursor,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.update(|state| state.apply(provider_id, calendar_id, entries, cursor))
                .await
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

impl ConnectionStore for FileStore {
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
            self.update(|state| state.merge_calendars(provider_id, discovered))
                .await
        })
    }

    fn update_cursor<'a>(
        &'a self,
        provider_id: &'a str,
        cursor: &'a SyncCursor,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.update(|state| state.set_cursor(provider_id, cursor))
                .await
        })
    }

    fn update_last_sync<'a>(
        &'a self,
        provider_id: &'a str,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.update(|state| state.set_last_sync(provider_id, at))
                .await
        })
    }

    fn mark_needs_reauth<'a>(
        &'a self,
        provider_id: &'a str,
        needs_reauth: bool,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.update(|state| state.set_needs_reauth(provider_id, needs_reauth))
                .await
        })
    }
}
