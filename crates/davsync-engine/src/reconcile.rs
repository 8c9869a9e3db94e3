//! Full and incremental reconciliation of one calendar.
//!
//! A change-set is always applied before the cursor moves, and applying the
//! same change-set twice leaves the store unchanged. Together these make
//! overlapping or retried runs converge.

use std::collections::HashSet;

use davsync_core::{CalendarRef, ChangeSetEntry, SyncCursor};
use davsync_providers::{Normalizer, RemoteObject};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::report::{CalendarSyncReport, SkippedDocument, SyncStrategy};
use crate::state::{SyncEvent, SyncMode, SyncState};
use crate::store::{ResourceIndex, Store};

/// A change-set ready to apply, with the cursor it advances to.
#[derive(Debug, Default)]
struct ChangeSet {
    entries: Vec<ChangeSetEntry>,
    skipped: Vec<SkippedDocument>,
}

impl ChangeSet {
    fn upserts(&self) -> usize {
        self.entries.iter().filter(|e| e.is_upsert()).count()
    }

    fn deletes(&self) -> usize {
        self.entries.iter().filter(|e| e.is_delete()).count()
    }
}

/// Syncs calendars of one connection into a store.
pub struct Reconciler<'a> {
    ctx: &'a SyncContext,
    store: &'a dyn Store,
}

impl<'a> Reconciler<'a> {
    pub fn new(ctx: &'a SyncContext, store: &'a dyn Store) -> Self {
        Self { ctx, store }
    }

    /// Brings one calendar up to date.
    ///
    /// `stored` carries the persisted cursor, `remote` the calendar as just
    /// discovered (for its current ctag and sync token). Failures are
    /// reported, not returned, so one calendar never stops the others.
    pub async fn sync_calendar(
        &self,
        stored: &CalendarRef,
        remote: Option<&CalendarRef>,
        mode: SyncMode,
    ) -> CalendarSyncReport {
        let span = info_span!(
            "sync_calendar",
            provider = %self.ctx.provider_id(),
            calendar = %stored.id,
            %mode
        );
        self.run(stored, remote, mode).instrument(span).await
    }

    async fn run(
        &self,
        stored: &CalendarRef,
        remote: Option<&CalendarRef>,
        mode: SyncMode,
    ) -> CalendarSyncReport {
        let mut report = CalendarSyncReport::new(&stored.id);
        let cursor = stored.cursor();
        let mut state = SyncState::initial(&cursor);
        report.state = state;

        let remote_ctag = remote.and_then(|r| r.ctag.clone());
        let remote_token = remote.and_then(|r| r.sync_token.clone());

        if mode == SyncMode::Auto && ctag_unchanged(&cursor, remote_ctag.as_deref()) {
            debug!(ctag = ?cursor.ctag, "collection unchanged");
            report.state = SyncState::Synced;
            report.strategy = Some(SyncStrategy::Unchanged);
            return report;
        }

        match self
            .drive(&mut state, &mut report, stored, &cursor, remote_ctag, remote_token, mode)
            .await
        {
            Ok(()) => {
                report.state = state;
                info!(
                    strategy = ?report.strategy,
                    upserts = report.upserts,
                    deletes = report.deletes,
                    skipped = report.skipped.len(),
                    "calendar synced"
                );
            }
            Err(error) => {
                report.state = state
                    .transition(SyncEvent::Failed)
                    .unwrap_or(SyncState::Failed);
                warn!(error = %error, kind = %error.kind(), "calendar sync failed");
                report.error = Some((&error).into());
            }
        }
        report
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        state: &mut SyncState,
        report: &mut CalendarSyncReport,
        stored: &CalendarRef,
        cursor: &SyncCursor,
        remote_ctag: Option<String>,
        remote_token: Option<String>,
        mode: SyncMode,
    ) -> SyncResult<()> {
        *state = state.transition(SyncEvent::Start {
            mode,
            has_token: cursor.has_token(),
        })?;

        if *state == SyncState::IncrementalSyncInFlight {
            let token = cursor.sync_token.as_deref().unwrap_or_default();
            match self.incremental(stored, cursor, token, remote_ctag.clone()).await {
                Ok(changes) => {
                    record(report, SyncStrategy::Incremental, changes);
                    *state = state.transition(SyncEvent::Succeeded)?;
                    return Ok(());
                }
                Err(SyncError::SyncTokenInvalidated { .. }) => {
                    warn!("sync token rejected, falling back to full sync");
                    report.token_fallback = true;
                    *state = state.transition(SyncEvent::TokenInvalidated)?;
                }
                Err(error) => return Err(error),
            }
        }

        let changes = self.full(stored, remote_ctag, remote_token).await?;
        record(report, SyncStrategy::Full, changes);
        *state = state.transition(SyncEvent::Succeeded)?;
        Ok(())
    }

    /// Upserts everything the calendar holds. Never deletes.
    async fn full(
        &self,
        calendar: &CalendarRef,
        remote_ctag: Option<String>,
        remote_token: Option<String>,
    ) -> SyncResult<ChangeSet> {
        let ctx = self.ctx;
        let objects = ctx
            .client
            .fetch_all_objects(&ctx.session, calendar)
            .await
            .map_err(|e| SyncError::from_provider(e, &calendar.id))?;
        debug!(objects = objects.len(), "fetched calendar");

        let mut changes = ChangeSet::default();
        for object in objects {
            let (entries, _) = self.normalize(calendar, object, &mut changes.skipped);
            changes.entries.extend(entries);
        }

        let next = SyncCursor::new(&calendar.id)
            .with_ctag(remote_ctag)
            .with_sync_token(remote_token);
        self.apply(&calendar.id, &changes.entries, &next).await?;
        Ok(changes)
    }

    /// Applies what changed since `token`.
    async fn incremental(
        &self,
        calendar: &CalendarRef,
        cursor: &SyncCursor,
        token: &str,
        remote_ctag: Option<String>,
    ) -> SyncResult<ChangeSet> {
        let ctx = self.ctx;
        let index = self
            .store
            .resource_index(ctx.provider_id(), &calendar.id)
            .await?;
        let known: HashSet<String> = index.keys().cloned().collect();

        let remote = ctx
            .client
            .fetch_changes(&ctx.session, calendar, token, &known)
            .await
            .map_err(|e| SyncError::from_provider(e, &calendar.id))?;
        debug!(
            added = remote.added.len(),
            modified = remote.modified.len(),
            deleted = remote.deleted.len(),
            "fetched changes"
        );

        let mut changes = ChangeSet::default();
        let mut gone: Vec<String> = Vec::new();
        for object in remote.added.into_iter().chain(remote.modified) {
            let href = object.href.clone();
            let (entries, complete) = self.normalize(calendar, object, &mut changes.skipped);

            // Sub-events this resource used to hold but no longer does.
            if complete {
                let fresh: HashSet<&str> = entries
                    .iter()
                    .map(|e| e.provider_event_id.as_str())
                    .collect();
                if let Some(previous) = index.get(&href) {
                    gone.extend(
                        previous
                            .iter()
                            .filter(|id| !fresh.contains(id.as_str()))
                            .cloned(),
                    );
                }
            }
            changes.entries.extend(entries);
        }
        for href in &remote.deleted {
            gone.extend(ids_for_href(&index, href));
        }

        // An event that moved to another resource is upserted there; its old
        // location must not delete it.
        let upserted: HashSet<String> = changes
            .entries
            .iter()
            .map(|e| e.provider_event_id.clone())
            .collect();
        let mut deleted = HashSet::new();
        for id in gone {
            if upserted.contains(&id) {
                debug!(event = %id, "event moved between resources");
            } else if deleted.insert(id.clone()) {
                changes.entries.push(ChangeSetEntry::delete(id));
            }
        }

        let next = SyncCursor::new(&calendar.id)
            .with_ctag(remote_ctag.or_else(|| cursor.ctag.clone()))
            .with_sync_token(remote.new_sync_token.or_else(|| Some(token.to_string())));
        self.apply(&calendar.id, &changes.entries, &next).await?;
        Ok(changes)
    }

    /// Upsert entries for one object, and whether nothing in it was skipped.
    fn normalize(
        &self,
        calendar: &CalendarRef,
        object: RemoteObject,
        skipped: &mut Vec<SkippedDocument>,
    ) -> (Vec<ChangeSetEntry>, bool) {
        let normalized = self.ctx.client.raw_document(calendar, object).normalize();
        let complete = normalized.skipped.is_empty();

        for skip in normalized.skipped {
            let error = SyncError::from(&skip);
            warn!(kind = %error.kind(), error = %error, "skipping unparseable event");
            skipped.push(skip.into());
        }

        let entries = normalized
            .events
            .into_iter()
            .map(ChangeSetEntry::upsert)
            .collect();
        (entries, complete)
    }

    /// Applies the change-set, then advances the cursor.
    async fn apply(
        &self,
        calendar_id: &str,
        entries: &[ChangeSetEntry],
        cursor: &SyncCursor,
    ) -> SyncResult<()> {
        let provider_id = self.ctx.provider_id();
        self.store
            .sync_events(provider_id, calendar_id, entries, cursor)
            .await?;
        self.store.update_cursor(provider_id, cursor).await?;
        Ok(())
    }
}

fn record(report: &mut CalendarSyncReport, strategy: SyncStrategy, changes: ChangeSet) {
    report.strategy = Some(strategy);
    report.upserts = changes.upserts();
    report.deletes = changes.deletes();
    report.skipped = changes.skipped;
}

fn ctag_unchanged(cursor: &SyncCursor, remote_ctag: Option<&str>) -> bool {
    match (cursor.ctag.as_deref(), remote_ctag) {
        (Some(stored), Some(remote)) => stored == remote,
        _ => false,
    }
}

/// Event ids stored for a removed resource, or its file stem if unknown.
fn ids_for_href(index: &ResourceIndex, href: &str) -> Vec<String> {
    if let Some(ids) = index.get(href) {
        return ids.clone();
    }
    let stem = href
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(href);
    let stem = stem.strip_suffix(".ics").unwrap_or(stem);
    let stem = urlencoding::decode(stem)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| stem.to_string());
    if stem.is_empty() {
        Vec::new()
    } else {
        vec![stem]
    }
}
