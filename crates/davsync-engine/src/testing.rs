//! In-process provider and fixtures for engine tests.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use davsync_core::{
    CalendarRef, CanonicalEvent, ProviderConnection, ProviderKind, SyncCursor,
};
use davsync_providers::caldav::generate_series;
use davsync_providers::{
    BoxFuture, CalDavDocument, Credentials, ProviderClient, ProviderError, ProviderResult,
    RawDocument, RemoteChanges, RemoteObject, Session, WriteReceipt,
};

use crate::config::EngineConfig;
use crate::context::SyncContext;
use crate::reconcile::Reconciler;
use crate::report::CalendarSyncReport;
use crate::secret::AesGcmDecryptor;
use crate::service::{ProviderFactory, SyncService};
use crate::state::SyncMode;
use crate::store::{ConnectionStore, MemoryStore};

pub(crate) const PROVIDER: &str = "p1";
pub(crate) const CAL: &str = "/cal/";
pub(crate) const OTHER_CAL: &str = "/other/";
pub(crate) const SERVER: &str = "https://dav.example.com/";
pub(crate) const PASSWORD: &str = "secret";
const KEY: [u8; 32] = [3; 32];

/// A one-event calendar document.
pub(crate) fn ics(uid: &str, summary: &str) -> String {
    format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\n\
         BEGIN:VEVENT\r\nUID:{uid}\r\nDTSTAMP:20250101T000000Z\r\n\
         DTSTART:20250106T090000Z\r\nDTEND:20250106T093000Z\r\n\
         SUMMARY:{summary}\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n"
    )
}

enum Feed {
    Changes {
        changed: Vec<String>,
        deleted: Vec<String>,
        token: String,
    },
    Error(ProviderError),
}

pub(crate) type Write = (Option<String>, String, Option<String>);

#[derive(Default)]
struct FakeState {
    remote: BTreeMap<String, CalendarRef>,
    objects: BTreeMap<String, BTreeMap<String, RemoteObject>>,
    feed: VecDeque<Feed>,
    fetch_all_calls: usize,
    fetch_changes_calls: usize,
    last_known: Vec<String>,
    writes: Vec<Write>,
    deletes: Vec<String>,
    write_failure: Option<ProviderError>,
    discover_failure: Option<ProviderError>,
}

/// A CalDAV server held in memory.
///
/// Objects are stored per calendar; the sync-collection feed is scripted
/// with [`FakeProvider::queue_changes`] and [`FakeProvider::queue_error`].
#[derive(Default)]
pub(crate) struct FakeProvider {
    state: Mutex<FakeState>,
}

impl FakeProvider {
    pub fn put(&self, calendar: &str, href: &str, etag: &str, data: &str) {
        self.state
            .lock()
            .unwrap()
            .objects
            .entry(calendar.to_string())
            .or_default()
            .insert(
                href.to_string(),
                RemoteObject::new(href, Some(etag.to_string()), data),
            );
    }

    pub fn remove(&self, calendar: &str, href: &str) {
        if let Some(objects) = self.state.lock().unwrap().objects.get_mut(calendar) {
            objects.remove(href);
        }
    }

    /// Sets what discovery reports for a calendar.
    pub fn set_remote(&self, calendar: &str, ctag: Option<&str>, token: Option<&str>) {
        let mut found = CalendarRef::new(calendar, calendar.trim_matches('/'));
        found.ctag = ctag.map(String::from);
        found.sync_token = token.map(String::from);
        self.state
            .lock()
            .unwrap()
            .remote
            .insert(calendar.to_string(), found);
    }

    pub fn remote(&self, calendar: &str) -> Option<CalendarRef> {
        self.state.lock().unwrap().remote.get(calendar).cloned()
    }

    pub fn queue_changes(&self, changed: &[&str], deleted: &[&str], token: &str) {
        self.state.lock().unwrap().feed.push_back(Feed::Changes {
            changed: changed.iter().map(|s| s.to_string()).collect(),
            deleted: deleted.iter().map(|s| s.to_string()).collect(),
            token: token.to_string(),
        });
    }

    pub fn queue_error(&self, error: ProviderError) {
        self.state.lock().unwrap().feed.push_back(Feed::Error(error));
    }

    pub fn fail_next_write(&self, error: ProviderError) {
        self.state.lock().unwrap().write_failure = Some(error);
    }

    pub fn fail_next_discovery(&self, error: ProviderError) {
        self.state.lock().unwrap().discover_failure = Some(error);
    }

    pub fn fetch_all_calls(&self) -> usize {
        self.state.lock().unwrap().fetch_all_calls
    }

    pub fn fetch_changes_calls(&self) -> usize {
        self.state.lock().unwrap().fetch_changes_calls
    }

    /// Known hrefs passed to the last `fetch_changes`, sorted.
    pub fn last_known_hrefs(&self) -> Vec<String> {
        self.state.lock().unwrap().last_known.clone()
    }

    pub fn writes(&self) -> Vec<Write> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn last_write(&self) -> Write {
        self.writes().pop().expect("no write recorded")
    }

    pub fn deletes(&self) -> Vec<String> {
        self.state.lock().unwrap().deletes.clone()
    }
}

impl ProviderClient for FakeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::CalDav
    }

    fn authenticate<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, ProviderResult<Session>> {
        Box::pin(async move {
            if credentials.password() != PASSWORD {
                return Err(ProviderError::authentication("invalid credentials").with_status(401));
            }
            Ok(Session::new(
                credentials.clone(),
                None,
                credentials.server_url.clone(),
            ))
        })
    }

    fn discover_calendars<'a>(
        &'a self,
        _session: &'a Session,
    ) -> BoxFuture<'a, ProviderResult<Vec<CalendarRef>>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if let Some(error) = state.discover_failure.take() {
                return Err(error);
            }
            Ok(state.remote.values().cloned().collect())
        })
    }

    fn fetch_all_objects<'a>(
        &'a self,
        _session: &'a Session,
        calendar: &'a CalendarRef,
    ) -> BoxFuture<'a, ProviderResult<Vec<RemoteObject>>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.fetch_all_calls += 1;
            Ok(state
                .objects
                .get(&calendar.id)
                .map(|objects| objects.values().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn fetch_changes<'a>(
        &'a self,
        _session: &'a Session,
        calendar: &'a CalendarRef,
        sync_token: &'a str,
        known_hrefs: &'a HashSet<String>,
    ) -> BoxFuture<'a, ProviderResult<RemoteChanges>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.fetch_changes_calls += 1;
            let mut known: Vec<String> = known_hrefs.iter().cloned().collect();
            known.sort();
            state.last_known = known;

            let (changed, deleted, token) = match state.feed.pop_front() {
                None => (Vec::new(), Vec::new(), sync_token.to_string()),
                Some(Feed::Error(error)) => return Err(error),
                Some(Feed::Changes {
                    changed,
                    deleted,
                    token,
                }) => (changed, deleted, token),
            };

            let mut changes = RemoteChanges {
                deleted,
                new_sync_token: Some(token),
                ..RemoteChanges::default()
            };
            let objects = state.objects.get(&calendar.id);
            for href in changed {
                let Some(object) = objects.and_then(|o| o.get(&href)).cloned() else {
                    continue;
                };
                if known_hrefs.contains(&href) {
                    changes.modified.push(object);
                } else {
                    changes.added.push(object);
                }
            }
            Ok(changes)
        })
    }

    fn create_object<'a>(
        &'a self,
        _session: &'a Session,
        calendar: &'a CalendarRef,
        href: Option<&'a str>,
        document: &'a str,
        etag: Option<&'a str>,
    ) -> BoxFuture<'a, ProviderResult<WriteReceipt>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if let Some(error) = state.write_failure.take() {
                return Err(error);
            }
            state.writes.push((
                href.map(String::from),
                document.to_string(),
                etag.map(String::from),
            ));
            let target = href.map(String::from).unwrap_or_else(|| {
                let uid = document
                    .lines()
                    .find_map(|line| line.strip_prefix("UID:"))
                    .unwrap_or("new");
                format!("{}{}.ics", calendar.id, uid.trim())
            });
            Ok(WriteReceipt {
                href: target,
                etag: Some("\"written\"".to_string()),
            })
        })
    }

    fn delete_object<'a>(
        &'a self,
        _session: &'a Session,
        _calendar: &'a CalendarRef,
        href: &'a str,
        _etag: Option<&'a str>,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            self.state.lock().unwrap().deletes.push(href.to_string());
            Ok(())
        })
    }

    fn raw_document(&self, calendar: &CalendarRef, object: RemoteObject) -> RawDocument {
        RawDocument::CalDav(CalDavDocument {
            href: object.href,
            etag: object.etag,
            data: object.data,
            calendar_id: calendar.id.clone(),
            calendar_name: Some(calendar.display_name.clone()),
        })
    }

    fn render_event(
        &self,
        event: &CanonicalEvent,
        overrides: &[CanonicalEvent],
        uid: &str,
    ) -> String {
        generate_series(event, overrides, uid)
    }
}

/// A memory store holding one connection, and a fake server behind it.
pub(crate) struct Fixture {
    pub store: Arc<MemoryStore>,
    pub provider: Arc<FakeProvider>,
}

impl Fixture {
    pub fn decryptor() -> AesGcmDecryptor {
        AesGcmDecryptor::new(KEY)
    }

    /// Connection `p1` with two enabled calendars and no cursors.
    pub fn connection() -> ProviderConnection {
        let credential = Self::decryptor().encrypt(PASSWORD).expect("encrypt");
        let mut connection =
            ProviderConnection::new(PROVIDER, ProviderKind::CalDav, "alice", credential, SERVER);
        connection.calendars.push(CalendarRef::new(CAL, "Work"));
        connection.calendars.push(CalendarRef::new(OTHER_CAL, "Home"));
        connection
    }

    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        store.insert_connection(Self::connection()).await;
        Self {
            store,
            provider: Arc::new(FakeProvider::default()),
        }
    }

    pub fn service(&self) -> SyncService {
        self.service_with(EngineConfig::default())
    }

    pub fn service_with(&self, config: EngineConfig) -> SyncService {
        let provider = self.provider.clone();
        let factory: ProviderFactory =
            Arc::new(move |_| Ok(provider.clone() as Arc<dyn ProviderClient>));
        SyncService::new(config, self.store.clone(), Arc::new(Self::decryptor()))
            .with_provider(ProviderKind::CalDav, factory)
    }

    /// An authenticated context over the stored connection.
    pub async fn context(&self) -> SyncContext {
        let connection = self.store.load_connection(PROVIDER).await.expect("connection");
        let credentials = Credentials::new(SERVER, "alice", PASSWORD);
        let session = Session::new(credentials, None, SERVER);
        SyncContext::new(connection, session, self.provider.clone())
    }

    /// Reconciles `CAL` against what the fake server reports for it.
    pub async fn sync(&self, mode: SyncMode) -> CalendarSyncReport {
        let ctx = self.context().await;
        let stored = ctx.calendar(CAL).cloned().expect("calendar");
        let remote = self.provider.remote(CAL);
        Reconciler::new(&ctx, self.store.as_ref())
            .sync_calendar(&stored, remote.as_ref(), mode)
            .await
    }

    pub async fn set_stored_cursor(&self, ctag: Option<&str>, token: Option<&str>) {
        let cursor = SyncCursor::new(CAL)
            .with_ctag(ctag.map(String::from))
            .with_sync_token(token.map(String::from));
        self.store
            .update_cursor(PROVIDER, &cursor)
            .await
            .expect("cursor");
    }

    pub async fn stored_cursor(&self) -> SyncCursor {
        self.stored_connection()
            .await
            .calendar(CAL)
            .map(CalendarRef::cursor)
            .expect("calendar")
    }

    pub async fn stored_connection(&self) -> ProviderConnection {
        self.store.load_connection(PROVIDER).await.expect("connection")
    }

    /// Ids of the events stored for `CAL`, sorted.
    pub async fn event_ids(&self) -> Vec<String> {
        self.store
            .snapshot()
            .await
            .events(PROVIDER, CAL)
            .iter()
            .map(|e| e.provider_event_id.clone())
            .collect()
    }

    pub async fn event_title(&self, id: &str) -> Option<String> {
        self.store
            .snapshot()
            .await
            .event(PROVIDER, CAL, id)
            .map(|e| e.title.clone())
    }
}
