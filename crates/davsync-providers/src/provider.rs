//! The [`ProviderClient`] trait: pure protocol I/O against a remote calendar
//! service.
//!
//! Implementations never touch local state. They authenticate, list
//! calendars, fetch full or changed objects and push writes. Turning fetched
//! objects into canonical events is the job of the
//! [`Normalizer`](crate::document::Normalizer) behind [`RawDocument`].

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use davsync_core::{CalendarRef, CanonicalEvent, ProviderKind};

use crate::document::RawDocument;
use crate::error::ProviderResult;

/// A boxed future so the trait stays object safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Decrypted login material for one connection.
#[derive(Clone)]
pub struct Credentials {
    pub server_url: String,
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(
        server_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Result of a successful [`ProviderClient::authenticate`].
#[derive(Debug, Clone)]
pub struct Session {
    /// Principal URL, when the server exposes one.
    pub principal_url: Option<String>,
    /// Collection under which calendars are listed.
    pub home_set_url: String,
    credentials: Credentials,
}

impl Session {
    pub fn new(
        credentials: Credentials,
        principal_url: Option<String>,
        home_set_url: impl Into<String>,
    ) -> Self {
        Self {
            principal_url,
            home_set_url: home_set_url.into(),
            credentials,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn server_url(&self) -> &str {
        &self.credentials.server_url
    }
}

/// A remote resource holding one calendar document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub href: String,
    pub etag: Option<String>,
    pub data: String,
}

impl RemoteObject {
    pub fn new(href: impl Into<String>, etag: Option<String>, data: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            etag,
            data: data.into(),
        }
    }
}

/// Changes since a sync token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteChanges {
    /// Objects whose href was not known locally.
    pub added: Vec<RemoteObject>,
    /// Objects whose href was already known locally.
    pub modified: Vec<RemoteObject>,
    /// Hrefs of removed resources.
    pub deleted: Vec<String>,
    /// Token to store once these changes are applied.
    pub new_sync_token: Option<String>,
}

impl RemoteChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Where a write landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub href: String,
    /// New etag, if the server returned one.
    pub etag: Option<String>,
}

/// Protocol boundary for one kind of remote calendar service.
pub trait ProviderClient: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Validates the credentials and locates the calendar home.
    ///
    /// Rejected credentials fail with
    /// [`ProviderErrorCode::AuthenticationFailed`](crate::ProviderErrorCode::AuthenticationFailed).
    fn authenticate<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, ProviderResult<Session>>;

    /// Lists event calendars with their current ctag and sync token.
    fn discover_calendars<'a>(
        &'a self,
        session: &'a Session,
    ) -> BoxFuture<'a, ProviderResult<Vec<CalendarRef>>>;

    /// Fetches every event resource of a calendar.
    fn fetch_all_objects<'a>(
        &'a self,
        session: &'a Session,
        calendar: &'a CalendarRef,
    ) -> BoxFuture<'a, ProviderResult<Vec<RemoteObject>>>;

    /// Fetches the changes since `sync_token`.
    ///
    /// Hrefs in `known_hrefs` are reported as modified, others as added. A
    /// token the server no longer accepts fails with
    /// [`ProviderErrorCode::SyncTokenInvalidated`](crate::ProviderErrorCode::SyncTokenInvalidated).
    fn fetch_changes<'a>(
        &'a self,
        session: &'a Session,
        calendar: &'a CalendarRef,
        sync_token: &'a str,
        known_hrefs: &'a HashSet<String>,
    ) -> BoxFuture<'a, ProviderResult<RemoteChanges>>;

    /// Writes a document.
    ///
    /// Without `href` the resource is new and must not exist yet. With an
    /// `etag` the write only succeeds if the remote still has that version;
    /// a lost race fails with
    /// [`ProviderErrorCode::Conflict`](crate::ProviderErrorCode::Conflict).
    fn create_object<'a>(
        &'a self,
        session: &'a Session,
        calendar: &'a CalendarRef,
        href: Option<&'a str>,
        document: &'a str,
        etag: Option<&'a str>,
    ) -> BoxFuture<'a, ProviderResult<WriteReceipt>>;

    /// Removes a resource. A resource that is already gone is not an error.
    fn delete_object<'a>(
        &'a self,
        session: &'a Session,
        calendar: &'a CalendarRef,
        href: &'a str,
        etag: Option<&'a str>,
    ) -> BoxFuture<'a, ProviderResult<()>>;

    /// Wraps a fetched object in the document type this provider produces.
    fn raw_document(&self, calendar: &CalendarRef, object: RemoteObject) -> RawDocument;

    /// Renders an event in this provider's wire format under the given UID.
    /// `overrides` are occurrences of the same series written alongside it.
    fn render_event(&self, event: &CanonicalEvent, overrides: &[CanonicalEvent], uid: &str)
        -> String;
}
