//! CalDAV implementation of [`ProviderClient`].

use std::collections::HashSet;

use davsync_core::{CalendarRef, CanonicalEvent, ProviderKind};
use reqwest::StatusCode;
use tracing::{debug, info};
use url::Url;

use crate::document::{CalDavDocument, RawDocument};
use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};
use crate::provider::{
    BoxFuture, Credentials, ProviderClient, RemoteChanges, RemoteObject, Session, WriteReceipt,
};

use super::client::{CalDavClient, DavReply, DavRequest};
use super::config::CalDavConfig;
use super::generate::generate_series;
use super::ics::scan_uid;
use super::xml::{
    DavProps, Multistatus, calendar_multiget_body, calendar_query_body, parse_multistatus,
    propfind_calendars_body, propfind_home_set_body, propfind_principal_body,
    sync_collection_body,
};

/// Talks to CalDAV servers (RFC 4791) with sync-collection (RFC 6578)
/// support for incremental fetches.
pub struct CalDavProvider {
    client: CalDavClient,
    config: CalDavConfig,
}

impl CalDavProvider {
    pub fn new(config: CalDavConfig) -> ProviderResult<Self> {
        let client = CalDavClient::new(&config)?;
        Ok(Self { client, config })
    }

    async fn multistatus(
        &self,
        request: DavRequest,
        credentials: &Credentials,
    ) -> ProviderResult<Multistatus> {
        let reply = self.client.execute(&request, credentials).await?.success()?;
        parse_multistatus(&reply.body)
    }

    /// Follows `current-user-principal` then `calendar-home-set`.
    async fn locate_home_set(&self, credentials: &Credentials) -> ProviderResult<Session> {
        let server = parse_url(&credentials.server_url)?;

        let request = DavRequest::propfind(server.as_str(), propfind_principal_body()?, 0)?;
        let principal = match self.multistatus(request, credentials).await {
            Ok(ms) => ms
                .responses
                .into_iter()
                .find_map(|r| r.props.current_user_principal)
                .map(|href| resolve_href(&server, &href)),
            Err(e) if can_fall_back(&e) => {
                debug!(error = %e, "principal lookup failed, using server URL");
                None
            }
            Err(e) => return Err(e),
        };

        let Some(principal) = principal else {
            return Ok(Session::new(credentials.clone(), None, server.to_string()));
        };

        let request = DavRequest::propfind(&principal, propfind_home_set_body()?, 0)?;
        let home = match self.multistatus(request, credentials).await {
            Ok(ms) => ms
                .responses
                .into_iter()
                .find_map(|r| r.props.calendar_home_set)
                .map(|href| resolve_href(&server, &href)),
            Err(e) if can_fall_back(&e) => {
                debug!(error = %e, "home set lookup failed, using server URL");
                None
            }
            Err(e) => return Err(e),
        };

        Ok(Session::new(
            credentials.clone(),
            Some(principal),
            home.unwrap_or_else(|| server.to_string()),
        ))
    }

    /// Fetches member bodies in batches and sorts them against `known_hrefs`.
    async fn multiget(
        &self,
        session: &Session,
        calendar_url: &Url,
        hrefs: &[String],
        known_hrefs: &HashSet<String>,
        changes: &mut RemoteChanges,
    ) -> ProviderResult<()> {
        for batch in hrefs.chunks(self.config.multiget_batch_size) {
            let refs: Vec<&str> = batch.iter().map(String::as_str).collect();
            let request =
                DavRequest::report(calendar_url.as_str(), calendar_multiget_body(&refs)?, 1)?;
            let ms = self.multistatus(request, session.credentials()).await?;

            for response in ms.responses {
                let href = href_path(calendar_url, &response.href);
                if response.is_not_found() {
                    changes.deleted.push(href);
                    continue;
                }
                // Every changed member must come back with its body.
                let Some(data) = response.props.calendar_data else {
                    return Err(ProviderError::invalid_response(format!(
                        "multiget returned no calendar data for {href}"
                    ))
                    .with_provider("caldav"));
                };
                let object = RemoteObject::new(href, response.props.etag, data);
                if known_hrefs.contains(&object.href) {
                    changes.modified.push(object);
                } else {
                    changes.added.push(object);
                }
            }
        }
        Ok(())
    }
}

impl ProviderClient for CalDavProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::CalDav
    }

    fn authenticate<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, ProviderResult<Session>> {
        Box::pin(async move {
            let session = self.locate_home_set(credentials).await?;
            info!(
                server = %credentials.server_url,
                home_set = %session.home_set_url,
                "authenticated"
            );
            Ok(session)
        })
    }

    fn discover_calendars<'a>(
        &'a self,
        session: &'a Session,
    ) -> BoxFuture<'a, ProviderResult<Vec<CalendarRef>>> {
        Box::pin(async move {
            let home = parse_url(&session.home_set_url)?;
            let request = DavRequest::propfind(home.as_str(), propfind_calendars_body()?, 1)?;
            let ms = self.multistatus(request, session.credentials()).await?;

            let mut calendars: Vec<CalendarRef> = ms
                .responses
                .into_iter()
                .filter(|r| r.props.is_calendar && r.props.supports_events())
                .map(|r| calendar_ref(&home, &r.href, r.props))
                .collect();

            if calendars.is_empty() {
                // The server URL may point straight at a calendar collection.
                let server = parse_url(session.server_url())?;
                let request = DavRequest::propfind(server.as_str(), propfind_calendars_body()?, 0)?;
                let ms = self.multistatus(request, session.credentials()).await?;
                calendars = ms
                    .responses
                    .into_iter()
                    .filter(|r| r.props.is_calendar && r.props.supports_events())
                    .map(|r| calendar_ref(&server, &r.href, r.props))
                    .take(1)
                    .collect();
            }

            debug!(count = calendars.len(), "discovered calendars");
            Ok(calendars)
        })
    }

    fn fetch_all_objects<'a>(
        &'a self,
        session: &'a Session,
        calendar: &'a CalendarRef,
    ) -> BoxFuture<'a, ProviderResult<Vec<RemoteObject>>> {
        Box::pin(async move {
            let url = parse_url(&calendar.id)?;
            let request = DavRequest::report(url.as_str(), calendar_query_body()?, 1)?;
            let ms = self.multistatus(request, session.credentials()).await?;

            let objects: Vec<RemoteObject> = ms
                .responses
                .into_iter()
                .filter_map(|r| {
                    let data = r.props.calendar_data?;
                    Some(RemoteObject::new(href_path(&url, &r.href), r.props.etag, data))
                })
                .collect();

            debug!(calendar = %calendar.id, count = objects.len(), "fetched all objects");
            Ok(objects)
        })
    }

    fn fetch_changes<'a>(
        &'a self,
        session: &'a Session,
        calendar: &'a CalendarRef,
        sync_token: &'a str,
        known_hrefs: &'a HashSet<String>,
    ) -> BoxFuture<'a, ProviderResult<RemoteChanges>> {
        Box::pin(async move {
            let url = parse_url(&calendar.id)?;
            let request = DavRequest::report(url.as_str(), sync_collection_body(sync_token)?, 0)?;
            let reply = self.client.execute(&request, session.credentials()).await?;

            if is_invalid_token(&reply) {
                return Err(ProviderError::sync_token_invalidated(format!(
                    "server rejected sync token for {}",
                    calendar.id
                ))
                .with_provider("caldav")
                .with_status(reply.status.as_u16()));
            }
            let ms = parse_multistatus(&reply.success()?.body)?;

            let collection = collection_path(&url);
            let mut changes = RemoteChanges {
                new_sync_token: ms.sync_token,
                ..RemoteChanges::default()
            };
            let mut changed = Vec::new();
            for response in ms.responses {
                let href = href_path(&url, &response.href);
                if href.trim_end_matches('/') == collection {
                    continue;
                }
                if response.is_not_found() {
                    changes.deleted.push(href);
                } else {
                    changed.push(href);
                }
            }

            self.multiget(session, &url, &changed, known_hrefs, &mut changes)
                .await?;

            debug!(
                calendar = %calendar.id,
                added = changes.added.len(),
                modified = changes.modified.len(),
                deleted = changes.deleted.len(),
                "fetched changes"
            );
            Ok(changes)
        })
    }

    fn create_object<'a>(
        &'a self,
        session: &'a Session,
        calendar: &'a CalendarRef,
        href: Option<&'a str>,
        document: &'a str,
        etag: Option<&'a str>,
    ) -> BoxFuture<'a, ProviderResult<WriteReceipt>> {
        Box::pin(async move {
            let collection = parse_url(&calendar.id)?;
            let target = match href {
                Some(href) => resolve_href(&collection, href),
                None => {
                    let name = scan_uid(document)
                        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                    let collection = ensure_trailing_slash(collection.clone());
                    resolve_href(&collection, &format!("{}.ics", urlencoding::encode(&name)))
                }
            };

            let mut request = DavRequest::put(&target, document.to_string());
            if href.is_none() {
                request = request.if_none_match_any();
            }
            if let Some(etag) = etag {
                request = request.if_match(etag);
            }

            let reply = self
                .client
                .execute(&request, session.credentials())
                .await?
                .success()?;
            let target = parse_url(&target)?;
            debug!(href = %target.path(), status = %reply.status, "wrote object");

            Ok(WriteReceipt {
                href: target.path().to_string(),
                etag: reply.etag,
            })
        })
    }

    fn delete_object<'a>(
        &'a self,
        session: &'a Session,
        calendar: &'a CalendarRef,
        href: &'a str,
        etag: Option<&'a str>,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let collection = parse_url(&calendar.id)?;
            let target = resolve_href(&collection, href);

            let mut request = DavRequest::delete(&target);
            if let Some(etag) = etag {
                request = request.if_match(etag);
            }

            let reply = self.client.execute(&request, session.credentials()).await?;
            if reply.status == StatusCode::NOT_FOUND {
                debug!(href = %href, "object already gone");
                return Ok(());
            }
            reply.success()?;
            debug!(href = %href, "deleted object");
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

fn parse_url(raw: &str) -> ProviderResult<Url> {
    Url::parse(raw).map_err(|e| {
        ProviderError::configuration(format!("invalid URL {}: {}", raw, e)).with_provider("caldav")
    })
}

/// Principal and home-set lookups are optional on some servers.
fn can_fall_back(error: &ProviderError) -> bool {
    matches!(
        error.code(),
        ProviderErrorCode::NotFound
            | ProviderErrorCode::BadRequest
            | ProviderErrorCode::InvalidResponse
            | ProviderErrorCode::AuthorizationFailed
    )
}

/// RFC 6578 `valid-sync-token` precondition, or 410 Gone.
fn is_invalid_token(reply: &DavReply) -> bool {
    match reply.status {
        StatusCode::GONE => true,
        StatusCode::FORBIDDEN | StatusCode::CONFLICT => reply.body.contains("valid-sync-token"),
        _ => false,
    }
}

fn calendar_ref(base: &Url, href: &str, props: DavProps) -> CalendarRef {
    let id = resolve_href(base, href);
    let display_name = props
        .display_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| last_segment(&id));

    let mut calendar = CalendarRef::new(id, display_name);
    calendar.ctag = props.ctag;
    calendar.sync_token = props.sync_token;
    calendar.color = props.color;
    calendar
}

fn last_segment(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .map(|s| urlencoding::decode(s).map(|d| d.into_owned()).unwrap_or_else(|_| s.to_string()))
        .unwrap_or_default()
}

/// Resolves a relative href against a base URL.
fn resolve_href(base: &Url, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        base.join(href)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string())
    }
}

/// Path form of an href, which is how resources are keyed locally.
fn href_path(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| href.to_string())
}

fn collection_path(url: &Url) -> String {
    url.path().trim_end_matches('/').to_string()
}

fn ensure_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
