//! Local edits pushed to the provider.
//!
//! Writes never touch the store: the next sync brings the remote version
//! back in, etag and all.

use davsync_core::{CalendarRef, CanonicalEvent, OVERRIDE_SEPARATOR, ProviderConnection};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::store::{ResourceIndex, Store};

/// Outcome of a successful remote write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteWrite {
    pub provider_event_id: String,
    pub calendar_id: String,
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Whether a new resource was created rather than an existing one replaced.
    pub created: bool,
}

/// Picks the calendar a write goes to.
///
/// An explicit id must name a known calendar. Without one the primary
/// enabled calendar is used, then the first enabled one.
pub fn select_calendar<'a>(
    connection: &'a ProviderConnection,
    calendar_id: Option<&str>,
) -> SyncResult<&'a CalendarRef> {
    match calendar_id {
        Some(id) => connection.calendar(id).ok_or_else(|| {
            SyncError::configuration(format!(
                "calendar {id} is not part of connection {}",
                connection.id
            ))
        }),
        None => connection.default_calendar().ok_or_else(|| {
            SyncError::configuration(format!(
                "connection {} has no enabled calendar",
                connection.id
            ))
        }),
    }
}

/// Creates the event remotely, or replaces it if it is already known.
///
/// Replacing a series rewrites its whole resource, so the overridden
/// occurrences synced from it are written back along with the master.
pub async fn create_or_update(
    ctx: &SyncContext,
    store: &dyn Store,
    draft: &CanonicalEvent,
    calendar_id: Option<&str>,
) -> SyncResult<RemoteWrite> {
    reject_override(draft)?;
    let calendar = select_calendar(&ctx.connection, calendar_id)?;

    let uid = if draft.provider_event_id.trim().is_empty() {
        Uuid::new_v4().to_string()
    } else {
        draft.uid().to_string()
    };

    let index = store.resource_index(ctx.provider_id(), &calendar.id).await?;
    let existing = href_for_uid(&index, &uid);
    let etag = existing.as_ref().and(draft.etag.as_deref());
    debug!(
        calendar = %calendar.id,
        %uid,
        href = ?existing,
        conditional = etag.is_some(),
        "writing event"
    );

    let overrides = match existing {
        Some(ref href) => {
            let ids: Vec<String> = index
                .get(href)
                .into_iter()
                .flatten()
                .filter(|id| id.contains(OVERRIDE_SEPARATOR))
                .cloned()
                .collect();
            store
                .load_events(ctx.provider_id(), &calendar.id, &ids)
                .await?
        }
        None => Vec::new(),
    };
    if !overrides.is_empty() {
        debug!(%uid, overrides = overrides.len(), "keeping overridden occurrences");
    }

    let document = ctx.client.render_event(draft, &overrides, &uid);
    let receipt = ctx
        .client
        .create_object(&ctx.session, calendar, existing.as_deref(), &document, etag)
        .await?;

    info!(calendar = %calendar.id, %uid, href = %receipt.href, "event written");
    Ok(RemoteWrite {
        provider_event_id: uid,
        calendar_id: calendar.id.clone(),
        href: receipt.href,
        etag: receipt.etag,
        created: existing.is_none(),
    })
}

/// Deletes the resource holding `provider_event_id`.
pub async fn delete(
    ctx: &SyncContext,
    store: &dyn Store,
    provider_event_id: &str,
    calendar_id: Option<&str>,
) -> SyncResult<()> {
    if provider_event_id.contains(OVERRIDE_SEPARATOR) {
        return Err(SyncError::configuration(format!(
            "{provider_event_id} is a single occurrence; delete the series instead"
        )));
    }
    let calendar = select_calendar(&ctx.connection, calendar_id)?;

    let index = store.resource_index(ctx.provider_id(), &calendar.id).await?;
    let href = href_for_uid(&index, provider_event_id)
        .unwrap_or_else(|| default_href(provider_event_id));
    debug!(calendar = %calendar.id, %href, "deleting event");

    ctx.client
        .delete_object(&ctx.session, calendar, &href, None)
        .await?;
    info!(calendar = %calendar.id, uid = %provider_event_id, "event deleted");
    Ok(())
}

fn reject_override(draft: &CanonicalEvent) -> SyncResult<()> {
    if draft.is_override() {
        return Err(SyncError::configuration(format!(
            "{} overrides one occurrence; occurrence writes are not supported",
            draft.provider_event_id
        )));
    }
    Ok(())
}

/// The resource that holds the series `uid`.
fn href_for_uid(index: &ResourceIndex, uid: &str) -> Option<String> {
    let mut hrefs: Vec<&String> = index
        .iter()
        .filter(|(_, ids)| ids.iter().any(|id| id == uid))
        .map(|(href, _)| href)
        .collect();
    hrefs.sort();
    hrefs.first().map(|href| href.to_string())
}

/// Resource name used when the index does not know the event.
fn default_href(uid: &str) -> String {
    format!("{}.ics", urlencoding::encode(uid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SyncMode;
    use crate::testing::{CAL, Fixture, OTHER_CAL, ics};
    use chrono::{TimeZone, Utc};
    use davsync_providers::ProviderError;

    fn draft(id: &str) -> CanonicalEvent {
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 10, 0, 0).unwrap();
        CanonicalEvent::new(id, start, start + chrono::Duration::hours(1), CAL).with_title("Planning")
    }

    #[test]
    fn calendar_selection() {
        let mut connection = Fixture::connection();
        assert_eq!(select_calendar(&connection, None).unwrap().id, CAL);
        assert_eq!(
            select_calendar(&connection, Some(OTHER_CAL)).unwrap().id,
            OTHER_CAL
        );
        assert!(matches!(
            select_calendar(&connection, Some("/nope/")),
            Err(SyncError::Configuration { .. })
        ));

        connection
            .calendars
            .push(CalendarRef::new("/primary/", "Main").with_primary(true));
        assert_eq!(select_calendar(&connection, None).unwrap().id, "/primary/");

        for calendar in &mut connection.calendars {
            calendar.sync_enabled = false;
        }
        assert!(select_calendar(&connection, None).is_err());
    }

    #[test]
    fn href_lookup() {
        let mut index = ResourceIndex::new();
        index.insert("/cal/x.ics".into(), vec!["u1".into(), "u1::20250101T000000Z".into()]);
        assert_eq!(href_for_uid(&index, "u1").as_deref(), Some("/cal/x.ics"));
        assert_eq!(href_for_uid(&index, "u2"), None);
        assert_eq!(default_href("a b@c"), "a%20b%40c.ics");
    }

    #[tokio::test]
    async fn new_event_is_created() {
        let fx = Fixture::new().await;
        let ctx = fx.context().await;

        let write = create_or_update(&ctx, fx.store.as_ref(), &draft("new-1"), None)
            .await
            .unwrap();

        assert!(write.created);
        assert_eq!(write.provider_event_id, "new-1");
        assert_eq!(write.calendar_id, CAL);
        let (href, document, etag) = fx.provider.last_write();
        assert_eq!(href, None);
        assert_eq!(etag, None);
        assert!(document.contains("UID:new-1"));
        assert_eq!(fx.store.event_writes(), 0);
    }

    #[tokio::test]
    async fn empty_id_gets_a_fresh_uid() {
        let fx = Fixture::new().await;
        let ctx = fx.context().await;

        let write = create_or_update(&ctx, fx.store.as_ref(), &draft(""), None)
            .await
            .unwrap();

        assert!(Uuid::parse_str(&write.provider_event_id).is_ok());
        let (_, document, _) = fx.provider.last_write();
        assert!(document.contains(&format!("UID:{}", write.provider_event_id)));
    }

    #[tokio::test]
    async fn known_event_is_updated_conditionally() {
        let fx = Fixture::new().await;
        fx.provider.put(CAL, "/cal/a.ics", "\"e-a\"", &ics("a", "Alpha"));
        fx.provider.set_remote(CAL, Some("c1"), Some("tok1"));
        fx.sync(SyncMode::Auto).await;
        let ctx = fx.context().await;

        let edited = draft("a").with_title("Alpha moved").with_etag("\"e-a\"");
        let write = create_or_update(&ctx, fx.store.as_ref(), &edited, Some(CAL))
            .await
            .unwrap();

        assert!(!write.created);
        assert_eq!(write.href, "/cal/a.ics");
        let (href, document, etag) = fx.provider.last_write();
        assert_eq!(href.as_deref(), Some("/cal/a.ics"));
        assert_eq!(etag.as_deref(), Some("\"e-a\""));
        assert!(document.contains("SUMMARY:Alpha moved"));
    }

    #[tokio::test]
    async fn series_update_keeps_overridden_occurrences() {
        let fx = Fixture::new().await;
        let series = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\n\
            BEGIN:VEVENT\r\nUID:s\r\nDTSTART:20250106T090000Z\r\nDTEND:20250106T093000Z\r\n\
            RRULE:FREQ=WEEKLY\r\nSUMMARY:Series\r\nEND:VEVENT\r\n\
            BEGIN:VEVENT\r\nUID:s\r\nRECURRENCE-ID:20250113T090000Z\r\n\
            DTSTART:20250113T100000Z\r\nDTEND:20250113T103000Z\r\nSUMMARY:Moved\r\nEND:VEVENT\r\n\
            END:VCALENDAR\r\n";
        fx.provider.put(CAL, "/cal/s.ics", "\"e1\"", series);
        fx.provider.set_remote(CAL, Some("c1"), Some("tok1"));
        fx.sync(SyncMode::Auto).await;
        assert_eq!(fx.event_ids().await.len(), 2);
        let ctx = fx.context().await;

        let start = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
        let renamed = CanonicalEvent::new("s", start, start + chrono::Duration::minutes(30), CAL)
            .with_title("Series renamed")
            .with_recurrence(davsync_core::Recurrence {
                rule: "FREQ=WEEKLY".into(),
                exceptions: vec![],
            })
            .with_etag("\"e1\"");
        let write = create_or_update(&ctx, fx.store.as_ref(), &renamed, None)
            .await
            .unwrap();

        assert!(!write.created);
        let (href, document, _) = fx.provider.last_write();
        assert_eq!(href.as_deref(), Some("/cal/s.ics"));
        assert_eq!(document.matches("BEGIN:VEVENT").count(), 2);
        assert!(document.contains("SUMMARY:Series renamed"));
        assert!(document.contains("RECURRENCE-ID:20250113T090000Z"));
        assert!(document.contains("SUMMARY:Moved"));
    }

    #[tokio::test]
    async fn conflict_is_surfaced() {
        let fx = Fixture::new().await;
        let ctx = fx.context().await;
        fx.provider
            .fail_next_write(ProviderError::conflict("etag mismatch").with_status(412));

        let err = create_or_update(&ctx, fx.store.as_ref(), &draft("x"), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Remote {
                code: davsync_providers::ProviderErrorCode::Conflict,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn overrides_are_rejected() {
        let fx = Fixture::new().await;
        let ctx = fx.context().await;
        let mut occurrence = draft("s");
        let rid = Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap();
        occurrence.recurrence_id = Some(rid);
        occurrence.provider_event_id = CanonicalEvent::override_id("s", rid);

        assert!(matches!(
            create_or_update(&ctx, fx.store.as_ref(), &occurrence, None).await,
            Err(SyncError::Configuration { .. })
        ));
        assert!(matches!(
            delete(&ctx, fx.store.as_ref(), &occurrence.provider_event_id, None).await,
            Err(SyncError::Configuration { .. })
        ));
        assert!(fx.provider.writes().is_empty());
    }

    #[tokio::test]
    async fn delete_uses_known_href() {
        let fx = Fixture::new().await;
        fx.provider
            .put(CAL, "/cal/file-name.ics", "e", &ics("real-uid", "Named"));
        fx.provider.set_remote(CAL, Some("c1"), Some("tok1"));
        fx.sync(SyncMode::Auto).await;
        let ctx = fx.context().await;

        delete(&ctx, fx.store.as_ref(), "real-uid", None).await.unwrap();
        delete(&ctx, fx.store.as_ref(), "never synced", None)
            .await
            .unwrap();

        assert_eq!(
            fx.provider.deletes(),
            vec!["/cal/file-name.ics", "never%20synced.ics"]
        );
        // The store keeps the event until the next sync reports it gone.
        assert_eq!(fx.event_ids().await, vec!["real-uid"]);
    }
}
