//! Public entry points.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use davsync_core::{CalendarRef, CanonicalEvent, ProviderConnection, ProviderKind};
use davsync_providers::caldav::CalDavProvider;
use davsync_providers::{Credentials, ProviderClient, ProviderResult};
use futures_util::StreamExt;
use futures_util::stream;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::EngineConfig;
use crate::context::SyncContext;
use crate::error::{SyncError, SyncErrorKind, SyncResult};
use crate::outbound::{self, RemoteWrite};
use crate::reconcile::Reconciler;
use crate::report::{CalendarSyncReport, ProviderSyncReport};
use crate::secret::SecretDecryptor;
use crate::state::SyncMode;
use crate::store::{Store, StoreError};

/// Builds the client for one provider kind.
pub type ProviderFactory =
    Arc<dyn Fn(&EngineConfig) -> ProviderResult<Arc<dyn ProviderClient>> + Send + Sync>;

/// Syncs connections and pushes local edits.
///
/// Every call loads the connection, decrypts its credential and
/// authenticates afresh; nothing is shared between invocations except the
/// store.
pub struct SyncService {
    config: EngineConfig,
    store: Arc<dyn Store>,
    decryptor: Arc<dyn SecretDecryptor>,
    factories: HashMap<ProviderKind, ProviderFactory>,
}

impl SyncService {
    /// Creates a service with the CalDAV provider registered.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn Store>,
        decryptor: Arc<dyn SecretDecryptor>,
    ) -> Self {
        let caldav: ProviderFactory = Arc::new(|config: &EngineConfig| {
            let provider = CalDavProvider::new(config.caldav.clone())?;
            Ok(Arc::new(provider) as Arc<dyn ProviderClient>)
        });
        Self {
            config,
            store,
            decryptor,
            factories: HashMap::from([(ProviderKind::CalDav, caldav)]),
        }
    }

    /// Registers or replaces the client factory for `kind`.
    pub fn with_provider(mut self, kind: ProviderKind, factory: ProviderFactory) -> Self {
        self.factories.insert(kind, factory);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fetches every calendar from scratch.
    pub async fn perform_full_sync(&self, provider_id: &str) -> SyncResult<ProviderSyncReport> {
        self.invoke(provider_id, SyncMode::Full).await
    }

    /// Fetches what changed, falling back to a full sync where needed.
    pub async fn perform_incremental_sync(
        &self,
        provider_id: &str,
    ) -> SyncResult<ProviderSyncReport> {
        self.invoke(provider_id, SyncMode::Auto).await
    }

    /// Syncs every enabled calendar of a connection.
    ///
    /// Fails as a whole only when the connection cannot be used at all
    /// (unknown, undecryptable, rejected credentials, discovery failure).
    /// Per-calendar failures are in the report.
    pub async fn invoke(
        &self,
        provider_id: &str,
        mode: SyncMode,
    ) -> SyncResult<ProviderSyncReport> {
        let span = info_span!("sync", provider = %provider_id, %mode);
        self.run(provider_id, mode).instrument(span).await
    }

    async fn run(&self, provider_id: &str, mode: SyncMode) -> SyncResult<ProviderSyncReport> {
        let started_at = Utc::now();
        let mut ctx = self.open(provider_id).await?;

        let remote = if self.config.discover_calendars {
            self.discover(&mut ctx).await?
        } else {
            Vec::new()
        };

        let units: Vec<(CalendarRef, Option<CalendarRef>)> = ctx
            .connection
            .enabled_calendars()
            .map(|stored| {
                let found = remote.iter().find(|r| r.id == stored.id).cloned();
                (stored.clone(), found)
            })
            .collect();
        if units.is_empty() {
            warn!("no enabled calendars");
        }

        let reconciler = Reconciler::new(&ctx, self.store.as_ref());
        let calendars: Vec<CalendarSyncReport> = stream::iter(units.iter())
            .map(|(stored, found)| reconciler.sync_calendar(stored, found.as_ref(), mode))
            .buffered(self.config.max_concurrent_calendars.max(1))
            .collect()
            .await;

        let auth_failed = calendars
            .iter()
            .any(|c| c.error.as_ref().is_some_and(|e| e.kind == SyncErrorKind::Auth));
        if auth_failed {
            self.flag_reauth(provider_id, true).await;
        } else if ctx.connection.needs_reauth {
            self.flag_reauth(provider_id, false).await;
        }

        let report = ProviderSyncReport {
            provider_id: provider_id.to_string(),
            mode,
            started_at,
            finished_at: Utc::now(),
            calendars,
        };
        if report.is_success() {
            self.store
                .update_last_sync(provider_id, report.finished_at)
                .await?;
        }

        info!(
            calendars = report.calendars.len(),
            upserts = report.total_upserts(),
            deletes = report.total_deletes(),
            skipped = report.total_skipped(),
            failed = report.failed().count(),
            "sync finished"
        );
        Ok(report)
    }

    /// Authenticates and refreshes the stored calendar list.
    pub async fn refresh_calendars(&self, provider_id: &str) -> SyncResult<ProviderConnection> {
        let span = info_span!("refresh_calendars", provider = %provider_id);
        async {
            let mut ctx = self.open(provider_id).await?;
            self.discover(&mut ctx).await?;
            Ok(ctx.connection)
        }
        .instrument(span)
        .await
    }

    /// Creates or replaces an event on the provider.
    ///
    /// Without `calendar_id` the connection's default calendar is used. The
    /// store is not touched; the next sync picks up the written version.
    pub async fn create_or_update_remote_event(
        &self,
        provider_id: &str,
        draft: &CanonicalEvent,
        calendar_id: Option<&str>,
    ) -> SyncResult<RemoteWrite> {
        let span = info_span!("push", provider = %provider_id, event = %draft.provider_event_id);
        async {
            let ctx = self.open_for_write(provider_id).await?;
            let result =
                outbound::create_or_update(&ctx, self.store.as_ref(), draft, calendar_id).await;
            self.check_auth(provider_id, result).await
        }
        .instrument(span)
        .await
    }

    /// Deletes an event on the provider. Deleting what is already gone
    /// succeeds.
    pub async fn delete_remote_event(
        &self,
        provider_id: &str,
        provider_event_id: &str,
        calendar_id: Option<&str>,
    ) -> SyncResult<()> {
        let span = info_span!("delete", provider = %provider_id, event = %provider_event_id);
        async {
            let ctx = self.open_for_write(provider_id).await?;
            let result =
                outbound::delete(&ctx, self.store.as_ref(), provider_event_id, calendar_id).await;
            self.check_auth(provider_id, result).await
        }
        .instrument(span)
        .await
    }

    /// Loads the connection, decrypts its credential and authenticates.
    async fn open(&self, provider_id: &str) -> SyncResult<SyncContext> {
        let connection = self
            .store
            .load_connection(provider_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => {
                    SyncError::configuration(format!("unknown provider {provider_id}"))
                }
                other => other.into(),
            })?;

        let factory = self.factories.get(&connection.kind).ok_or_else(|| {
            SyncError::configuration(format!("unsupported provider kind {}", connection.kind))
        })?;
        let client = factory(&self.config)?;

        let secret = self.decryptor.decrypt_credential(&connection.credential)?;
        let credentials = Credentials::new(
            connection.server_url.as_str(),
            connection.username.as_str(),
            secret.expose(),
        );
        debug!(kind = %connection.kind, server = %connection.server_url, "authenticating");

        let session = client.authenticate(&credentials).await.map_err(SyncError::from);
        let session = self.check_auth(provider_id, session).await?;
        Ok(SyncContext::new(connection, session, client))
    }

    /// Like [`Self::open`], discovering calendars first if none are known.
    async fn open_for_write(&self, provider_id: &str) -> SyncResult<SyncContext> {
        let mut ctx = self.open(provider_id).await?;
        if ctx.connection.calendars.is_empty() {
            self.discover(&mut ctx).await?;
        }
        Ok(ctx)
    }

    /// Lists remote calendars and merges them into the stored connection.
    async fn discover(&self, ctx: &mut SyncContext) -> SyncResult<Vec<CalendarRef>> {
        let discovered = ctx
            .client
            .discover_calendars(&ctx.session)
            .await
            .map_err(SyncError::from);
        let discovered = self.check_auth(ctx.provider_id(), discovered).await?;
        debug!(calendars = discovered.len(), "calendars discovered");

        let mut merged = ctx.connection.clone();
        merged.merge_calendars(discovered.clone());
        if merged.calendars != ctx.connection.calendars {
            ctx.connection = self
                .store
                .merge_calendars(ctx.provider_id(), discovered.clone())
                .await?;
            info!(calendars = ctx.connection.calendars.len(), "calendar list updated");
        }
        Ok(discovered)
    }

    /// Flags the connection when `result` is a credential rejection.
    async fn check_auth<T>(&self, provider_id: &str, result: SyncResult<T>) -> SyncResult<T> {
        if matches!(&result, Err(error) if error.requires_reauth()) {
            self.flag_reauth(provider_id, true).await;
        }
        result
    }

    async fn flag_reauth(&self, provider_id: &str, needs_reauth: bool) {
        if needs_reauth {
            warn!("credentials rejected, connection needs re-authentication");
        }
        if let Err(e) = self.store.mark_needs_reauth(provider_id, needs_reauth).await {
            warn!(error = %e, "failed to record re-authentication flag");
        }
    }
}
