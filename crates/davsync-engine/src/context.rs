//! Per-invocation sync context.

use std::fmt;
use std::sync::Arc;

use davsync_core::{CalendarRef, ProviderConnection};
use davsync_providers::{ProviderClient, Session};

/// Everything one invocation needs, passed by handle.
///
/// The decrypted credential lives only inside [`Session`], whose `Debug`
/// output is redacted, and is dropped with the context.
pub struct SyncContext {
    pub connection: ProviderConnection,
    pub session: Session,
    pub client: Arc<dyn ProviderClient>,
}

impl SyncContext {
    pub fn new(
        connection: ProviderConnection,
        session: Session,
        client: Arc<dyn ProviderClient>,
    ) -> Self {
        Self {
            connection,
            session,
            client,
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.connection.id
    }

    pub fn calendar(&self, calendar_id: &str) -> Option<&CalendarRef> {
        self.connection.calendar(calendar_id)
    }
}

impl fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncContext")
            .field("provider_id", &self.connection.id)
            .field("kind", &self.client.kind())
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
