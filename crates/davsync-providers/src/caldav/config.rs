//! CalDAV client configuration.

use std::time::Duration;

/// HTTP behaviour of the CalDAV client. Server URL and credentials come from
/// the connection being synced, not from here.
#[derive(Debug, Clone)]
pub struct CalDavConfig {
    pub verify_tls: bool,
    pub timeout: Duration,
    pub user_agent: String,
    /// Maximum hrefs per `calendar-multiget` request.
    pub multiget_batch_size: usize,
}

impl CalDavConfig {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_MULTIGET_BATCH_SIZE: usize = 100;

    pub fn new() -> Self {
        Self::default()
    }

    /// Disables certificate verification. Only meant for self-signed test servers.
    pub fn with_insecure_tls(mut self) -> Self {
        self.verify_tls = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_multiget_batch_size(mut self, size: usize) -> Self {
        self.multiget_batch_size = size.max(1);
        self
    }
}

impl Default for CalDavConfig {
    fn default() -> Self {
        Self {
            verify_tls: true,
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            user_agent: format!("davsync/{}", env!("CARGO_PKG_VERSION")),
            multiget_batch_size: Self::DEFAULT_MULTIGET_BATCH_SIZE,
        }
    }
}
