//! Engine configuration.

use davsync_providers::caldav::CalDavConfig;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Settings for CalDAV connections.
    pub caldav: CalDavConfig,

    /// Refresh the calendar list from the server on every sync.
    ///
    /// Without discovery the remote ctag is unknown, so the no-change
    /// shortcut never applies.
    pub discover_calendars: bool,

    /// How many calendars of one connection sync at the same time.
    pub max_concurrent_calendars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            caldav: CalDavConfig::default(),
            discover_calendars: true,
            max_concurrent_calendars: 1,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set CalDAV settings.
    pub fn with_caldav(mut self, caldav: CalDavConfig) -> Self {
        self.caldav = caldav;
        self
    }

    /// Builder: enable or disable calendar discovery.
    pub fn with_discovery(mut self, discover: bool) -> Self {
        self.discover_calendars = discover;
        self
    }

    /// Builder: set calendar concurrency (at least 1).
    pub fn with_max_concurrent_calendars(mut self, max: usize) -> Self {
        self.max_concurrent_calendars = max.max(1);
        self
    }
}
