//! Per-calendar sync state machine.

use std::fmt;

use davsync_core::SyncCursor;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Where one (provider, calendar) pair stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Unsynced,
    FullSyncInFlight,
    IncrementalSyncInFlight,
    Synced,
    Failed,
}

/// What the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Incremental when a token is stored, full otherwise.
    Auto,
    /// Always fetch everything.
    Full,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Full => "full",
        })
    }
}

/// Inputs that move the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    Start { mode: SyncMode, has_token: bool },
    Succeeded,
    TokenInvalidated,
    Failed,
}

impl SyncState {
    /// State implied by a stored cursor.
    pub fn initial(cursor: &SyncCursor) -> Self {
        if cursor.is_empty() {
            Self::Unsynced
        } else {
            Self::Synced
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::FullSyncInFlight | Self::IncrementalSyncInFlight)
    }

    /// Applies `event`, rejecting moves the machine does not allow.
    pub fn transition(self, event: SyncEvent) -> SyncResult<Self> {
        use SyncState::*;

        let next = match (self, event) {
            (Unsynced | Failed | Synced, SyncEvent::Start { mode, has_token }) => {
                match (mode, has_token) {
                    (SyncMode::Auto, true) => IncrementalSyncInFlight,
                    _ => FullSyncInFlight,
                }
            }
            (FullSyncInFlight | IncrementalSyncInFlight, SyncEvent::Succeeded) => Synced,
            (IncrementalSyncInFlight, SyncEvent::TokenInvalidated) => FullSyncInFlight,
            (FullSyncInFlight | IncrementalSyncInFlight, SyncEvent::Failed) => Failed,
            (state, event) => {
                return Err(SyncError::internal(format!(
                    "invalid sync transition from {state:?} on {event:?}"
                )));
            }
        };
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(mode: SyncMode, has_token: bool) -> SyncEvent {
        SyncEvent::Start { mode, has_token }
    }

    #[test]
    fn initial_state_follows_cursor() {
        assert_eq!(SyncState::initial(&SyncCursor::new("c")), SyncState::Unsynced);
        let cursor = SyncCursor::new("c").with_ctag(Some("abc".into()));
        assert_eq!(SyncState::initial(&cursor), SyncState::Synced);
    }

    #[test]
    fn start_picks_strategy() {
        for from in [SyncState::Unsynced, SyncState::Synced, SyncState::Failed] {
            assert_eq!(
                from.transition(start(SyncMode::Auto, false)).unwrap(),
                SyncState::FullSyncInFlight
            );
            assert_eq!(
                from.transition(start(SyncMode::Auto, true)).unwrap(),
                SyncState::IncrementalSyncInFlight
            );
            assert_eq!(
                from.transition(start(SyncMode::Full, true)).unwrap(),
                SyncState::FullSyncInFlight
            );
        }
    }

    #[test]
    fn token_invalidation_falls_back_to_full() {
        let state = SyncState::IncrementalSyncInFlight
            .transition(SyncEvent::TokenInvalidated)
            .unwrap();
        assert_eq!(state, SyncState::FullSyncInFlight);
        assert_eq!(
            state.transition(SyncEvent::Succeeded).unwrap(),
            SyncState::Synced
        );
    }

    #[test]
    fn failures_do_not_retry() {
        let failed = SyncState::FullSyncInFlight
            .transition(SyncEvent::Failed)
            .unwrap();
        assert_eq!(failed, SyncState::Failed);
        assert!(failed.transition(SyncEvent::Succeeded).is_err());
    }

    #[test]
    fn invalid_moves_are_rejected() {
        assert!(SyncState::FullSyncInFlight
            .transition(SyncEvent::TokenInvalidated)
            .is_err());
        assert!(SyncState::IncrementalSyncInFlight
            .transition(start(SyncMode::Auto, true))
            .is_err());
        assert!(SyncState::Synced.transition(SyncEvent::Failed).is_err());
        assert!(SyncState::FullSyncInFlight.is_in_flight());
        assert!(!SyncState::Synced.is_in_flight());
    }
}
