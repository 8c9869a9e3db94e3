//! Sync error types.

use davsync_providers::{ParseSkip, ProviderError, ProviderErrorCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::secret::SecretError;
use crate::store::StoreError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while syncing or writing to a provider.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The provider rejected the credentials.
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// The stored sync token is no longer accepted.
    ///
    /// Recovered by falling back to a full sync; never returned to callers.
    #[error("sync token invalidated for calendar {calendar_id}")]
    SyncTokenInvalidated { calendar_id: String },

    /// Network failure, timeout, throttling or a server-side error.
    #[error("transient network error: {message}")]
    TransientNetwork { message: String },

    /// One sub-document could not be parsed. Logged and skipped; the rest
    /// of the resource still syncs.
    #[error("failed to parse {href}: {message}")]
    Parse { href: String, message: String },

    /// The store could not apply a change-set.
    #[error("store apply failed: {0}")]
    StoreApply(#[from] StoreError),

    /// The provider answered but the operation failed.
    #[error("remote error ({code}): {message}")]
    Remote {
        code: ProviderErrorCode,
        message: String,
    },

    /// The stored credential could not be decrypted.
    #[error("credential error: {0}")]
    Credential(#[from] SecretError),

    /// Unknown provider, unsupported kind or no usable calendar.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A bug in the engine's own bookkeeping.
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Stable classification of a [`SyncError`], for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    Auth,
    SyncTokenInvalidated,
    TransientNetwork,
    Parse,
    StoreApply,
    Remote,
    Credential,
    Configuration,
    Internal,
}

impl SyncErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::SyncTokenInvalidated => "sync_token_invalidated",
            Self::TransientNetwork => "transient_network",
            Self::Parse => "parse",
            Self::StoreApply => "store_apply",
            Self::Remote => "remote",
            Self::Credential => "credential",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SyncError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> SyncErrorKind {
        match self {
            Self::Auth { .. } => SyncErrorKind::Auth,
            Self::SyncTokenInvalidated { .. } => SyncErrorKind::SyncTokenInvalidated,
            Self::TransientNetwork { .. } => SyncErrorKind::TransientNetwork,
            Self::Parse { .. } => SyncErrorKind::Parse,
            Self::StoreApply(_) => SyncErrorKind::StoreApply,
            Self::Remote { .. } => SyncErrorKind::Remote,
            Self::Credential(_) => SyncErrorKind::Credential,
            Self::Configuration { .. } => SyncErrorKind::Configuration,
            Self::Internal { .. } => SyncErrorKind::Internal,
        }
    }

    /// Whether running the same invocation again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork { .. } | Self::StoreApply(_))
    }

    /// Whether the connection needs new credentials.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Classifies a provider failure seen while working on `calendar_id`.
    pub fn from_provider(error: ProviderError, calendar_id: &str) -> Self {
        if error.is_sync_token_invalidated() {
            return Self::SyncTokenInvalidated {
                calendar_id: calendar_id.to_string(),
            };
        }
        error.into()
    }
}

impl From<ProviderError> for SyncError {
    fn from(error: ProviderError) -> Self {
        let message = error.to_string();
        match error.code() {
            ProviderErrorCode::AuthenticationFailed => Self::Auth { message },
            ProviderErrorCode::SyncTokenInvalidated => Self::SyncTokenInvalidated {
                calendar_id: String::new(),
            },
            ProviderErrorCode::NetworkError
            | ProviderErrorCode::RateLimited
            | ProviderErrorCode::ServerError => Self::TransientNetwork { message },
            ProviderErrorCode::ConfigurationError => Self::Configuration { message },
            code => Self::Remote { code, message },
        }
    }
}

impl From<&ParseSkip> for SyncError {
    fn from(skip: &ParseSkip) -> Self {
        let message = match skip.uid {
            Some(ref uid) => format!("event {} (UID {uid}): {}", skip.index, skip.reason),
            None => format!("event {}: {}", skip.index, skip.reason),
        };
        Self::Parse {
            href: skip.href.clone(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_are_classified() {
        let auth: SyncError = ProviderError::authentication("bad password").into();
        assert_eq!(auth.kind(), SyncErrorKind::Auth);
        assert!(auth.requires_reauth());

        let net: SyncError = ProviderError::server("boom").with_status(503).into();
        assert_eq!(net.kind(), SyncErrorKind::TransientNetwork);
        assert!(net.is_retryable());

        let conflict: SyncError = ProviderError::conflict("etag").into();
        assert!(matches!(
            conflict,
            SyncError::Remote {
                code: ProviderErrorCode::Conflict,
                ..
            }
        ));
        assert!(!conflict.is_retryable());

        let forbidden: SyncError = ProviderError::authorization("nope").into();
        assert_eq!(forbidden.kind(), SyncErrorKind::Remote);
        assert!(!forbidden.requires_reauth());
    }

    #[test]
    fn token_invalidation_keeps_calendar() {
        let err = SyncError::from_provider(
            ProviderError::sync_token_invalidated("gone"),
            "https://dav.example.com/cal/",
        );
        match err {
            SyncError::SyncTokenInvalidated { calendar_id } => {
                assert_eq!(calendar_id, "https://dav.example.com/cal/")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_skips_become_parse_errors() {
        let skip = ParseSkip {
            href: "/cal/bad.ics".into(),
            index: 1,
            uid: Some("u1".into()),
            reason: "missing DTSTART".into(),
        };
        let err = SyncError::from(&skip);
        assert_eq!(err.kind(), SyncErrorKind::Parse);
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "failed to parse /cal/bad.ics: event 1 (UID u1): missing DTSTART"
        );

        let anonymous = ParseSkip { uid: None, ..skip };
        assert_eq!(
            SyncError::from(&anonymous).to_string(),
            "failed to parse /cal/bad.ics: event 1: missing DTSTART"
        );
    }

    #[test]
    fn error_messages() {
        let err = SyncError::configuration("no calendar");
        assert_eq!(err.to_string(), "configuration error: no calendar");
        assert_eq!(err.kind().to_string(), "configuration");
    }
}
