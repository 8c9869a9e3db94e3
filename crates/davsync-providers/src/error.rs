//! Errors raised at the protocol boundary.

use std::fmt;
use thiserror::Error;

/// What went wrong on the remote side, coarse enough for the engine to pick
/// a recovery (retry later, fall back to a full sync, ask for credentials).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
    /// 401 after the challenge retry.
    AuthenticationFailed,
    /// 403.
    AuthorizationFailed,
    NetworkError,
    /// 429.
    RateLimited,
    ServerError,
    /// Unparseable body or unexpected status.
    InvalidResponse,
    NotFound,
    BadRequest,
    /// A conditional write lost the race (412).
    Conflict,
    SyncTokenInvalidated,
    ConfigurationError,
    InternalError,
}

impl ProviderErrorCode {
    /// Retrying later may succeed without anyone intervening.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::RateLimited | Self::ServerError
        )
    }

    pub fn as_str(&self) -> &'static str {
        use ProviderErrorCode::*;
        match self {
            AuthenticationFailed => "authentication_failed",
            AuthorizationFailed => "authorization_failed",
            NetworkError => "network_error",
            RateLimited => "rate_limited",
            ServerError => "server_error",
            InvalidResponse => "invalid_response",
            NotFound => "not_found",
            BadRequest => "bad_request",
            Conflict => "conflict",
            SyncTokenInvalidated => "sync_token_invalidated",
            ConfigurationError => "configuration_error",
            InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from a [`ProviderClient`](crate::ProviderClient) call.
///
/// Displays as `[caldav] conflict: etag mismatch (HTTP 412)`, with the
/// provider tag and status only when known.
#[derive(Debug, Error)]
#[error("{}{code}: {message}{}", tag(.provider), http(.status))]
pub struct ProviderError {
    code: ProviderErrorCode,
    message: String,
    provider: Option<&'static str>,
    status: Option<u16>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

fn tag(provider: &Option<&'static str>) -> String {
    provider.map(|p| format!("[{p}] ")).unwrap_or_default()
}

fn http(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

macro_rules! constructors {
    ($($name:ident => $code:ident),* $(,)?) => {
        $(
            pub fn $name(message: impl Into<String>) -> Self {
                Self::new(ProviderErrorCode::$code, message)
            }
        )*
    };
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider: None,
            status: None,
            source: None,
        }
    }

    constructors! {
        authentication => AuthenticationFailed,
        authorization => AuthorizationFailed,
        network => NetworkError,
        rate_limited => RateLimited,
        server => ServerError,
        invalid_response => InvalidResponse,
        not_found => NotFound,
        bad_request => BadRequest,
        conflict => Conflict,
        sync_token_invalidated => SyncTokenInvalidated,
        configuration => ConfigurationError,
        internal => InternalError,
    }

    /// Tags the error with the provider kind that raised it, e.g. `caldav`.
    pub fn with_provider(mut self, provider: &'static str) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> ProviderErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn is_sync_token_invalidated(&self) -> bool {
        self.code == ProviderErrorCode::SyncTokenInvalidated
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_and_server_failures_are_retryable() {
        let retryable: Vec<_> = [
            ProviderError::network("reset"),
            ProviderError::rate_limited("slow down"),
            ProviderError::server("boom"),
            ProviderError::sync_token_invalidated("expired"),
            ProviderError::conflict("etag"),
            ProviderError::authentication("nope"),
        ]
        .iter()
        .map(ProviderError::is_retryable)
        .collect();
        assert_eq!(retryable, [true, true, true, false, false, false]);
    }

    #[test]
    fn token_rejection_is_recognisable() {
        let err = ProviderError::sync_token_invalidated("token expired");
        assert!(err.is_sync_token_invalidated());
        assert_eq!(err.code().as_str(), "sync_token_invalidated");
        assert!(!ProviderError::not_found("gone").is_sync_token_invalidated());
    }

    #[test]
    fn display() {
        let err = ProviderError::conflict("etag mismatch")
            .with_provider("caldav")
            .with_status(412);
        assert_eq!(err.to_string(), "[caldav] conflict: etag mismatch (HTTP 412)");
        assert_eq!(
            ProviderError::internal("bad method").to_string(),
            "internal_error: bad method"
        );
    }

    #[test]
    fn source_is_kept() {
        use std::error::Error;
        let err = ProviderError::network("connect failed")
            .with_source(std::io::Error::other("refused"));
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("refused"));
    }
}
