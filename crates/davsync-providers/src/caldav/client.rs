//! HTTP transport for CalDAV.
//!
//! Requests are first sent without credentials; the `WWW-Authenticate`
//! challenge of the first 401 picks the scheme (Basic or Digest) used for
//! the retry and for every later request of this client.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, ETAG, IF_MATCH, IF_NONE_MATCH, WWW_AUTHENTICATE};
use reqwest::{Client, Method, Response, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::Credentials;

use super::auth::AuthScheme;
use super::config::CalDavConfig;

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";
const ICS_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

/// One request, kept whole so it can be replayed after a challenge.
#[derive(Debug, Clone)]
pub struct DavRequest {
    method: Method,
    url: String,
    body: Option<(String, &'static str)>,
    depth: Option<u8>,
    if_match: Option<String>,
    if_none_match_any: bool,
}

impl DavRequest {
    fn new(method: Method, url: &str) -> Self {
        Self {
            method,
            url: url.to_string(),
            body: None,
            depth: None,
            if_match: None,
            if_none_match_any: false,
        }
    }

    fn dav_method(name: &'static str, url: &str) -> ProviderResult<Self> {
        let method = Method::from_bytes(name.as_bytes())
            .map_err(|_| ProviderError::internal(format!("invalid HTTP method: {}", name)))?;
        Ok(Self::new(method, url))
    }

    pub fn propfind(url: &str, body: String, depth: u8) -> ProviderResult<Self> {
        let mut request = Self::dav_method("PROPFIND", url)?;
        request.body = Some((body, XML_CONTENT_TYPE));
        request.depth = Some(depth);
        Ok(request)
    }

    pub fn report(url: &str, body: String, depth: u8) -> ProviderResult<Self> {
        let mut request = Self::dav_method("REPORT", url)?;
        request.body = Some((body, XML_CONTENT_TYPE));
        request.depth = Some(depth);
        Ok(request)
    }

    pub fn put(url: &str, document: String) -> Self {
        let mut request = Self::new(Method::PUT, url);
        request.body = Some((document, ICS_CONTENT_TYPE));
        request
    }

    pub fn delete(url: &str) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Only apply if the resource still has this etag.
    pub fn if_match(mut self, etag: &str) -> Self {
        self.if_match = Some(quote_etag(etag));
        self
    }

    /// Only apply if the resource does not exist yet.
    pub fn if_none_match_any(mut self) -> Self {
        self.if_none_match_any = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Status, etag and body of a response.
#[derive(Debug, Clone)]
pub struct DavReply {
    pub status: StatusCode,
    pub etag: Option<String>,
    pub body: String,
}

impl DavReply {
    /// Maps non-success statuses to provider errors.
    pub fn success(self) -> ProviderResult<Self> {
        if self.status.is_success() {
            return Ok(self);
        }
        Err(status_error(self.status, &self.body))
    }
}

/// Classifies an unsuccessful status.
pub fn status_error(status: StatusCode, body: &str) -> ProviderError {
    let code = status.as_u16();
    let error = match status {
        StatusCode::UNAUTHORIZED => ProviderError::authentication("credentials rejected by server"),
        StatusCode::FORBIDDEN => ProviderError::authorization("access denied"),
        StatusCode::NOT_FOUND => ProviderError::not_found("resource not found"),
        StatusCode::PRECONDITION_FAILED => {
            ProviderError::conflict("resource changed on the server (precondition failed)")
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderError::rate_limited("too many requests"),
        s if s.is_server_error() => ProviderError::server(format!("server error: {}", snippet(body))),
        s if s.is_client_error() => {
            ProviderError::bad_request(format!("request rejected: {}", snippet(body)))
        }
        _ => {
            warn!(status = %status, "unexpected response status");
            ProviderError::invalid_response(format!("unexpected status: {}", snippet(body)))
        }
    };
    error.with_provider("caldav").with_status(code)
}

fn snippet(body: &str) -> &str {
    let body = body.trim();
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Adds the quotes `If-Match` needs when the stored etag lost them.
fn quote_etag(etag: &str) -> String {
    if etag.starts_with('"') || etag.starts_with("W/") {
        etag.to_string()
    } else {
        format!("\"{}\"", etag)
    }
}

/// HTTP client with per-server authentication state.
pub struct CalDavClient {
    client: Client,
    scheme: Mutex<Option<AuthScheme>>,
}

impl CalDavClient {
    pub fn new(config: &CalDavConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ProviderError::configuration(format!("failed to create HTTP client: {}", e))
                    .with_source(e)
            })?;

        Ok(Self {
            client,
            scheme: Mutex::new(None),
        })
    }

    /// Sends a request, answering one authentication challenge if needed.
    ///
    /// The reply is returned whatever its status, except for a second 401
    /// which fails with an authentication error.
    pub async fn execute(
        &self,
        request: &DavRequest,
        credentials: &Credentials,
    ) -> ProviderResult<DavReply> {
        let response = self.send(request, credentials).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return read_reply(response).await;
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let scheme = AuthScheme::from_challenge(&challenge);
        debug!(scheme = scheme.name(), url = %request.url, "answering authentication challenge");
        *self.scheme.lock().await = Some(scheme);

        let response = self.send(request, credentials).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(status_error(StatusCode::UNAUTHORIZED, ""));
        }
        read_reply(response).await
    }

    async fn send(&self, request: &DavRequest, credentials: &Credentials) -> ProviderResult<Response> {
        let mut builder = self.client.request(request.method.clone(), &request.url);

        if let Some((ref body, content_type)) = request.body {
            builder = builder
                .header(CONTENT_TYPE, content_type)
                .body(body.clone());
        }
        if let Some(depth) = request.depth {
            builder = builder.header("Depth", depth.to_string());
        }
        if let Some(ref etag) = request.if_match {
            builder = builder.header(IF_MATCH, etag);
        }
        if request.if_none_match_any {
            builder = builder.header(IF_NONE_MATCH, "*");
        }

        if let Some(scheme) = self.scheme.lock().await.as_mut() {
            let uri = url::Url::parse(&request.url)
                .map(|u| u.path().to_string())
                .unwrap_or_else(|_| request.url.clone());
            builder = builder.header(
                AUTHORIZATION,
                scheme.authorization(request.method.as_str(), &uri, credentials),
            );
        }

        trace!(method = %request.method, url = %request.url, "sending request");

        builder.send().await.map_err(|e| {
            ProviderError::network(format!("{} {} failed: {}", request.method, request.url, e))
                .with_provider("caldav")
                .with_source(e)
        })
    }
}

async fn read_reply(response: Response) -> ProviderResult<DavReply> {
    let status = response.status();
    let etag = response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.map_err(|e| {
        ProviderError::network(format!("failed to read response body: {}", e))
            .with_provider("caldav")
            .with_source(e)
    })?;
    trace!(status = %status, bytes = body.len(), "received response");

    Ok(DavReply { status, etag, body })
}
