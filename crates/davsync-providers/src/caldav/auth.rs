//! HTTP authentication for CalDAV servers.
//!
//! Basic (RFC 7617) and Digest (RFC 7616, MD5 with `qop=auth`).

use base64::Engine;
use rand::Rng;
use std::collections::HashMap;

use crate::provider::Credentials;

/// The scheme negotiated with a server after its first challenge.
#[derive(Debug, Clone)]
pub enum AuthScheme {
    Basic,
    Digest(DigestChallenge),
}

impl AuthScheme {
    /// Picks a scheme from a `WWW-Authenticate` header. Digest wins when
    /// offered; anything else falls back to Basic.
    pub fn from_challenge(header: &str) -> Self {
        header
            .split_once("Digest ")
            .and_then(|(_, rest)| DigestChallenge::parse(rest))
            .map(Self::Digest)
            .unwrap_or(Self::Basic)
    }

    /// Builds the `Authorization` header for one request.
    pub fn authorization(&mut self, method: &str, uri: &str, credentials: &Credentials) -> String {
        match self {
            Self::Basic => basic_auth(&credentials.username, credentials.password()),
            Self::Digest(challenge) => {
                challenge.authorize(method, uri, &credentials.username, credentials.password())
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Digest(_) => "digest",
        }
    }
}

/// Parameters of a Digest challenge plus the request counter.
#[derive(Debug, Clone)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    /// Whether the server offered `qop=auth`.
    pub qop_auth: bool,
    pub algorithm: String,
    nc: u32,
}

impl DigestChallenge {
    /// Parses the parameter list following `Digest `.
    pub fn parse(params: &str) -> Option<Self> {
        let params = parse_auth_params(params);

        let qop_auth = params
            .get("qop")
            .is_some_and(|q| q.split(',').any(|v| v.trim().eq_ignore_ascii_case("auth")));

        Some(Self {
            realm: params.get("realm")?.clone(),
            nonce: params.get("nonce")?.clone(),
            opaque: params.get("opaque").cloned(),
            qop_auth,
            algorithm: params
                .get("algorithm")
                .cloned()
                .unwrap_or_else(|| "MD5".to_string()),
            nc: 0,
        })
    }

    pub fn authorize(&mut self, method: &str, uri: &str, username: &str, password: &str) -> String {
        self.nc += 1;
        let nc = format!("{:08x}", self.nc);
        let cnonce = generate_cnonce();

        let ha1 = md5_hex(&format!("{}:{}:{}", username, self.realm, password));
        let ha2 = md5_hex(&format!("{}:{}", method, uri));

        let response = if self.qop_auth {
            md5_hex(&format!(
                "{}:{}:{}:{}:auth:{}",
                ha1, self.nonce, nc, cnonce, ha2
            ))
        } else {
            md5_hex(&format!("{}:{}:{}", ha1, self.nonce, ha2))
        };

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm={}",
            username, self.realm, self.nonce, uri, response, self.algorithm
        );
        if self.qop_auth {
            header.push_str(&format!(", qop=auth, nc={}, cnonce=\"{}\"", nc, cnonce));
        }
        if let Some(ref opaque) = self.opaque {
            header.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        header
    }
}

pub fn basic_auth(username: &str, password: &str) -> String {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password));
    format!("Basic {}", encoded)
}

/// Splits `key=value, key="quoted value"` pairs. Keys are lowercased.
fn parse_auth_params(content: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = content.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }

        let key: String = chars
            .by_ref()
            .take_while(|c| *c != '=')
            .collect::<String>()
            .trim()
            .to_ascii_lowercase();
        if key.is_empty() {
            break;
        }

        let value = if chars.peek() == Some(&'"') {
            chars.next();
            let mut value = String::new();
            let mut escaped = false;
            for c in chars.by_ref() {
                match (escaped, c) {
                    (true, c) => {
                        value.push(c);
                        escaped = false;
                    }
                    (false, '\\') => escaped = true,
                    (false, '"') => break,
                    (false, c) => value.push(c),
                }
            }
            value
        } else {
            chars
                .by_ref()
                .take_while(|c| *c != ',' && !c.is_whitespace())
                .collect()
        };

        params.insert(key, value);
    }

    params
}

fn generate_cnonce() -> String {
    let bytes: [u8; 8] = rand::rng().random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}
