//! CalDAV provider.
//!
//! - Basic and Digest authentication, chosen from the server challenge
//! - Principal and calendar-home-set discovery
//! - Full fetches through `calendar-query`
//! - Incremental fetches through `sync-collection` and `calendar-multiget`
//! - Conditional writes with `If-Match` / `If-None-Match`
//!
//! # Example
//!
//! ```ignore
//! use davsync_providers::caldav::{CalDavConfig, CalDavProvider};
//! use davsync_providers::{Credentials, ProviderClient};
//!
//! let provider = CalDavProvider::new(CalDavConfig::new())?;
//! let session = provider
//!     .authenticate(&Credentials::new("https://dav.example.com/", "alice", "secret"))
//!     .await?;
//! let calendars = provider.discover_calendars(&session).await?;
//! ```

mod auth;
mod client;
mod config;
mod generate;
mod ics;
mod provider;
mod xml;

pub use config::CalDavConfig;
pub use generate::{generate_document, generate_series};
pub use ics::parse_calendar_document;
pub use provider::CalDavProvider;
