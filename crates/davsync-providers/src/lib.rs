//! Remote calendar providers.
//!
//! This crate holds everything that speaks to a remote calendar service:
//!
//! - [`ProviderClient`] - protocol I/O, one implementation per provider kind
//! - [`RawDocument`] and [`Normalizer`] - fetched payloads and their
//!   conversion into canonical events
//! - [`ProviderError`] - classified failures the sync engine acts on
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  CalDAV Server  │
//! └────────┬────────┘
//!          │ PROPFIND / REPORT / PUT / DELETE
//!          ▼
//! ┌─────────────────┐
//! │ CalDavProvider  │  ProviderClient
//! └────────┬────────┘
//!          │ RemoteObject
//!          ▼
//! ┌─────────────────┐
//! │   RawDocument   │  Normalizer
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  CanonicalEvent  │
//! └──────────────────┘
//! ```

pub mod caldav;
pub mod document;
pub mod error;
pub mod provider;

pub use document::{CalDavDocument, NormalizedDocument, Normalizer, ParseSkip, RawDocument};
pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use provider::{
    BoxFuture, Credentials, ProviderClient, RemoteChanges, RemoteObject, Session, WriteReceipt,
};
