//! Reconciliation engine.
//!
//! This crate keeps a local event store in step with remote calendars:
//! - Full and incremental (sync-token) reconciliation per calendar
//! - Fallback to a full sync when a token is rejected
//! - Outbound create, update and delete of single events
//! - Store and cursor traits, with an in-memory store
//! - Credential decryption (AES-256-GCM)
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use davsync_engine::{AesGcmDecryptor, EngineConfig, MemoryStore, SyncService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let decryptor = Arc::new(AesGcmDecryptor::from_base64(&std::env::var("DAVSYNC_KEY")?)?);
//!     let service = SyncService::new(EngineConfig::default(), store, decryptor);
//!
//!     let report = service.perform_incremental_sync("work").await?;
//!     println!("{} upserts, {} deletes", report.total_upserts(), report.total_deletes());
//!     Ok(())
//! }
//! ```

mod config;
mod context;
mod error;
mod outbound;
mod reconcile;
mod report;
mod secret;
mod service;
mod state;
mod store;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use context::SyncContext;
pub use error::{SyncError, SyncErrorKind, SyncResult};
pub use outbound::{RemoteWrite, select_calendar};
pub use reconcile::Reconciler;
pub use report::{
    CalendarSyncReport, ProviderSyncReport, ReportedError, SkippedDocument, SyncStrategy,
};
pub use secret::{AesGcmDecryptor, Secret, SecretDecryptor, SecretError, SecretResult};
pub use service::{ProviderFactory, SyncService};
pub use state::{SyncEvent, SyncMode, SyncState};
pub use store::{
    ConnectionStore, EventStore, MemoryStore, ResourceIndex, Store, StoreError, StoreResult,
    StoreSnapshot,
};
