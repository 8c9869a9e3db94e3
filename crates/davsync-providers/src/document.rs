//! Raw provider payloads and the shared normalization capability.
//!
//! Each provider kind contributes one [`RawDocument`] variant. Every variant
//! can be turned into canonical events through [`Normalizer`], so the engine
//! never needs to know which wire format it is holding.

use davsync_core::{CanonicalEvent, ProviderKind};

/// Why one sub-document was left out of a [`NormalizedDocument`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSkip {
    /// Resource the sub-document came from.
    pub href: String,
    /// Position of the sub-document inside the resource.
    pub index: usize,
    /// UID, if it could be read before parsing failed.
    pub uid: Option<String>,
    pub reason: String,
}

/// Events parsed out of one raw document, plus what had to be skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedDocument {
    pub events: Vec<CanonicalEvent>,
    pub skipped: Vec<ParseSkip>,
}

impl NormalizedDocument {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.skipped.is_empty()
    }
}

/// Converts a provider payload into canonical events.
///
/// A failure in one sub-document never drops its siblings; it is recorded in
/// [`NormalizedDocument::skipped`] instead.
pub trait Normalizer {
    fn normalize(&self) -> NormalizedDocument;
}

/// An iCalendar resource fetched from a CalDAV collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalDavDocument {
    pub href: String,
    pub etag: Option<String>,
    /// The `VCALENDAR` text.
    pub data: String,
    pub calendar_id: String,
    pub calendar_name: Option<String>,
}

/// A fetched payload, tagged by the provider kind that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawDocument {
    CalDav(CalDavDocument),
}

impl RawDocument {
    pub fn provider_kind(&self) -> ProviderKind {
        match self {
            Self::CalDav(_) => ProviderKind::CalDav,
        }
    }

    /// Remote location of the payload.
    pub fn href(&self) -> &str {
        match self {
            Self::CalDav(doc) => &doc.href,
        }
    }
}

impl Normalizer for RawDocument {
    fn normalize(&self) -> NormalizedDocument {
        match self {
            Self::CalDav(doc) => doc.normalize(),
        }
    }
}

impl Normalizer for CalDavDocument {
    fn normalize(&self) -> NormalizedDocument {
        crate::caldav::parse_calendar_document(self)
    }
}
