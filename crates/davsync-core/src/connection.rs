//! Provider connections and the calendars they expose.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::change::SyncCursor;

/// Kind of remote account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    CalDav,
    Google,
    Outlook,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CalDav => "caldav",
            Self::Google => "google",
            Self::Outlook => "outlook",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A credential encrypted at rest with an AEAD cipher.
///
/// The three parts serialize as base64 strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedCredential {
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub tag: Vec<u8>,
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A calendar collection known for a connection, with its sync cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarRef {
    /// Collection URL.
    pub id: String,
    pub display_name: String,
    #[serde(default = "default_true")]
    pub sync_enabled: bool,
    #[serde(default)]
    pub ctag: Option<String>,
    #[serde(default)]
    pub sync_token: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

fn default_true() -> bool {
    true
}

impl CalendarRef {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            sync_enabled: true,
            ctag: None,
            sync_token: None,
            color: None,
            is_primary: false,
        }
    }

    #[must_use]
    pub fn with_ctag(mut self, ctag: impl Into<String>) -> Self {
        self.ctag = Some(ctag.into());
        self
    }

    #[must_use]
    pub fn with_sync_token(mut self, token: impl Into<String>) -> Self {
        self.sync_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    #[must_use]
    pub fn with_primary(mut self, primary: bool) -> Self {
        self.is_primary = primary;
        self
    }

    #[must_use]
    pub fn with_sync_enabled(mut self, enabled: bool) -> Self {
        self.sync_enabled = enabled;
        self
    }

    /// The stored cursor of this calendar.
    pub fn cursor(&self) -> SyncCursor {
        SyncCursor {
            calendar_id: self.id.clone(),
            ctag: self.ctag.clone(),
            sync_token: self.sync_token.clone(),
        }
    }

    /// Replaces the stored cursor.
    pub fn set_cursor(&mut self, cursor: &SyncCursor) {
        self.ctag = cursor.ctag.clone();
        self.sync_token = cursor.sync_token.clone();
    }
}

/// A linked remote account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConnection {
    pub id: String,
    pub kind: ProviderKind,
    pub username: String,
    pub credential: EncryptedCredential,
    pub server_url: String,
    #[serde(default)]
    pub calendars: Vec<CalendarRef>,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    /// Set when the remote rejected the stored credential.
    #[serde(default)]
    pub needs_reauth: bool,
}

impl ProviderConnection {
    pub fn new(
        id: impl Into<String>,
        kind: ProviderKind,
        username: impl Into<String>,
        credential: EncryptedCredential,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            username: username.into(),
            credential,
            server_url: server_url.into(),
            calendars: Vec::new(),
            last_sync: None,
            needs_reauth: false,
        }
    }

    pub fn calendar(&self, calendar_id: &str) -> Option<&CalendarRef> {
        self.calendars.iter().find(|c| c.id == calendar_id)
    }

    pub fn calendar_mut(&mut self, calendar_id: &str) -> Option<&mut CalendarRef> {
        self.calendars.iter_mut().find(|c| c.id == calendar_id)
    }

    /// Calendars that take part in sync.
    pub fn enabled_calendars(&self) -> impl Iterator<Item = &CalendarRef> {
        self.calendars.iter().filter(|c| c.sync_enabled)
    }

    /// Calendar for a write without an explicit target: the primary one if
    /// enabled, else the first enabled one.
    pub fn default_calendar(&self) -> Option<&CalendarRef> {
        self.enabled_calendars()
            .find(|c| c.is_primary)
            .or_else(|| self.enabled_calendars().next())
    }

    /// Merges freshly discovered calendars.
    ///
    /// New calendars are added enabled. Known calendars keep their cursor and
    /// `sync_enabled` flag; name, color and primary flag are refreshed.
    /// Calendars no longer reported by the server are kept.
    pub fn merge_calendars(&mut self, discovered: Vec<CalendarRef>) {
        for found in discovered {
            match self.calendar_mut(&found.id) {
                Some(known) => {
                    known.display_name = found.display_name;
                    known.color = found.color;
                    known.is_primary = found.is_primary;
                }
                None => self.calendars.push(CalendarRef {
                    ctag: None,
                    sync_token: None,
                    sync_enabled: true,
                    ..found
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> ProviderConnection {
        ProviderConnection::new(
            "conn-1",
            ProviderKind::CalDav,
            "alice",
            EncryptedCredential {
                ciphertext: vec![1, 2, 3],
                iv: vec![0; 12],
                tag: vec![9; 16],
            },
            "https://dav.example.com/",
        )
    }

    #[test]
    fn credential_serializes_as_base64() {
        let json = serde_json::to_value(&connection()).unwrap();
        assert_eq!(json["credential"]["ciphertext"], "AQID");
        assert_eq!(json["kind"], "caldav");

        let back: ProviderConnection = serde_json::from_value(json).unwrap();
        assert_eq!(back.credential.ciphertext, vec![1, 2, 3]);
    }

    #[test]
    fn bad_base64_is_rejected() {
        let json = r#"{"ciphertext":"***","iv":"","tag":""}"#;
        assert!(serde_json::from_str::<EncryptedCredential>(json).is_err());
    }

    #[test]
    fn merge_keeps_cursor_and_enabled_flag() {
        let mut conn = connection();
        conn.calendars.push(
            CalendarRef::new("/cal/work/", "Work")
                .with_ctag("c1")
                .with_sync_token("t1")
                .with_sync_enabled(false),
        );

        conn.merge_calendars(vec![
            CalendarRef::new("/cal/work/", "Work (renamed)")
                .with_ctag("c2")
                .with_color("#ff0000"),
            CalendarRef::new("/cal/home/", "Home").with_ctag("h1"),
        ]);

        let work = conn.calendar("/cal/work/").unwrap();
        assert_eq!(work.display_name, "Work (renamed)");
        assert_eq!(work.ctag.as_deref(), Some("c1"));
        assert_eq!(work.sync_token.as_deref(), Some("t1"));
        assert!(!work.sync_enabled);
        assert_eq!(work.color.as_deref(), Some("#ff0000"));

        let home = conn.calendar("/cal/home/").unwrap();
        assert!(home.sync_enabled);
        assert!(home.ctag.is_none());
    }

    #[test]
    fn default_calendar_prefers_primary() {
        let mut conn = connection();
        conn.calendars.push(CalendarRef::new("/a/", "A"));
        conn.calendars.push(CalendarRef::new("/b/", "B").with_primary(true));
        assert_eq!(conn.default_calendar().unwrap().id, "/b/");

        conn.calendar_mut("/b/").unwrap().sync_enabled = false;
        assert_eq!(conn.default_calendar().unwrap().id, "/a/");
    }

    #[test]
    fn cursor_round_trips_through_calendar() {
        let mut cal = CalendarRef::new("/a/", "A");
        let cursor = SyncCursor::new("/a/")
            .with_ctag(Some("x".into()))
            .with_sync_token(Some("y".into()));
        cal.set_cursor(&cursor);
        assert_eq!(cal.cursor(), cursor);
    }
}
