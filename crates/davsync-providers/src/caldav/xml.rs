//! WebDAV/CalDAV request bodies and multistatus parsing.

use std::io::Cursor;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use crate::error::{ProviderError, ProviderResult};

pub const DAV_NS: &str = "DAV:";
pub const CALDAV_NS: &str = "urn:ietf:params:xml:ns:caldav";
/// CalendarServer extensions (`getctag`).
pub const CS_NS: &str = "http://calendarserver.org/ns/";
/// Apple iCal extensions (`calendar-color`).
pub const ICAL_NS: &str = "http://apple.com/ns/ical/";

/// Properties found in one `propstat` (or merged across the successful ones).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DavProps {
    pub etag: Option<String>,
    pub calendar_data: Option<String>,
    pub display_name: Option<String>,
    pub color: Option<String>,
    pub ctag: Option<String>,
    pub sync_token: Option<String>,
    pub current_user_principal: Option<String>,
    pub calendar_home_set: Option<String>,
    pub is_calendar: bool,
    /// `None` when the server did not declare a component set.
    pub supported_components: Option<Vec<String>>,
}

impl DavProps {
    fn merge(&mut self, other: DavProps) {
        fn keep<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }
        keep(&mut self.etag, other.etag);
        keep(&mut self.calendar_data, other.calendar_data);
        keep(&mut self.display_name, other.display_name);
        keep(&mut self.color, other.color);
        keep(&mut self.ctag, other.ctag);
        keep(&mut self.sync_token, other.sync_token);
        keep(&mut self.current_user_principal, other.current_user_principal);
        keep(&mut self.calendar_home_set, other.calendar_home_set);
        keep(&mut self.supported_components, other.supported_components);
        self.is_calendar |= other.is_calendar;
    }

    /// True unless a component set was declared without `VEVENT`.
    pub fn supports_events(&self) -> bool {
        self.supported_components
            .as_ref()
            .is_none_or(|comps| comps.iter().any(|c| c.eq_ignore_ascii_case("VEVENT")))
    }
}

/// One `<response>` of a multistatus body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DavResponse {
    pub href: String,
    /// Response-level status, used by `sync-collection` for removed members.
    pub status: Option<u16>,
    pub props: DavProps,
}

impl DavResponse {
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

/// A parsed `207 Multi-Status` body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Multistatus {
    pub responses: Vec<DavResponse>,
    /// Top-level `sync-token` of a `sync-collection` report.
    pub sync_token: Option<String>,
}

struct BodyWriter {
    writer: Writer<Cursor<Vec<u8>>>,
}

fn write_error(e: impl std::fmt::Display) -> ProviderError {
    ProviderError::internal(format!("failed to build XML body: {}", e))
}

impl BodyWriter {
    /// Opens the root element with the namespace prefixes used in this module.
    fn new(root: &str) -> ProviderResult<Self> {
        let mut body = Self {
            writer: Writer::new(Cursor::new(Vec::new())),
        };
        let mut start = BytesStart::new(root);
        start.push_attribute(("xmlns:d", DAV_NS));
        start.push_attribute(("xmlns:c", CALDAV_NS));
        start.push_attribute(("xmlns:cs", CS_NS));
        start.push_attribute(("xmlns:ic", ICAL_NS));
        body.writer
            .write_event(Event::Start(start))
            .map_err(write_error)?;
        Ok(body)
    }

    fn open(&mut self, name: &str) -> ProviderResult<&mut Self> {
        self.open_with(name, &[])
    }

    fn open_with(&mut self, name: &str, attrs: &[(&str, &str)]) -> ProviderResult<&mut Self> {
        let mut start = BytesStart::new(name);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.writer
            .write_event(Event::Start(start))
            .map_err(write_error)?;
        Ok(self)
    }

    fn close(&mut self, name: &str) -> ProviderResult<&mut Self> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(write_error)?;
        Ok(self)
    }

    fn empty(&mut self, name: &str) -> ProviderResult<&mut Self> {
        self.writer
            .write_event(Event::Empty(BytesStart::new(name)))
            .map_err(write_error)?;
        Ok(self)
    }

    fn text_element(&mut self, name: &str, text: &str) -> ProviderResult<&mut Self> {
        self.open(name)?;
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(write_error)?;
        self.close(name)
    }

    fn props(&mut self, names: &[&str]) -> ProviderResult<&mut Self> {
        self.open("d:prop")?;
        for name in names {
            self.empty(name)?;
        }
        self.close("d:prop")
    }

    fn finish(mut self, root: &str) -> ProviderResult<String> {
        self.close(root)?;
        String::from_utf8(self.writer.into_inner().into_inner()).map_err(write_error)
    }
}

fn propfind(props: &[&str]) -> ProviderResult<String> {
    let mut body = BodyWriter::new("d:propfind")?;
    body.props(props)?;
    body.finish("d:propfind")
}

/// `PROPFIND` body asking for `current-user-principal`.
pub fn propfind_principal_body() -> ProviderResult<String> {
    propfind(&["d:current-user-principal"])
}

/// `PROPFIND` body asking for `calendar-home-set`.
pub fn propfind_home_set_body() -> ProviderResult<String> {
    propfind(&["c:calendar-home-set"])
}

/// `PROPFIND` body for calendar discovery and collection state.
pub fn propfind_calendars_body() -> ProviderResult<String> {
    propfind(&[
        "d:resourcetype",
        "d:displayname",
        "cs:getctag",
        "d:sync-token",
        "ic:calendar-color",
        "c:supported-calendar-component-set",
    ])
}

/// `calendar-query` REPORT for every `VEVENT` resource, without time range.
pub fn calendar_query_body() -> ProviderResult<String> {
    let mut body = BodyWriter::new("c:calendar-query")?;
    body.props(&["d:getetag", "c:calendar-data"])?;
    body.open("c:filter")?
        .open_with("c:comp-filter", &[("name", "VCALENDAR")])?
        .open_with("c:comp-filter", &[("name", "VEVENT")])?
        .close("c:comp-filter")?
        .close("c:comp-filter")?
        .close("c:filter")?;
    body.finish("c:calendar-query")
}

/// `calendar-multiget` REPORT for the given member hrefs.
pub fn calendar_multiget_body(hrefs: &[&str]) -> ProviderResult<String> {
    let mut body = BodyWriter::new("c:calendar-multiget")?;
    body.props(&["d:getetag", "c:calendar-data"])?;
    for href in hrefs {
        body.text_element("d:href", href)?;
    }
    body.finish("c:calendar-multiget")
}

/// `sync-collection` REPORT (RFC 6578) at sync-level 1.
pub fn sync_collection_body(sync_token: &str) -> ProviderResult<String> {
    let mut body = BodyWriter::new("d:sync-collection")?;
    body.text_element("d:sync-token", sync_token)?
        .text_element("d:sync-level", "1")?
        .props(&["d:getetag"])?;
    body.finish("d:sync-collection")
}

/// Parses a multistatus body.
///
/// Props from `propstat` blocks with a non-2xx status are dropped.
pub fn parse_multistatus(xml: &str) -> ProviderResult<Multistatus> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut result = Multistatus::default();
    let mut stack: Vec<String> = Vec::new();
    let mut response: Option<DavResponse> = None;
    let mut propstat: Option<(DavProps, Option<u16>)> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            ProviderError::invalid_response(format!(
                "malformed multistatus at byte {}: {}",
                reader.buffer_position(),
                e
            ))
        })?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                let parent = stack.last().map(String::as_str);

                match (local.as_str(), parent) {
                    ("response", _) => response = Some(DavResponse::default()),
                    ("propstat", _) => propstat = Some((DavProps::default(), None)),
                    ("calendar", Some("resourcetype")) => {
                        if let Some((props, _)) = propstat.as_mut() {
                            props.is_calendar = true;
                        }
                    }
                    ("supported-calendar-component-set", _) => {
                        if let Some((props, _)) = propstat.as_mut() {
                            props.supported_components.get_or_insert_with(Vec::new);
                        }
                    }
                    ("comp", Some("supported-calendar-component-set")) => {
                        let name = e
                            .try_get_attribute("name")
                            .ok()
                            .flatten()
                            .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()));
                        if let (Some((props, _)), Some(name)) = (propstat.as_mut(), name) {
                            props
                                .supported_components
                                .get_or_insert_with(Vec::new)
                                .push(name);
                        }
                    }
                    _ => {}
                }

                if matches!(event, Event::Start(_)) {
                    stack.push(local);
                }
            }
            Event::End(ref e) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                stack.pop();

                match local.as_str() {
                    "propstat" => {
                        if let (Some((props, status)), Some(resp)) =
                            (propstat.take(), response.as_mut())
                        {
                            if status.is_none_or(|s| (200..300).contains(&s)) {
                                resp.props.merge(props);
                            }
                        }
                    }
                    "response" => {
                        if let Some(resp) = response.take() {
                            if !resp.href.is_empty() {
                                result.responses.push(resp);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(ref e) => {
                let text = e
                    .unescape()
                    .map_err(|err| {
                        ProviderError::invalid_response(format!("bad text in multistatus: {}", err))
                    })?
                    .to_string();
                handle_text(&stack, text, &mut result, &mut response, &mut propstat);
            }
            Event::CData(ref e) => {
                let text = String::from_utf8_lossy(e).to_string();
                handle_text(&stack, text, &mut result, &mut response, &mut propstat);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(result)
}

fn handle_text(
    stack: &[String],
    text: String,
    result: &mut Multistatus,
    response: &mut Option<DavResponse>,
    propstat: &mut Option<(DavProps, Option<u16>)>,
) {
    let Some(current) = stack.last() else {
        return;
    };
    let parent = stack.len().checked_sub(2).map(|i| stack[i].as_str());

    match (current.as_str(), parent) {
        ("href", Some("response")) => {
            if let Some(resp) = response.as_mut() {
                resp.href = text;
            }
        }
        ("status", Some("response")) => {
            if let Some(resp) = response.as_mut() {
                resp.status = parse_status_line(&text);
            }
        }
        ("status", Some("propstat")) => {
            if let Some((_, status)) = propstat.as_mut() {
                *status = parse_status_line(&text);
            }
        }
        ("sync-token", Some("multistatus")) => result.sync_token = Some(text),
        (name, parent) => {
            let Some((props, _)) = propstat.as_mut() else {
                return;
            };
            match (name, parent) {
                ("href", Some("current-user-principal")) => {
                    props.current_user_principal = Some(text)
                }
                ("href", Some("calendar-home-set")) => props.calendar_home_set = Some(text),
                ("getetag", _) => props.etag = Some(text),
                ("calendar-data", _) => match props.calendar_data.as_mut() {
                    Some(data) => data.push_str(&text),
                    None => props.calendar_data = Some(text),
                },
                ("displayname", _) => props.display_name = Some(text),
                ("calendar-color", _) => props.color = Some(text),
                ("getctag", _) => props.ctag = Some(text),
                ("sync-token", _) => props.sync_token = Some(text),
                _ => {}
            }
        }
    }
}

/// Extracts the code from `HTTP/1.1 404 Not Found`.
fn parse_status_line(line: &str) -> Option<u16> {
    line.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_bodies_carry_expected_elements() {
        let principal = propfind_principal_body().unwrap();
        assert!(principal.contains("<d:current-user-principal/>"));

        let home = propfind_home_set_body().unwrap();
        assert!(home.contains("<c:calendar-home-set/>"));

        let calendars = propfind_calendars_body().unwrap();
        for prop in ["cs:getctag", "d:sync-token", "ic:calendar-color", "d:displayname"] {
            assert!(calendars.contains(prop), "missing {prop}");
        }

        let query = calendar_query_body().unwrap();
        assert!(query.contains(r#"<c:comp-filter name="VEVENT">"#));
        assert!(!query.contains("time-range"));

        let sync = sync_collection_body("http://example.com/sync/1&2").unwrap();
        assert!(sync.contains("<d:sync-token>http://example.com/sync/1&amp;2</d:sync-token>"));
        assert!(sync.contains("<d:sync-level>1</d:sync-level>"));

        let multiget = calendar_multiget_body(&["/cal/a.ics", "/cal/b.ics"]).unwrap();
        assert!(multiget.contains("<d:href>/cal/a.ics</d:href>"));
        assert!(multiget.contains("<d:href>/cal/b.ics</d:href>"));
    }

    #[test]
    fn parses_principal_and_home_set() {
        let xml = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>/</d:href>
    <d:propstat>
      <d:prop>
        <d:current-user-principal><d:href>/principals/alice/</d:href></d:current-user-principal>
        <c:calendar-home-set><d:href>/calendars/alice/</d:href></c:calendar-home-set>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

        let ms = parse_multistatus(xml).unwrap();
        assert_eq!(ms.responses.len(), 1);
        assert_eq!(ms.responses[0].href, "/");
        let props = &ms.responses[0].props;
        assert_eq!(props.current_user_principal.as_deref(), Some("/principals/alice/"));
        assert_eq!(props.calendar_home_set.as_deref(), Some("/calendars/alice/"));
    }

    #[test]
    fn parses_calendar_discovery() {
        let xml = r##"<?xml version="1.0"?>
<multistatus xmlns="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav"
             xmlns:CS="http://calendarserver.org/ns/" xmlns:I="http://apple.com/ns/ical/">
  <response>
    <href>/calendars/alice/</href>
    <propstat>
      <prop><resourcetype><collection/></resourcetype></prop>
      <status>HTTP/1.1 200 OK</status>
    </propstat>
  </response>
  <response>
    <href>/calendars/alice/work/</href>
    <propstat>
      <prop>
        <resourcetype><collection/><C:calendar/></resourcetype>
        <displayname>Work</displayname>
        <CS:getctag>ctag-1</CS:getctag>
        <sync-token>http://example.com/ns/sync/7</sync-token>
        <I:calendar-color>#FF0000FF</I:calendar-color>
        <C:supported-calendar-component-set>
          <C:comp name="VEVENT"/>
          <C:comp name="VTODO"/>
        </C:supported-calendar-component-set>
      </prop>
      <status>HTTP/1.1 200 OK</status>
    </propstat>
  </response>
  <response>
    <href>/calendars/alice/tasks/</href>
    <propstat>
      <prop>
        <resourcetype><collection/><C:calendar/></resourcetype>
        <C:supported-calendar-component-set><C:comp name="VTODO"/></C:supported-calendar-component-set>
      </prop>
      <status>HTTP/1.1 200 OK</status>
    </propstat>
    <propstat>
      <prop><CS:getctag/><I:calendar-color/></prop>
      <status>HTTP/1.1 404 Not Found</status>
    </propstat>
  </response>
</multistatus>"##;

        let ms = parse_multistatus(xml).unwrap();
        assert_eq!(ms.responses.len(), 3);

        assert!(!ms.responses[0].props.is_calendar);

        let work = &ms.responses[1].props;
        assert!(work.is_calendar);
        assert!(work.supports_events());
        assert_eq!(work.display_name.as_deref(), Some("Work"));
        assert_eq!(work.ctag.as_deref(), Some("ctag-1"));
        assert_eq!(work.sync_token.as_deref(), Some("http://example.com/ns/sync/7"));
        assert_eq!(work.color.as_deref(), Some("#FF0000FF"));

        let tasks = &ms.responses[2].props;
        assert!(tasks.is_calendar);
        assert!(!tasks.supports_events());
        assert!(tasks.ctag.is_none());
    }

    #[test]
    fn parses_sync_collection_with_tombstones() {
        let xml = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/cal/work/new.ics</d:href>
    <d:propstat>
      <d:prop><d:getetag>"e2"</d:getetag></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/cal/work/gone.ics</d:href>
    <d:status>HTTP/1.1 404 Not Found</d:status>
  </d:response>
  <d:sync-token>tok-2</d:sync-token>
</d:multistatus>"#;

        let ms = parse_multistatus(xml).unwrap();
        assert_eq!(ms.sync_token.as_deref(), Some("tok-2"));
        assert_eq!(ms.responses.len(), 2);
        assert_eq!(ms.responses[0].props.etag.as_deref(), Some("\"e2\""));
        assert!(!ms.responses[0].is_not_found());
        assert!(ms.responses[1].is_not_found());
        assert_eq!(ms.responses[1].href, "/cal/work/gone.ics");
    }

    #[test]
    fn parses_calendar_data_with_entities_and_cdata() {
        let xml = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>/cal/a.ics</d:href>
    <d:propstat>
      <d:prop>
        <d:getetag>"a1"</d:getetag>
        <c:calendar-data>BEGIN:VCALENDAR&#13;
SUMMARY:R&amp;D&#13;
END:VCALENDAR</c:calendar-data>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/cal/b.ics</d:href>
    <d:propstat>
      <d:prop><c:calendar-data><![CDATA[BEGIN:VCALENDAR
END:VCALENDAR]]></c:calendar-data></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

        let ms = parse_multistatus(xml).unwrap();
        let a = ms.responses[0].props.calendar_data.as_deref().unwrap();
        assert!(a.contains("SUMMARY:R&D"));
        let b = ms.responses[1].props.calendar_data.as_deref().unwrap();
        assert!(b.starts_with("BEGIN:VCALENDAR"));
    }

    #[test]
    fn malformed_xml_is_an_error() {
        let err = parse_multistatus("<d:multistatus xmlns:d=\"DAV:\"><d:response></d:oops>")
            .unwrap_err();
        assert_eq!(err.code(), crate::ProviderErrorCode::InvalidResponse);
    }

    #[test]
    fn status_line_parsing() {
        assert_eq!(parse_status_line("HTTP/1.1 404 Not Found"), Some(404));
        assert_eq!(parse_status_line("garbage"), None);
    }
}
