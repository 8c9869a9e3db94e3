//! iCalendar (RFC 5545) parsing into canonical events.
//!
//! A resource is split into its top-level `VEVENT` blocks first and every
//! block is parsed on its own, so one broken component only costs itself.
//! The master of a recurring series keeps its `RRULE` and `EXDATE` values
//! verbatim; overrides (`RECURRENCE-ID`) become separate events keyed
//! `"{uid}::{recurrence-id}"`.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::parser::{Component, Property, read_calendar, unfold};
use icalendar::{CalendarDateTime, DatePerhapsTime};
use tracing::{debug, trace, warn};

use davsync_core::{
    Attendee, AttendeeStatus, CanonicalEvent, EventMetadata, EventStatus, Organizer, Recurrence,
    Reminder, ReminderKind, Transparency,
};

use crate::document::{CalDavDocument, NormalizedDocument, ParseSkip};

/// Parses every `VEVENT` of a CalDAV resource.
pub fn parse_calendar_document(doc: &CalDavDocument) -> NormalizedDocument {
    let unfolded = unfold(&doc.data);
    let mut normalized = NormalizedDocument::default();

    if !unfolded
        .lines()
        .any(|l| l.trim().eq_ignore_ascii_case("BEGIN:VCALENDAR"))
    {
        warn!(href = %doc.href, "resource is not an iCalendar document");
        normalized.skipped.push(ParseSkip {
            href: doc.href.clone(),
            index: 0,
            uid: None,
            reason: "missing BEGIN:VCALENDAR".to_string(),
        });
        return normalized;
    }

    for (index, block) in split_vevents(&unfolded).into_iter().enumerate() {
        let result = block.and_then(|text| parse_vevent_block(&text, doc));
        match result {
            Ok(event) => {
                trace!(href = %doc.href, id = %event.provider_event_id, "parsed event");
                normalized.events.push(event);
            }
            Err(skip) => {
                warn!(
                    href = %doc.href,
                    index,
                    uid = ?skip.uid,
                    reason = %skip.reason,
                    "skipping malformed VEVENT"
                );
                normalized.skipped.push(ParseSkip {
                    href: doc.href.clone(),
                    index,
                    uid: skip.uid,
                    reason: skip.reason,
                });
            }
        }
    }

    debug!(
        href = %doc.href,
        events = normalized.events.len(),
        skipped = normalized.skipped.len(),
        "normalized resource"
    );
    normalized
}

struct BlockError {
    uid: Option<String>,
    reason: String,
}

impl BlockError {
    fn new(uid: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            uid,
            reason: reason.into(),
        }
    }
}

/// Returns the text of every top-level `VEVENT`, nested components included.
fn split_vevents(unfolded: &str) -> Vec<Result<String, BlockError>> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;
    let mut depth = 0usize;

    for raw in unfolded.lines() {
        let line = raw.trim_end_matches('\r');
        let upper = line.trim().to_ascii_uppercase();

        match current.as_mut() {
            None => {
                if upper == "BEGIN:VEVENT" {
                    current = Some(format!("{}\r\n", line));
                    depth = 1;
                }
            }
            Some(block) => {
                block.push_str(line);
                block.push_str("\r\n");
                if upper.starts_with("BEGIN:") {
                    depth += 1;
                } else if upper.starts_with("END:") {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(done) = current.take() {
                            blocks.push(Ok(done));
                        }
                    }
                }
            }
        }
    }

    if let Some(unterminated) = current {
        blocks.push(Err(BlockError::new(
            scan_uid(&unterminated),
            "unterminated VEVENT",
        )));
    }

    blocks
}

/// Reads the first `UID:` line without a full parse.
pub(crate) fn scan_uid(text: &str) -> Option<String> {
    text.lines()
        .map(|l| l.trim_end_matches('\r'))
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            let name = name.split(';').next()?;
            name.eq_ignore_ascii_case("UID")
                .then(|| value.trim().to_string())
        })
        .filter(|uid| !uid.is_empty())
}

fn parse_vevent_block(block: &str, doc: &CalDavDocument) -> Result<CanonicalEvent, BlockError> {
    let wrapped = format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//davsync//EN\r\n{}END:VCALENDAR\r\n",
        block
    );
    let calendar = read_calendar(&wrapped)
        .map_err(|e| BlockError::new(scan_uid(block), format!("unparseable VEVENT: {}", e)))?;
    let vevent = calendar
        .components
        .iter()
        .find(|c| c.name == "VEVENT")
        .ok_or_else(|| BlockError::new(scan_uid(block), "no VEVENT component"))?;

    parse_vevent(vevent, doc)
}

fn parse_vevent(vevent: &Component<'_>, doc: &CalDavDocument) -> Result<CanonicalEvent, BlockError> {
    let uid = vevent
        .find_prop("UID")
        .map(|p| p.val.to_string())
        .filter(|uid| !uid.trim().is_empty())
        .ok_or_else(|| BlockError::new(None, "missing UID"))?;
    let fail = |reason: &str| BlockError::new(Some(uid.clone()), reason);

    let dtstart = vevent
        .find_prop("DTSTART")
        .ok_or_else(|| fail("missing DTSTART"))?;
    let start = resolve_time(
        DatePerhapsTime::try_from(dtstart).map_err(|_| fail("invalid DTSTART"))?,
        &uid,
    );

    let end = match vevent.find_prop("DTEND") {
        Some(prop) => {
            resolve_time(
                DatePerhapsTime::try_from(prop).map_err(|_| fail("invalid DTEND"))?,
                &uid,
            )
            .instant
        }
        None => match vevent.find_prop("DURATION") {
            Some(prop) => {
                start.instant + parse_duration(prop.val.as_ref()).ok_or_else(|| fail("invalid DURATION"))?
            }
            None if start.all_day => start.instant + Duration::days(1),
            None => start.instant,
        },
    };
    let end = if end < start.instant {
        debug!(uid = %uid, "end before start, clamping to start");
        start.instant
    } else {
        end
    };

    let recurrence_id = match vevent.find_prop("RECURRENCE-ID") {
        Some(prop) => Some(
            resolve_time(
                DatePerhapsTime::try_from(prop).map_err(|_| fail("invalid RECURRENCE-ID"))?,
                &uid,
            )
            .instant,
        ),
        None => None,
    };

    let provider_event_id = match recurrence_id {
        Some(rid) => CanonicalEvent::override_id(&uid, rid),
        None => uid.clone(),
    };

    // Overrides describe a single occurrence and never carry the rule.
    let recurrence = match (recurrence_id, vevent.find_prop("RRULE")) {
        (None, Some(rule)) => Some(Recurrence {
            rule: rule.val.to_string(),
            exceptions: vevent
                .properties
                .iter()
                .filter(|p| p.name == "EXDATE")
                .flat_map(|p| parse_exdate(p, &uid))
                .collect(),
        }),
        _ => None,
    };

    let attendees = vevent
        .properties
        .iter()
        .filter(|p| p.name == "ATTENDEE")
        .map(parse_attendee)
        .collect();

    let organizer = vevent.find_prop("ORGANIZER").map(|p| Organizer {
        email: strip_mailto(p.val.as_ref()),
        name: param(p, "CN"),
    });

    let reminders = vevent
        .components
        .iter()
        .filter(|c| c.name == "VALARM")
        .filter_map(|alarm| parse_alarm(alarm, start.instant))
        .collect();

    Ok(CanonicalEvent {
        provider_event_id,
        title: text_prop(vevent, "SUMMARY").unwrap_or_default(),
        description: text_prop(vevent, "DESCRIPTION"),
        start: start.instant,
        end,
        all_day: start.all_day,
        timezone: start.tzid,
        location: text_prop(vevent, "LOCATION"),
        status: vevent
            .find_prop("STATUS")
            .map(|p| EventStatus::from_ics(p.val.as_ref())),
        recurrence,
        recurrence_id,
        reminders,
        attendees,
        organizer,
        transparency: vevent
            .find_prop("TRANSP")
            .map(|p| Transparency::from_ics(p.val.as_ref()))
            .unwrap_or_default(),
        sequence: vevent
            .find_prop("SEQUENCE")
            .and_then(|p| p.val.as_ref().trim().parse().ok()),
        last_modified: vevent
            .find_prop("LAST-MODIFIED")
            .and_then(|p| parse_utc_stamp(p.val.as_ref())),
        etag: doc.etag.clone(),
        metadata: EventMetadata {
            calendar_id: doc.calendar_id.clone(),
            calendar_name: doc.calendar_name.clone(),
            remote_url: Some(doc.href.clone()),
        },
    })
}

struct ResolvedTime {
    instant: DateTime<Utc>,
    all_day: bool,
    tzid: Option<String>,
}

fn resolve_time(value: DatePerhapsTime, uid: &str) -> ResolvedTime {
    match value {
        DatePerhapsTime::Date(date) => ResolvedTime {
            instant: midnight_utc(date),
            all_day: true,
            tzid: None,
        },
        DatePerhapsTime::DateTime(CalendarDateTime::Utc(instant)) => ResolvedTime {
            instant,
            all_day: false,
            tzid: None,
        },
        DatePerhapsTime::DateTime(CalendarDateTime::Floating(naive)) => ResolvedTime {
            instant: naive.and_utc(),
            all_day: false,
            tzid: None,
        },
        DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, tzid }) => {
            ResolvedTime {
                instant: zoned_to_utc(date_time, &tzid, uid),
                all_day: false,
                tzid: Some(tzid),
            }
        }
    }
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Resolves a wall-clock time in an IANA zone. Unknown zones are read as UTC.
fn zoned_to_utc(local: NaiveDateTime, tzid: &str, uid: &str) -> DateTime<Utc> {
    match lookup_zone(tzid) {
        Some(tz) => tz
            .from_local_datetime(&local)
            .earliest()
            // Wall-clock time inside a DST gap: move past the gap.
            .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| local.and_utc()),
        None => {
            warn!(uid = %uid, tzid = %tzid, "unknown timezone, treating as UTC");
            local.and_utc()
        }
    }
}

pub(super) fn lookup_zone(tzid: &str) -> Option<Tz> {
    let cleaned = tzid.trim().trim_matches('"');
    cleaned
        .parse::<Tz>()
        .ok()
        // Some clients prefix the zone with a vendor path.
        .or_else(|| {
            cleaned
                .strip_prefix("/mozilla.org/20070129_1/")
                .or_else(|| cleaned.strip_prefix("/freeassociation.sourceforge.net/"))
                .and_then(|rest| rest.parse::<Tz>().ok())
        })
}

fn parse_exdate(prop: &Property<'_>, uid: &str) -> Vec<DateTime<Utc>> {
    let tzid = param(prop, "TZID");
    let is_date = param(prop, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"));

    prop.val
        .as_ref()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| {
            let parsed = if is_date || s.len() == 8 {
                NaiveDate::parse_from_str(s, "%Y%m%d").ok().map(midnight_utc)
            } else if let Some(utc) = s.strip_suffix('Z') {
                NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|dt| dt.and_utc())
            } else {
                NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|local| match tzid {
                        Some(ref tz) => zoned_to_utc(local, tz, uid),
                        None => local.and_utc(),
                    })
            };
            if parsed.is_none() {
                warn!(uid = %uid, value = %s, "ignoring unparseable EXDATE");
            }
            parsed
        })
        .collect()
}

fn parse_attendee(prop: &Property<'_>) -> Attendee {
    Attendee {
        email: strip_mailto(prop.val.as_ref()),
        name: param(prop, "CN"),
        status: param(prop, "PARTSTAT")
            .map(|v| AttendeeStatus::from_ics(&v))
            .unwrap_or_default(),
        optional: param(prop, "ROLE").is_some_and(|r| r.eq_ignore_ascii_case("OPT-PARTICIPANT")),
    }
}

fn parse_alarm(alarm: &Component<'_>, start: DateTime<Utc>) -> Option<Reminder> {
    let trigger = alarm.find_prop("TRIGGER")?;
    let kind = alarm
        .find_prop("ACTION")
        .map(|p| ReminderKind::from_ics(p.val.as_ref()))
        .unwrap_or_default();

    let absolute = param(trigger, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE-TIME"));
    let minutes_before = if absolute {
        let at = parse_utc_stamp(trigger.val.as_ref())?;
        (start - at).num_minutes()
    } else {
        let value = trigger.val.as_ref().trim();
        let (before, magnitude) = match value.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, value.trim_start_matches('+')),
        };
        let minutes = parse_duration(magnitude)?.num_minutes();
        if before { minutes } else { -minutes }
    };

    Some(Reminder {
        kind,
        minutes_before,
    })
}

fn parse_duration(value: &str) -> Option<Duration> {
    let duration = iso8601::duration(value.trim()).ok()?;
    let std_duration: std::time::Duration = duration.into();
    Duration::from_std(std_duration).ok()
}

fn parse_utc_stamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value.trim_end_matches('Z'), "%Y%m%dT%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}

fn param(prop: &Property<'_>, key: &str) -> Option<String> {
    prop.params
        .iter()
        .find(|p| p.key.as_ref().eq_ignore_ascii_case(key))
        .and_then(|p| p.val.as_ref().map(|v| v.as_ref().trim_matches('"').to_string()))
}

fn strip_mailto(value: &str) -> String {
    let value = value.trim();
    match value.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("mailto:") => value[7..].to_string(),
        _ => value.to_string(),
    }
}

fn text_prop(component: &Component<'_>, name: &str) -> Option<String> {
    component
        .find_prop(name)
        .map(|p| unescape_text(p.val.as_ref()))
}

/// Undoes RFC 5545 TEXT escaping.
fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
