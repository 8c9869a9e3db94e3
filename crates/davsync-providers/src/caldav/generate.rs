//! iCalendar output for events pushed to a CalDAV server.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use davsync_core::CanonicalEvent;
use icalendar::{Alarm, Calendar, Component, EventLike, Property, Trigger, ValueType};

use super::ics::lookup_zone;

const PRODID: &str = concat!("PRODID:-//davsync//davsync ", env!("CARGO_PKG_VERSION"), "//EN");

/// How a timestamp is written out.
#[derive(Clone, Copy)]
enum TimeForm<'a> {
    Date,
    Utc,
    Zoned(Tz, &'a str),
}

impl<'a> TimeForm<'a> {
    fn for_event(event: &'a CanonicalEvent) -> Self {
        if event.all_day {
            return Self::Date;
        }
        event
            .timezone
            .as_deref()
            .and_then(|tzid| lookup_zone(tzid).map(|tz| Self::Zoned(tz, tzid)))
            .unwrap_or(Self::Utc)
    }

    fn property(self, name: &str, instant: DateTime<Utc>) -> Property {
        match self {
            Self::Date => {
                let mut prop = Property::new(name, instant.format("%Y%m%d").to_string());
                prop.append_parameter(ValueType::Date);
                prop
            }
            Self::Utc => Property::new(name, instant.format("%Y%m%dT%H%M%SZ").to_string()),
            Self::Zoned(tz, tzid) => {
                let local = instant.with_timezone(&tz).naive_local();
                let mut prop = Property::new(name, local.format("%Y%m%dT%H%M%S").to_string());
                prop.add_parameter("TZID", tzid);
                prop
            }
        }
    }
}

/// Renders one event as a `VCALENDAR` document with the given UID.
pub fn generate_document(event: &CanonicalEvent, uid: &str) -> String {
    generate_series(event, &[], uid)
}

/// Renders a series master followed by its overridden occurrences, all
/// under the same UID.
pub fn generate_series(
    master: &CanonicalEvent,
    overrides: &[CanonicalEvent],
    uid: &str,
) -> String {
    let mut cal = Calendar::new();
    cal.push(build_event(master, uid));
    for occurrence in overrides.iter().filter(|o| o.recurrence_id.is_some()) {
        cal.push(build_event(occurrence, uid));
    }
    with_prodid(&cal.done().to_string())
}

fn build_event(event: &CanonicalEvent, uid: &str) -> icalendar::Event {
    let form = TimeForm::for_event(event);

    let mut ics_event = icalendar::Event::new();
    ics_event.uid(uid);
    ics_event.summary(&event.title);
    ics_event.add_property(
        "DTSTAMP",
        Utc::now().format("%Y%m%dT%H%M%SZ").to_string(),
    );

    ics_event.append_property(form.property("DTSTART", event.start));
    ics_event.append_property(form.property("DTEND", event.end));

    if let Some(ref description) = event.description {
        ics_event.description(description);
    }
    if let Some(ref location) = event.location {
        ics_event.location(location);
    }
    if let Some(status) = event.status.and_then(|s| s.as_ics()) {
        ics_event.add_property("STATUS", status);
    }
    ics_event.add_property("TRANSP", event.transparency.as_ics());
    if let Some(sequence) = event.sequence {
        ics_event.add_property("SEQUENCE", sequence.to_string());
    }

    if let Some(ref recurrence) = event.recurrence {
        ics_event.add_property("RRULE", &recurrence.rule);
        for exdate in &recurrence.exceptions {
            ics_event.append_multi_property(form.property("EXDATE", *exdate));
        }
    }
    if let Some(recurrence_id) = event.recurrence_id {
        ics_event.append_property(form.property("RECURRENCE-ID", recurrence_id));
    }

    for reminder in &event.reminders {
        let minutes = reminder.minutes_before;
        let mut alarm = Alarm::display(
            "Reminder",
            Trigger::before_start(chrono::Duration::minutes(minutes.max(0))),
        );
        if minutes < 0 {
            alarm.add_property("TRIGGER", format!("PT{}M", -minutes));
        }
        if reminder.kind.as_ics() != "DISPLAY" {
            alarm.add_property("ACTION", reminder.kind.as_ics());
        }
        ics_event.alarm(alarm);
    }

    if let Some(ref organizer) = event.organizer {
        let mut prop = Property::new("ORGANIZER", format!("mailto:{}", organizer.email));
        if let Some(ref name) = organizer.name {
            prop.add_parameter("CN", name);
        }
        ics_event.append_property(prop);
    }

    for attendee in &event.attendees {
        let mut prop = Property::new("ATTENDEE", format!("mailto:{}", attendee.email));
        if let Some(ref name) = attendee.name {
            prop.add_parameter("CN", name);
        }
        if let Some(partstat) = attendee.status.as_ics() {
            prop.add_parameter("PARTSTAT", partstat);
        }
        if attendee.optional {
            prop.add_parameter("ROLE", "OPT-PARTICIPANT");
        }
        ics_event.append_multi_property(prop);
    }

    ics_event.done()
}

fn with_prodid(ics: &str) -> String {
    let mut out = String::with_capacity(ics.len());
    for line in ics.lines() {
        if line.starts_with("PRODID:") {
            out.push_str(PRODID);
        } else {
            out.push_str(line);
        }
        out.push_str("\r\n");
    }
    out
}
