//! ICS file generation.

use icalendar::{Calendar, Component, EventLike, Property, ValueType};

use crate::error::{AlmanacError, AlmanacResult};
use crate::event::{Event, EventStatus, EventTime};

/// Generate .ics content holding the given events (a master and its overrides,
/// or a single item).
pub fn generate_ics(events: &[Event]) -> AlmanacResult<String> {
    if events.is_empty() {
        return Err(AlmanacError::IcsGenerate("no events to write".to_string()));
    }

    let mut cal = Calendar::new();

    for event in events {
        cal.push(build_vevent(event));
    }
    let cal = cal.done();

    Ok(strip_ics_bloat(&cal.to_string()))
}

fn build_vevent(event: &Event) -> icalendar::Event {
    let mut ics_event = icalendar::Event::new();
    ics_event.uid(&event.uid);
    ics_event.summary(&event.summary);

    ics_event.add_property("SEQUENCE", event.sequence.to_string());

    add_datetime_property(&mut ics_event, "DTSTART", &event.start);
    add_datetime_property(&mut ics_event, "DTEND", &event.end);

    if let Some(ref desc) = event.description {
        ics_event.description(desc);
    }

    if let Some(ref loc) = event.location {
        ics_event.location(loc);
    }

    // Status - only emit if not CONFIRMED (the implied default)
    match event.status {
        EventStatus::Confirmed => {}
        EventStatus::Tentative => {
            ics_event.add_property("STATUS", "TENTATIVE");
        }
        EventStatus::Cancelled => {
            ics_event.add_property("STATUS", "CANCELLED");
        }
    }

    if let Some(ref recurrence) = event.recurrence {
        if let Some(ref rrule) = recurrence.rrule {
            ics_event.add_property("RRULE", rrule);
        }
        for rdate in &recurrence.rdates {
            add_multi_datetime_property(&mut ics_event, "RDATE", rdate);
        }
        for exdate in &recurrence.exdates {
            add_multi_datetime_property(&mut ics_event, "EXDATE", exdate);
        }
    }

    if let Some(ref recurrence_id) = event.recurrence_id {
        add_datetime_property(&mut ics_event, "RECURRENCE-ID", recurrence_id);
    }

    ics_event.done()
}

/// Clean up ICS output from the icalendar crate
/// - Replace PRODID with our own
/// - Remove CALSCALE:GREGORIAN (it's the default)
/// - Remove DTSTAMP (non-deterministic, rewritten on every save otherwise)
fn strip_ics_bloat(ics: &str) -> String {
    let mut result = String::with_capacity(ics.len());

    for line in ics.lines() {
        if line.starts_with("PRODID:") {
            result.push_str("PRODID:-//almanac//EN\r\n");
            continue;
        }

        if line == "CALSCALE:GREGORIAN" || line.starts_with("DTSTAMP:") {
            continue;
        }

        result.push_str(line);
        result.push_str("\r\n");
    }

    result
}

fn time_property(name: &str, time: &EventTime) -> Property {
    match time {
        EventTime::Date(d) => {
            let mut prop = Property::new(name, d.format("%Y%m%d").to_string());
            prop.append_parameter(ValueType::Date);
            prop
        }
        EventTime::DateTimeUtc(dt) => Property::new(name, dt.format("%Y%m%dT%H%M%SZ").to_string()),
        EventTime::DateTimeFloating(dt) => {
            Property::new(name, dt.format("%Y%m%dT%H%M%S").to_string())
        }
        EventTime::DateTimeZoned { datetime, tzid } => {
            let mut prop = Property::new(name, datetime.format("%Y%m%dT%H%M%S").to_string());
            prop.add_parameter("TZID", tzid);
            prop
        }
    }
}

fn add_datetime_property(ics_event: &mut icalendar::Event, name: &str, time: &EventTime) {
    ics_event.append_property(time_property(name, time));
}

/// EXDATE and RDATE may appear several times
fn add_multi_datetime_property(ics_event: &mut icalendar::Event, name: &str, time: &EventTime) {
    ics_event.append_multi_property(time_property(name, time));
}
