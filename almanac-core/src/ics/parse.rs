//! ICS parsing using the icalendar crate's parser.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use icalendar::{
    DatePerhapsTime,
    parser::{Component, Property, read_calendar, unfold},
};

use crate::error::{AlmanacError, AlmanacResult};
use crate::event::{Event, EventStatus, EventTime, Recurrence};

/// Parse ICS content into one result per VEVENT.
///
/// The outer error means the text could not be read as iCalendar data at all;
/// inner errors are items that were found but lack required properties.
/// A bare VEVENT without a VCALENDAR wrapper is accepted.
pub fn parse_events(content: &str, calendar: &str) -> AlmanacResult<Vec<AlmanacResult<Event>>> {
    let content = content.trim();
    let wrapped;
    let content = if content.contains("BEGIN:VCALENDAR") {
        content
    } else {
        wrapped = format!("BEGIN:VCALENDAR\r\n{}\r\nEND:VCALENDAR\r\n", content);
        &wrapped
    };

    let unfolded = unfold(content);
    let parsed = read_calendar(&unfolded).map_err(|e| AlmanacError::MalformedItem(e.to_string()))?;

    let mut vevents = Vec::new();
    collect_vevents(&parsed.components, &mut vevents);

    Ok(vevents
        .into_iter()
        .map(|vevent| parse_vevent(vevent, calendar))
        .collect())
}

/// Parse ICS content that is expected to hold exactly one usable event.
pub fn parse_event(content: &str, calendar: &str) -> AlmanacResult<Event> {
    parse_events(content, calendar)?
        .into_iter()
        .next()
        .unwrap_or_else(|| Err(AlmanacError::MalformedItem("no VEVENT found".to_string())))
}

fn collect_vevents<'a>(components: &'a [Component<'a>], out: &mut Vec<&'a Component<'a>>) {
    for component in components {
        if component.name == "VEVENT" {
            out.push(component);
        } else if component.name == "VCALENDAR" {
            collect_vevents(&component.components, out);
        }
    }
}

fn parse_vevent(vevent: &Component, calendar: &str) -> AlmanacResult<Event> {
    // Required fields
    let uid = vevent
        .find_prop("UID")
        .map(|p| p.val.to_string())
        .filter(|uid| !uid.trim().is_empty())
        .ok_or_else(|| AlmanacError::MalformedItem("missing UID".to_string()))?;
    let start = vevent
        .find_prop("DTSTART")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(to_event_time)
        .ok_or_else(|| AlmanacError::MalformedItem(format!("event '{}' has no valid DTSTART", uid)))?;

    let end = match vevent
        .find_prop("DTEND")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
    {
        Some(dpt) => to_event_time(dpt),
        None => default_end(&start, vevent.find_prop("DURATION")),
    };

    // Optional simple fields
    let summary = vevent
        .find_prop("SUMMARY")
        .map(|p| unescape_text(p.val.as_ref()))
        .unwrap_or_default();
    let description = vevent
        .find_prop("DESCRIPTION")
        .map(|p| unescape_text(p.val.as_ref()));
    let location = vevent
        .find_prop("LOCATION")
        .map(|p| unescape_text(p.val.as_ref()));
    let sequence = vevent
        .find_prop("SEQUENCE")
        .and_then(|p| p.val.as_ref().trim().parse().ok())
        .unwrap_or(0);

    let status = vevent
        .find_prop("STATUS")
        .map(|p| match p.val.as_ref() {
            "TENTATIVE" => EventStatus::Tentative,
            "CANCELLED" => EventStatus::Cancelled,
            _ => EventStatus::Confirmed,
        })
        .unwrap_or(EventStatus::Confirmed);

    // Recurrence (RRULE, RDATE, EXDATE)
    let rrule = vevent.find_prop("RRULE").map(|p| p.val.to_string());
    let rdates: Vec<EventTime> = vevent
        .properties
        .iter()
        .filter(|p| p.name == "RDATE")
        .flat_map(parse_time_list_property)
        .collect();
    let exdates: Vec<EventTime> = vevent
        .properties
        .iter()
        .filter(|p| p.name == "EXDATE")
        .flat_map(parse_time_list_property)
        .collect();
    let recurrence = if rrule.is_some() || !rdates.is_empty() {
        Some(Recurrence {
            rrule,
            rdates,
            exdates,
        })
    } else {
        None
    };

    // RECURRENCE-ID for instance overrides
    let recurrence_id = vevent
        .find_prop("RECURRENCE-ID")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(to_event_time);

    Ok(Event {
        uid,
        calendar: calendar.to_string(),
        summary,
        description,
        location,
        start,
        end,
        status,
        recurrence,
        recurrence_id,
        sequence,
    })
}

/// Convert icalendar's DatePerhapsTime to our EventTime, preserving timezone info
fn to_event_time(dpt: DatePerhapsTime) -> EventTime {
    match dpt {
        DatePerhapsTime::Date(d) => EventTime::Date(d),
        DatePerhapsTime::DateTime(cal_dt) => match cal_dt {
            icalendar::CalendarDateTime::Utc(dt) => EventTime::DateTimeUtc(dt),
            icalendar::CalendarDateTime::Floating(naive) => EventTime::DateTimeFloating(naive),
            icalendar::CalendarDateTime::WithTimezone { date_time, tzid } => {
                EventTime::DateTimeZoned {
                    datetime: date_time,
                    tzid,
                }
            }
        },
    }
}

/// End of an event without DTEND: DTSTART + DURATION, else one day for
/// all-day events and zero length for timed ones.
fn default_end(start: &EventTime, duration: Option<&Property>) -> EventTime {
    let duration = duration.and_then(|p| parse_duration(p.val.as_ref()));

    match (start, duration) {
        (EventTime::Date(d), Some(dur)) => EventTime::Date(*d + Duration::days(dur.num_days().max(1))),
        (EventTime::Date(d), None) => EventTime::Date(*d + Duration::days(1)),
        (EventTime::DateTimeUtc(dt), Some(dur)) => EventTime::DateTimeUtc(*dt + dur),
        (EventTime::DateTimeFloating(dt), Some(dur)) => EventTime::DateTimeFloating(*dt + dur),
        (EventTime::DateTimeZoned { datetime, tzid }, Some(dur)) => EventTime::DateTimeZoned {
            datetime: *datetime + dur,
            tzid: tzid.clone(),
        },
        (timed, None) => timed.clone(),
    }
}

/// Parse a DURATION value (`PT1H30M`, `P1D`, ...). Negative durations are ignored.
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.starts_with('-') {
        return None;
    }
    let duration = iso8601::duration(value.trim_start_matches('+')).ok()?;
    let std_duration: std::time::Duration = duration.into();
    Duration::from_std(std_duration).ok()
}

/// Parse an EXDATE or RDATE property into a list of EventTime values.
///
/// Handles:
/// - TZID parameter: `EXDATE;TZID=America/New_York:20240108T100000`
/// - VALUE=DATE: `EXDATE;VALUE=DATE:20240108`
/// - UTC: `EXDATE:20240108T100000Z`
/// - Floating: `EXDATE:20240108T100000`
/// - Comma-separated values: `EXDATE;TZID=...:20240108T100000,20240115T100000`
fn parse_time_list_property(prop: &Property) -> Vec<EventTime> {
    let tzid = prop
        .params
        .iter()
        .find(|p| p.key == "TZID")
        .and_then(|p| p.val.as_ref().map(|v| v.to_string()));

    let is_date = prop
        .params
        .iter()
        .any(|p| p.key == "VALUE" && p.val.as_ref().map(|v| v.as_ref()) == Some("DATE"));

    prop.val
        .as_ref()
        .split(',')
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            // Bare dates are accepted even when VALUE=DATE is missing
            if is_date || s.len() == 8 {
                NaiveDate::parse_from_str(s, "%Y%m%d").ok().map(EventTime::Date)
            } else if let Some(ref tz) = tzid {
                NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|dt| EventTime::DateTimeZoned {
                        datetime: dt,
                        tzid: tz.clone(),
                    })
            } else if let Some(s) = s.strip_suffix('Z') {
                NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|dt| EventTime::DateTimeUtc(dt.and_utc()))
            } else {
                NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(EventTime::DateTimeFloating)
            }
        })
        .collect()
}

/// Undo RFC 5545 TEXT escaping (`\n`, `\,`, `\;`, `\\`).
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
