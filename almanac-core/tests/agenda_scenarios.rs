//! End-to-end scenarios: parse or import items, query a range, render lines.

use almanac_core::agenda::ListFormatter;
use almanac_core::clock::FixedClock;
use almanac_core::collection::{EventCollection, ImportMode, MemoryStorage, VdirStorage};
use almanac_core::date_range::DateRange;
use almanac_core::locale::Locale;
use almanac_core::occurrence::Occurrence;
use chrono::{DateTime, TimeZone};
use chrono_tz::Europe::Berlin;
use chrono_tz::Tz;
use tempfile::TempDir;

const EVENT_FORMAT: &str = "{calendar-color}{start-end-time-style:16} {title}{recurse}{description-separator}{description}{calendar-color}";

const EVENT_TODAY: &str = "BEGIN:VEVENT\r\n\
SEQUENCE:0\r\n\
UID:uid3@host1.com\r\n\
DTSTART;VALUE=DATE:20160410\r\n\
DTEND;VALUE=DATE:20160411\r\n\
SUMMARY:a meeting\r\n\
DESCRIPTION:short description\r\n\
LOCATION:LDB Lobby\r\n\
END:VEVENT";

const NO_RECURRENCES: &str = "BEGIN:VEVENT\r\n\
UID:no_recurrences\r\n\
SUMMARY:No recurrences\r\n\
RRULE:FREQ=DAILY;COUNT=2;INTERVAL=1\r\n\
EXDATE:20110908T130000\r\n\
EXDATE:20110909T130000\r\n\
DTSTART:20110908T130000\r\n\
DTEND:20110908T170000\r\n\
END:VEVENT\r\n";

fn locale() -> Locale {
    Locale::with_timezone(Berlin)
}

fn clock() -> FixedClock {
    FixedClock(Berlin.with_ymd_and_hms(2016, 4, 10, 12, 0, 0).unwrap().to_utc())
}

fn berlin(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
    Berlin.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

fn list_today(coll: &EventCollection<MemoryStorage>, day_format: &str) -> Vec<String> {
    let locale = locale();
    let range = DateRange::resolve::<&str>(&[], &locale, None, &clock()).unwrap();
    let occurrences = coll.get_localized(range.start, range.end).unwrap();
    ListFormatter::new(&locale, &clock()).render(occurrences, EVENT_FORMAT, day_format)
}

#[test]
fn test_new_event_listed_today() {
    let mut coll = EventCollection::open(MemoryStorage::new(), locale()).unwrap();
    let event = coll.new_event(EVENT_TODAY, "home").unwrap();
    coll.new(event).unwrap();

    assert_eq!(
        list_today(&coll, ""),
        vec!["                 a meeting :: short description\x1b[0m"]
    );
}

#[test]
fn test_new_event_listed_today_with_day_header() {
    let mut coll = EventCollection::open(MemoryStorage::new(), locale()).unwrap();
    let event = coll.new_event(EVENT_TODAY, "home").unwrap();
    coll.new(event).unwrap();

    assert_eq!(
        list_today(&coll, "{name}"),
        vec![
            "Today\x1b[0m",
            "                 a meeting :: short description\x1b[0m"
        ]
    );
}

#[test]
fn test_fully_excluded_series_lists_no_events() {
    let mut coll = EventCollection::open(MemoryStorage::new(), locale()).unwrap();
    let event = coll.new_event(NO_RECURRENCES, "home").unwrap();
    coll.new(event).unwrap();

    let lines = list_today(&coll, "{name}").join("\n").to_lowercase();
    assert!(lines.contains("no events"));

    let all: Vec<Occurrence> = coll
        .get_localized(berlin(2011, 9, 1, 0, 0), berlin(2011, 10, 1, 0, 0))
        .unwrap()
        .collect();
    assert!(all.is_empty());
}

#[test]
fn test_import_series_then_move_instance_out_of_range() {
    let dir = TempDir::new().unwrap();
    let storage = VdirStorage::new([("home", dir.path().join("home"))]);
    let mut coll = EventCollection::open(storage, locale()).unwrap();
    let (start, end) = (berlin(2014, 4, 30, 0, 0), berlin(2014, 9, 26, 0, 0));

    let summary = coll
        .import(
            include_str!("data/event_rrule_recuid.ics"),
            "home",
            ImportMode::Batch,
        )
        .unwrap();
    assert_eq!(summary.added, 2);

    let events: Vec<Occurrence> = coll.get_localized(start, end).unwrap().collect();
    assert_eq!(events.len(), 6);
    assert_eq!(events[1].start_local, berlin(2014, 7, 7, 9, 0));
    assert!(events.iter().any(|e| e.start == berlin(2014, 7, 14, 7, 0)));

    let summary = coll
        .import(
            include_str!("data/event_rrule_recuid_update.ics"),
            "home",
            ImportMode::Batch,
        )
        .unwrap();
    assert_eq!(summary.added, 1);

    let events: Vec<Occurrence> = coll.get_localized(start, end).unwrap().collect();
    assert_eq!(events.len(), 5);
    assert!(events.iter().all(|e| e.start_local != berlin(2014, 7, 14, 7, 0)));

    // The moved instance shows up where it went
    let october: Vec<Occurrence> = coll
        .get_localized(berlin(2014, 10, 1, 0, 0), berlin(2014, 11, 1, 0, 0))
        .unwrap()
        .collect();
    assert_eq!(october.len(), 1);
    assert_eq!(october[0].start_local, berlin(2014, 10, 14, 7, 0));

    // Everything survives a reload from disk
    let reopened = EventCollection::open(
        VdirStorage::new([("home", dir.path().join("home"))]),
        locale(),
    )
    .unwrap();
    assert_eq!(reopened.len(), 3);
    assert_eq!(reopened.get_localized(start, end).unwrap().count(), 5);
}

#[test]
fn test_reimport_is_idempotent() {
    let mut coll = EventCollection::open(MemoryStorage::new(), locale()).unwrap();
    let text = include_str!("data/event_rrule_recuid.ics");
    coll.import(text, "home", ImportMode::Batch).unwrap();
    let before: Vec<Occurrence> = coll
        .get_localized(berlin(2014, 4, 30, 0, 0), berlin(2014, 9, 26, 0, 0))
        .unwrap()
        .collect();

    let summary = coll.import(text, "home", ImportMode::Batch).unwrap();
    let after: Vec<Occurrence> = coll
        .get_localized(berlin(2014, 4, 30, 0, 0), berlin(2014, 9, 26, 0, 0))
        .unwrap()
        .collect();

    assert_eq!(summary.unchanged, 2);
    assert_eq!(summary.applied(), 0);
    assert_eq!(coll.len(), 2);
    assert_eq!(before, after);
}

#[test]
fn test_mixed_floating_and_zoned_events_sort_together() {
    let mut coll = EventCollection::open(MemoryStorage::new(), locale()).unwrap();
    coll.import(
        include_str!("data/event_dt_mixed_awareness.ics"),
        "home",
        ImportMode::Batch,
    )
    .unwrap();

    let events: Vec<Occurrence> = coll
        .get_localized(berlin(2015, 5, 29, 0, 0), berlin(2015, 6, 3, 0, 0))
        .unwrap()
        .collect();

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].start_local, berlin(2015, 5, 30, 12, 0));
    assert_eq!(events[0].end_local, berlin(2015, 5, 30, 16, 0));
    assert_eq!(events[1].start_local, berlin(2015, 6, 2, 12, 0));
    assert_eq!(events[1].end_local, berlin(2015, 6, 2, 16, 0));
}
