//! RRULE expansion for recurring events.
//!
//! A master event is compiled once into a [`Series`]. Expanding a series over a
//! window is lazy: occurrences are generated in order and generation stops at
//! the end of the window, so unbounded rules are never materialized.
//! Overrides (RECURRENCE-ID instances) are joined in during expansion.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;
use tracing::trace;

use crate::date_range::DateRange;
use crate::error::{AlmanacError, AlmanacResult};
use crate::event::{Event, EventTime};
use crate::localize::{LocalTime, localize, resolve_local};
use crate::occurrence::{Occurrence, Occurrences};

/// Overrides of one series, keyed by the normalized RECURRENCE-ID.
pub type OverrideMap = BTreeMap<DateTime<Utc>, Event>;

/// How long each generated occurrence lasts.
#[derive(Debug, Clone, Copy)]
enum Length {
    /// All-day events span whole days
    Days(i64),
    /// Added to the start's wall-clock time in the event's own zone
    Exact(chrono::Duration),
}

/// A master event prepared for expansion.
#[derive(Debug, Clone)]
pub struct Series {
    timezone: Tz,
    start: LocalTime,
    length: Length,
    rule: Option<RRuleSet>,
    /// Last permitted start of the RRULE part, applied here rather than by rrule
    until: Option<DateTime<Utc>>,
    /// Extra starts in ascending order
    rdates: Vec<DateTime<Tz>>,
    recurring: bool,
    excluded: HashSet<DateTime<Utc>>,
    excluded_days: HashSet<NaiveDate>,
}

impl Series {
    /// Prepare `master` for expansion, normalizing into `timezone`.
    pub fn compile(master: &Event, timezone: Tz) -> AlmanacResult<Self> {
        let start = localize(&master.start, timezone);
        let end = localize(&master.end, timezone);

        let length = match (&master.start, &master.end) {
            (EventTime::Date(s), EventTime::Date(e)) => Length::Days((*e - *s).num_days().max(0)),
            _ => Length::Exact((end.local - start.local).max(chrono::Duration::zero())),
        };

        let mut series = Series {
            timezone,
            start,
            length,
            rule: None,
            until: None,
            rdates: Vec::new(),
            recurring: false,
            excluded: HashSet::new(),
            excluded_days: HashSet::new(),
        };

        let Some(recurrence) = master.recurrence.as_ref().filter(|r| !r.is_empty()) else {
            return Ok(series);
        };
        series.recurring = true;

        for exdate in &recurrence.exdates {
            match exdate {
                EventTime::Date(d) => {
                    series.excluded_days.insert(*d);
                }
                other => {
                    series
                        .excluded
                        .insert(localize(other, timezone).local.with_timezone(&Utc));
                }
            }
        }

        let zone = start.original.timezone();
        series.rdates = recurrence
            .rdates
            .iter()
            .map(|rdate| localize(rdate, timezone).local.with_timezone(&zone))
            .collect();
        series.rdates.sort();

        if let Some(rrule) = &recurrence.rrule {
            let (rule, until) = split_until(rrule, zone).map_err(|reason| {
                AlmanacError::RecurrenceParse {
                    uid: master.uid.clone(),
                    reason,
                }
            })?;
            let text = build_rrule_string(&start.original, &rule);
            trace!(uid = %master.uid, rule = %text, "Compiling recurrence");
            let set: RRuleSet = text.parse().map_err(|e| AlmanacError::RecurrenceParse {
                uid: master.uid.clone(),
                reason: format!("{}", e),
            })?;
            series.rule = Some(set);
            series.until = until;
        }

        Ok(series)
    }

    /// Scheduled starts in ascending order, in the series' own zone, before
    /// exclusions are applied.
    fn candidates(&self) -> impl Iterator<Item = DateTime<Tz>> + '_ {
        let zone = self.start.original.timezone();
        let until = self.until;
        let ruled: Box<dyn Iterator<Item = DateTime<Tz>> + '_> = match &self.rule {
            Some(set) => Box::new(
                set.into_iter()
                    .map(move |dt| dt.with_timezone(&zone))
                    .take_while(move |dt| until.is_none_or(|u| dt.with_timezone(&Utc) <= u)),
            ),
            // DTSTART is always the first instance
            None => Box::new(std::iter::once(self.start.original)),
        };

        let mut ruled = ruled.peekable();
        let mut extra = self.rdates.iter().copied().peekable();
        let mut last: Option<DateTime<Tz>> = None;
        std::iter::from_fn(move || {
            loop {
                let next = match (ruled.peek().copied(), extra.peek().copied()) {
                    (Some(a), Some(b)) if b < a => extra.next(),
                    (Some(_), _) => ruled.next(),
                    (None, _) => extra.next(),
                }?;
                if last != Some(next) {
                    last = Some(next);
                    return Some(next);
                }
            }
        })
    }

    fn is_excluded(&self, start: &DateTime<Tz>) -> bool {
        self.excluded.contains(&start.with_timezone(&Utc))
            || self
                .excluded_days
                .contains(&start.with_timezone(&self.timezone).date_naive())
    }

    /// Whether the series currently has a (non-excluded) occurrence scheduled
    /// at `recurrence_id`.
    pub fn has_occurrence_at(&self, recurrence_id: &DateTime<Utc>) -> bool {
        self.candidates()
            .map(|dt| dt.with_timezone(&Utc))
            .find(|dt| dt >= recurrence_id)
            .is_some_and(|dt| dt == *recurrence_id)
            && !self.is_excluded(&recurrence_id.with_timezone(&self.timezone))
    }

    /// The occurrence generated for a scheduled start.
    fn generated(&self, master: &Event, start: DateTime<Tz>) -> Occurrence {
        let start_time = LocalTime {
            local: start.with_timezone(&self.timezone),
            original: start,
            all_day: self.start.all_day,
        };
        let end_time = match self.length {
            Length::Days(days) => {
                let date = start_time.local.date_naive() + chrono::Duration::days(days);
                localize(&EventTime::Date(date), self.timezone)
            }
            Length::Exact(duration) => {
                let wall: NaiveDateTime = start.naive_local() + duration;
                let original = resolve_local(&start.timezone(), &wall);
                LocalTime {
                    local: original.with_timezone(&self.timezone),
                    original,
                    all_day: false,
                }
            }
        };
        let recurrence_id = self.recurring.then(|| start.with_timezone(&Utc));
        Occurrence::new(master, start_time, end_time, self.recurring, recurrence_id)
    }

    /// Expand the series over `window`.
    ///
    /// `overrides` holds this series' RECURRENCE-ID instances. An override
    /// replaces the generated occurrence at its recurrence id wherever its own
    /// start lies; cancelled overrides remove it. Overrides whose recurrence id
    /// is not a current occurrence of the series are ignored.
    pub fn expand<'a>(
        &'a self,
        master: &'a Event,
        overrides: Option<&'a OverrideMap>,
        window: DateRange,
    ) -> Occurrences<'a> {
        let DateRange { start: from, end: to } = window;

        let generated = self
            .candidates()
            .take_while(move |start| *start < to)
            .filter(move |start| !self.is_excluded(start))
            .filter(move |start| {
                overrides.is_none_or(|o| !o.contains_key(&start.with_timezone(&Utc)))
            })
            .map(move |start| self.generated(master, start))
            .filter(move |occurrence| occurrence.intersects(&from, &to));

        let mut moved: Vec<Occurrence> = overrides
            .into_iter()
            .flatten()
            .filter(|(_, event)| !event.is_cancelled())
            .filter(|(recurrence_id, _)| self.has_occurrence_at(recurrence_id))
            .map(|(recurrence_id, event)| {
                Occurrence::new(
                    event,
                    localize(&event.start, self.timezone),
                    localize(&event.end, self.timezone),
                    self.recurring,
                    Some(*recurrence_id),
                )
            })
            .filter(|occurrence| occurrence.intersects(&from, &to))
            .collect();
        moved.sort_by(Occurrence::cmp_by_start);

        let sources: Vec<Box<dyn Iterator<Item = Occurrence> + 'a>> =
            vec![Box::new(generated), Box::new(moved.into_iter())];
        Occurrences::merge(sources)
    }
}

/// Build an iCalendar-format rule block for the rrule crate parser.
///
/// DTSTART keeps the event's own zone so that wall-clock times survive DST
/// changes.
fn build_rrule_string(start: &DateTime<Tz>, rrule: &str) -> String {
    let zone = start.timezone();
    let dtstart = if zone == chrono_tz::UTC {
        format!("DTSTART:{}", start.format("%Y%m%dT%H%M%SZ"))
    } else {
        format!(
            "DTSTART;TZID={}:{}",
            zone.name(),
            start.format("%Y%m%dT%H%M%S")
        )
    };
    format!("{}\nRRULE:{}", dtstart, rrule)
}

/// Remove UNTIL from an RRULE value and return it as a UTC instant.
///
/// Floating UNTIL values are read in `zone`. A date-only UNTIL includes that
/// whole day.
fn split_until(rrule: &str, zone: Tz) -> Result<(String, Option<DateTime<Utc>>), String> {
    let mut until = None;
    let mut parts = Vec::new();

    for part in rrule.trim().split(';').filter(|p| !p.is_empty()) {
        match part.split_once('=') {
            Some((key, value)) if key.eq_ignore_ascii_case("UNTIL") => {
                until = Some(parse_until(value, zone).ok_or_else(|| {
                    format!("invalid UNTIL value '{}'", value)
                })?);
            }
            _ => parts.push(part),
        }
    }

    Ok((parts.join(";"), until))
}

fn parse_until(value: &str, zone: Tz) -> Option<DateTime<Utc>> {
    if let Some(utc) = value.strip_suffix('Z') {
        return NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
            .ok()
            .map(|naive| naive.and_utc());
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y%m%d")
                .ok()
                .and_then(|d| d.and_hms_opt(23, 59, 59))
        })?;
    Some(resolve_local(&zone, &naive).with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventStatus, Recurrence};
    use chrono::{Datelike, Duration, TimeZone, Timelike};
    use chrono_tz::Europe::Berlin;

    fn naive(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn berlin(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
        Berlin.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn zoned(dt: NaiveDateTime) -> EventTime {
        EventTime::DateTimeZoned {
            datetime: dt,
            tzid: "Europe/Berlin".to_string(),
        }
    }

    fn event(uid: &str, start: EventTime, end: EventTime, rrule: Option<&str>) -> Event {
        Event {
            uid: uid.to_string(),
            calendar: "home".to_string(),
            summary: "Arbeit".to_string(),
            description: None,
            location: None,
            start,
            end,
            status: EventStatus::Confirmed,
            recurrence: rrule.map(|r| Recurrence {
                rrule: Some(r.to_string()),
                rdates: vec![],
                exdates: vec![],
            }),
            recurrence_id: None,
            sequence: 0,
        }
    }

    fn weekly() -> Event {
        event(
            "weekly",
            zoned(naive(2014, 6, 30, 7, 0)),
            zoned(naive(2014, 6, 30, 12, 0)),
            Some("FREQ=WEEKLY;COUNT=6"),
        )
    }

    fn window(from: DateTime<Tz>, to: DateTime<Tz>) -> DateRange {
        DateRange::new(from, to).unwrap()
    }

    fn summer_2014() -> DateRange {
        window(berlin(2014, 4, 30, 0, 0), berlin(2014, 9, 26, 0, 0))
    }

    #[test]
    fn test_non_recurring_event_in_and_out_of_window() {
        let master = event(
            "single",
            zoned(naive(2014, 7, 1, 9, 0)),
            zoned(naive(2014, 7, 1, 10, 0)),
            None,
        );
        let series = Series::compile(&master, Berlin).unwrap();

        let found: Vec<_> = series.expand(&master, None, summer_2014()).collect();
        assert_eq!(found.len(), 1);
        assert!(!found[0].recurring);
        assert_eq!(found[0].recurrence_id, None);

        let later = window(berlin(2014, 8, 1, 0, 0), berlin(2014, 9, 1, 0, 0));
        assert_eq!(series.expand(&master, None, later).count(), 0);
    }

    #[test]
    fn test_count_bounded_weekly_series() {
        let master = weekly();
        let series = Series::compile(&master, Berlin).unwrap();
        let found: Vec<_> = series.expand(&master, None, summer_2014()).collect();

        assert_eq!(found.len(), 6);
        assert!(found.iter().all(|o| o.recurring));
        assert_eq!(found[0].start_local, berlin(2014, 6, 30, 7, 0));
        assert_eq!(found[5].start_local, berlin(2014, 8, 4, 7, 0));
        assert_eq!(found[5].end_local, berlin(2014, 8, 4, 12, 0));
    }

    #[test]
    fn test_unbounded_series_stops_at_window_end() {
        let master = event(
            "daily",
            EventTime::DateTimeFloating(naive(2000, 1, 1, 8, 0)),
            EventTime::DateTimeFloating(naive(2000, 1, 1, 9, 0)),
            Some("FREQ=DAILY"),
        );
        let series = Series::compile(&master, Berlin).unwrap();
        let found: Vec<_> = series
            .expand(
                &master,
                None,
                window(berlin(2016, 4, 10, 0, 0), berlin(2016, 4, 13, 0, 0)),
            )
            .collect();

        assert_eq!(found.len(), 3);
        assert_eq!(found[0].start_local, berlin(2016, 4, 10, 8, 0));
    }

    #[test]
    fn test_exdates_are_never_produced() {
        let mut master = event(
            "no_recurrences",
            EventTime::DateTimeFloating(naive(2011, 9, 8, 13, 0)),
            EventTime::DateTimeFloating(naive(2011, 9, 8, 17, 0)),
            Some("FREQ=DAILY;COUNT=2;INTERVAL=1"),
        );
        master.recurrence.as_mut().unwrap().exdates = vec![
            EventTime::DateTimeFloating(naive(2011, 9, 8, 13, 0)),
            EventTime::DateTimeFloating(naive(2011, 9, 9, 13, 0)),
        ];
        let series = Series::compile(&master, Berlin).unwrap();
        let span = window(berlin(2011, 9, 1, 0, 0), berlin(2011, 10, 1, 0, 0));

        assert_eq!(series.expand(&master, None, span).count(), 0);
    }

    #[test]
    fn test_exdate_in_other_zone_matches_same_instant() {
        let mut master = weekly();
        master.recurrence.as_mut().unwrap().exdates = vec![EventTime::DateTimeUtc(
            Utc.with_ymd_and_hms(2014, 7, 14, 5, 0, 0).unwrap(),
        )];
        let series = Series::compile(&master, Berlin).unwrap();
        let found: Vec<_> = series.expand(&master, None, summer_2014()).collect();

        assert_eq!(found.len(), 5);
        assert!(found.iter().all(|o| o.start_local != berlin(2014, 7, 14, 7, 0)));
    }

    #[test]
    fn test_override_replaces_occurrence_exactly_once() {
        let master = weekly();
        let mut moved = weekly();
        moved.recurrence = None;
        moved.recurrence_id = Some(zoned(naive(2014, 7, 7, 7, 0)));
        moved.start = zoned(naive(2014, 7, 7, 9, 0));
        moved.end = zoned(naive(2014, 7, 7, 14, 0));
        moved.summary = "Arbeit (later)".to_string();

        let mut overrides = OverrideMap::new();
        overrides.insert(berlin(2014, 7, 7, 7, 0).with_timezone(&Utc), moved);

        let series = Series::compile(&master, Berlin).unwrap();
        let found: Vec<_> = series
            .expand(&master, Some(&overrides), summer_2014())
            .collect();

        assert_eq!(found.len(), 6);
        assert_eq!(found[1].start_local, berlin(2014, 7, 7, 9, 0));
        assert_eq!(found[1].summary, "Arbeit (later)");
        assert_eq!(
            found[1].recurrence_id,
            Some(berlin(2014, 7, 7, 7, 0).with_timezone(&Utc))
        );
        assert!(found.iter().all(|o| o.start_local != berlin(2014, 7, 7, 7, 0)));
    }

    #[test]
    fn test_override_moved_into_window_from_outside() {
        let master = weekly();
        let mut moved = weekly();
        moved.recurrence = None;
        moved.recurrence_id = Some(zoned(naive(2014, 8, 4, 7, 0)));
        moved.start = zoned(naive(2014, 7, 1, 7, 0));
        moved.end = zoned(naive(2014, 7, 1, 8, 0));

        let mut overrides = OverrideMap::new();
        overrides.insert(berlin(2014, 8, 4, 7, 0).with_timezone(&Utc), moved);

        let series = Series::compile(&master, Berlin).unwrap();
        let july = window(berlin(2014, 7, 1, 0, 0), berlin(2014, 7, 2, 0, 0));
        let found: Vec<_> = series.expand(&master, Some(&overrides), july).collect();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].start_local, berlin(2014, 7, 1, 7, 0));
    }

    #[test]
    fn test_cancelled_and_orphaned_overrides_are_hidden() {
        let master = weekly();
        let mut cancelled = weekly();
        cancelled.recurrence = None;
        cancelled.recurrence_id = Some(zoned(naive(2014, 7, 14, 7, 0)));
        cancelled.start = zoned(naive(2014, 7, 14, 7, 0));
        cancelled.end = zoned(naive(2014, 7, 14, 12, 0));
        cancelled.status = EventStatus::Cancelled;

        let mut orphan = weekly();
        orphan.recurrence = None;
        orphan.recurrence_id = Some(zoned(naive(2014, 9, 1, 7, 0)));
        orphan.start = zoned(naive(2014, 9, 1, 7, 0));
        orphan.end = zoned(naive(2014, 9, 1, 12, 0));

        let mut overrides = OverrideMap::new();
        overrides.insert(berlin(2014, 7, 14, 7, 0).with_timezone(&Utc), cancelled);
        overrides.insert(berlin(2014, 9, 1, 7, 0).with_timezone(&Utc), orphan);

        let series = Series::compile(&master, Berlin).unwrap();
        let found: Vec<_> = series
            .expand(&master, Some(&overrides), summer_2014())
            .collect();

        assert_eq!(found.len(), 5);
        assert!(found.iter().all(|o| o.start_local != berlin(2014, 9, 1, 7, 0)));
    }

    #[test]
    fn test_wall_clock_time_survives_dst() {
        let master = event(
            "dst",
            zoned(naive(2016, 3, 21, 9, 0)),
            zoned(naive(2016, 3, 21, 10, 0)),
            Some("FREQ=WEEKLY;COUNT=2"),
        );
        let series = Series::compile(&master, Berlin).unwrap();
        let found: Vec<_> = series
            .expand(
                &master,
                None,
                window(berlin(2016, 3, 1, 0, 0), berlin(2016, 4, 1, 0, 0)),
            )
            .collect();

        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|o| o.start_local.hour() == 9));
        assert!(found.iter().all(|o| o.end_local.hour() == 10));
    }

    #[test]
    fn test_all_day_series_with_date_exdate() {
        let mut master = event(
            "allday",
            EventTime::Date(NaiveDate::from_ymd_opt(2016, 4, 1).unwrap()),
            EventTime::Date(NaiveDate::from_ymd_opt(2016, 4, 2).unwrap()),
            Some("FREQ=DAILY;UNTIL=20160405"),
        );
        master.recurrence.as_mut().unwrap().exdates =
            vec![EventTime::Date(NaiveDate::from_ymd_opt(2016, 4, 3).unwrap())];
        let series = Series::compile(&master, Berlin).unwrap();
        let found: Vec<_> = series
            .expand(
                &master,
                None,
                window(berlin(2016, 3, 1, 0, 0), berlin(2016, 5, 1, 0, 0)),
            )
            .collect();

        let days: Vec<u32> = found
            .iter()
            .map(|o| o.start_local.day())
            .collect();
        assert_eq!(days, vec![1, 2, 4, 5]);
        assert!(found.iter().all(|o| o.all_day));
        assert_eq!(found[0].end_local - found[0].start_local, Duration::days(1));
    }

    #[test]
    fn test_rdates_add_occurrences() {
        let mut master = event(
            "rdate",
            zoned(naive(2014, 6, 30, 7, 0)),
            zoned(naive(2014, 6, 30, 8, 0)),
            None,
        );
        master.recurrence = Some(Recurrence {
            rrule: None,
            rdates: vec![zoned(naive(2014, 7, 3, 7, 0))],
            exdates: vec![],
        });
        let series = Series::compile(&master, Berlin).unwrap();
        let found: Vec<_> = series.expand(&master, None, summer_2014()).collect();

        assert_eq!(found.len(), 2);
        assert_eq!(found[1].start_local, berlin(2014, 7, 3, 7, 0));
    }

    #[test]
    fn test_malformed_rrule_is_recurrence_parse_error() {
        let master = event(
            "broken",
            zoned(naive(2014, 6, 30, 7, 0)),
            zoned(naive(2014, 6, 30, 8, 0)),
            Some("FREQ=SOMETIMES;COUNT=x"),
        );
        assert!(matches!(
            Series::compile(&master, Berlin),
            Err(AlmanacError::RecurrenceParse { .. })
        ));
    }

    #[test]
    fn test_expansion_is_restartable() {
        let master = weekly();
        let series = Series::compile(&master, Berlin).unwrap();
        let first: Vec<_> = series.expand(&master, None, summer_2014()).collect();
        let second: Vec<_> = series.expand(&master, None, summer_2014()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_split_until_floating_and_date() {
        let (rule, until) = split_until("FREQ=DAILY;UNTIL=20140701T070000", Berlin).unwrap();
        assert_eq!(rule, "FREQ=DAILY");
        assert_eq!(until, Some(Utc.with_ymd_and_hms(2014, 7, 1, 5, 0, 0).unwrap()));

        let (_, until) = split_until("FREQ=DAILY;UNTIL=20140101", Berlin).unwrap();
        assert_eq!(until, Some(Utc.with_ymd_and_hms(2014, 1, 1, 22, 59, 59).unwrap()));

        let (rule, until) = split_until("UNTIL=20140101T000000Z;FREQ=WEEKLY", Berlin).unwrap();
        assert_eq!(rule, "FREQ=WEEKLY");
        assert_eq!(until, Some(Utc.with_ymd_and_hms(2014, 1, 1, 0, 0, 0).unwrap()));

        assert!(split_until("FREQ=DAILY;UNTIL=tomorrow", Berlin).is_err());
    }
}
