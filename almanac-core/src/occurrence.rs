//! Concrete, localized occurrences of events.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::event::{Event, EventStatus};
use crate::localize::LocalTime;

/// One instance of an event at a specific time, normalized for display.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub uid: String,
    pub calendar: String,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub status: EventStatus,
    /// Start in the zone the event was written in
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    /// Start in the default timezone
    pub start_local: DateTime<Tz>,
    pub end_local: DateTime<Tz>,
    pub all_day: bool,
    /// Part of a recurring series
    pub recurring: bool,
    /// Scheduled start of this instance within its series
    pub recurrence_id: Option<DateTime<Utc>>,
}

impl Occurrence {
    pub(crate) fn new(
        event: &Event,
        start: LocalTime,
        end: LocalTime,
        recurring: bool,
        recurrence_id: Option<DateTime<Utc>>,
    ) -> Self {
        Occurrence {
            uid: event.uid.clone(),
            calendar: event.calendar.clone(),
            summary: event.summary.clone(),
            description: event.description.clone(),
            location: event.location.clone(),
            status: event.status,
            start: start.original,
            end: end.original,
            start_local: start.local,
            end_local: end.local,
            all_day: start.all_day,
            recurring,
            recurrence_id,
        }
    }

    /// Ordering used for every occurrence listing: start, then UID.
    pub fn cmp_by_start(&self, other: &Self) -> Ordering {
        self.start_local
            .cmp(&other.start_local)
            .then_with(|| self.uid.cmp(&other.uid))
    }

    /// Whether `[start_local, end_local)` overlaps `[from, to)`.
    ///
    /// Zero-length occurrences overlap when they start inside the window.
    pub fn intersects(&self, from: &DateTime<Tz>, to: &DateTime<Tz>) -> bool {
        if self.start_local >= *to {
            return false;
        }
        if self.end_local > self.start_local {
            self.end_local > *from
        } else {
            self.start_local >= *from
        }
    }
}

/// Lazy merge of several start-ordered occurrence streams.
///
/// Each source must already be ordered by [`Occurrence::cmp_by_start`]; ties
/// across sources keep source order.
pub struct Occurrences<'a> {
    sources: Vec<Box<dyn Iterator<Item = Occurrence> + 'a>>,
    heads: BinaryHeap<Head>,
}

impl<'a> Occurrences<'a> {
    pub fn merge(mut sources: Vec<Box<dyn Iterator<Item = Occurrence> + 'a>>) -> Self {
        let mut heads = BinaryHeap::with_capacity(sources.len());
        for (source, iter) in sources.iter_mut().enumerate() {
            if let Some(occurrence) = iter.next() {
                heads.push(Head { occurrence, source });
            }
        }
        Occurrences { sources, heads }
    }
}

impl Iterator for Occurrences<'_> {
    type Item = Occurrence;

    fn next(&mut self) -> Option<Occurrence> {
        let Head { occurrence, source } = self.heads.pop()?;
        if let Some(next) = self.sources[source].next() {
            self.heads.push(Head {
                occurrence: next,
                source,
            });
        }
        Some(occurrence)
    }
}

struct Head {
    occurrence: Occurrence,
    source: usize,
}

impl Ord for Head {
    // Reversed: BinaryHeap is a max-heap and we want the earliest first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .occurrence
            .cmp_by_start(&self.occurrence)
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventTime;
    use crate::localize::localize;
    use chrono::{Datelike, NaiveDate, TimeZone};
    use chrono_tz::Europe::Berlin;

    fn occurrence(uid: &str, day: u32, hour: u32) -> Occurrence {
        let start = NaiveDate::from_ymd_opt(2016, 4, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap();
        let event = Event {
            uid: uid.to_string(),
            calendar: "home".to_string(),
            summary: uid.to_string(),
            description: None,
            location: None,
            start: EventTime::DateTimeFloating(start),
            end: EventTime::DateTimeFloating(start),
            status: EventStatus::Confirmed,
            recurrence: None,
            recurrence_id: None,
            sequence: 0,
        };
        let start = localize(&event.start, Berlin);
        Occurrence::new(&event, start, start, false, None)
    }

    #[test]
    fn test_merge_orders_by_start_then_uid() {
        let a: Vec<Occurrence> = vec![occurrence("b", 10, 9), occurrence("b", 12, 9)];
        let b: Vec<Occurrence> = vec![occurrence("a", 10, 9), occurrence("a", 11, 8)];
        let sources: Vec<Box<dyn Iterator<Item = Occurrence>>> =
            vec![Box::new(a.into_iter()), Box::new(b.into_iter())];
        let merged: Vec<(String, u32)> = Occurrences::merge(sources)
            .map(|o| (o.uid, o.start_local.day()))
            .collect();

        assert_eq!(
            merged,
            vec![
                ("a".to_string(), 10),
                ("b".to_string(), 10),
                ("a".to_string(), 11),
                ("b".to_string(), 12)
            ]
        );
    }

    #[test]
    fn test_zero_length_occurrence_intersects_only_inside_window() {
        let o = occurrence("a", 10, 9);
        let from = Berlin.with_ymd_and_hms(2016, 4, 10, 9, 0, 0).unwrap();
        let to = Berlin.with_ymd_and_hms(2016, 4, 10, 10, 0, 0).unwrap();
        assert!(o.intersects(&from, &to));
        assert!(!o.intersects(&(from + chrono::Duration::minutes(1)), &to));
        assert!(!o.intersects(&(from - chrono::Duration::hours(1)), &from));
    }
}
