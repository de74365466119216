//! Calendar event types.
//!
//! An [`Event`] is either the master definition of a (possibly recurring)
//! series or an override that replaces one occurrence of a series. The two
//! roles are made explicit with [`CalendarItem`] before anything is merged into
//! an [`EventCollection`](crate::collection::EventCollection).

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A calendar event (VEVENT)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub uid: String,
    /// Calendar (collection directory) this event belongs to
    pub calendar: String,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub status: EventStatus,

    /// RRULE, RDATE and EXDATE for master events
    pub recurrence: Option<Recurrence>,
    /// Original start time of the occurrence this event replaces (RECURRENCE-ID)
    pub recurrence_id: Option<EventTime>,

    /// Revision sequence number (SEQUENCE), 0 when absent
    pub sequence: i64,
}

/// Recurrence data of a master event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Recurrence {
    /// The RRULE value, e.g. `FREQ=WEEKLY;COUNT=6`
    pub rrule: Option<String>,
    pub rdates: Vec<EventTime>,
    pub exdates: Vec<EventTime>,
}

impl Recurrence {
    /// Whether this produces anything beyond the event's own start.
    pub fn is_empty(&self) -> bool {
        self.rrule.is_none() && self.rdates.is_empty()
    }
}

/// A point in time as written in the calendar data.
///
/// Timezone information is preserved as found: normalization into a single
/// zone happens in [`localize`](crate::localize::localize).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTime {
    Date(NaiveDate),
    DateTimeUtc(DateTime<Utc>),
    DateTimeFloating(NaiveDateTime),
    DateTimeZoned {
        datetime: NaiveDateTime,
        tzid: String,
    },
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTime::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            EventTime::DateTimeUtc(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M UTC")),
            EventTime::DateTimeFloating(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M")),
            EventTime::DateTimeZoned { datetime, tzid } => {
                write!(f, "{} ({})", datetime.format("%Y-%m-%d %H:%M"), tzid)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

impl Event {
    pub fn is_recurring(&self) -> bool {
        self.recurrence.as_ref().is_some_and(|r| !r.is_empty())
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == EventStatus::Cancelled
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary)
    }
}

/// An event classified by its role in a series.
#[derive(Debug, Clone, PartialEq)]
pub enum CalendarItem {
    /// Anchors a series, or is a standalone event
    Master(Event),
    /// Replaces the occurrence of its series scheduled at `recurrence_id`
    Override {
        recurrence_id: EventTime,
        event: Event,
    },
}

impl From<Event> for CalendarItem {
    fn from(event: Event) -> Self {
        match event.recurrence_id.clone() {
            Some(recurrence_id) => CalendarItem::Override {
                recurrence_id,
                event,
            },
            None => CalendarItem::Master(event),
        }
    }
}

impl CalendarItem {
    pub fn event(&self) -> &Event {
        match self {
            CalendarItem::Master(event) | CalendarItem::Override { event, .. } => event,
        }
    }
}
