//! Normalization of event times into one timezone.
//!
//! Calendar data mixes all-day dates, floating (naive) datetimes, UTC
//! datetimes and datetimes with a TZID. Everything that is compared or sorted
//! goes through [`localize`] first, which yields a [`LocalTime`] carrying both
//! the instant in the default timezone and the time as originally written.

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, Offset, TimeZone};
use chrono_tz::Tz;
use tracing::warn;

use crate::event::EventTime;

/// A normalized event time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    /// The instant expressed in the default timezone (used for comparisons)
    pub local: DateTime<Tz>,
    /// The same instant in the zone it was written in (used for display)
    pub original: DateTime<Tz>,
    pub all_day: bool,
}

/// Normalize `time` into `default_tz`.
///
/// - Dates become midnight in `default_tz` and are flagged all-day.
/// - Floating datetimes are read as wall-clock time in `default_tz`.
/// - UTC and zoned datetimes keep their zone in `original`; `local` is the
///   same instant in `default_tz`.
/// - Unknown TZIDs are treated like floating times.
pub fn localize(time: &EventTime, default_tz: Tz) -> LocalTime {
    match time {
        EventTime::Date(d) => {
            let local = resolve_local(&default_tz, &d.and_time(NaiveTime::MIN));
            LocalTime {
                local,
                original: local,
                all_day: true,
            }
        }
        EventTime::DateTimeFloating(naive) => {
            let local = resolve_local(&default_tz, naive);
            LocalTime {
                local,
                original: local,
                all_day: false,
            }
        }
        EventTime::DateTimeUtc(dt) => LocalTime {
            local: dt.with_timezone(&default_tz),
            original: dt.with_timezone(&chrono_tz::UTC),
            all_day: false,
        },
        EventTime::DateTimeZoned { datetime, tzid } => match parse_tzid(tzid) {
            Some(tz) => {
                let original = resolve_local(&tz, datetime);
                LocalTime {
                    local: original.with_timezone(&default_tz),
                    original,
                    all_day: false,
                }
            }
            None => {
                warn!(tzid = %tzid, "Unknown timezone, treating time as floating");
                let local = resolve_local(&default_tz, datetime);
                LocalTime {
                    local,
                    original: local,
                    all_day: false,
                }
            }
        },
    }
}

/// Look up an IANA timezone from a TZID parameter value.
pub fn parse_tzid(tzid: &str) -> Option<Tz> {
    tzid.trim().trim_matches('"').parse().ok()
}

/// Attach `tz` to a wall-clock time.
///
/// Ambiguous times (DST fold) resolve to the earlier instant; times inside a
/// DST gap are moved forward by the length of the gap.
pub fn resolve_local(tz: &Tz, naive: &NaiveDateTime) -> DateTime<Tz> {
    try_resolve_local(tz, naive).unwrap_or_else(|| tz.from_utc_datetime(naive))
}

/// Like [`resolve_local`], but `None` when the time cannot be placed in `tz`
/// without leaving chrono's representable range.
pub fn try_resolve_local(tz: &Tz, naive: &NaiveDateTime) -> Option<DateTime<Tz>> {
    if let Some(dt) = tz.from_local_datetime(naive).earliest() {
        return Some(dt);
    }
    let before = naive.checked_sub_signed(Duration::days(1))?;
    let offset = tz.offset_from_utc_datetime(&before).fix();
    let utc = naive.checked_sub_signed(Duration::seconds(i64::from(offset.local_minus_utc())))?;
    Some(tz.from_utc_datetime(&utc))
}
