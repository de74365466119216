//! Date range resolution for queries.
//!
//! Turns the free-form tokens a user types (`today`, `tomorrow 3d`,
//! `2016-04-10 2016-04-12`, `friday`, ...) into a concrete half-open interval in
//! the locale's timezone.

use std::fmt;

use chrono::{
    DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Weekday,
};
use chrono_tz::Tz;

use crate::clock::Clock;
use crate::error::{AlmanacError, AlmanacResult};
use crate::locale::Locale;
use crate::localize::{resolve_local, try_resolve_local};

/// Default length of a window that starts at a specific time of day.
const DATETIME_WINDOW_HOURS: i64 = 1;

/// A resolved query interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl DateRange {
    pub fn new(start: DateTime<Tz>, end: DateTime<Tz>) -> AlmanacResult<Self> {
        if start >= end {
            return Err(AlmanacError::InvalidDate(format!(
                "range end {} is not after its start {}",
                end, start
            )));
        }
        Ok(DateRange { start, end })
    }

    /// Resolve range tokens relative to `clock`.
    ///
    /// - no tokens: today, lasting `default_delta` or until the end of today
    /// - `<start>`: a keyword or date, lasting `default_delta` or one period
    /// - `<start> <delta>`: the delta (`^\d+[dwmy]$`) wins over `default_delta`
    /// - `<start> <end>`: explicit range, `end` is inclusive of its day
    pub fn resolve<S: AsRef<str>>(
        tokens: &[S],
        locale: &Locale,
        default_delta: Option<&str>,
        clock: &dyn Clock,
    ) -> AlmanacResult<Self> {
        let default_delta = default_delta.map(Delta::parse).transpose()?;
        let now = clock.now().with_timezone(&locale.timezone);
        let resolver = TokenResolver { locale, now };

        let tokens: Vec<&str> = tokens.iter().map(|t| t.as_ref().trim()).collect();

        let (anchor, rest) = match tokens.split_first() {
            None => (resolver.day(now.date_naive()), &[][..]),
            Some((first, rest)) if Delta::matches(first) => {
                let delta = Delta::parse(first)?;
                let start = resolver.day(now.date_naive()).start;
                if !rest.is_empty() {
                    return Err(unexpected_tokens(rest));
                }
                return Self::new(start, delta.add_to(start)?);
            }
            Some((first, rest)) => (resolver.anchor(first)?, rest),
        };

        let end = match rest {
            [] => match default_delta {
                Some(delta) => delta.add_to(anchor.start)?,
                None => anchor.last_instant(),
            },
            [second] if Delta::matches(second) => Delta::parse(second)?.add_to(anchor.start)?,
            [second] => resolver.anchor(second)?.as_end(),
            more => return Err(unexpected_tokens(more)),
        };

        Self::new(anchor.start, end)
    }
}

fn unexpected_tokens(tokens: &[&str]) -> AlmanacError {
    AlmanacError::InvalidDate(format!("unexpected date tokens: {}", tokens.join(" ")))
}

/// A `<integer><unit>` offset, unit one of d, w, m, y.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    Days(u32),
    Weeks(u32),
    Months(u32),
    Years(u32),
}

impl Delta {
    fn matches(token: &str) -> bool {
        token.len() > 1
            && token.ends_with(|c: char| matches!(c, 'd' | 'w' | 'm' | 'y'))
            && token[..token.len() - 1].bytes().all(|b| b.is_ascii_digit())
    }

    pub fn parse(token: &str) -> AlmanacResult<Self> {
        let token = token.trim();
        if !Self::matches(token) {
            return Err(AlmanacError::InvalidDate(format!(
                "'{}' is not a valid timedelta, expected something like 2d, 1w, 3m or 1y",
                token
            )));
        }

        let (digits, unit) = token.split_at(token.len() - 1);
        let n: u32 = digits
            .parse()
            .map_err(|_| AlmanacError::InvalidDate(format!("'{}' is out of range", token)))?;

        Ok(match unit {
            "d" => Delta::Days(n),
            "w" => Delta::Weeks(n),
            "m" => Delta::Months(n),
            _ => Delta::Years(n),
        })
    }

    /// Add this delta in wall-clock terms, so that midnight stays midnight
    /// across DST changes.
    pub fn add_to(self, start: DateTime<Tz>) -> AlmanacResult<DateTime<Tz>> {
        let naive = start.naive_local();
        let shifted = match self {
            Delta::Days(n) => {
                Duration::try_days(i64::from(n)).and_then(|d| naive.checked_add_signed(d))
            }
            Delta::Weeks(n) => {
                Duration::try_weeks(i64::from(n)).and_then(|d| naive.checked_add_signed(d))
            }
            Delta::Months(n) => naive.checked_add_months(Months::new(n)),
            Delta::Years(n) => n
                .checked_mul(12)
                .and_then(|months| naive.checked_add_months(Months::new(months))),
        };
        shifted
            .and_then(|shifted| try_resolve_local(&start.timezone(), &shifted))
            .ok_or_else(|| {
                AlmanacError::InvalidDate(format!("{} after {} is out of range", self, start))
            })
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delta::Days(n) => write!(f, "{}d", n),
            Delta::Weeks(n) => write!(f, "{}w", n),
            Delta::Months(n) => write!(f, "{}m", n),
            Delta::Years(n) => write!(f, "{}y", n),
        }
    }
}

/// A resolved start token together with the period it naturally covers.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    start: DateTime<Tz>,
    /// Exclusive end of the natural period (day, week, month, hour)
    period_end: DateTime<Tz>,
    timed: bool,
}

impl Anchor {
    /// The last instant of the period, e.g. 23:59:59.999999 for a day.
    fn last_instant(&self) -> DateTime<Tz> {
        if self.timed {
            self.period_end
        } else {
            self.period_end - Duration::microseconds(1)
        }
    }

    /// Interpretation when used as the second token of an explicit range.
    fn as_end(&self) -> DateTime<Tz> {
        if self.timed { self.start } else { self.last_instant() }
    }
}

struct TokenResolver<'a> {
    locale: &'a Locale,
    now: DateTime<Tz>,
}

impl TokenResolver<'_> {
    fn tz(&self) -> Tz {
        self.locale.timezone
    }

    fn midnight(&self, date: NaiveDate) -> DateTime<Tz> {
        resolve_local(&self.tz(), &date.and_time(NaiveTime::MIN))
    }

    fn day(&self, date: NaiveDate) -> Anchor {
        self.days(date, 1)
    }

    fn days(&self, date: NaiveDate, days: i64) -> Anchor {
        Anchor {
            start: self.midnight(date),
            period_end: self.midnight(date + Duration::days(days)),
            timed: false,
        }
    }

    fn anchor(&self, token: &str) -> AlmanacResult<Anchor> {
        let today = self.now.date_naive();
        let lower = token.to_lowercase();

        match lower.as_str() {
            "today" => return Ok(self.day(today)),
            "tomorrow" => return Ok(self.day(today + Duration::days(1))),
            "yesterday" => return Ok(self.day(today - Duration::days(1))),
            "now" => {
                return Ok(Anchor {
                    start: self.now,
                    period_end: self.midnight(today + Duration::days(1)) - Duration::microseconds(1),
                    timed: true,
                });
            }
            "week" => {
                let back = i64::from(
                    (7 + today.weekday().num_days_from_monday()
                        - self.locale.first_weekday().num_days_from_monday())
                        % 7,
                );
                return Ok(self.days(today - Duration::days(back), 7));
            }
            "month" => {
                let first = today.with_day(1).unwrap_or(today);
                let next = first.checked_add_months(Months::new(1)).unwrap_or(first);
                return Ok(Anchor {
                    start: self.midnight(first),
                    period_end: self.midnight(next),
                    timed: false,
                });
            }
            _ => {}
        }

        if let Ok(weekday) = lower.parse::<Weekday>() {
            let ahead = (7 + weekday.num_days_from_monday() - today.weekday().num_days_from_monday()) % 7;
            return Ok(self.day(today + Duration::days(i64::from(ahead))));
        }

        if let Some(datetime) = self.parse_datetime(token) {
            let start = resolve_local(&self.tz(), &datetime);
            return Ok(Anchor {
                start,
                period_end: start + Duration::hours(DATETIME_WINDOW_HOURS),
                timed: true,
            });
        }

        if let Some(date) = self.parse_date(token) {
            return Ok(self.day(date));
        }

        Err(AlmanacError::InvalidDate(format!(
            "could not understand '{}' as a date",
            token
        )))
    }

    fn parse_datetime(&self, token: &str) -> Option<NaiveDateTime> {
        ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", self.locale.longdatetimeformat.as_str()]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(token, fmt).ok())
            .or_else(|| {
                let year = self.now.year();
                NaiveDateTime::parse_from_str(
                    &format!("{} {}", token, year),
                    &format!("{} %Y", self.locale.datetimeformat),
                )
                .ok()
            })
    }

    fn parse_date(&self, token: &str) -> Option<NaiveDate> {
        ["%Y-%m-%d", self.locale.longdateformat.as_str()]
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(token, fmt).ok())
            .or_else(|| {
                let year = self.now.year();
                NaiveDate::parse_from_str(
                    &format!("{} {}", token, year),
                    &format!("{} %Y", self.locale.dateformat),
                )
                .ok()
            })
    }
}
