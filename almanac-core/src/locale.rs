//! Locale settings: default timezone and date/time formats.

use chrono::Weekday;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

fn system_timezone() -> Tz {
    iana_time_zone::get_timezone()
        .ok()
        .and_then(|name| name.parse().ok())
        .unwrap_or(chrono_tz::UTC)
}

/// How dates are read and displayed, and which timezone naive times live in.
///
/// Format strings use chrono's `strftime` syntax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Locale {
    /// Timezone for floating times, all-day events and display
    pub timezone: Tz,
    pub timeformat: String,
    pub dateformat: String,
    pub longdateformat: String,
    pub datetimeformat: String,
    pub longdatetimeformat: String,
    /// 0 = Monday ... 6 = Sunday
    pub firstweekday: u8,
}

impl Default for Locale {
    fn default() -> Self {
        Locale {
            timezone: system_timezone(),
            timeformat: "%H:%M".to_string(),
            dateformat: "%d.%m.".to_string(),
            longdateformat: "%d.%m.%Y".to_string(),
            datetimeformat: "%d.%m. %H:%M".to_string(),
            longdatetimeformat: "%d.%m.%Y %H:%M".to_string(),
            firstweekday: 0,
        }
    }
}

impl Locale {
    pub fn with_timezone(timezone: Tz) -> Self {
        Locale {
            timezone,
            ..Default::default()
        }
    }

    pub fn first_weekday(&self) -> Weekday {
        match self.firstweekday % 7 {
            0 => Weekday::Mon,
            1 => Weekday::Tue,
            2 => Weekday::Wed,
            3 => Weekday::Thu,
            4 => Weekday::Fri,
            5 => Weekday::Sat,
            _ => Weekday::Sun,
        }
    }
}
