//! Agenda rendering: occurrences grouped by day through format templates.
//!
//! Templates are plain text with `{placeholder}` fields. `{name:WIDTH}` pads
//! the value to at least WIDTH characters, `{{` and `}}` are literal braces,
//! unknown placeholders render as nothing. Every rendered line ends with an
//! ANSI reset.

use std::collections::HashMap;
use std::fmt::{self, Write};

use chrono::{Duration, NaiveDate, NaiveTime};
use owo_colors::{DynColor, DynColors};
use tracing::warn;

use crate::clock::Clock;
use crate::event::EventStatus;
use crate::locale::Locale;
use crate::occurrence::Occurrence;

pub const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const RECURRING_SYMBOL: &str = " ⟳";
const NO_EVENTS: &str = "No events";

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Field { name: String, width: Option<u16> },
}

/// A parsed format string.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(format: &str) -> Self {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut chars = format.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    text.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    text.push('}');
                }
                '{' => {
                    let mut field = String::new();
                    let mut closed = false;
                    for f in chars.by_ref() {
                        if f == '}' {
                            closed = true;
                            break;
                        }
                        field.push(f);
                    }
                    if !closed {
                        // Unterminated field stays literal
                        text.push('{');
                        text.push_str(&field);
                        continue;
                    }
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    // Widths beyond u16 are not representable by `format!` and
                    // render unpadded
                    let (name, width) = match field.split_once(':') {
                        Some((name, width)) => (name, width.trim().parse::<u16>().ok()),
                        None => (field.as_str(), None),
                    };
                    segments.push(Segment::Field {
                        name: name.trim().to_string(),
                        width,
                    });
                }
                other => text.push(other),
            }
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Template { segments }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Fill the template, asking `value` for each field.
    pub fn render<F>(&self, mut value: F) -> String
    where
        F: FnMut(&str) -> String,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Field { name, width } => {
                    let rendered = value(name);
                    match width {
                        Some(width) => out.push_str(&format!(
                            "{:<width$}",
                            rendered,
                            width = usize::from(*width)
                        )),
                        None => out.push_str(&rendered),
                    }
                }
            }
        }
        out
    }
}

/// Display `value`, leaving out whatever fails to format (such as an invalid
/// strftime specifier in a user-supplied format).
fn lossy(value: impl fmt::Display) -> String {
    let mut out = String::new();
    let _ = write!(out, "{}", value);
    out
}

/// Parse a color name or `#rrggbb` value.
///
/// Besides owo-colors' own names (`red`, `bright red`) this accepts
/// `dark <name>` for the base color and `light <name>` for its bright variant.
fn parse_color(color: &str) -> Option<DynColors> {
    let color = color.trim().to_lowercase();
    let normalized = if let Some(base) = color.strip_prefix("dark ") {
        base.trim().to_string()
    } else if let Some(base) = color.strip_prefix("light ") {
        format!("bright {}", base.trim())
    } else {
        color
    };
    normalized.parse().ok()
}

/// ANSI foreground escape for a calendar color.
struct Foreground(DynColors);

impl fmt::Display for Foreground {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt_ansi_fg(f)
    }
}

/// Renders occurrences as agenda lines.
pub struct ListFormatter<'a> {
    locale: &'a Locale,
    today: NaiveDate,
    colors: HashMap<String, DynColors>,
}

impl<'a> ListFormatter<'a> {
    pub fn new(locale: &'a Locale, clock: &dyn Clock) -> Self {
        ListFormatter {
            locale,
            today: clock.now().with_timezone(&locale.timezone).date_naive(),
            colors: HashMap::new(),
        }
    }

    /// Color for `{calendar-color}` of events in `calendar`: a color name such
    /// as `red`, `dark red`, `light blue` or a `#rrggbb` value.
    pub fn with_calendar_color(mut self, calendar: &str, color: &str) -> Self {
        match parse_color(color) {
            Some(parsed) => {
                self.colors.insert(calendar.to_string(), parsed);
            }
            None => warn!(calendar = %calendar, color = %color, "Ignoring unknown color"),
        }
        self
    }

    /// Render `occurrences` grouped by local start date.
    ///
    /// An empty `day_format` leaves out the day headers.
    pub fn render<I>(&self, occurrences: I, format: &str, day_format: &str) -> Vec<String>
    where
        I: IntoIterator<Item = Occurrence>,
    {
        let event_template = Template::parse(format);
        let day_template = Template::parse(day_format);

        let mut occurrences: Vec<Occurrence> = occurrences.into_iter().collect();
        occurrences.sort_by(Occurrence::cmp_by_start);

        if occurrences.is_empty() {
            return vec![format!("{}{}", NO_EVENTS, RESET)];
        }

        let mut lines = Vec::new();
        let mut current_day: Option<NaiveDate> = None;

        for occurrence in &occurrences {
            let day = occurrence.start_local.date_naive();
            if current_day != Some(day) {
                current_day = Some(day);
                if !day_template.is_empty() {
                    let header = day_template.render(|name| self.day_field(name, day));
                    lines.push(format!("{}{}", header, RESET));
                }
            }
            let line = event_template.render(|name| self.event_field(name, occurrence));
            lines.push(format!("{}{}", line, RESET));
        }

        lines
    }

    fn day_name(&self, day: NaiveDate) -> String {
        match (day - self.today).num_days() {
            0 => "Today".to_string(),
            1 => "Tomorrow".to_string(),
            -1 => "Yesterday".to_string(),
            _ => day.format("%A").to_string(),
        }
    }

    fn day_field(&self, name: &str, day: NaiveDate) -> String {
        match name {
            "name" => self.day_name(day),
            "date" => lossy(day.format(&self.locale.dateformat)),
            "date-long" => lossy(day.format(&self.locale.longdateformat)),
            _ => self.style_field(name).unwrap_or_default(),
        }
    }

    fn style_field(&self, name: &str) -> Option<String> {
        let value = match name {
            "reset" => RESET,
            "bold" => BOLD,
            "nl" => "\n",
            "tab" => "\t",
            _ => return None,
        };
        Some(value.to_string())
    }

    fn event_field(&self, name: &str, o: &Occurrence) -> String {
        let locale = self.locale;
        // All-day ends are exclusive; show the last day instead
        let last_day = if o.all_day {
            (o.end_local - Duration::days(1)).date_naive().max(o.start_local.date_naive())
        } else {
            o.end_local.date_naive()
        };

        match name {
            "title" => o.summary.clone(),
            "description" => o.description.clone().unwrap_or_default(),
            "description-separator" => match o.description.as_deref() {
                Some(d) if !d.is_empty() => " :: ".to_string(),
                _ => String::new(),
            },
            "location" => o.location.clone().unwrap_or_default(),
            "calendar" => o.calendar.clone(),
            "calendar-color" => self
                .colors
                .get(&o.calendar)
                .map(|c| Foreground(*c).to_string())
                .unwrap_or_default(),
            "recurse" => {
                if o.recurring {
                    RECURRING_SYMBOL.to_string()
                } else {
                    String::new()
                }
            }
            "uid" => o.uid.clone(),
            "status" => match o.status {
                EventStatus::Confirmed => String::new(),
                EventStatus::Tentative => "TENTATIVE".to_string(),
                EventStatus::Cancelled => "CANCELLED".to_string(),
            },
            "start" if o.all_day => lossy(o.start_local.format(&locale.dateformat)),
            "start" => lossy(o.start_local.format(&locale.datetimeformat)),
            "end" if o.all_day => lossy(last_day.format(&locale.dateformat)),
            "end" => lossy(o.end_local.format(&locale.datetimeformat)),
            "start-date" => lossy(o.start_local.format(&locale.dateformat)),
            "end-date" => lossy(last_day.format(&locale.dateformat)),
            "start-time" if o.all_day => String::new(),
            "start-time" => lossy(o.start_local.format(&locale.timeformat)),
            "end-time" if o.all_day => String::new(),
            "end-time" => lossy(o.end_local.format(&locale.timeformat)),
            "start-end-time-style" => self.time_style(o),
            _ => self.style_field(name).unwrap_or_default(),
        }
    }

    /// `HH:MM-HH:MM` for timed events, `HH:MM→` when the event continues on a
    /// later day, nothing for all-day events.
    fn time_style(&self, o: &Occurrence) -> String {
        if o.all_day {
            return String::new();
        }
        let start = lossy(o.start_local.format(&self.locale.timeformat));
        let start_day = o.start_local.date_naive();
        let end_day = o.end_local.date_naive();
        let ends_at_midnight = o.end_local.time() == NaiveTime::MIN
            && start_day.succ_opt() == Some(end_day);

        if end_day == start_day || ends_at_midnight {
            let end = lossy(o.end_local.format(&self.locale.timeformat));
            format!("{}-{}", start, end)
        } else {
            format!("{}→", start)
        }
    }
}
