//! ICS parsing and generation.
//!
//! This module handles reading and writing iCalendar data according to RFC 5545.

mod generate;
mod parse;

pub use generate::generate_ics;
pub use parse::{parse_event, parse_events};
