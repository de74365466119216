//! Core of almanac: a local calendar collection with a recurrence-aware query
//! engine.
//!
//! - `event` and `ics` for calendar items and their iCalendar form
//! - `localize` and `date_range` for turning times and date tokens into
//!   zone-aware instants
//! - `recurrence` and `collection` for expanding series and querying ranges
//! - `agenda` for rendering occurrences as text

pub mod agenda;
pub mod clock;
pub mod collection;
pub mod config;
pub mod date_range;
pub mod error;
pub mod event;
pub mod ics;
pub mod locale;
pub mod localize;
pub mod occurrence;
pub mod recurrence;

pub use error::{AlmanacError, AlmanacResult};
pub use event::*;
