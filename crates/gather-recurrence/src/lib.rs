//! Recurring event occurrence resolution.
//!
//! A [`RecurrenceRule`] is parsed from the loosely typed recurrence fields an
//! event carries and expanded into concrete future [`Occurrence`]s on demand.
//! Occurrences are never stored; an RSVP may pin one of them by timestamp.
//!
//! Rules are evaluated in the civil calendar of the reference time's fixed UTC
//! offset. The configured time-of-day is used as-is and every occurrence
//! carries the reference offset, so a daylight-saving transition between two
//! occurrences never shifts the wall-clock time and never yields a missing or
//! ambiguous local time.

mod resolver;
mod rule;

pub use resolver::{Occurrence, compute_next_occurrences};
pub use rule::{InvalidRuleError, Interval, RecurrenceRule, WeekOfMonth};
