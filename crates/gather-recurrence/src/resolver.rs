use chrono::{DateTime, Datelike, Days, Duration, FixedOffset, NaiveDate, NaiveDateTime, Weekday};

use gather_types::models::RawRecurrence;

use crate::rule::{InvalidRuleError, RecurrenceRule, WeekOfMonth};

/// One concrete start of a recurring event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub starts_at: DateTime<FixedOffset>,
    pub label: String,
}

impl Occurrence {
    fn new(local: NaiveDateTime, offset: FixedOffset) -> Self {
        let utc = local - Duration::seconds(offset.local_minus_utc() as i64);
        Self {
            starts_at: DateTime::from_naive_utc_and_offset(utc, offset),
            label: local.format("%A, %B %-d, %Y at %-I:%M %p").to_string(),
        }
    }
}

/// Validate `raw` and return its next `count` occurrences strictly after `from`.
pub fn compute_next_occurrences(
    raw: &RawRecurrence,
    from: DateTime<FixedOffset>,
    count: usize,
) -> Result<Vec<Occurrence>, InvalidRuleError> {
    let rule = RecurrenceRule::from_raw(raw)?;
    Ok(rule.next_occurrences(from, count))
}

impl RecurrenceRule {
    /// The next `count` occurrences strictly after `from`, in increasing order.
    pub fn next_occurrences(&self, from: DateTime<FixedOffset>, count: usize) -> Vec<Occurrence> {
        let offset = *from.offset();
        let after = from.naive_local();

        let starts: Vec<NaiveDateTime> = match *self {
            Self::Daily { start_date, time } => {
                let first = first_daily(start_date, after).and_time(time);
                let first = if first > after { Some(first) } else { step_days(first, 1) };
                std::iter::successors(first, |d| step_days(*d, 1))
                    .take(count)
                    .collect()
            }
            Self::Weekly { weekday, time } => {
                let first = first_weekly(after.date(), weekday).and_time(time);
                let first = if first > after { Some(first) } else { step_days(first, 7) };
                std::iter::successors(first, |d| step_days(*d, 7))
                    .take(count)
                    .collect()
            }
            Self::Monthly {
                week,
                weekday,
                time,
            } => monthly_dates(after.date(), week, weekday)
                .map(|date| date.and_time(time))
                .filter(|candidate| *candidate > after)
                .take(count)
                .collect(),
        };

        starts
            .into_iter()
            .map(|local| Occurrence::new(local, offset))
            .collect()
    }

    /// Whether `at` is exactly one of this rule's occurrences, read in
    /// `at`'s own offset.
    pub fn matches(&self, at: DateTime<FixedOffset>) -> bool {
        let local = at.naive_local();
        local.time() == self.time() && self.fires_on(local.date())
    }
}

/// The first day on or after the rule's start date that is not before
/// `after`'s date. Jumps straight to `after` rather than walking day by day
/// from a start date that may be years old.
fn first_daily(start_date: NaiveDate, after: NaiveDateTime) -> NaiveDate {
    if start_date >= after.date() {
        start_date
    } else {
        after.date()
    }
}

fn first_weekly(date: NaiveDate, weekday: Weekday) -> NaiveDate {
    let delta = (7 + weekday.num_days_from_sunday() - date.weekday().num_days_from_sunday()) % 7;
    date.checked_add_days(Days::new(delta as u64)).unwrap_or(date)
}

fn step_days(at: NaiveDateTime, days: u64) -> Option<NaiveDateTime> {
    at.checked_add_days(Days::new(days))
}

/// The rule's day in each month, starting with the month containing `from`.
fn monthly_dates(
    from: NaiveDate,
    week: WeekOfMonth,
    weekday: Weekday,
) -> impl Iterator<Item = NaiveDate> {
    let start = (from.year(), from.month());
    std::iter::successors(Some(start), |&(year, month)| {
        Some(if month == 12 { (year + 1, 1) } else { (year, month + 1) })
    })
    .map_while(move |(year, month)| week.resolve(year, month, weekday))
}
