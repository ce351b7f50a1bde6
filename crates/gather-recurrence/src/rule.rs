use chrono::{Datelike, Days, NaiveDate, NaiveTime, Weekday};
use thiserror::Error;

use gather_types::models::RawRecurrence;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRuleError {
    #[error("repeat interval is required")]
    MissingInterval,
    #[error("unknown repeat interval '{0}'")]
    UnknownInterval(String),
    #[error("{field} is required for {interval} recurrence")]
    MissingField {
        interval: Interval,
        field: &'static str,
    },
    #[error("weekday must be 0 (Sunday) through 6 (Saturday), got '{0}'")]
    InvalidWeekday(String),
    #[error("week of month must be 1-4 or last, got '{0}'")]
    InvalidWeekOfMonth(String),
    #[error("start date must be YYYY-MM-DD, got '{0}'")]
    InvalidStartDate(String),
    #[error("time of day must be HH:MM (24-hour), got '{0}'")]
    InvalidTime(String),
}

impl InvalidRuleError {
    /// Form field the error belongs to.
    pub fn field(&self) -> &'static str {
        match self {
            Self::MissingInterval | Self::UnknownInterval(_) => "repeat_interval",
            Self::MissingField { field, .. } => *field,
            Self::InvalidWeekday(_) => "recurrence_weekday",
            Self::InvalidWeekOfMonth(_) => "recurrence_week_of_month",
            Self::InvalidStartDate(_) => "recurrence_start_date",
            Self::InvalidTime(_) => "recurrence_time",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Daily,
    Weekly,
    Monthly,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeekOfMonth {
    First,
    Second,
    Third,
    Fourth,
    /// Final occurrence of the weekday in the month (4th or 5th).
    Last,
}

impl WeekOfMonth {
    fn parse(raw: &str) -> Result<Self, InvalidRuleError> {
        match raw.to_ascii_lowercase().as_str() {
            "1" => Ok(Self::First),
            "2" => Ok(Self::Second),
            "3" => Ok(Self::Third),
            "4" => Ok(Self::Fourth),
            "5" | "-1" | "last" => Ok(Self::Last),
            _ => Err(InvalidRuleError::InvalidWeekOfMonth(raw.to_string())),
        }
    }

    fn ordinal(&self) -> Option<u8> {
        match self {
            Self::First => Some(1),
            Self::Second => Some(2),
            Self::Third => Some(3),
            Self::Fourth => Some(4),
            Self::Last => None,
        }
    }

    fn as_raw(&self) -> &'static str {
        match self {
            Self::First => "1",
            Self::Second => "2",
            Self::Third => "3",
            Self::Fourth => "4",
            Self::Last => "5",
        }
    }

    /// The matching day of `weekday` in the given month.
    pub fn resolve(&self, year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
        match self.ordinal() {
            Some(n) => NaiveDate::from_weekday_of_month_opt(year, month, weekday, n),
            None => last_weekday_of_month(year, month, weekday),
        }
    }
}

/// Count back from the final day of the month to the last `weekday`.
fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let last_day = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?;
    let back = (7 + last_day.weekday().num_days_from_sunday() - weekday.num_days_from_sunday()) % 7;
    last_day.checked_sub_days(Days::new(back as u64))
}

/// A validated recurrence rule. Each variant carries exactly the fields its
/// interval needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrenceRule {
    Daily {
        start_date: NaiveDate,
        time: NaiveTime,
    },
    Weekly {
        weekday: Weekday,
        time: NaiveTime,
    },
    Monthly {
        week: WeekOfMonth,
        weekday: Weekday,
        time: NaiveTime,
    },
}

impl RecurrenceRule {
    /// Parse the loosely typed recurrence fields of an event. Fields not used
    /// by the interval are ignored.
    pub fn from_raw(raw: &RawRecurrence) -> Result<Self, InvalidRuleError> {
        let interval = match raw.repeat_interval.as_deref().map(str::to_ascii_lowercase) {
            None => return Err(InvalidRuleError::MissingInterval),
            Some(i) if i == "daily" => Interval::Daily,
            Some(i) if i == "weekly" => Interval::Weekly,
            Some(i) if i == "monthly" => Interval::Monthly,
            Some(other) => return Err(InvalidRuleError::UnknownInterval(other)),
        };

        let require = |value: &Option<String>, field: &'static str| {
            value
                .clone()
                .ok_or(InvalidRuleError::MissingField { interval, field })
        };

        let time = parse_time(&require(&raw.recurrence_time, "recurrence_time")?)?;

        match interval {
            Interval::Daily => {
                let start_date =
                    parse_date(&require(&raw.recurrence_start_date, "recurrence_start_date")?)?;
                Ok(Self::Daily { start_date, time })
            }
            Interval::Weekly => {
                let weekday = parse_weekday(&require(&raw.recurrence_weekday, "recurrence_weekday")?)?;
                Ok(Self::Weekly { weekday, time })
            }
            Interval::Monthly => {
                let weekday = parse_weekday(&require(&raw.recurrence_weekday, "recurrence_weekday")?)?;
                let week = WeekOfMonth::parse(&require(
                    &raw.recurrence_week_of_month,
                    "recurrence_week_of_month",
                )?)?;
                Ok(Self::Monthly {
                    week,
                    weekday,
                    time,
                })
            }
        }
    }

    /// Canonical stored form of the rule.
    pub fn to_raw(&self) -> RawRecurrence {
        let mut raw = RawRecurrence {
            repeat_interval: Some(self.interval().as_str().to_string()),
            recurrence_time: Some(self.time().format("%H:%M").to_string()),
            ..Default::default()
        };
        match self {
            Self::Daily { start_date, .. } => {
                raw.recurrence_start_date = Some(start_date.format("%Y-%m-%d").to_string());
            }
            Self::Weekly { weekday, .. } => {
                raw.recurrence_weekday = Some(weekday.num_days_from_sunday().to_string());
            }
            Self::Monthly { week, weekday, .. } => {
                raw.recurrence_weekday = Some(weekday.num_days_from_sunday().to_string());
                raw.recurrence_week_of_month = Some(week.as_raw().to_string());
            }
        }
        raw
    }

    pub fn interval(&self) -> Interval {
        match self {
            Self::Daily { .. } => Interval::Daily,
            Self::Weekly { .. } => Interval::Weekly,
            Self::Monthly { .. } => Interval::Monthly,
        }
    }

    pub fn time(&self) -> NaiveTime {
        match self {
            Self::Daily { time, .. } | Self::Weekly { time, .. } | Self::Monthly { time, .. } => {
                *time
            }
        }
    }

    /// Whether `date` is a day this rule fires on.
    pub fn fires_on(&self, date: NaiveDate) -> bool {
        match self {
            Self::Daily { start_date, .. } => date >= *start_date,
            Self::Weekly { weekday, .. } => date.weekday() == *weekday,
            Self::Monthly { week, weekday, .. } => {
                week.resolve(date.year(), date.month(), *weekday) == Some(date)
            }
        }
    }
}

fn parse_weekday(raw: &str) -> Result<Weekday, InvalidRuleError> {
    let n: u8 = raw
        .parse()
        .map_err(|_| InvalidRuleError::InvalidWeekday(raw.to_string()))?;
    match n {
        0 => Ok(Weekday::Sun),
        1 => Ok(Weekday::Mon),
        2 => Ok(Weekday::Tue),
        3 => Ok(Weekday::Wed),
        4 => Ok(Weekday::Thu),
        5 => Ok(Weekday::Fri),
        6 => Ok(Weekday::Sat),
        _ => Err(InvalidRuleError::InvalidWeekday(raw.to_string())),
    }
}

fn parse_time(raw: &str) -> Result<NaiveTime, InvalidRuleError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| InvalidRuleError::InvalidTime(raw.to_string()))
}

fn parse_date(raw: &str) -> Result<NaiveDate, InvalidRuleError> {
    // Stored rows sometimes carry a full timestamp; only the date part matters.
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| InvalidRuleError::InvalidStartDate(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(interval: &str) -> RawRecurrence {
        RawRecurrence {
            repeat_interval: Some(interval.into()),
            recurrence_time: Some("19:00".into()),
            ..Default::default()
        }
    }

    #[test]
    fn monthly_requires_weekday_and_week() {
        let mut r = raw("monthly");
        r.recurrence_weekday = Some("5".into());
        let err = RecurrenceRule::from_raw(&r).unwrap_err();
        assert_eq!(err.field(), "recurrence_week_of_month");

        r.recurrence_week_of_month = Some("5".into());
        let rule = RecurrenceRule::from_raw(&r).unwrap();
        assert_eq!(
            rule,
            RecurrenceRule::Monthly {
                week: WeekOfMonth::Last,
                weekday: Weekday::Fri,
                time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            }
        );
    }

    #[test]
    fn daily_requires_start_date() {
        let err = RecurrenceRule::from_raw(&raw("daily")).unwrap_err();
        assert!(matches!(
            err,
            InvalidRuleError::MissingField {
                interval: Interval::Daily,
                field: "recurrence_start_date"
            }
        ));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut r = raw("weekly");
        r.recurrence_weekday = Some("7".into());
        assert!(matches!(
            RecurrenceRule::from_raw(&r),
            Err(InvalidRuleError::InvalidWeekday(_))
        ));

        let mut r = raw("weekly");
        r.recurrence_weekday = Some("2".into());
        r.recurrence_time = Some("25:00".into());
        assert!(matches!(
            RecurrenceRule::from_raw(&r),
            Err(InvalidRuleError::InvalidTime(_))
        ));

        assert!(matches!(
            RecurrenceRule::from_raw(&raw("yearly")),
            Err(InvalidRuleError::UnknownInterval(_))
        ));
        assert_eq!(
            RecurrenceRule::from_raw(&RawRecurrence::default()),
            Err(InvalidRuleError::MissingInterval)
        );
    }

    #[test]
    fn canonical_raw_form_drops_unused_fields() {
        let mut r = raw("weekly");
        r.recurrence_weekday = Some("3".into());
        r.recurrence_week_of_month = Some("2".into());
        r.recurrence_time = Some("07:30:00".into());
        let rule = RecurrenceRule::from_raw(&r).unwrap();
        let canonical = rule.to_raw();
        assert_eq!(canonical.recurrence_week_of_month, None);
        assert_eq!(canonical.recurrence_time.as_deref(), Some("07:30"));
        assert_eq!(RecurrenceRule::from_raw(&canonical).unwrap(), rule);
    }

    #[test]
    fn last_weekday_counts_back_from_month_end() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        // February 2024 has 29 days ending on a Thursday.
        assert_eq!(WeekOfMonth::Last.resolve(2024, 2, Weekday::Fri), Some(d(2024, 2, 23)));
        assert_eq!(WeekOfMonth::Last.resolve(2024, 2, Weekday::Thu), Some(d(2024, 2, 29)));
        // March 2024 has five Fridays.
        assert_eq!(WeekOfMonth::Last.resolve(2024, 3, Weekday::Fri), Some(d(2024, 3, 29)));
        assert_eq!(WeekOfMonth::Last.resolve(2024, 12, Weekday::Tue), Some(d(2024, 12, 31)));
        assert_eq!(WeekOfMonth::Fourth.resolve(2024, 3, Weekday::Fri), Some(d(2024, 3, 22)));
    }

    #[test]
    fn last_weekday_in_thirty_one_and_twenty_eight_day_months() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        assert_eq!(WeekOfMonth::Last.resolve(2023, 1, Weekday::Fri), Some(d(2023, 1, 27)));
        assert_eq!(WeekOfMonth::Last.resolve(2023, 1, Weekday::Tue), Some(d(2023, 1, 31)));
        // February 2023 has exactly four weeks, Wednesday 1st to Tuesday 28th.
        assert_eq!(WeekOfMonth::Last.resolve(2023, 2, Weekday::Fri), Some(d(2023, 2, 24)));
        assert_eq!(WeekOfMonth::Last.resolve(2023, 2, Weekday::Tue), Some(d(2023, 2, 28)));
        assert_eq!(
            WeekOfMonth::Last.resolve(2023, 2, Weekday::Wed),
            WeekOfMonth::Fourth.resolve(2023, 2, Weekday::Wed)
        );
    }
}
