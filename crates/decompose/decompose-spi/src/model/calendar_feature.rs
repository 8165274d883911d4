//! Calendar features.
//!
//! A calendar feature is a predicate over civil time under which certain
//! days share error statistics: "the 15th of the month", "last Friday of
//! the month" and so on. Matching is done on the civil day containing a
//! time point, after applying a fixed time-zone offset.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::time::TimePoint;

/// Weekday names indexed from Monday = 0, matching `chrono`.
const WEEKDAYS: [&str; 7] = [
    "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
];

/// A predicate over civil time identifying a recurring calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalendarFeature {
    /// The `day`-th day of the month, 1-based.
    DayOfMonth { day: u32 },
    /// `days` before the last day of the month; 0 is the last day.
    DaysBeforeEndOfMonth { days: u32 },
    /// The `week`-th (1-based) occurrence of `day_of_week` (Monday = 0).
    DayOfWeekOfMonth { day_of_week: u32, week: u32 },
    /// The `weeks`-th occurrence of `day_of_week` counting back from the
    /// end of the month; 0 is the last occurrence.
    DayOfWeekBeforeEndOfMonth { day_of_week: u32, weeks: u32 },
}

impl CalendarFeature {
    /// All features describing the civil day containing `time`.
    pub fn features_of(time: TimePoint, time_zone_offset: TimePoint) -> Vec<CalendarFeature> {
        match civil_day(time, time_zone_offset) {
            Some(day) => {
                let dom = day.date.day();
                let last = day.days_in_month;
                let dow = day.date.weekday().num_days_from_monday();
                vec![
                    CalendarFeature::DayOfMonth { day: dom },
                    CalendarFeature::DaysBeforeEndOfMonth { days: last - dom },
                    CalendarFeature::DayOfWeekOfMonth { day_of_week: dow, week: (dom - 1) / 7 + 1 },
                    CalendarFeature::DayOfWeekBeforeEndOfMonth {
                        day_of_week: dow,
                        weeks: (last - dom) / 7,
                    },
                ]
            }
            None => Vec::new(),
        }
    }

    /// Whether the civil day containing `time` matches this feature.
    pub fn matches(&self, time: TimePoint, time_zone_offset: TimePoint) -> bool {
        let Some(day) = civil_day(time, time_zone_offset) else {
            return false;
        };
        let dom = day.date.day();
        let last = day.days_in_month;
        let dow = day.date.weekday().num_days_from_monday();
        match *self {
            CalendarFeature::DayOfMonth { day } => dom == day,
            CalendarFeature::DaysBeforeEndOfMonth { days } => last - dom == days,
            CalendarFeature::DayOfWeekOfMonth { day_of_week, week } => {
                dow == day_of_week && (dom - 1) / 7 + 1 == week
            }
            CalendarFeature::DayOfWeekBeforeEndOfMonth { day_of_week, weeks } => {
                dow == day_of_week && (last - dom) / 7 == weeks
            }
        }
    }

    /// Length of the window over which the feature is active: one civil day.
    pub fn window(&self) -> TimePoint {
        super::time::DAY
    }
}

impl fmt::Display for CalendarFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CalendarFeature::DayOfMonth { day } => write!(f, "day {day} of month"),
            CalendarFeature::DaysBeforeEndOfMonth { days: 0 } => write!(f, "last day of month"),
            CalendarFeature::DaysBeforeEndOfMonth { days } => {
                write!(f, "{days} days before end of month")
            }
            CalendarFeature::DayOfWeekOfMonth { day_of_week, week } => {
                write!(f, "{} {} of month", ordinal(week), weekday(day_of_week))
            }
            CalendarFeature::DayOfWeekBeforeEndOfMonth { day_of_week, weeks: 0 } => {
                write!(f, "last {} of month", weekday(day_of_week))
            }
            CalendarFeature::DayOfWeekBeforeEndOfMonth { day_of_week, weeks } => {
                write!(f, "{} {} before end of month", ordinal(weeks), weekday(day_of_week))
            }
        }
    }
}

struct CivilDay {
    date: NaiveDate,
    days_in_month: u32,
}

fn civil_day(time: TimePoint, time_zone_offset: TimePoint) -> Option<CivilDay> {
    let date = DateTime::from_timestamp(time + time_zone_offset, 0)?.date_naive();
    let (next_year, next_month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    let days_in_month = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?.day();
    Some(CivilDay { date, days_in_month })
}

fn weekday(day_of_week: u32) -> &'static str {
    WEEKDAYS[day_of_week as usize % 7]
}

fn ordinal(n: u32) -> String {
    match n {
        1 => "1st".to_string(),
        2 => "2nd".to_string(),
        3 => "3rd".to_string(),
        n => format!("{n}th"),
    }
}
