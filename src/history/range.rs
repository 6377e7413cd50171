//! Calendar ranges in local time.

use std::fmt;

use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeKind {
    Day,
    Week,
    Month,
    Year,
}

/// Construct through [`Range::containing`] to keep fields valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Range {
    Hour { date: NaiveDate, hour: u32 },
    Day { date: NaiveDate },
    /// ISO week, `start` is its Monday.
    Week { start: NaiveDate },
    Month { year: i32, month: u32 },
    Year { year: i32 },
}

impl Range {
    pub fn containing(kind: RangeKind, date: NaiveDate) -> Self {
        match kind {
            RangeKind::Day => Range::Day { date },
            RangeKind::Week => Range::Week {
                start: date - Duration::days(i64::from(date.weekday().num_days_from_monday())),
            },
            RangeKind::Month => Range::Month {
                year: date.year(),
                month: date.month(),
            },
            RangeKind::Year => Range::Year { year: date.year() },
        }
    }

    pub fn today(kind: RangeKind) -> Self {
        Self::containing(kind, Local::now().date_naive())
    }

    fn start(&self) -> NaiveDateTime {
        match *self {
            Range::Hour { date, hour } => {
                date.and_time(NaiveTime::MIN) + Duration::hours(i64::from(hour))
            }
            Range::Day { date } => date.and_time(NaiveTime::MIN),
            Range::Week { start } => start.and_time(NaiveTime::MIN),
            Range::Month { year, month } => first_of_month(year, month).and_time(NaiveTime::MIN),
            Range::Year { year } => first_of_month(year, 1).and_time(NaiveTime::MIN),
        }
    }

    /// The range immediately after this one.
    pub fn next(&self) -> Self {
        self.shift(1)
    }

    pub fn previous(&self) -> Self {
        self.shift(-1)
    }

    fn shift(&self, steps: i32) -> Self {
        match *self {
            Range::Hour { date, hour } => {
                let start = date.and_time(NaiveTime::MIN)
                    + Duration::hours(i64::from(hour) + i64::from(steps));
                Range::Hour {
                    date: start.date(),
                    hour: start.hour(),
                }
            }
            Range::Day { date } => Range::Day {
                date: date + Duration::days(i64::from(steps)),
            },
            Range::Week { start } => Range::Week {
                start: start + Duration::weeks(i64::from(steps)),
            },
            Range::Month { year, month } => {
                let index = year * 12 + month as i32 - 1 + steps;
                Range::Month {
                    year: index.div_euclid(12),
                    month: index.rem_euclid(12) as u32 + 1,
                }
            }
            Range::Year { year } => Range::Year { year: year + steps },
        }
    }

    /// Inclusive `(start_ms, end_ms)` in epoch milliseconds.
    pub fn bounds(&self) -> (i64, i64) {
        (local_ms(self.start()), local_ms(self.next().start()) - 1)
    }

    pub fn contains(&self, timestamp_ms: i64) -> bool {
        let (start, end) = self.bounds();
        (start..=end).contains(&timestamp_ms)
    }

    /// Finer ranges covering this one: hours of a day, days of a week or
    /// month, months of a year. Empty for an hour.
    pub fn subsections(&self) -> Vec<Range> {
        match *self {
            Range::Hour { .. } => Vec::new(),
            Range::Day { date } => (0..24).map(|hour| Range::Hour { date, hour }).collect(),
            Range::Week { start } => (0..7)
                .map(|offset| Range::Day {
                    date: start + Duration::days(offset),
                })
                .collect(),
            Range::Month { year, month } => {
                let first = first_of_month(year, month);
                let mut days = Vec::with_capacity(31);
                let mut date = first;
                while date.month() == first.month() && date.year() == first.year() {
                    days.push(Range::Day { date });
                    date += Duration::days(1);
                }
                days
            }
            Range::Year { year } => (1..=12).map(|month| Range::Month { year, month }).collect(),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Range::Hour { date, hour } => write!(f, "{} {:02}:00", date, hour),
            Range::Day { date } => write!(f, "{}", date),
            Range::Week { start } => {
                let week = start.iso_week();
                write!(f, "{}-W{:02}", week.year(), week.week())
            }
            Range::Month { year, month } => write!(f, "{}-{:02}", year, month),
            Range::Year { year } => write!(f, "{}", year),
        }
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_default()
}

/// Local wall time to epoch ms. Times skipped by a DST jump resolve to the
/// first instant after the gap.
fn local_ms(naive: NaiveDateTime) -> i64 {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| Local.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(|| naive.and_utc().timestamp_millis())
}
