//! Recurring time boundaries and clocks used by expiring caches.
//!
//! An expiring cell keeps its cached value until the clock crosses the next
//! boundary of its [`Period`] after the value was computed; a `Day` cell
//! computed at 15:00 stays fresh until midnight.

use std::fmt;
use std::sync::Mutex;

use chrono::{Datelike, Days, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

/// A recurring boundary after which cached values go stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    /// Every midnight.
    Day,
    /// Every midnight that starts a Monday to Friday.
    BusinessDay,
    /// Every Monday midnight.
    Week,
    /// Midnight of the first day of each month.
    Month,
    /// Every `n` hours counted from midnight (the day boundary also counts).
    Hours(u32),
}

impl Period {
    /// The first boundary strictly after `t`.
    pub fn next_boundary(self, t: NaiveDateTime) -> NaiveDateTime {
        let date = t.date();
        match self {
            Period::Day => midnight(add_days(date, 1)),
            Period::BusinessDay => {
                let mut next = add_days(date, 1);
                while is_weekend(next) {
                    next = add_days(next, 1);
                }
                midnight(next)
            }
            Period::Week => {
                let days = 7 - date.weekday().num_days_from_monday() as u64;
                midnight(add_days(date, days))
            }
            Period::Month => {
                let (year, month) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
                    .map(midnight)
                    .unwrap_or(NaiveDateTime::MAX)
            }
            Period::Hours(n) => {
                let step = n.max(1);
                let next_hour = (t.hour() / step + 1) * step;
                let next_day = midnight(add_days(date, 1));
                if next_hour >= 24 {
                    next_day
                } else {
                    midnight(date) + Duration::hours(next_hour as i64)
                }
            }
        }
    }

    /// True once `now` has reached the boundary following `computed_at`.
    pub fn is_stale(self, computed_at: NaiveDateTime, now: NaiveDateTime) -> bool {
        now >= self.next_boundary(computed_at)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Day => write!(f, "day"),
            Period::BusinessDay => write!(f, "business_day"),
            Period::Week => write!(f, "week"),
            Period::Month => write!(f, "month"),
            Period::Hours(n) => write!(f, "{n}h"),
        }
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn add_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days))
        .unwrap_or(NaiveDate::MAX)
}

/// Source of the current time for cache expiry.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> NaiveDateTime;
}

/// Wall-clock local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        ManualClock {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = now.checked_add_signed(by).unwrap_or(NaiveDateTime::MAX);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
