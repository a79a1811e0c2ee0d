// SPDX-License-Identifier: MIT

//! Simulated time
//!
//! Simulation time is a UTC timestamp. Document quantities (delays,
//! `within` windows, ages) carry a [`TimeUnit`]. Whole years and months are
//! applied on the calendar; everything else is a fixed-length span.

use chrono::{DateTime, Datelike, Duration, Months, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A point in simulated time
pub type Time = DateTime<Utc>;

const SECONDS_PER_DAY: f64 = 86_400.0;
const DAYS_PER_YEAR: f64 = 365.2425;

/// Units accepted by document quantities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Years,
    Months,
    Weeks,
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl TimeUnit {
    /// Length of one unit in seconds (calendar units are averaged)
    pub fn seconds(self) -> f64 {
        match self {
            TimeUnit::Years => DAYS_PER_YEAR * SECONDS_PER_DAY,
            TimeUnit::Months => DAYS_PER_YEAR * SECONDS_PER_DAY / 12.0,
            TimeUnit::Weeks => 7.0 * SECONDS_PER_DAY,
            TimeUnit::Days => SECONDS_PER_DAY,
            TimeUnit::Hours => 3_600.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Seconds => 1.0,
        }
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "years" | "year" => Ok(TimeUnit::Years),
            "months" | "month" => Ok(TimeUnit::Months),
            "weeks" | "week" => Ok(TimeUnit::Weeks),
            "days" | "day" => Ok(TimeUnit::Days),
            "hours" | "hour" => Ok(TimeUnit::Hours),
            "minutes" | "minute" => Ok(TimeUnit::Minutes),
            "seconds" | "second" => Ok(TimeUnit::Seconds),
            other => Err(format!("unknown time unit '{}'", other)),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeUnit::Years => "years",
            TimeUnit::Months => "months",
            TimeUnit::Weeks => "weeks",
            TimeUnit::Days => "days",
            TimeUnit::Hours => "hours",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Seconds => "seconds",
        };
        f.write_str(s)
    }
}

/// Shift `time` forward by `quantity` units (negative quantities go back).
///
/// `None` when the result falls outside the range chrono can represent or
/// the quantity is not finite.
pub fn shift(time: Time, quantity: f64, unit: TimeUnit) -> Option<Time> {
    if !quantity.is_finite() {
        return None;
    }
    match unit {
        TimeUnit::Years | TimeUnit::Months if quantity.fract() == 0.0 => {
            let months = match unit {
                TimeUnit::Years => quantity.abs() * 12.0,
                _ => quantity.abs(),
            };
            if months > f64::from(u32::MAX) {
                return None;
            }
            let months = Months::new(months as u32);
            if quantity >= 0.0 {
                time.checked_add_months(months)
            } else {
                time.checked_sub_months(months)
            }
        }
        _ => {
            let millis = (quantity * unit.seconds() * 1_000.0).round();
            if millis.abs() >= i64::MAX as f64 {
                return None;
            }
            time.checked_add_signed(Duration::try_milliseconds(millis as i64)?)
        }
    }
}

/// Whole calendar years from `from` to `to` (zero if `to` is earlier)
pub fn years_between(from: Time, to: Time) -> i64 {
    months_between(from, to) / 12
}

/// Whole calendar months from `from` to `to` (zero if `to` is earlier)
pub fn months_between(from: Time, to: Time) -> i64 {
    if to <= from {
        return 0;
    }
    let mut months =
        (to.year() as i64 - from.year() as i64) * 12 + (to.month() as i64 - from.month() as i64);
    let to_rest = (to.day(), to.num_seconds_from_midnight(), to.nanosecond());
    let from_rest = (from.day(), from.num_seconds_from_midnight(), from.nanosecond());
    if to_rest < from_rest {
        months -= 1;
    }
    months.max(0)
}

/// Elapsed time between two instants expressed in `unit` (may be fractional)
pub fn elapsed(from: Time, to: Time, unit: TimeUnit) -> f64 {
    match unit {
        TimeUnit::Years => years_between(from, to) as f64,
        TimeUnit::Months => months_between(from, to) as f64,
        _ => (to - from).num_milliseconds() as f64 / 1_000.0 / unit.seconds(),
    }
}
