// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Provide minute-granularity modification timestamps and a swappable clock.
// Author: Lukas Bower

//! Modification timestamps.

use std::fmt;

use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};

/// Rendering used for `lastModified` in audit lines.
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M";

/// Wall-clock time truncated to the minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(NaiveDateTime);

impl Timestamp {
    /// Truncate `at` to minute granularity.
    pub fn truncate(at: NaiveDateTime) -> Self {
        let minute = at
            .date()
            .and_hms_opt(at.hour(), at.minute(), 0)
            .unwrap_or(at);
        Self(minute)
    }

    /// Build a timestamp from calendar fields, `None` if they are out of range.
    pub fn from_ymd_hm(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day)?
            .and_hms_opt(hour, minute, 0)
            .map(Self)
    }

    /// The underlying local date-time.
    pub fn as_naive(&self) -> NaiveDateTime {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

/// Time source for modification stamps.
pub trait Clock: Send + Sync {
    /// Current local time at minute granularity.
    fn now(&self) -> Timestamp;
}

/// Local system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::truncate(Local::now().naive_local())
    }
}

/// Clock frozen at a single instant, for deterministic tests and replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub Timestamp);

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_seconds() {
        let at = NaiveDate::from_ymd_opt(2024, 12, 31)
            .and_then(|d| d.and_hms_milli_opt(23, 59, 58, 750))
            .unwrap();
        let ts = Timestamp::truncate(at);
        assert_eq!(ts.to_string(), "2024/12/31 23:59");
        assert_eq!(ts.as_naive().second(), 0);
    }

    #[test]
    fn system_clock_has_no_seconds() {
        let now = SystemClock.now();
        assert_eq!(now.as_naive().second(), 0);
        assert_eq!(now.as_naive().nanosecond(), 0);
    }

    #[test]
    fn rejects_impossible_dates() {
        assert!(Timestamp::from_ymd_hm(2025, 2, 30, 0, 0).is_none());
    }
}
