//! Clock & Calendar (C1)
//!
//! Simulated time advances in integer days from a configured start date.
//! Working days exclude Saturday/Sunday. Injection and decision visits are
//! pushed forward to the next working day when a computed due date lands
//! on a weekend; monitoring and mortality events are exempt.

use chrono::{Datelike, Days, NaiveDate, Weekday};

/// Simulated calendar anchored to a start date.
#[derive(Debug, Clone, Copy)]
pub struct Calendar {
    start_date: NaiveDate,
    duration_days: i64,
}

impl Calendar {
    pub fn new(start_date: NaiveDate, duration_years: f64) -> Self {
        let duration_days = (duration_years * 365.25).round() as i64;
        Self {
            start_date,
            duration_days,
        }
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn duration_days(&self) -> i64 {
        self.duration_days
    }

    pub fn end_date(&self) -> NaiveDate {
        self.start_date + Days::new(self.duration_days.max(0) as u64)
    }

    /// Integer days from the simulation start to `date`. Never stored as a
    /// float; this is the sole source of truth for `Visit::time_days`.
    pub fn time_days(&self, date: NaiveDate) -> i64 {
        (date - self.start_date).num_days()
    }

    /// The start date itself is always in scope, even for a zero-length
    /// horizon, so the day-0 `initial_assessment` visit always executes.
    /// Every later date is in scope only while strictly inside the
    /// configured duration.
    pub fn has_elapsed(&self, date: NaiveDate) -> bool {
        if date <= self.start_date {
            return false;
        }
        self.time_days(date) >= self.duration_days
    }
}

/// Working-day predicate: Saturday/Sunday are excluded.
pub fn is_working_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Round a computed due-date forward to the next working day. This is the
/// only locally-recovered condition in the error-handling design: it is
/// deterministic and never silently substitutes a different value for
/// anything else.
pub fn next_working_day(date: NaiveDate) -> NaiveDate {
    let mut d = date;
    while !is_working_day(d) {
        d += Days::new(1);
    }
    d
}

/// Add `days` calendar days and round forward to the next working day.
pub fn add_days_working(date: NaiveDate, days: i64) -> NaiveDate {
    let raw = add_days(date, days);
    next_working_day(raw)
}

/// Add (possibly negative) calendar days without any working-day rounding.
/// Used for monitoring/mortality events, which are permitted on any day.
pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    if days >= 0 {
        date + Days::new(days as u64)
    } else {
        date - Days::new((-days) as u64)
    }
}
