//! Cron schedule parsing and evaluation.
//!
//! Supports the classic 5-field form (minute, hour, day-of-month, month,
//! day-of-week) with `*`, numbers, ranges, steps, and lists. Day-of-month
//! and day-of-week follow the usual cron rule: when both are restricted,
//! a time matches if either field matches.
//!
//! Evaluation is in UTC. A timezone can be recorded on the schedule but
//! does not shift evaluation.

use crate::error::ScheduleError;
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Evaluation horizon for `next_after`, in minutes (a bit over a year).
const SCAN_LIMIT_MINUTES: i64 = 366 * 24 * 60;

/// A cron schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSchedule {
    /// The cron expression.
    pub expression: String,
    /// Timezone label, recorded for display.
    pub timezone: Option<String>,
}

impl CronSchedule {
    /// Creates a new cron schedule.
    #[must_use]
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            timezone: None,
        }
    }

    /// Sets the timezone label.
    #[must_use]
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Validates the cron expression.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression is invalid.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        self.parse().map(|_| ())
    }

    /// Returns true if the schedule fires at the given minute.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression is invalid.
    pub fn matches(&self, at: DateTime<Utc>) -> Result<bool, ScheduleError> {
        Ok(self.parse()?.matches(at))
    }

    /// Returns the first fire time strictly after the given time.
    ///
    /// Returns `None` if the expression is invalid or nothing fires
    /// within roughly a year (e.g. `0 0 30 2 *`).
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let fields = self.parse().ok()?;

        // Truncate to the minute, then scan forward minute by minute.
        let start = Utc
            .with_ymd_and_hms(
                after.year(),
                after.month(),
                after.day(),
                after.hour(),
                after.minute(),
                0,
            )
            .single()?;

        for offset in 1..=SCAN_LIMIT_MINUTES {
            let candidate = start + Duration::minutes(offset);
            if fields.matches(candidate) {
                return Some(candidate);
            }
        }
        None
    }

    fn parse(&self) -> Result<CronFields, ScheduleError> {
        let invalid = |reason: String| ScheduleError::InvalidCronExpression {
            expression: self.expression.clone(),
            reason,
        };

        let parts: Vec<&str> = self.expression.split_whitespace().collect();
        let [minute, hour, day_of_month, month, day_of_week] = parts[..] else {
            return Err(invalid(format!("expected 5 fields, got {}", parts.len())));
        };

        Ok(CronFields {
            minutes: parse_field(minute, 0, 59).map_err(&invalid)?,
            hours: parse_field(hour, 0, 23).map_err(&invalid)?,
            days_of_month: parse_field(day_of_month, 1, 31).map_err(&invalid)?,
            months: parse_field(month, 1, 12).map_err(&invalid)?,
            days_of_week: parse_field(day_of_week, 0, 7).map_err(&invalid)?.map_sunday(),
            dom_restricted: day_of_month != "*",
            dow_restricted: day_of_week != "*",
        })
    }
}

/// One parsed cron field: the set of values it accepts.
#[derive(Debug, Clone)]
struct FieldValues(BTreeSet<u32>);

impl FieldValues {
    fn contains(&self, value: u32) -> bool {
        self.0.contains(&value)
    }

    /// Folds day-of-week 7 into 0 (both mean Sunday).
    fn map_sunday(mut self) -> Self {
        if self.0.remove(&7) {
            self.0.insert(0);
        }
        self
    }
}

#[derive(Debug, Clone)]
struct CronFields {
    minutes: FieldValues,
    hours: FieldValues,
    days_of_month: FieldValues,
    months: FieldValues,
    days_of_week: FieldValues,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronFields {
    fn matches(&self, at: DateTime<Utc>) -> bool {
        if !self.minutes.contains(at.minute())
            || !self.hours.contains(at.hour())
            || !self.months.contains(at.month())
        {
            return false;
        }

        let dom = self.days_of_month.contains(at.day());
        let dow = self
            .days_of_week
            .contains(at.weekday().num_days_from_sunday());

        match (self.dom_restricted, self.dow_restricted) {
            // Both restricted: either may match (classic cron OR rule)
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

/// Parses one cron field into its accepted values.
fn parse_field(spec: &str, min: u32, max: u32) -> Result<FieldValues, String> {
    let mut values = BTreeSet::new();

    for part in spec.split(',') {
        if part.is_empty() {
            return Err(format!("empty entry in field '{spec}'"));
        }

        let (base, step) = match part.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{step}' in '{part}'"))?;
                if step == 0 {
                    return Err(format!("step must be positive in '{part}'"));
                }
                (base, step)
            }
            None => (part, 1),
        };

        let (low, high) = if base == "*" {
            (min, max)
        } else if let Some((low, high)) = base.split_once('-') {
            let low: u32 = low
                .parse()
                .map_err(|_| format!("invalid number '{low}' in '{part}'"))?;
            let high: u32 = high
                .parse()
                .map_err(|_| format!("invalid number '{high}' in '{part}'"))?;
            if low > high {
                return Err(format!("descending range '{part}'"));
            }
            (low, high)
        } else {
            let value: u32 = base
                .parse()
                .map_err(|_| format!("invalid number '{base}' in '{part}'"))?;
            (value, value)
        };

        if low < min || high > max {
            return Err(format!(
                "value out of range in '{part}' (allowed {min}-{max})"
            ));
        }

        values.extend((low..=high).step_by(step as usize));
    }

    Ok(FieldValues(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn validates_field_count() {
        assert!(CronSchedule::new("0 7 * * *").validate().is_ok());
        assert!(CronSchedule::new("0 7 * *").validate().is_err());
        assert!(CronSchedule::new("not a cron").validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(CronSchedule::new("60 * * * *").validate().is_err());
        assert!(CronSchedule::new("* 24 * * *").validate().is_err());
        assert!(CronSchedule::new("* * 0 * *").validate().is_err());
        assert!(CronSchedule::new("* * * 13 *").validate().is_err());
        assert!(CronSchedule::new("* * * * 8").validate().is_err());
    }

    #[test]
    fn rejects_malformed_steps_and_ranges() {
        assert!(CronSchedule::new("*/0 * * * *").validate().is_err());
        assert!(CronSchedule::new("10-5 * * * *").validate().is_err());
        assert!(CronSchedule::new("1,,2 * * * *").validate().is_err());
    }

    #[test]
    fn every_minute_matches_always() {
        let schedule = CronSchedule::new("* * * * *");
        assert!(schedule.matches(at(2026, 8, 23, 12, 34)).unwrap());
    }

    #[test]
    fn daily_at_seven() {
        let schedule = CronSchedule::new("0 7 * * *");
        assert!(schedule.matches(at(2026, 8, 23, 7, 0)).unwrap());
        assert!(!schedule.matches(at(2026, 8, 23, 7, 1)).unwrap());
        assert!(!schedule.matches(at(2026, 8, 23, 8, 0)).unwrap());

        let next = schedule.next_after(at(2026, 8, 23, 7, 0)).unwrap();
        assert_eq!(next, at(2026, 8, 24, 7, 0));
    }

    #[test]
    fn steps_and_lists() {
        let schedule = CronSchedule::new("*/15 9-17 * * 1,3,5");
        // 2026-08-24 is a Monday
        assert!(schedule.matches(at(2026, 8, 24, 9, 0)).unwrap());
        assert!(schedule.matches(at(2026, 8, 24, 17, 45)).unwrap());
        assert!(!schedule.matches(at(2026, 8, 24, 9, 10)).unwrap());
        assert!(!schedule.matches(at(2026, 8, 24, 18, 0)).unwrap());
        // 2026-08-23 is a Sunday
        assert!(!schedule.matches(at(2026, 8, 23, 9, 0)).unwrap());
    }

    #[test]
    fn sunday_as_seven() {
        let schedule = CronSchedule::new("0 12 * * 7");
        // 2026-08-23 is a Sunday
        assert!(schedule.matches(at(2026, 8, 23, 12, 0)).unwrap());
        assert!(!schedule.matches(at(2026, 8, 24, 12, 0)).unwrap());
    }

    #[test]
    fn dom_and_dow_combine_with_or() {
        // The 15th, or any Friday
        let schedule = CronSchedule::new("0 0 15 * 5");
        // 2026-08-15 is a Saturday: matches via day-of-month
        assert!(schedule.matches(at(2026, 8, 15, 0, 0)).unwrap());
        // 2026-08-21 is a Friday: matches via day-of-week
        assert!(schedule.matches(at(2026, 8, 21, 0, 0)).unwrap());
        // 2026-08-20 is a Thursday, not the 15th
        assert!(!schedule.matches(at(2026, 8, 20, 0, 0)).unwrap());
    }

    #[test]
    fn next_after_is_strictly_after() {
        let schedule = CronSchedule::new("* * * * *");
        let now = at(2026, 8, 23, 12, 0);
        assert_eq!(schedule.next_after(now), Some(at(2026, 8, 23, 12, 1)));
    }

    #[test]
    fn next_after_none_for_impossible_date() {
        // February 30th never exists
        let schedule = CronSchedule::new("0 0 30 2 *");
        assert_eq!(schedule.next_after(at(2026, 1, 1, 0, 0)), None);
    }

    #[test]
    fn next_after_none_for_invalid_expression() {
        let schedule = CronSchedule::new("bogus");
        assert_eq!(schedule.next_after(Utc::now()), None);
    }

    #[test]
    fn schedule_serde_roundtrip() {
        let schedule = CronSchedule::new("0 7 * * 1-5").with_timezone("America/New_York");
        let json = serde_json::to_string(&schedule).expect("serialize");
        let parsed: CronSchedule = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(schedule, parsed);
    }
}
