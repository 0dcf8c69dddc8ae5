use std::{fmt, str::FromStr};

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};

const HOUR: i64 = 60 * 60;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;
// 1970-01-05, the first Monday after the epoch.
const FIRST_MONDAY: i64 = 4 * DAY;

/// Cron-style presets. Boundaries are in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Once,
    Hourly,
    Daily,
    /// Mondays at 00:00.
    Weekly,
}

impl Schedule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Schedule::Once => "@once",
            Schedule::Hourly => "@hourly",
            Schedule::Daily => "@daily",
            Schedule::Weekly => "@weekly",
        }
    }

    /// Next boundary strictly after `t`. `None` for `@once`.
    pub fn next_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let (period, origin) = match self {
            Schedule::Once => return None,
            Schedule::Hourly => (HOUR, 0),
            Schedule::Daily => (DAY, 0),
            Schedule::Weekly => (WEEK, FIRST_MONDAY),
        };

        let secs = t.timestamp();
        let next = ((secs - origin).div_euclid(period) + 1) * period + origin;
        DateTime::from_timestamp(next, 0)
    }

    /// When the first run should fire, given the current time and an optional
    /// start date. Intervals already in the past are skipped.
    pub fn first_fire(
        &self,
        now: DateTime<Utc>,
        start_date: Option<NaiveDate>,
    ) -> Option<DateTime<Utc>> {
        let start = start_date
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc())
            .filter(|s| *s > now);

        match (self, start) {
            (Schedule::Once, Some(s)) => Some(s),
            (Schedule::Once, None) => Some(now),
            (_, Some(s)) => self.next_after(s - TimeDelta::seconds(1)),
            (_, None) => self.next_after(now),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Schedule {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "@once" => Ok(Schedule::Once),
            "@hourly" => Ok(Schedule::Hourly),
            "@daily" | "@midnight" => Ok(Schedule::Daily),
            "@weekly" => Ok(Schedule::Weekly),
            _ => Err(anyhow!(
                "Unknown schedule '{value}'. Supported schedules: @once, @hourly, @daily, @weekly."
            )),
        }
    }
}
