//! When the scheduler fires: a fixed interval or a cron expression

use crate::config::ScheduleConfig;
use crate::ConfigError;
use chrono::{DateTime, Utc};
use croner::Cron;
use std::fmt;
use std::time::Duration;

/// A standard five-field cron expression evaluated in UTC
///
/// Fields are `minute hour day-of-month month day-of-week`, with the usual
/// `*`, ranges, lists, steps and month/day names. Day-of-week runs 0-7 with
/// both 0 and 7 meaning Sunday. When both day fields are restricted, a day
/// matches if either does.
#[derive(Clone)]
pub struct CronSchedule {
    expr: String,
    cron: Cron,
}

impl CronSchedule {
    /// Parses a cron expression
    ///
    /// # Examples
    ///
    /// ```
    /// use catalog_crawler::schedule::CronSchedule;
    ///
    /// assert!(CronSchedule::parse("*/10 * * * *").is_ok());
    /// assert!(CronSchedule::parse("0 3 * * 1-5").is_ok());
    /// assert!(CronSchedule::parse("60 * * * *").is_err());
    /// ```
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidCron {
            expr: expr.to_string(),
            reason,
        };

        let fields = expr.split_whitespace().count();
        if fields != 5 {
            return Err(invalid(format!("expected 5 fields, got {}", fields)));
        }

        let cron = Cron::new(expr)
            .parse()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            expr: expr.to_string(),
            cron,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// First fire time strictly after `after`, at minute resolution
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.cron.find_next_occurrence(&after, false) {
            Ok(next) => Some(next),
            Err(e) => {
                tracing::debug!("No fire time for '{}' after {}: {}", self.expr, after, e);
                None
            }
        }
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.expr).finish()
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

impl Eq for CronSchedule {}

/// What makes the scheduler fire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Interval(Duration),
    Cron(CronSchedule),
}

impl Trigger {
    pub fn from_config(config: &ScheduleConfig) -> Result<Self, ConfigError> {
        match (&config.interval_secs, &config.cron) {
            (Some(secs), None) => Ok(Self::Interval(Duration::from_secs(*secs))),
            (None, Some(expr)) => Ok(Self::Cron(CronSchedule::parse(expr)?)),
            _ => Err(ConfigError::Validation(
                "schedule requires exactly one of interval-secs or cron".to_string(),
            )),
        }
    }

    /// How long to wait from `now` until the next fire
    pub fn next_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Self::Interval(interval) => Some(*interval),
            Self::Cron(cron) => {
                let next = cron.next_after(now)?;
                (next - now).to_std().ok()
            }
        }
    }
}
