use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// When the scheduler polls the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollSchedule {
    /// Fixed rate, measured from the previous fire time.
    Interval(Duration),
    /// Cron expression with seconds (6 or 7 fields), evaluated in UTC.
    Cron(CronSchedule),
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self::Interval(DEFAULT_POLL_INTERVAL)
    }
}

impl PollSchedule {
    /// Parses a cron expression such as `0 */5 * * * *`.
    ///
    /// # Errors
    ///
    /// Returns the parser error for an invalid expression.
    pub fn cron(expression: &str) -> Result<Self, cron::error::Error> {
        let schedule = cron::Schedule::from_str(expression.trim())?;
        Ok(Self::Cron(CronSchedule {
            expression: expression.trim().to_owned(),
            schedule,
        }))
    }

    /// Delay from `now` until the next fire time.
    ///
    /// `None` if the schedule never fires again.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Self::Interval(interval) => Some(*interval),
            Self::Cron(cron) => {
                let next = cron.schedule.after(&now).next()?;
                Some((next - now).to_std().unwrap_or(Duration::ZERO))
            }
        }
    }
}

impl fmt::Display for PollSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval(interval) => write!(f, "every {}s", interval.as_secs()),
            Self::Cron(cron) => write!(f, "cron '{}'", cron.expression),
        }
    }
}

/// A parsed cron expression.
#[derive(Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    /// The expression as configured.
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for CronSchedule {}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.expression).finish()
    }
}
