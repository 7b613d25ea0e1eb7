use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// On-disk format of expiration timestamps (local time, no zone)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// On-disk marker for records that never expire
pub const PERMANENT: &str = "permanent";

/// Latest expiry that still formats as a four-digit year
fn latest_expiry() -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(9999, 12, 31).and_then(|date| date.and_hms_opt(23, 59, 59))
}

/// How long a UID stays in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Permanent,
    ExpiresAt(NaiveDateTime),
}

impl Policy {
    /// Parses a stored value. Returns `None` for anything that is neither the
    /// permanent marker nor a `YYYY-MM-DD HH:MM:SS` timestamp.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == PERMANENT {
            return Some(Policy::Permanent);
        }
        NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
            .ok()
            .map(Policy::ExpiresAt)
    }

    /// Expiry is inclusive: a record due exactly at `now` is expired.
    pub fn is_expired_at(&self, now: NaiveDateTime) -> bool {
        match self {
            Policy::Permanent => false,
            Policy::ExpiresAt(at) => *at <= now,
        }
    }

    pub fn expires_at(&self) -> Option<NaiveDateTime> {
        match self {
            Policy::Permanent => None,
            Policy::ExpiresAt(at) => Some(*at),
        }
    }

    /// The value written to the store file
    pub fn to_stored(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Permanent => f.write_str(PERMANENT),
            Policy::ExpiresAt(at) => write!(f, "{}", at.format(TIMESTAMP_FORMAT)),
        }
    }
}

/// Unit accepted for temporary lifetimes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    /// Counted as 30 days
    Months,
    /// Counted as 365 days
    Years,
}

impl TimeUnit {
    /// Converts `value` units into a duration, `None` on overflow
    pub fn duration(self, value: i64) -> Option<Duration> {
        let seconds_per_unit: i64 = match self {
            TimeUnit::Seconds => 1,
            TimeUnit::Minutes => 60,
            TimeUnit::Hours => 3_600,
            TimeUnit::Days => 86_400,
            TimeUnit::Months => 30 * 86_400,
            TimeUnit::Years => 365 * 86_400,
        };
        value
            .checked_mul(seconds_per_unit)
            .and_then(Duration::try_seconds)
    }
}

impl FromStr for TimeUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "seconds" => Ok(TimeUnit::Seconds),
            "minutes" => Ok(TimeUnit::Minutes),
            "hours" => Ok(TimeUnit::Hours),
            "days" => Ok(TimeUnit::Days),
            "months" => Ok(TimeUnit::Months),
            "years" => Ok(TimeUnit::Years),
            other => Err(Error::InvalidPolicy(format!("unknown time unit {other:?}"))),
        }
    }
}

/// Requested lifetime of a new record, before it is pinned to a clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    Permanent,
    Temporary { value: i64, unit: TimeUnit },
}

impl Lifetime {
    /// Pins the lifetime to an absolute policy relative to `now`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPolicy` for non-positive values or an expiry
    /// after `9999-12-31 23:59:59`.
    pub fn resolve(self, now: NaiveDateTime) -> Result<Policy> {
        match self {
            Lifetime::Permanent => Ok(Policy::Permanent),
            Lifetime::Temporary { value, unit } => {
                if value <= 0 {
                    return Err(Error::InvalidPolicy(format!(
                        "time value must be positive, got {value}"
                    )));
                }
                unit.duration(value)
                    .and_then(|delta| now.checked_add_signed(delta))
                    .filter(|at| latest_expiry().is_some_and(|latest| *at <= latest))
                    .map(Policy::ExpiresAt)
                    .ok_or_else(|| Error::InvalidPolicy(format!("{value} {unit:?} is out of range")))
            }
        }
    }
}

/// A UID together with its parsed policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub uid: String,
    pub policy: Policy,
}

/// Answer to "how long does this UID have left"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Permanent,
    Expires {
        expires_at: NaiveDateTime,
        remaining: Duration,
    },
}

/// A positive duration split the way the HTTP API reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainingParts {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl From<Duration> for RemainingParts {
    fn from(remaining: Duration) -> Self {
        let total = remaining.num_seconds().max(0);
        let within_day = total % 86_400;
        Self {
            days: total / 86_400,
            hours: within_day / 3_600,
            minutes: (within_day % 3_600) / 60,
            seconds: within_day % 60,
        }
    }
}
