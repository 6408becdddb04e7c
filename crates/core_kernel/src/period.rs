//! Compliance-period calendar
//!
//! A compliance period is a calendar year observed in the regulator's
//! timezone (America/Vancouver). Balance snapshots are taken at the start of
//! the period and at the compliance deadline, March 31 of the following year.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::America::Vancouver;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Earliest compliance period the portal has ever accepted
pub const FIRST_PERIOD: i32 = 2010;
/// Latest representable compliance period
pub const LAST_PERIOD: i32 = 2999;

/// Errors related to compliance periods
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeriodError {
    #[error("Compliance period {0} is outside {FIRST_PERIOD}..={LAST_PERIOD}")]
    OutOfRange(i32),
}

/// A compliance year
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct CompliancePeriod {
    year: i32,
}

impl CompliancePeriod {
    /// Creates a compliance period for the given calendar year
    pub fn new(year: i32) -> Result<Self, PeriodError> {
        if !(FIRST_PERIOD..=LAST_PERIOD).contains(&year) {
            return Err(PeriodError::OutOfRange(year));
        }
        Ok(Self { year })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// The compliance period that precedes this one, if representable
    pub fn previous(&self) -> Option<Self> {
        Self::new(self.year - 1).ok()
    }

    /// True when this period is the given year or later
    pub fn is_at_least(&self, year: i32) -> bool {
        self.year >= year
    }

    /// January 1, 00:00 local time
    pub fn start(&self) -> DateTime<Utc> {
        local_instant(self.year, 1, 1, 0, 0, 0, 0)
    }

    /// December 31, 23:59:59.999999999 local time
    pub fn end(&self) -> DateTime<Utc> {
        local_instant(self.year, 12, 31, 23, 59, 59, 999_999_999)
    }

    /// End of day March 31 of the following year
    ///
    /// Balances "at end of compliance date" are read as of this instant.
    pub fn compliance_deadline(&self) -> DateTime<Utc> {
        local_instant(self.year + 1, 3, 31, 23, 59, 59, 999_999_999)
    }

    /// True when the instant falls inside the calendar year
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start() && instant <= self.end()
    }

    /// The regulator's timezone
    pub fn timezone() -> Tz {
        Vancouver
    }
}

/// Resolves a wall-clock instant in the regulator's timezone to UTC
///
/// The instants used here (midnight, end of day) never fall inside a DST gap
/// for Vancouver, so the earliest mapping is always present. A date that
/// cannot be built collapses to the minimum instant.
fn local_instant(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32, nano: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_nano_opt(hour, min, sec, nano))
        .and_then(|naive| Vancouver.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl TryFrom<i32> for CompliancePeriod {
    type Error = PeriodError;

    fn try_from(year: i32) -> Result<Self, Self::Error> {
        Self::new(year)
    }
}

impl From<CompliancePeriod> for i32 {
    fn from(period: CompliancePeriod) -> i32 {
        period.year
    }
}

impl fmt::Display for CompliancePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_bounds_follow_vancouver_time() {
        let period = CompliancePeriod::new(2024).unwrap();
        // PST is UTC-8 in January
        assert_eq!(period.start(), Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap());
        // PDT is UTC-7 at the end of March
        let deadline = period.compliance_deadline();
        assert_eq!(deadline.date_naive(), NaiveDate::from_ymd_opt(2025, 4, 1).unwrap());
    }

    #[test]
    fn test_rejects_out_of_range_year() {
        assert_eq!(CompliancePeriod::new(1999), Err(PeriodError::OutOfRange(1999)));
    }

    #[test]
    fn test_serializes_as_year() {
        let period = CompliancePeriod::new(2025).unwrap();
        assert_eq!(serde_json::to_string(&period).unwrap(), "2025");
        let parsed: CompliancePeriod = serde_json::from_str("2023").unwrap();
        assert_eq!(parsed.year(), 2023);
        assert!(serde_json::from_str::<CompliancePeriod>("12").is_err());
    }
}
