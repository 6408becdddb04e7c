//! Unit tests for compliance-period boundaries

use chrono::{Duration, TimeZone, Utc};
use core_kernel::{CompliancePeriod, PeriodError};

#[test]
fn test_start_is_before_end_and_deadline() {
    let period = CompliancePeriod::new(2023).unwrap();
    assert!(period.start() < period.end());
    assert!(period.end() < period.compliance_deadline());
}

#[test]
fn test_end_is_just_before_next_start() {
    let period = CompliancePeriod::new(2023).unwrap();
    let next = CompliancePeriod::new(2024).unwrap();
    assert_eq!(period.end() + Duration::nanoseconds(1), next.start());
}

#[test]
fn test_deadline_is_end_of_march_local_time() {
    let period = CompliancePeriod::new(2024).unwrap();
    // 2025-03-31 23:59:59 PDT is 2025-04-01 06:59:59 UTC
    let expected = Utc.with_ymd_and_hms(2025, 4, 1, 6, 59, 59).unwrap();
    let deadline = period.compliance_deadline();
    assert_eq!(deadline.timestamp(), expected.timestamp());
}

#[test]
fn test_contains() {
    let period = CompliancePeriod::new(2024).unwrap();
    assert!(period.contains(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()));
    assert!(!period.contains(Utc.with_ymd_and_hms(2024, 1, 1, 7, 59, 59).unwrap()));
}

#[test]
fn test_previous_and_threshold() {
    let period = CompliancePeriod::new(2025).unwrap();
    assert_eq!(period.previous().map(|p| p.year()), Some(2024));
    assert!(period.is_at_least(2025));
    assert!(!period.is_at_least(2026));
    assert_eq!(CompliancePeriod::new(2010).unwrap().previous(), None);
}

#[test]
fn test_out_of_range() {
    assert_eq!(CompliancePeriod::new(3000), Err(PeriodError::OutOfRange(3000)));
}
