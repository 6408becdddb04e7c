//! Tests for core_kernel error types

use core_kernel::error::{CoreError, ErrorKind};
use core_kernel::money::MoneyError;
use core_kernel::period::PeriodError;
use core_kernel::PortError;

#[test]
fn test_core_error_validation() {
    let error = CoreError::validation("Invalid input");

    match error {
        CoreError::Validation(ref msg) => assert_eq!(msg, "Invalid input"),
        _ => panic!("Expected Validation error"),
    }
    assert_eq!(error.kind(), ErrorKind::Validation);
}

#[test]
fn test_core_error_invalid_state() {
    let error = CoreError::invalid_state("Cannot move from Draft to Assessed");

    assert!(matches!(error, CoreError::InvalidStateTransition(_)));
    assert_eq!(error.kind(), ErrorKind::InvalidState);
}

#[test]
fn test_core_error_forbidden() {
    let error = CoreError::forbidden("supplier may not assess");
    assert_eq!(error.kind(), ErrorKind::Forbidden);
    assert!(error.to_string().contains("Forbidden"));
}

#[test]
fn test_core_error_from_money_and_period_errors() {
    let from_money: CoreError = MoneyError::Overflow.into();
    assert!(matches!(from_money, CoreError::Money(_)));

    let from_period: CoreError = PeriodError::OutOfRange(1900).into();
    assert_eq!(from_period.kind(), ErrorKind::Validation);
}

#[test]
fn test_port_error_kinds() {
    assert_eq!(PortError::invalid_state("not reserved").kind(), ErrorKind::InvalidState);
    assert_eq!(PortError::conflict("version mismatch").kind(), ErrorKind::Conflict);
    assert_eq!(PortError::connection("refused").kind(), ErrorKind::Unavailable);
    assert_eq!(PortError::internal("boom").kind(), ErrorKind::Internal);
}

#[test]
fn test_error_kind_display() {
    assert_eq!(ErrorKind::InsufficientUnits.to_string(), "insufficient_units");
    assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
}
