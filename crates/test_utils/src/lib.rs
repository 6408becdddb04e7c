//! Test Utilities Crate
//!
//! Shared test infrastructure for the LCFS workspace.
//!
//! # Modules
//!
//! - `fixtures`: reference data, organizations, periods, callers and an in-memory workflow harness
//! - `builders`: builders for the five child record kinds, transfer terms, issuances and version chains
//! - `assertions`: ledger and effective-set invariant checks
//! - `generators`: proptest strategies

pub mod assertions;
pub mod builders;
pub mod fixtures;
pub mod generators;

pub use assertions::*;
pub use builders::*;
pub use fixtures::*;
pub use generators::*;
