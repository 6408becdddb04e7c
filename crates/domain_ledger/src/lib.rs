//! Ledger Domain - Compliance-Units Ledger
//!
//! Every organization holds a running balance of compliance units derived
//! from an append-only log of transactions. Three producers write to the log
//! directly (credit transfers, initiative agreements, admin adjustments) and
//! compliance-report assessment reserves and confirms units through the
//! same service.
//!
//! # Balance views
//!
//! - **committed**: sum of `Adjustment` entries
//! - **reserved debits**: magnitude of negative `Reserved` entries
//! - **available**: committed minus reserved debits, never negative
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_ledger::{LedgerService, TransactionStore};
//!
//! let ledger = LedgerService::new();
//! let mut uow = database.begin_ledger(&audit).await?;
//! let reservation = ledger.reserve(uow.as_mut(), org, -17_639).await?;
//! uow.commit().await?;
//! ```

pub mod error;
pub mod issuance;
pub mod ledger;
pub mod ports;
pub mod services;
pub mod transaction;
pub mod transfer;

pub use error::LedgerError;
pub use issuance::{Issuance, IssuanceHistoryEntry, IssuanceId, IssuanceKind, IssuanceStatus, NewIssuance};
pub use ledger::LedgerService;
pub use ports::{
    BalanceCache, IssuanceStore, LedgerDatabase, LedgerUnitOfWork, TransactionStore, TransferStore,
};
pub use services::{IssuanceService, TransferService};
pub use transaction::{
    BalanceView, NewTransaction, Transaction, TransactionAction, TransactionFilter, UnitSign,
    UnitSumQuery,
};
pub use transfer::{
    NewTransfer, Transfer, TransferCategory, TransferHistoryEntry, TransferRecommendation,
    TransferStatus, TransferTerms,
};
