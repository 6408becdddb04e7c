//! Repository implementations
//!
//! Each repository is a set of queries over one `PgConnection`, so the
//! unit of work can run all of them inside one transaction. Rows are
//! decoded with `sqlx::FromRow` and converted to domain types here; status
//! ids go through the `StatusRegistry`.

pub mod children;
pub mod issuances;
pub mod reports;
pub mod summaries;
pub mod transactions;
pub mod transfers;

pub use children::ChildRepository;
pub use issuances::IssuanceRepository;
pub use reports::ReportRepository;
pub use summaries::SummaryRepository;
pub use transactions::TransactionRepository;
pub use transfers::TransferRepository;
