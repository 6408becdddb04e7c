//! Compliance Domain - Reports, Summaries and Workflow
//!
//! A supplier files one report per compliance period. The report holds
//! versioned child records (fuel supply, exports, notional transfers, other
//! uses, allocation agreements), a 22-line summary, and a frozen copy of the
//! organization's details. Supplementals and analyst adjustments add new
//! versions to the same report group.
//!
//! # Key Components
//!
//! - **Report workflow**: status machine from Draft to Assessed, holding a
//!   ledger reservation for the summary's line 20 while under review
//! - **Summary calculator**: renewable fuel (lines 1-11) and low carbon fuel
//!   (lines 12-22) requirements
//! - **Child versioning**: append-only versions per entity group with a
//!   materialised effective set
//! - **Legacy consumer**: idempotent ingestion of legacy-system events
//! - **Scheduler**: single-instance background jobs behind a task lock
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_compliance::ReportWorkflow;
//!
//! let report = workflow.create_report(&supplier, org, period).await?;
//! workflow.add_child(&supplier, report.id, payload).await?;
//! let report = workflow.submit(&supplier, report.id).await?;
//! ```

pub mod calculator;
pub mod children;
pub mod error;
pub mod events;
pub mod jobs;
pub mod legacy;
pub mod ports;
pub mod reference;
pub mod report;
pub mod snapshot;
pub mod status;
pub mod summary;
pub mod units;
pub mod workflow;

pub use calculator::{BalanceInputs, CalculationInput, CalculatorSettings, SummaryCalculator};
pub use children::{
    effective_ids, effective_set, group_head, ActionType, AllocationDirection, ChildKind, ChildPayload,
    ChildRecord, DerivedUnits, FuelLine, NewChildRecord, NotionalDirection,
};
pub use error::ComplianceError;
pub use events::{NotificationType, ReportEvent};
pub use jobs::{AutoSubmitJob, ScheduledJob, Scheduler, SchedulerHandle, SchedulerSettings};
pub use legacy::{
    ConsumerSettings, InboxMessage, LegacyAction, LegacyCheckResult, LegacyConsumer, LegacyMessage, PollOutcome,
};
pub use ports::{
    ComplianceDatabase, ComplianceUnitOfWork, LegacyInbox, NotificationSink, ReferenceDataPort, ReportStore,
    TaskLock,
};
pub use reference::{CategoryValues, FuelCategory, FuelType, ReferenceData};
pub use report::{ComplianceReport, NewReport, StatusHistoryEntry};
pub use snapshot::{OrganizationProfile, OrganizationSnapshot};
pub use status::{ReportStatus, SupplementalInitiator};
pub use summary::{LowCarbonLines, RenewableLines, ReportSummary, SummaryInputs};
pub use units::{derive_units, UnitFormula};
pub use workflow::ReportWorkflow;
