//! PostgreSQL infrastructure for the LCFS compliance backend
//!
//! Implements the ledger and compliance ports over SQLx. One
//! [`PgUnitOfWork`] wraps one database transaction, so a reservation, the
//! report status change that caused it and the history rows all commit or
//! roll back together.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, DatabaseConfig, PgDatabase};
//!
//! let pool = create_pool(&DatabaseConfig::new("postgres://localhost/lcfs")).await?;
//! let db = PgDatabase::connect(pool).await?;
//! ```

pub mod adapters;
pub mod error;
pub mod pool;
pub mod repositories;
pub mod status;
pub mod unit_of_work;

pub use adapters::{PgLegacyInbox, PgNotificationOutbox, PgReferenceData, PgTaskLock};
pub use error::DatabaseError;
pub use pool::{create_pool, create_pool_from_url, DatabaseConfig, DatabasePool};
pub use status::{StatusRegistry, StatusTable};
pub use unit_of_work::{PgDatabase, PgUnitOfWork};
