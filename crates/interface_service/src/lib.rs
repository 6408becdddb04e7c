//! LCFS service runtime
//!
//! Wires the PostgreSQL adapters into the ledger and compliance services
//! and runs the background work: the auto-submit job for stale
//! supplemental drafts and the legacy message consumer. The HTTP surface
//! is a separate collaborator; it authenticates callers with
//! [`auth::JwtIdentityProvider`] and calls into [`runtime::Services`].
//!
//! # Example
//!
//! ```rust,ignore
//! use interface_service::{bootstrap, ServiceConfig};
//!
//! let config = ServiceConfig::load()?;
//! let runtime = bootstrap(&config).await?;
//! runtime.shutdown().await;
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod runtime;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use domain_ledger::BalanceCache;
use infra_db::{create_pool, PgDatabase, PgLegacyInbox, PgNotificationOutbox, PgReferenceData, PgTaskLock};

pub use crate::config::ServiceConfig;
pub use crate::error::ServiceError;
pub use crate::runtime::{Runtime, Services};

/// Connects to PostgreSQL, loads the status registry and starts the runtime
pub async fn bootstrap(config: &ServiceConfig) -> Result<Runtime, ServiceError> {
    info!(database = %config.database.redacted_url(), "connecting to database");
    let pool = create_pool(&config.database).await?;
    let database = Arc::new(PgDatabase::connect(pool.clone()).await?);

    let cache: Option<Arc<dyn BalanceCache>> = if config.cache.enabled {
        Some(Arc::new(cache::LocalBalanceCache::new(Duration::from_secs(config.cache.ttl_secs))))
    } else {
        None
    };

    let services = Services::new(
        database,
        Arc::new(PgReferenceData::new(pool.clone())),
        Arc::new(PgNotificationOutbox::new(pool.clone())),
        cache,
        config,
    );
    let inbox = PgLegacyInbox::new(pool.clone());
    Ok(Runtime::start(
        services,
        Arc::new(PgTaskLock::new(pool)),
        Arc::new(inbox),
        config,
    ))
}
