//! PostgreSQL advisory task lock
//!
//! Session-level advisory locks belong to the connection that took them,
//! so each held lock keeps its pooled connection checked out until
//! `unlock`. If the process dies the connection closes and PostgreSQL
//! frees the lock.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use core_kernel::{DomainPort, HealthCheckResult, HealthCheckable, PortError};
use domain_compliance::TaskLock;

use crate::error::db_to_port_error;

/// `TaskLock` over `pg_try_advisory_lock(hashtext(name))`
pub struct PgTaskLock {
    pool: PgPool,
    held: Mutex<HashMap<String, PoolConnection<Postgres>>>,
}

impl PgTaskLock {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            held: Mutex::new(HashMap::new()),
        }
    }
}

impl std::fmt::Debug for PgTaskLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTaskLock").finish_non_exhaustive()
    }
}

impl DomainPort for PgTaskLock {}

#[async_trait]
impl TaskLock for PgTaskLock {
    #[instrument(skip(self))]
    async fn try_lock(&self, name: &str) -> Result<bool, PortError> {
        let mut held = self.held.lock().await;
        if held.contains_key(name) {
            return Ok(false);
        }
        let mut conn = self.pool.acquire().await.map_err(db_to_port_error)?;
        let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock(hashtext($1))")
            .bind(name)
            .fetch_one(&mut *conn)
            .await
            .map_err(db_to_port_error)?;
        if acquired {
            held.insert(name.to_string(), conn);
            debug!("task lock acquired");
        }
        Ok(acquired)
    }

    #[instrument(skip(self))]
    async fn unlock(&self, name: &str) -> Result<(), PortError> {
        let Some(mut conn) = self.held.lock().await.remove(name) else {
            warn!("unlock of a task lock this process does not hold");
            return Ok(());
        };
        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(name)
            .fetch_one(&mut *conn)
            .await
            .map_err(db_to_port_error)?;
        if !released {
            warn!("advisory lock was already gone at unlock");
        }
        debug!("task lock released");
        Ok(())
    }
}

#[async_trait]
impl HealthCheckable for PgTaskLock {
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();
        match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => HealthCheckResult::healthy("postgres-task-lock", start.elapsed().as_millis() as u64),
            Err(e) => HealthCheckResult::unhealthy("postgres-task-lock", format!("Database error: {e}")),
        }
    }
}
