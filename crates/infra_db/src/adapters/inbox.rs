//! Legacy message inbox over `legacy_report_message`
//!
//! Rows move `pending → processing → done | dead`. Claiming uses
//! `FOR UPDATE SKIP LOCKED`, so several consumers can poll the same table.
//! A row stuck in `processing` past the visibility timeout is claimed
//! again, which covers a consumer that died mid-message.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, error, instrument};

use core_kernel::{DomainPort, HealthCheckResult, HealthCheckable, PortError};
use domain_compliance::{InboxMessage, LegacyInbox, LegacyMessage};

use crate::error::db_to_port_error;

/// Claimed row before its body is decoded
#[derive(Debug, Clone, sqlx::FromRow)]
struct ClaimedRow {
    message_id: i64,
    attempts: i32,
    body: serde_json::Value,
}

/// `LegacyInbox` backed by a PostgreSQL table
#[derive(Debug, Clone)]
pub struct PgLegacyInbox {
    pool: PgPool,
    visibility_timeout: Duration,
    retry_delay: Duration,
}

impl PgLegacyInbox {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            visibility_timeout: Duration::from_secs(300),
            retry_delay: Duration::from_secs(30),
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn park(&self, message_id: i64, status: &str, error: &str, delay: Duration) -> Result<(), PortError> {
        sqlx::query(
            "UPDATE legacy_report_message SET status = $2, last_error = $3, \
                 available_at = now() + ($4 * interval '1 second') \
             WHERE message_id = $1",
        )
        .bind(message_id)
        .bind(status)
        .bind(error)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(db_to_port_error)?;
        Ok(())
    }
}

impl DomainPort for PgLegacyInbox {}

#[async_trait]
impl LegacyInbox for PgLegacyInbox {
    #[instrument(skip(self))]
    async fn fetch(&self, limit: u32) -> Result<Vec<InboxMessage>, PortError> {
        let mut rows = sqlx::query_as::<_, ClaimedRow>(
            "UPDATE legacy_report_message m \
             SET status = 'processing', attempts = m.attempts + 1, claimed_at = now() \
             WHERE m.message_id IN ( \
                 SELECT message_id FROM legacy_report_message \
                 WHERE (status = 'pending' AND available_at <= now()) \
                    OR (status = 'processing' AND claimed_at < now() - ($2 * interval '1 second')) \
                 ORDER BY message_id \
                 LIMIT $1 \
                 FOR UPDATE SKIP LOCKED) \
             RETURNING m.message_id, m.attempts, m.body",
        )
        .bind(i64::from(limit))
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(db_to_port_error)?;
        rows.sort_by_key(|r| r.message_id);

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<LegacyMessage>(row.body) {
                Ok(body) => messages.push(InboxMessage {
                    message_id: row.message_id,
                    attempts: u32::try_from(row.attempts).unwrap_or(u32::MAX),
                    body,
                }),
                Err(e) => {
                    error!(message_id = row.message_id, error = %e, "undecodable legacy message dead-lettered");
                    self.dead_letter(row.message_id, &format!("undecodable body: {e}")).await?;
                }
            }
        }
        debug!(count = messages.len(), "legacy messages claimed");
        Ok(messages)
    }

    #[instrument(skip(self))]
    async fn ack(&self, message_id: i64) -> Result<(), PortError> {
        sqlx::query("UPDATE legacy_report_message SET status = 'done', processed_at = now() WHERE message_id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(db_to_port_error)?;
        Ok(())
    }

    #[instrument(skip(self, error))]
    async fn nack(&self, message_id: i64, error: &str) -> Result<(), PortError> {
        self.park(message_id, "pending", error, self.retry_delay).await
    }

    #[instrument(skip(self, error))]
    async fn dead_letter(&self, message_id: i64, error: &str) -> Result<(), PortError> {
        self.park(message_id, "dead", error, Duration::ZERO).await
    }
}

#[async_trait]
impl HealthCheckable for PgLegacyInbox {
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();
        let dead_letters = sqlx::query_scalar::<_, i64>(
            "SELECT count(*) FROM legacy_report_message WHERE status = 'dead'",
        )
        .fetch_one(&self.pool)
        .await;
        let latency_ms = start.elapsed().as_millis() as u64;
        match dead_letters {
            Ok(0) => HealthCheckResult::healthy("postgres-legacy-inbox", latency_ms),
            Ok(dead) => HealthCheckResult {
                message: Some(format!("{dead} dead-lettered legacy messages")),
                ..HealthCheckResult::healthy("postgres-legacy-inbox", latency_ms)
            },
            Err(e) => HealthCheckResult::unhealthy("postgres-legacy-inbox", format!("Database error: {e}")),
        }
    }
}
