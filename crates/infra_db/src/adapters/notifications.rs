//! Notification outbox
//!
//! Events that carry a notification type are written to
//! `notification_outbox`; the email collaborator drains that table on its
//! own schedule. Events without a type are logged and dropped.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, instrument};

use core_kernel::{DomainPort, HealthCheckResult, HealthCheckable, PortError};
use domain_compliance::{NotificationSink, NotificationType, ReportEvent};

use crate::error::db_to_port_error;

/// Row shape of `notification_outbox`
#[derive(Debug, Clone, serde::Serialize)]
struct OutboxEntry<'a> {
    notification_type: NotificationType,
    event: &'a ReportEvent,
}

/// `NotificationSink` that appends to the outbox table
#[derive(Debug, Clone)]
pub struct PgNotificationOutbox {
    pool: PgPool,
}

impl PgNotificationOutbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DomainPort for PgNotificationOutbox {}

#[async_trait]
impl NotificationSink for PgNotificationOutbox {
    #[instrument(skip(self, event), fields(report_id = %event.report_id()))]
    async fn publish(&self, event: &ReportEvent) -> Result<(), PortError> {
        let Some(notification_type) = event.notification_type() else {
            debug!("event has no notification type, not queued");
            return Ok(());
        };
        let entry = OutboxEntry { notification_type, event };
        let type_name = serde_json::to_value(notification_type)
            .map_err(|e| PortError::Transformation { message: e.to_string() })?;
        sqlx::query(
            "INSERT INTO notification_outbox (compliance_report_id, notification_type, payload, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(event.report_id().value())
        .bind(type_name.as_str().unwrap_or_default())
        .bind(Json(&entry))
        .bind(event.timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_to_port_error)?;
        debug!(?notification_type, "notification queued");
        Ok(())
    }
}

#[async_trait]
impl HealthCheckable for PgNotificationOutbox {
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();
        match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => HealthCheckResult::healthy("postgres-notification-outbox", start.elapsed().as_millis() as u64),
            Err(e) => HealthCheckResult::unhealthy("postgres-notification-outbox", format!("Database error: {e}")),
        }
    }
}
