//! Transfer repository
//!
//! Status and category are stored as reference-table ids and resolved
//! through the `StatusRegistry` on the way in and out.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;

use core_kernel::{OrganizationId, TransactionId, TransferId};
use domain_ledger::{NewTransfer, Transfer, TransferHistoryEntry, TransferRecommendation, TransferStatus};

use crate::error::DatabaseError;
use crate::status::StatusRegistry;

/// Database row of the `transfer` table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransferRow {
    pub transfer_id: i64,
    pub from_organization_id: i64,
    pub to_organization_id: i64,
    pub from_transaction_id: Option<i64>,
    pub to_transaction_id: Option<i64>,
    pub agreement_date: NaiveDate,
    pub transaction_effective_date: Option<NaiveDate>,
    pub quantity: i64,
    pub price_per_unit: Decimal,
    pub current_status_id: i32,
    pub transfer_category_id: Option<i32>,
    pub recommendation: Option<String>,
    pub create_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
}

impl TransferRow {
    pub fn into_domain(self, registry: &StatusRegistry) -> Result<Transfer, DatabaseError> {
        let recommendation = self
            .recommendation
            .as_deref()
            .map(|r| {
                r.parse::<TransferRecommendation>()
                    .map_err(|_| DatabaseError::corrupt("transfer.recommendation", r))
            })
            .transpose()?;
        let category = self
            .transfer_category_id
            .map(|id| registry.transfer_categories.status(id))
            .transpose()?;
        Ok(Transfer {
            id: TransferId::new(self.transfer_id),
            from_organization_id: OrganizationId::new(self.from_organization_id),
            to_organization_id: OrganizationId::new(self.to_organization_id),
            agreement_date: self.agreement_date,
            transaction_effective_date: self.transaction_effective_date,
            quantity: self.quantity,
            price_per_unit: self.price_per_unit,
            category,
            current_status: registry.transfers.status(self.current_status_id)?,
            recommendation,
            from_transaction_id: self.from_transaction_id.map(TransactionId::new),
            to_transaction_id: self.to_transaction_id.map(TransactionId::new),
            created_at: self.create_date,
            updated_at: self.update_date,
        })
    }
}

const COLUMNS: &str = "transfer_id, from_organization_id, to_organization_id, from_transaction_id, to_transaction_id, \
                       agreement_date, transaction_effective_date, quantity, price_per_unit, current_status_id, \
                       transfer_category_id, recommendation::text AS recommendation, create_date, update_date";

/// Data access for `transfer` and `transfer_history`
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferRepository;

impl TransferRepository {
    pub async fn insert(
        conn: &mut PgConnection,
        registry: &StatusRegistry,
        transfer: &NewTransfer,
    ) -> Result<TransferRow, DatabaseError> {
        let sql = format!(
            "INSERT INTO transfer \
                 (from_organization_id, to_organization_id, agreement_date, quantity, price_per_unit, \
                  current_status_id, create_date, update_date) \
             VALUES ($1, $2, $3, $4, $5, $6, now(), now()) RETURNING {COLUMNS}"
        );
        Ok(sqlx::query_as::<_, TransferRow>(&sql)
            .bind(transfer.from_organization_id.value())
            .bind(transfer.terms.to_organization_id.value())
            .bind(transfer.terms.agreement_date)
            .bind(transfer.terms.quantity)
            .bind(transfer.terms.price_per_unit)
            .bind(registry.transfers.id(TransferStatus::Draft)?)
            .fetch_one(&mut *conn)
            .await?)
    }

    pub async fn find_for_update(conn: &mut PgConnection, id: TransferId) -> Result<Option<TransferRow>, DatabaseError> {
        let sql = format!("SELECT {COLUMNS} FROM transfer WHERE transfer_id = $1 FOR UPDATE");
        Ok(sqlx::query_as::<_, TransferRow>(&sql)
            .bind(id.value())
            .fetch_optional(&mut *conn)
            .await?)
    }

    /// Writes every mutable column; returns false when the row is gone
    pub async fn update(
        conn: &mut PgConnection,
        registry: &StatusRegistry,
        transfer: &Transfer,
    ) -> Result<bool, DatabaseError> {
        let category = transfer
            .category
            .map(|c| registry.transfer_categories.id(c))
            .transpose()?;
        let result = sqlx::query(
            "UPDATE transfer SET \
                 to_organization_id = $2, agreement_date = $3, transaction_effective_date = $4, \
                 quantity = $5, price_per_unit = $6, current_status_id = $7, transfer_category_id = $8, \
                 recommendation = $9::transfer_recommendation_enum, from_transaction_id = $10, \
                 to_transaction_id = $11, update_date = now() \
             WHERE transfer_id = $1",
        )
        .bind(transfer.id.value())
        .bind(transfer.to_organization_id.value())
        .bind(transfer.agreement_date)
        .bind(transfer.transaction_effective_date)
        .bind(transfer.quantity)
        .bind(transfer.price_per_unit)
        .bind(registry.transfers.id(transfer.current_status)?)
        .bind(category)
        .bind(transfer.recommendation.map(|r| r.as_str()))
        .bind(transfer.from_transaction_id.map(|t| t.value()))
        .bind(transfer.to_transaction_id.map(|t| t.value()))
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn insert_history(
        conn: &mut PgConnection,
        registry: &StatusRegistry,
        entry: &TransferHistoryEntry,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO transfer_history (transfer_id, transfer_status_id, user_name, create_date) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(entry.transfer_id.value())
        .bind(registry.transfers.id(entry.status)?)
        .bind(&entry.username)
        .bind(entry.recorded_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
