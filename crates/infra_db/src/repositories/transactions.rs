//! Compliance-unit transaction repository
//!
//! Rows of the `transaction` table are append-only except for the
//! `Reserved → Adjustment | Released` flip of `transaction_action`. The
//! per-organization balance view lives in `organization_balance`.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use core_kernel::{OrganizationId, TransactionId};
use domain_ledger::{
    BalanceView, NewTransaction, Transaction, TransactionAction, TransactionFilter, UnitSign, UnitSumQuery,
};

use crate::error::DatabaseError;

/// Database row of the `transaction` table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionRow {
    pub transaction_id: i64,
    pub organization_id: i64,
    pub transaction_action: String,
    pub compliance_units: i64,
    pub create_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = DatabaseError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let action = row
            .transaction_action
            .parse::<TransactionAction>()
            .map_err(|_| DatabaseError::corrupt("transaction.transaction_action", &row.transaction_action))?;
        Ok(Transaction {
            id: TransactionId::new(row.transaction_id),
            organization_id: OrganizationId::new(row.organization_id),
            action,
            compliance_units: row.compliance_units,
            create_date: row.create_date,
            update_date: row.update_date,
        })
    }
}

const COLUMNS: &str = "transaction_id, organization_id, transaction_action::text AS transaction_action, \
                       compliance_units, create_date, update_date";

/// Data access for the `transaction` and `organization_balance` tables
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionRepository;

impl TransactionRepository {
    /// Takes the row lock of one organization
    ///
    /// Returns false when the organization does not exist.
    pub async fn lock_organization(conn: &mut PgConnection, organization: OrganizationId) -> Result<bool, DatabaseError> {
        let locked = sqlx::query_scalar::<_, i64>(
            "SELECT organization_id FROM organization WHERE organization_id = $1 FOR UPDATE",
        )
        .bind(organization.value())
        .fetch_optional(&mut *conn)
        .await?;
        Ok(locked.is_some())
    }

    pub async fn organization_exists(conn: &mut PgConnection, organization: OrganizationId) -> Result<bool, DatabaseError> {
        Ok(
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM organization WHERE organization_id = $1)")
                .bind(organization.value())
                .fetch_one(&mut *conn)
                .await?,
        )
    }

    pub async fn insert(conn: &mut PgConnection, entry: &NewTransaction) -> Result<TransactionRow, DatabaseError> {
        let sql = format!(
            "INSERT INTO transaction (organization_id, transaction_action, compliance_units, create_date, update_date) \
             VALUES ($1, $2::transaction_action_enum, $3, now(), now()) RETURNING {COLUMNS}"
        );
        Ok(sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(entry.organization_id.value())
            .bind(entry.action.as_str())
            .bind(entry.compliance_units)
            .fetch_one(&mut *conn)
            .await?)
    }

    pub async fn find(conn: &mut PgConnection, id: TransactionId) -> Result<Option<TransactionRow>, DatabaseError> {
        let sql = format!("SELECT {COLUMNS} FROM transaction WHERE transaction_id = $1");
        Ok(sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id.value())
            .fetch_optional(&mut *conn)
            .await?)
    }

    /// Loads and locks one entry
    pub async fn find_for_update(conn: &mut PgConnection, id: TransactionId) -> Result<Option<TransactionRow>, DatabaseError> {
        let sql = format!("SELECT {COLUMNS} FROM transaction WHERE transaction_id = $1 FOR UPDATE");
        Ok(sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id.value())
            .fetch_optional(&mut *conn)
            .await?)
    }

    pub async fn set_action(
        conn: &mut PgConnection,
        id: TransactionId,
        action: TransactionAction,
    ) -> Result<TransactionRow, DatabaseError> {
        let sql = format!(
            "UPDATE transaction SET transaction_action = $2::transaction_action_enum, update_date = now() \
             WHERE transaction_id = $1 RETURNING {COLUMNS}"
        );
        Ok(sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id.value())
            .bind(action.as_str())
            .fetch_one(&mut *conn)
            .await?)
    }

    pub async fn by_org(
        conn: &mut PgConnection,
        organization: OrganizationId,
        filter: &TransactionFilter,
    ) -> Result<Vec<TransactionRow>, DatabaseError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM transaction \
             WHERE organization_id = $1 \
               AND ($2::text IS NULL OR transaction_action::text = $2) \
               AND ($3::timestamptz IS NULL OR create_date < $3) \
             ORDER BY create_date, transaction_id \
             LIMIT $4"
        );
        Ok(sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(organization.value())
            .bind(filter.action.map(|a| a.as_str()))
            .bind(filter.created_before)
            .bind(filter.limit.map(i64::from))
            .fetch_all(&mut *conn)
            .await?)
    }

    pub async fn sum_units(conn: &mut PgConnection, query: &UnitSumQuery) -> Result<i64, DatabaseError> {
        let sign = match query.sign {
            UnitSign::Any => "",
            UnitSign::Debits => " AND compliance_units < 0",
            UnitSign::Credits => " AND compliance_units > 0",
        };
        let sql = format!(
            "SELECT COALESCE(SUM(compliance_units), 0)::bigint FROM transaction \
             WHERE organization_id = $1 \
               AND transaction_action = $2::transaction_action_enum \
               AND ($3::timestamptz IS NULL OR create_date < $3){sign}"
        );
        Ok(sqlx::query_scalar::<_, i64>(&sql)
            .bind(query.organization_id.value())
            .bind(query.action.as_str())
            .bind(query.created_before)
            .fetch_one(&mut *conn)
            .await?)
    }

    pub async fn upsert_balance(conn: &mut PgConnection, view: &BalanceView) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO organization_balance \
                 (organization_id, committed_units, reserved_units, available_units, computed_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (organization_id) DO UPDATE SET \
                 committed_units = EXCLUDED.committed_units, \
                 reserved_units = EXCLUDED.reserved_units, \
                 available_units = EXCLUDED.available_units, \
                 computed_at = EXCLUDED.computed_at",
        )
        .bind(view.organization_id.value())
        .bind(view.committed_units)
        .bind(view.reserved_units)
        .bind(view.available_units)
        .bind(view.computed_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(action: &str) -> TransactionRow {
        TransactionRow {
            transaction_id: 7,
            organization_id: 3,
            transaction_action: action.to_string(),
            compliance_units: -250,
            create_date: Utc::now(),
            update_date: Utc::now(),
        }
    }

    #[test]
    fn test_row_maps_to_transaction() {
        let transaction = Transaction::try_from(row("Reserved")).unwrap();
        assert_eq!(transaction.id, TransactionId::new(7));
        assert_eq!(transaction.organization_id, OrganizationId::new(3));
        assert!(transaction.is_reserved());
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let err = Transaction::try_from(row("Pending")).unwrap_err();
        assert!(matches!(err, DatabaseError::SerializationError(_)));
    }
}
