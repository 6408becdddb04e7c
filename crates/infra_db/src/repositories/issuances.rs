//! Initiative agreement and admin adjustment repository
//!
//! Both kinds share a column layout in their own tables, so the SQL is
//! built from the kind's table names.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgConnection;

use core_kernel::{OrganizationId, TransactionId};
use domain_ledger::{Issuance, IssuanceHistoryEntry, IssuanceId, IssuanceKind, IssuanceStatus, NewIssuance};

use crate::error::DatabaseError;
use crate::status::StatusRegistry;

/// Table names of one issuance kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuanceTables {
    pub table: &'static str,
    pub key: &'static str,
    pub history: &'static str,
    pub history_status: &'static str,
}

impl IssuanceTables {
    pub fn of(kind: IssuanceKind) -> Self {
        match kind {
            IssuanceKind::InitiativeAgreement => Self {
                table: "initiative_agreement",
                key: "initiative_agreement_id",
                history: "initiative_agreement_history",
                history_status: "initiative_agreement_status_id",
            },
            IssuanceKind::AdminAdjustment => Self {
                table: "admin_adjustment",
                key: "admin_adjustment_id",
                history: "admin_adjustment_history",
                history_status: "admin_adjustment_status_id",
            },
        }
    }

    fn columns(&self) -> String {
        format!(
            "{} AS issuance_id, to_organization_id, compliance_units, current_status_id, transaction_id, \
             transaction_effective_date, gov_comment, create_date, update_date",
            self.key
        )
    }
}

/// Database row shared by both issuance tables
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IssuanceRow {
    pub issuance_id: i64,
    pub to_organization_id: i64,
    pub compliance_units: i64,
    pub current_status_id: i32,
    pub transaction_id: Option<i64>,
    pub transaction_effective_date: Option<NaiveDate>,
    pub gov_comment: Option<String>,
    pub create_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
}

impl IssuanceRow {
    pub fn into_domain(self, kind: IssuanceKind, registry: &StatusRegistry) -> Result<Issuance, DatabaseError> {
        Ok(Issuance {
            id: IssuanceId::from_parts(kind, self.issuance_id),
            organization_id: OrganizationId::new(self.to_organization_id),
            compliance_units: self.compliance_units,
            current_status: registry.issuances(kind).status(self.current_status_id)?,
            transaction_id: self.transaction_id.map(TransactionId::new),
            transaction_effective_date: self.transaction_effective_date,
            gov_comment: self.gov_comment,
            created_at: self.create_date,
            updated_at: self.update_date,
        })
    }
}

/// Data access for both issuance kinds and their history tables
#[derive(Debug, Clone, Copy, Default)]
pub struct IssuanceRepository;

impl IssuanceRepository {
    pub async fn insert(
        conn: &mut PgConnection,
        registry: &StatusRegistry,
        issuance: &NewIssuance,
    ) -> Result<IssuanceRow, DatabaseError> {
        let tables = IssuanceTables::of(issuance.kind);
        let sql = format!(
            "INSERT INTO {} (to_organization_id, compliance_units, current_status_id, \
                 transaction_effective_date, gov_comment, create_date, update_date) \
             VALUES ($1, $2, $3, $4, $5, now(), now()) RETURNING {}",
            tables.table,
            tables.columns()
        );
        Ok(sqlx::query_as::<_, IssuanceRow>(&sql)
            .bind(issuance.organization_id.value())
            .bind(issuance.compliance_units)
            .bind(registry.issuances(issuance.kind).id(IssuanceStatus::Draft)?)
            .bind(issuance.transaction_effective_date)
            .bind(&issuance.gov_comment)
            .fetch_one(&mut *conn)
            .await?)
    }

    pub async fn find_for_update(conn: &mut PgConnection, id: IssuanceId) -> Result<Option<IssuanceRow>, DatabaseError> {
        let tables = IssuanceTables::of(id.kind());
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = $1 FOR UPDATE",
            tables.columns(),
            tables.table,
            tables.key
        );
        Ok(sqlx::query_as::<_, IssuanceRow>(&sql)
            .bind(id.value())
            .fetch_optional(&mut *conn)
            .await?)
    }

    /// Returns false when the row is gone
    pub async fn update(
        conn: &mut PgConnection,
        registry: &StatusRegistry,
        issuance: &Issuance,
    ) -> Result<bool, DatabaseError> {
        let kind = issuance.kind();
        let tables = IssuanceTables::of(kind);
        let sql = format!(
            "UPDATE {} SET to_organization_id = $2, compliance_units = $3, current_status_id = $4, \
                 transaction_id = $5, transaction_effective_date = $6, gov_comment = $7, update_date = now() \
             WHERE {} = $1",
            tables.table, tables.key
        );
        let result = sqlx::query(&sql)
            .bind(issuance.id.value())
            .bind(issuance.organization_id.value())
            .bind(issuance.compliance_units)
            .bind(registry.issuances(kind).id(issuance.current_status)?)
            .bind(issuance.transaction_id.map(|t| t.value()))
            .bind(issuance.transaction_effective_date)
            .bind(&issuance.gov_comment)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn insert_history(
        conn: &mut PgConnection,
        registry: &StatusRegistry,
        entry: &IssuanceHistoryEntry,
    ) -> Result<(), DatabaseError> {
        let kind = entry.issuance_id.kind();
        let tables = IssuanceTables::of(kind);
        let sql = format!(
            "INSERT INTO {} ({}, {}, user_name, create_date) VALUES ($1, $2, $3, $4)",
            tables.history, tables.key, tables.history_status
        );
        sqlx::query(&sql)
            .bind(entry.issuance_id.value())
            .bind(registry.issuances(kind).id(entry.status)?)
            .bind(&entry.username)
            .bind(entry.recorded_at)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_follow_kind() {
        let ia = IssuanceTables::of(IssuanceKind::InitiativeAgreement);
        assert_eq!(ia.key, "initiative_agreement_id");
        let aa = IssuanceTables::of(IssuanceKind::AdminAdjustment);
        assert_eq!(aa.history, "admin_adjustment_history");
        assert!(aa.columns().starts_with("admin_adjustment_id AS issuance_id"));
    }
}
