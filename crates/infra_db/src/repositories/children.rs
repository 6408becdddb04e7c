//! Child record repository
//!
//! Each child kind has its own table (`fuel_supply`, `fuel_export`, ...)
//! with the versioning columns `(group_uuid, version, action_type)`, the
//! materialised `is_effective` flag and the business fields as JSONB. Ids
//! come from the shared `compliance_report_child_seq` sequence so a record
//! id is unique across kinds.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgConnection;
use uuid::Uuid;

use core_kernel::{ChildRecordId, ComplianceReportId, EntityGroupId};
use domain_compliance::{ActionType, ChildKind, ChildPayload, ChildRecord, DerivedUnits, NewChildRecord};

use crate::error::DatabaseError;

/// Database row shared by the child tables
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChildRow {
    pub child_id: i64,
    pub compliance_report_id: i64,
    pub group_uuid: Uuid,
    pub version: i32,
    pub action_type: String,
    pub is_effective: bool,
    pub payload: Json<ChildPayload>,
    pub derived: Option<Json<DerivedUnits>>,
    pub create_date: DateTime<Utc>,
}

impl TryFrom<ChildRow> for ChildRecord {
    type Error = DatabaseError;

    fn try_from(row: ChildRow) -> Result<Self, Self::Error> {
        let action_type = row
            .action_type
            .parse::<ActionType>()
            .map_err(|_| DatabaseError::corrupt("action_type", &row.action_type))?;
        Ok(ChildRecord {
            id: ChildRecordId::new(row.child_id),
            report_id: ComplianceReportId::new(row.compliance_report_id),
            group_uuid: EntityGroupId::from_uuid(row.group_uuid),
            version: row.version,
            action_type,
            is_effective: row.is_effective,
            payload: row.payload.0,
            derived: row.derived.map(|d| d.0),
            create_date: row.create_date,
        })
    }
}

fn key_column(kind: ChildKind) -> String {
    format!("{}_id", kind.as_str())
}

fn select_columns(kind: ChildKind) -> String {
    format!(
        "SELECT {} AS child_id, compliance_report_id, group_uuid, version, action_type::text AS action_type, \
                is_effective, payload, derived, create_date FROM {}",
        key_column(kind),
        kind.as_str()
    )
}

/// Data access for the five child tables
#[derive(Debug, Clone, Copy, Default)]
pub struct ChildRepository;

impl ChildRepository {
    pub async fn insert(conn: &mut PgConnection, child: &NewChildRecord) -> Result<ChildRow, DatabaseError> {
        let kind = child.payload.kind();
        let sql = format!(
            "INSERT INTO {table} ({key}, compliance_report_id, group_uuid, version, action_type, is_effective, \
                 payload, derived, compliance_units, create_date) \
             VALUES (nextval('compliance_report_child_seq'), $1, $2, $3, $4::action_type_enum, false, $5, $6, $7, now()) \
             RETURNING {key} AS child_id, compliance_report_id, group_uuid, version, \
                 action_type::text AS action_type, is_effective, payload, derived, create_date",
            table = kind.as_str(),
            key = key_column(kind),
        );
        Ok(sqlx::query_as::<_, ChildRow>(&sql)
            .bind(child.report_id.value())
            .bind(child.group_uuid.as_uuid())
            .bind(child.version)
            .bind(child.action_type.as_str())
            .bind(Json(&child.payload))
            .bind(child.derived.as_ref().map(Json))
            .bind(child.derived.as_ref().map(|d| d.compliance_units))
            .fetch_one(&mut *conn)
            .await?)
    }

    /// Every version of every kind attached to the report
    pub async fn for_report(conn: &mut PgConnection, report: ComplianceReportId) -> Result<Vec<ChildRow>, DatabaseError> {
        let union = ChildKind::ALL
            .iter()
            .map(|kind| format!("{} WHERE compliance_report_id = $1", select_columns(*kind)))
            .collect::<Vec<_>>()
            .join(" UNION ALL ");
        let sql = format!("{union} ORDER BY create_date, child_id");
        Ok(sqlx::query_as::<_, ChildRow>(&sql)
            .bind(report.value())
            .fetch_all(&mut *conn)
            .await?)
    }

    /// Rewrites `is_effective` for every child of the report
    pub async fn set_effective(
        conn: &mut PgConnection,
        report: ComplianceReportId,
        effective: &[ChildRecordId],
    ) -> Result<(), DatabaseError> {
        let ids: Vec<i64> = effective.iter().map(|id| id.value()).collect();
        for kind in ChildKind::ALL {
            let sql = format!(
                "UPDATE {} SET is_effective = ({} = ANY($2)) WHERE compliance_report_id = $1",
                kind.as_str(),
                key_column(kind)
            );
            sqlx::query(&sql)
                .bind(report.value())
                .bind(&ids)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_uses_kind_table() {
        let sql = select_columns(ChildKind::NotionalTransfer);
        assert!(sql.contains("notional_transfer_id AS child_id"));
        assert!(sql.ends_with("FROM notional_transfer"));
    }
}
