//! Compliance report repository
//!
//! Covers `compliance_report`, its status history, the organization
//! snapshot, the live organization profile it is captured from, and the
//! legacy-message ledger. Periods are stored by `compliance_period_id` and
//! matched on the period's `description` (the year).

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use core_kernel::{
    CompliancePeriod, ComplianceReportId, OrganizationId, ReportGroupId, TransactionId,
};
use domain_compliance::{
    ComplianceReport, LegacyAction, NewReport, OrganizationProfile, OrganizationSnapshot, ReportStatus,
    StatusHistoryEntry, SupplementalInitiator,
};

use crate::error::DatabaseError;
use crate::status::StatusRegistry;

/// Database row of `compliance_report` joined with its period
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReportRow {
    pub compliance_report_id: i64,
    pub compliance_report_group_uuid: Uuid,
    pub version: i32,
    pub compliance_period: String,
    pub organization_id: i64,
    pub current_status_id: i32,
    pub transaction_id: Option<i64>,
    pub supplemental_initiator: Option<String>,
    pub nickname: String,
    pub legacy_id: Option<i64>,
    pub create_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
}

impl ReportRow {
    pub fn into_domain(self, registry: &StatusRegistry) -> Result<ComplianceReport, DatabaseError> {
        let year = self
            .compliance_period
            .trim()
            .parse::<i32>()
            .map_err(|_| DatabaseError::corrupt("compliance_period.description", &self.compliance_period))?;
        let compliance_period = CompliancePeriod::new(year)
            .map_err(|_| DatabaseError::corrupt("compliance_period.description", year))?;
        let supplemental_initiator = self
            .supplemental_initiator
            .as_deref()
            .map(|s| {
                s.parse::<SupplementalInitiator>()
                    .map_err(|_| DatabaseError::corrupt("compliance_report.supplemental_initiator", s))
            })
            .transpose()?;
        Ok(ComplianceReport {
            id: ComplianceReportId::new(self.compliance_report_id),
            group_id: ReportGroupId::from_uuid(self.compliance_report_group_uuid),
            version: self.version,
            compliance_period,
            organization_id: OrganizationId::new(self.organization_id),
            current_status: registry.reports.status(self.current_status_id)?,
            nickname: self.nickname,
            supplemental_initiator,
            transaction_id: self.transaction_id.map(TransactionId::new),
            legacy_id: self.legacy_id,
            create_date: self.create_date,
            update_date: self.update_date,
        })
    }
}

const SELECT_REPORT: &str = "SELECT r.compliance_report_id, r.compliance_report_group_uuid, r.version, \
        cp.description AS compliance_period, r.organization_id, r.current_status_id, r.transaction_id, \
        r.supplemental_initiator::text AS supplemental_initiator, r.nickname, r.legacy_id, \
        r.create_date, r.update_date \
     FROM compliance_report r \
     JOIN compliance_period cp ON cp.compliance_period_id = r.compliance_period_id";

/// Database row of `compliance_report_organization_snapshot`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRow {
    pub compliance_report_id: i64,
    pub organization_id: i64,
    pub name: String,
    pub operating_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub service_address: String,
    pub head_office_address: Option<String>,
    pub is_edited: bool,
}

impl From<SnapshotRow> for OrganizationSnapshot {
    fn from(row: SnapshotRow) -> Self {
        OrganizationSnapshot {
            report_id: ComplianceReportId::new(row.compliance_report_id),
            profile: OrganizationProfile {
                organization_id: OrganizationId::new(row.organization_id),
                name: row.name,
                operating_name: row.operating_name,
                email: row.email,
                phone: row.phone,
                service_address: row.service_address,
                attorney_address: row.head_office_address,
            },
            is_edited: row.is_edited,
        }
    }
}

/// Live organization details, flattened from the organization tables
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProfileRow {
    pub organization_id: i64,
    pub name: String,
    pub operating_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub service_address: Option<String>,
    pub attorney_address: Option<String>,
}

impl From<ProfileRow> for OrganizationProfile {
    fn from(row: ProfileRow) -> Self {
        OrganizationProfile {
            organization_id: OrganizationId::new(row.organization_id),
            name: row.name,
            operating_name: row.operating_name,
            email: row.email,
            phone: row.phone,
            service_address: row.service_address.unwrap_or_default(),
            attorney_address: row.attorney_address,
        }
    }
}

/// Data access for report headers and their side tables
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportRepository;

impl ReportRepository {
    pub async fn insert(
        conn: &mut PgConnection,
        registry: &StatusRegistry,
        report: &NewReport,
    ) -> Result<ReportRow, DatabaseError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO compliance_report \
                 (compliance_report_group_uuid, version, compliance_period_id, organization_id, \
                  current_status_id, supplemental_initiator, nickname, legacy_id, create_date, update_date) \
             SELECT $1, $2, cp.compliance_period_id, $4, $5, $6::supplemental_initiator_type, $7, $8, now(), now() \
             FROM compliance_period cp WHERE cp.description = $3 \
             RETURNING compliance_report_id",
        )
        .bind(report.group_id.as_uuid())
        .bind(report.version)
        .bind(report.compliance_period.year().to_string())
        .bind(report.organization_id.value())
        .bind(registry.reports.id(report.current_status)?)
        .bind(report.supplemental_initiator.map(|i| i.as_str()))
        .bind(report.nickname())
        .bind(report.legacy_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DatabaseError::not_found("CompliancePeriod", report.compliance_period))?;

        Self::find(conn, ComplianceReportId::new(id))
            .await?
            .ok_or_else(|| DatabaseError::not_found("ComplianceReport", id))
    }

    pub async fn find(conn: &mut PgConnection, id: ComplianceReportId) -> Result<Option<ReportRow>, DatabaseError> {
        let sql = format!("{SELECT_REPORT} WHERE r.compliance_report_id = $1");
        Ok(sqlx::query_as::<_, ReportRow>(&sql)
            .bind(id.value())
            .fetch_optional(&mut *conn)
            .await?)
    }

    pub async fn find_for_update(conn: &mut PgConnection, id: ComplianceReportId) -> Result<Option<ReportRow>, DatabaseError> {
        let sql = format!("{SELECT_REPORT} WHERE r.compliance_report_id = $1 FOR UPDATE OF r");
        Ok(sqlx::query_as::<_, ReportRow>(&sql)
            .bind(id.value())
            .fetch_optional(&mut *conn)
            .await?)
    }

    pub async fn find_by_legacy_id(conn: &mut PgConnection, legacy_id: i64) -> Result<Option<ReportRow>, DatabaseError> {
        let sql = format!("{SELECT_REPORT} WHERE r.legacy_id = $1 ORDER BY r.version DESC LIMIT 1");
        Ok(sqlx::query_as::<_, ReportRow>(&sql)
            .bind(legacy_id)
            .fetch_optional(&mut *conn)
            .await?)
    }

    /// Every version of a group, locked, in version order
    pub async fn lock_group(conn: &mut PgConnection, group: ReportGroupId) -> Result<Vec<ReportRow>, DatabaseError> {
        let sql = format!(
            "{SELECT_REPORT} WHERE r.compliance_report_group_uuid = $1 ORDER BY r.version FOR UPDATE OF r"
        );
        Ok(sqlx::query_as::<_, ReportRow>(&sql)
            .bind(group.as_uuid())
            .fetch_all(&mut *conn)
            .await?)
    }

    pub async fn group_for(
        conn: &mut PgConnection,
        organization: OrganizationId,
        period: CompliancePeriod,
    ) -> Result<Option<ReportGroupId>, DatabaseError> {
        let group = sqlx::query_scalar::<_, Uuid>(
            "SELECT r.compliance_report_group_uuid FROM compliance_report r \
             JOIN compliance_period cp ON cp.compliance_period_id = r.compliance_period_id \
             WHERE r.organization_id = $1 AND cp.description = $2 \
             ORDER BY r.version LIMIT 1",
        )
        .bind(organization.value())
        .bind(period.year().to_string())
        .fetch_optional(&mut *conn)
        .await?;
        Ok(group.map(ReportGroupId::from_uuid))
    }

    pub async fn latest_assessed(
        conn: &mut PgConnection,
        registry: &StatusRegistry,
        organization: OrganizationId,
        period: CompliancePeriod,
    ) -> Result<Option<ReportRow>, DatabaseError> {
        let sql = format!(
            "{SELECT_REPORT} WHERE r.organization_id = $1 AND cp.description = $2 \
             AND r.current_status_id = ANY($3) ORDER BY r.version DESC LIMIT 1"
        );
        let assessed = vec![
            registry.reports.id(ReportStatus::Assessed)?,
            registry.reports.id(ReportStatus::Reassessed)?,
        ];
        Ok(sqlx::query_as::<_, ReportRow>(&sql)
            .bind(organization.value())
            .bind(period.year().to_string())
            .bind(assessed)
            .fetch_optional(&mut *conn)
            .await?)
    }

    pub async fn stale_supplemental_drafts(
        conn: &mut PgConnection,
        registry: &StatusRegistry,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ReportRow>, DatabaseError> {
        let sql = format!(
            "{SELECT_REPORT} WHERE r.version >= 1 AND r.current_status_id = $1 AND r.update_date <= $2 \
             ORDER BY r.update_date"
        );
        Ok(sqlx::query_as::<_, ReportRow>(&sql)
            .bind(registry.reports.id(ReportStatus::Draft)?)
            .bind(cutoff)
            .fetch_all(&mut *conn)
            .await?)
    }

    /// Returns false when the row is gone
    pub async fn update(
        conn: &mut PgConnection,
        registry: &StatusRegistry,
        report: &ComplianceReport,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE compliance_report SET current_status_id = $2, transaction_id = $3, nickname = $4, \
                 update_date = $5 \
             WHERE compliance_report_id = $1",
        )
        .bind(report.id.value())
        .bind(registry.reports.id(report.current_status)?)
        .bind(report.transaction_id.map(|t| t.value()))
        .bind(&report.nickname)
        .bind(report.update_date)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn insert_history(
        conn: &mut PgConnection,
        registry: &StatusRegistry,
        entry: &StatusHistoryEntry,
    ) -> Result<(), DatabaseError> {
        let from = entry.from_status.map(|s| registry.reports.id(s)).transpose()?;
        sqlx::query(
            "INSERT INTO compliance_report_history \
                 (compliance_report_id, from_status_id, status_id, user_name, create_date) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entry.report_id.value())
        .bind(from)
        .bind(registry.reports.id(entry.to_status)?)
        .bind(&entry.username)
        .bind(entry.recorded_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn snapshot(conn: &mut PgConnection, report: ComplianceReportId) -> Result<Option<SnapshotRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, SnapshotRow>(
            "SELECT compliance_report_id, organization_id, name, operating_name, email, phone, \
                    service_address, head_office_address, is_edited \
             FROM compliance_report_organization_snapshot WHERE compliance_report_id = $1",
        )
        .bind(report.value())
        .fetch_optional(&mut *conn)
        .await?)
    }

    pub async fn upsert_snapshot(conn: &mut PgConnection, snapshot: &OrganizationSnapshot) -> Result<(), DatabaseError> {
        let profile = &snapshot.profile;
        sqlx::query(
            "INSERT INTO compliance_report_organization_snapshot \
                 (compliance_report_id, organization_id, name, operating_name, email, phone, \
                  service_address, head_office_address, is_edited) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (compliance_report_id) DO UPDATE SET \
                 name = EXCLUDED.name, operating_name = EXCLUDED.operating_name, email = EXCLUDED.email, \
                 phone = EXCLUDED.phone, service_address = EXCLUDED.service_address, \
                 head_office_address = EXCLUDED.head_office_address, is_edited = EXCLUDED.is_edited",
        )
        .bind(snapshot.report_id.value())
        .bind(profile.organization_id.value())
        .bind(&profile.name)
        .bind(&profile.operating_name)
        .bind(&profile.email)
        .bind(&profile.phone)
        .bind(&profile.service_address)
        .bind(&profile.attorney_address)
        .bind(snapshot.is_edited)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn organization_profile(
        conn: &mut PgConnection,
        organization: OrganizationId,
    ) -> Result<Option<ProfileRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, ProfileRow>(
            "SELECT o.organization_id, o.name, COALESCE(o.operating_name, o.name) AS operating_name, \
                    o.email, o.phone, \
                    concat_ws(', ', a.street_address, a.city, a.province_state, a.postalcode_zipcode) \
                        AS service_address, \
                    concat_ws(', ', aa.street_address, aa.city, aa.province_state, aa.postalcode_zipcode) \
                        AS attorney_address \
             FROM organization o \
             LEFT JOIN organization_address a ON a.organization_address_id = o.organization_address_id \
             LEFT JOIN organization_attorney_address aa \
                 ON aa.organization_attorney_address_id = o.organization_attorney_address_id \
             WHERE o.organization_id = $1",
        )
        .bind(organization.value())
        .fetch_optional(&mut *conn)
        .await?)
    }

    pub async fn legacy_processed(
        conn: &mut PgConnection,
        legacy_id: i64,
        action: LegacyAction,
    ) -> Result<Option<ComplianceReportId>, DatabaseError> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT compliance_report_id FROM legacy_report_processed WHERE legacy_id = $1 AND action = $2",
        )
        .bind(legacy_id)
        .bind(action.as_str())
        .fetch_optional(&mut *conn)
        .await?;
        Ok(id.map(ComplianceReportId::new))
    }

    pub async fn mark_legacy_processed(
        conn: &mut PgConnection,
        legacy_id: i64,
        action: LegacyAction,
        report: ComplianceReportId,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO legacy_report_processed (legacy_id, action, compliance_report_id, processed_at) \
             VALUES ($1, $2, $3, now())",
        )
        .bind(legacy_id)
        .bind(action.as_str())
        .bind(report.value())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
