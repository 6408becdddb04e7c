//! PostgreSQL unit of work
//!
//! `PgDatabase` opens one `sqlx::Transaction` per unit of work and stamps
//! it with the acting user through `set_config('app.username', ..., true)`
//! so the audit triggers attribute every row change. `PgUnitOfWork`
//! implements the ledger and compliance store ports over that transaction;
//! dropping it without `commit` rolls everything back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use tracing::{debug, info, instrument};

use core_kernel::{
    AuditContext, ChildRecordId, CompliancePeriod, ComplianceReportId, DomainPort, HealthCheckResult,
    HealthCheckable, OrganizationId, PortError, ReportGroupId, TransactionId, TransferId,
};
use domain_compliance::{
    ChildRecord, ComplianceDatabase, ComplianceReport, ComplianceUnitOfWork, LegacyAction, NewChildRecord, NewReport,
    OrganizationProfile, OrganizationSnapshot, ReportStore, ReportSummary, StatusHistoryEntry,
};
use domain_ledger::{
    BalanceView, Issuance, IssuanceHistoryEntry, IssuanceId, IssuanceStore, LedgerDatabase, LedgerUnitOfWork,
    NewIssuance, NewTransaction, NewTransfer, Transaction, TransactionAction, TransactionFilter, TransactionStore,
    Transfer, TransferHistoryEntry, TransferStore, UnitSumQuery,
};

use crate::error::{db_to_port_error, DatabaseError};
use crate::repositories::{
    ChildRepository, IssuanceRepository, ReportRepository, SummaryRepository, TransactionRepository,
    TransferRepository,
};
use crate::repositories::reports::ReportRow;
use crate::status::StatusRegistry;

/// Opens PostgreSQL units of work for both domains
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pool: PgPool,
    registry: Arc<StatusRegistry>,
}

impl PgDatabase {
    pub fn new(pool: PgPool, registry: Arc<StatusRegistry>) -> Self {
        Self { pool, registry }
    }

    /// Loads the status registry and wraps the pool
    pub async fn connect(pool: PgPool) -> Result<Self, DatabaseError> {
        let registry = StatusRegistry::load(&pool).await?;
        Ok(Self::new(pool, Arc::new(registry)))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn registry(&self) -> &StatusRegistry {
        &self.registry
    }

    #[instrument(skip(self, audit), fields(username = %audit.username, correlation_id = ?audit.correlation_id))]
    async fn begin(&self, audit: &AuditContext) -> Result<PgUnitOfWork, PortError> {
        let mut tx = self.pool.begin().await.map_err(db_to_port_error)?;
        sqlx::query("SELECT set_config('app.username', $1, true)")
            .bind(&audit.username)
            .execute(&mut *tx)
            .await
            .map_err(db_to_port_error)?;
        debug!("unit of work started");
        Ok(PgUnitOfWork {
            tx,
            registry: self.registry.clone(),
        })
    }
}

impl DomainPort for PgDatabase {}

#[async_trait]
impl HealthCheckable for PgDatabase {
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();
        let result = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool).await;
        let latency_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(_) => HealthCheckResult::healthy("postgres-database", latency_ms),
            Err(e) => HealthCheckResult {
                latency_ms,
                ..HealthCheckResult::unhealthy("postgres-database", format!("Database error: {e}"))
            },
        }
    }
}

#[async_trait]
impl LedgerDatabase for PgDatabase {
    async fn begin_ledger(&self, audit: &AuditContext) -> Result<Box<dyn LedgerUnitOfWork>, PortError> {
        Ok(Box::new(self.begin(audit).await?))
    }
}

#[async_trait]
impl ComplianceDatabase for PgDatabase {
    async fn begin_compliance(&self, audit: &AuditContext) -> Result<Box<dyn ComplianceUnitOfWork>, PortError> {
        Ok(Box::new(self.begin(audit).await?))
    }
}

/// One open PostgreSQL transaction
pub struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, Postgres>,
    registry: Arc<StatusRegistry>,
}

impl PgUnitOfWork {
    async fn finish_reservation(&mut self, id: TransactionId, to: TransactionAction) -> Result<Transaction, PortError> {
        let row = TransactionRepository::find_for_update(&mut self.tx, id)
            .await?
            .ok_or_else(|| PortError::not_found("Transaction", id))?;
        let current = Transaction::try_from(row)?;
        if !current.is_reserved() {
            return Err(PortError::invalid_state(format!(
                "transaction {id} is {}, not Reserved",
                current.action
            )));
        }
        let updated = Transaction::try_from(TransactionRepository::set_action(&mut self.tx, id, to).await?)?;
        info!(transaction_id = %id, organization = %updated.organization_id, action = %to, "reservation finished");
        Ok(updated)
    }

    fn report_rows(&self, rows: Vec<ReportRow>) -> Result<Vec<ComplianceReport>, PortError> {
        rows.into_iter()
            .map(|row| row.into_domain(&self.registry).map_err(PortError::from))
            .collect()
    }
}

impl std::fmt::Debug for PgUnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgUnitOfWork").finish_non_exhaustive()
    }
}

#[async_trait]
impl TransactionStore for PgUnitOfWork {
    #[instrument(skip(self), fields(count = organizations.len()))]
    async fn lock_organizations(&mut self, organizations: &[OrganizationId]) -> Result<(), PortError> {
        let mut ordered = organizations.to_vec();
        ordered.sort();
        ordered.dedup();
        for org in ordered {
            if !TransactionRepository::lock_organization(&mut self.tx, org).await? {
                return Err(PortError::not_found("Organization", org));
            }
            debug!(organization = %org, "organization locked");
        }
        Ok(())
    }

    #[instrument(skip(self, entry), fields(organization = %entry.organization_id, action = %entry.action, units = entry.compliance_units))]
    async fn append(&mut self, entry: NewTransaction) -> Result<Transaction, PortError> {
        if !TransactionRepository::organization_exists(&mut self.tx, entry.organization_id).await? {
            return Err(PortError::not_found("Organization", entry.organization_id));
        }
        let transaction = Transaction::try_from(TransactionRepository::insert(&mut self.tx, &entry).await?)?;
        info!(transaction_id = %transaction.id, "transaction appended");
        Ok(transaction)
    }

    #[instrument(skip(self), fields(transaction_id = %id))]
    async fn confirm(&mut self, id: TransactionId) -> Result<Transaction, PortError> {
        self.finish_reservation(id, TransactionAction::Adjustment).await
    }

    #[instrument(skip(self), fields(transaction_id = %id))]
    async fn release(&mut self, id: TransactionId) -> Result<Transaction, PortError> {
        self.finish_reservation(id, TransactionAction::Released).await
    }

    #[instrument(skip(self), fields(transaction_id = %id))]
    async fn by_id(&mut self, id: TransactionId) -> Result<Option<Transaction>, PortError> {
        let row = TransactionRepository::find(&mut self.tx, id).await?;
        Ok(row.map(Transaction::try_from).transpose()?)
    }

    #[instrument(skip(self, filter), fields(organization = %organization))]
    async fn by_org(
        &mut self,
        organization: OrganizationId,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, PortError> {
        let rows = TransactionRepository::by_org(&mut self.tx, organization, filter).await?;
        let transactions = rows
            .into_iter()
            .map(Transaction::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = transactions.len(), "transactions loaded");
        Ok(transactions)
    }

    #[instrument(skip(self, query), fields(organization = %query.organization_id, action = %query.action))]
    async fn sum_units(&mut self, query: &UnitSumQuery) -> Result<i64, PortError> {
        Ok(TransactionRepository::sum_units(&mut self.tx, query).await?)
    }

    #[instrument(skip(self, view), fields(organization = %view.organization_id, available = view.available_units))]
    async fn write_balance_view(&mut self, view: &BalanceView) -> Result<(), PortError> {
        Ok(TransactionRepository::upsert_balance(&mut self.tx, view).await?)
    }
}

#[async_trait]
impl TransferStore for PgUnitOfWork {
    #[instrument(skip(self, transfer), fields(from = %transfer.from_organization_id, to = %transfer.terms.to_organization_id))]
    async fn insert_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer, PortError> {
        let row = TransferRepository::insert(&mut self.tx, &self.registry, &transfer).await?;
        Ok(row.into_domain(&self.registry)?)
    }

    #[instrument(skip(self), fields(transfer_id = %id))]
    async fn transfer_for_update(&mut self, id: TransferId) -> Result<Option<Transfer>, PortError> {
        let row = TransferRepository::find_for_update(&mut self.tx, id).await?;
        Ok(row.map(|r| r.into_domain(&self.registry)).transpose()?)
    }

    #[instrument(skip(self, transfer), fields(transfer_id = %transfer.id, status = %transfer.current_status))]
    async fn update_transfer(&mut self, transfer: &Transfer) -> Result<(), PortError> {
        if !TransferRepository::update(&mut self.tx, &self.registry, transfer).await? {
            return Err(PortError::not_found("Transfer", transfer.id));
        }
        Ok(())
    }

    async fn record_transfer_history(&mut self, entry: &TransferHistoryEntry) -> Result<(), PortError> {
        Ok(TransferRepository::insert_history(&mut self.tx, &self.registry, entry).await?)
    }
}

#[async_trait]
impl IssuanceStore for PgUnitOfWork {
    #[instrument(skip(self, issuance), fields(kind = issuance.kind.entity_name(), organization = %issuance.organization_id))]
    async fn insert_issuance(&mut self, issuance: NewIssuance) -> Result<Issuance, PortError> {
        let kind = issuance.kind;
        let row = IssuanceRepository::insert(&mut self.tx, &self.registry, &issuance).await?;
        Ok(row.into_domain(kind, &self.registry)?)
    }

    #[instrument(skip(self), fields(issuance_id = %id))]
    async fn issuance_for_update(&mut self, id: IssuanceId) -> Result<Option<Issuance>, PortError> {
        let row = IssuanceRepository::find_for_update(&mut self.tx, id).await?;
        Ok(row.map(|r| r.into_domain(id.kind(), &self.registry)).transpose()?)
    }

    #[instrument(skip(self, issuance), fields(issuance_id = %issuance.id, status = %issuance.current_status))]
    async fn update_issuance(&mut self, issuance: &Issuance) -> Result<(), PortError> {
        if !IssuanceRepository::update(&mut self.tx, &self.registry, issuance).await? {
            return Err(PortError::not_found(issuance.kind().entity_name(), issuance.id));
        }
        Ok(())
    }

    async fn record_issuance_history(&mut self, entry: &IssuanceHistoryEntry) -> Result<(), PortError> {
        Ok(IssuanceRepository::insert_history(&mut self.tx, &self.registry, entry).await?)
    }
}

#[async_trait]
impl ReportStore for PgUnitOfWork {
    #[instrument(skip(self, report), fields(organization = %report.organization_id, period = %report.compliance_period, version = report.version))]
    async fn insert_report(&mut self, report: NewReport) -> Result<ComplianceReport, PortError> {
        let row = ReportRepository::insert(&mut self.tx, &self.registry, &report).await?;
        let report = row.into_domain(&self.registry)?;
        info!(report_id = %report.id, "compliance report inserted");
        Ok(report)
    }

    #[instrument(skip(self), fields(report_id = %id))]
    async fn report(&mut self, id: ComplianceReportId) -> Result<Option<ComplianceReport>, PortError> {
        let row = ReportRepository::find(&mut self.tx, id).await?;
        Ok(row.map(|r| r.into_domain(&self.registry)).transpose()?)
    }

    #[instrument(skip(self), fields(report_id = %id))]
    async fn report_for_update(&mut self, id: ComplianceReportId) -> Result<Option<ComplianceReport>, PortError> {
        let row = ReportRepository::find_for_update(&mut self.tx, id).await?;
        Ok(row.map(|r| r.into_domain(&self.registry)).transpose()?)
    }

    #[instrument(skip(self, report), fields(report_id = %report.id, status = %report.current_status))]
    async fn update_report(&mut self, report: &ComplianceReport) -> Result<(), PortError> {
        if !ReportRepository::update(&mut self.tx, &self.registry, report).await? {
            return Err(PortError::not_found("ComplianceReport", report.id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(group = %group))]
    async fn lock_group(&mut self, group: ReportGroupId) -> Result<Vec<ComplianceReport>, PortError> {
        let rows = ReportRepository::lock_group(&mut self.tx, group).await?;
        self.report_rows(rows)
    }

    #[instrument(skip(self), fields(organization = %organization, period = %period))]
    async fn group_for(
        &mut self,
        organization: OrganizationId,
        period: CompliancePeriod,
    ) -> Result<Option<ReportGroupId>, PortError> {
        Ok(ReportRepository::group_for(&mut self.tx, organization, period).await?)
    }

    #[instrument(skip(self), fields(organization = %organization, period = %period))]
    async fn latest_assessed(
        &mut self,
        organization: OrganizationId,
        period: CompliancePeriod,
    ) -> Result<Option<ComplianceReport>, PortError> {
        let row = ReportRepository::latest_assessed(&mut self.tx, &self.registry, organization, period).await?;
        Ok(row.map(|r| r.into_domain(&self.registry)).transpose()?)
    }

    #[instrument(skip(self))]
    async fn report_by_legacy_id(&mut self, legacy_id: i64) -> Result<Option<ComplianceReport>, PortError> {
        let row = ReportRepository::find_by_legacy_id(&mut self.tx, legacy_id).await?;
        Ok(row.map(|r| r.into_domain(&self.registry)).transpose()?)
    }

    #[instrument(skip(self), fields(cutoff = %cutoff))]
    async fn stale_supplemental_drafts(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<ComplianceReport>, PortError> {
        let rows = ReportRepository::stale_supplemental_drafts(&mut self.tx, &self.registry, cutoff).await?;
        self.report_rows(rows)
    }

    #[instrument(skip(self, child), fields(report_id = %child.report_id, group = %child.group_uuid, version = child.version))]
    async fn insert_child(&mut self, child: NewChildRecord) -> Result<ChildRecord, PortError> {
        let row = ChildRepository::insert(&mut self.tx, &child).await?;
        Ok(ChildRecord::try_from(row)?)
    }

    #[instrument(skip(self), fields(report_id = %report))]
    async fn children(&mut self, report: ComplianceReportId) -> Result<Vec<ChildRecord>, PortError> {
        let rows = ChildRepository::for_report(&mut self.tx, report).await?;
        let children = rows
            .into_iter()
            .map(ChildRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = children.len(), "children loaded");
        Ok(children)
    }

    #[instrument(skip(self, effective), fields(report_id = %report, effective = effective.len()))]
    async fn set_effective(&mut self, report: ComplianceReportId, effective: &[ChildRecordId]) -> Result<(), PortError> {
        Ok(ChildRepository::set_effective(&mut self.tx, report, effective).await?)
    }

    #[instrument(skip(self), fields(report_id = %report))]
    async fn summary(&mut self, report: ComplianceReportId) -> Result<Option<ReportSummary>, PortError> {
        Ok(SummaryRepository::find(&mut self.tx, report).await?)
    }

    #[instrument(skip(self, summary), fields(report_id = %summary.report_id, locked = summary.is_locked))]
    async fn save_summary(&mut self, summary: &ReportSummary) -> Result<(), PortError> {
        Ok(SummaryRepository::upsert(&mut self.tx, summary).await?)
    }

    #[instrument(skip(self), fields(report_id = %report))]
    async fn organization_snapshot(
        &mut self,
        report: ComplianceReportId,
    ) -> Result<Option<OrganizationSnapshot>, PortError> {
        let row = ReportRepository::snapshot(&mut self.tx, report).await?;
        Ok(row.map(OrganizationSnapshot::from))
    }

    #[instrument(skip(self, snapshot), fields(report_id = %snapshot.report_id))]
    async fn save_organization_snapshot(&mut self, snapshot: &OrganizationSnapshot) -> Result<(), PortError> {
        Ok(ReportRepository::upsert_snapshot(&mut self.tx, snapshot).await?)
    }

    #[instrument(skip(self), fields(organization = %organization))]
    async fn organization_profile(
        &mut self,
        organization: OrganizationId,
    ) -> Result<Option<OrganizationProfile>, PortError> {
        let row = ReportRepository::organization_profile(&mut self.tx, organization).await?;
        Ok(row.map(OrganizationProfile::from))
    }

    async fn record_status_history(&mut self, entry: &StatusHistoryEntry) -> Result<(), PortError> {
        Ok(ReportRepository::insert_history(&mut self.tx, &self.registry, entry).await?)
    }

    #[instrument(skip(self), fields(action = %action))]
    async fn legacy_processed(
        &mut self,
        legacy_id: i64,
        action: LegacyAction,
    ) -> Result<Option<ComplianceReportId>, PortError> {
        Ok(ReportRepository::legacy_processed(&mut self.tx, legacy_id, action).await?)
    }

    #[instrument(skip(self), fields(action = %action, report_id = %report))]
    async fn mark_legacy_processed(
        &mut self,
        legacy_id: i64,
        action: LegacyAction,
        report: ComplianceReportId,
    ) -> Result<(), PortError> {
        Ok(ReportRepository::mark_legacy_processed(&mut self.tx, legacy_id, action, report).await?)
    }
}

#[async_trait]
impl LedgerUnitOfWork for PgUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<(), PortError> {
        self.tx.commit().await.map_err(db_to_port_error)?;
        debug!("unit of work committed");
        Ok(())
    }
}

#[async_trait]
impl ComplianceUnitOfWork for PgUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<(), PortError> {
        self.tx.commit().await.map_err(db_to_port_error)?;
        debug!("unit of work committed");
        Ok(())
    }
}
