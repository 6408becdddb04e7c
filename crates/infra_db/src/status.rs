//! Status name to id resolution
//!
//! Status ids in the reference tables have been renumbered by migrations
//! before, so the domain only knows status names. The registry loads every
//! table once at start-up and refuses to start when a name the domain uses
//! has no row.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::str::FromStr;

use sqlx::PgPool;
use tracing::{info, warn};

use domain_compliance::ReportStatus;
use domain_ledger::transfer::{TransferCategory, TransferStatus};
use domain_ledger::{IssuanceKind, IssuanceStatus};

use crate::error::DatabaseError;

/// Bidirectional mapping for one reference table
#[derive(Debug, Clone)]
pub struct StatusTable<S> {
    table: &'static str,
    ids: HashMap<S, i32>,
    names: HashMap<i32, S>,
}

impl<S> StatusTable<S>
where
    S: Copy + Eq + Hash + Display + FromStr,
{
    /// Builds the mapping from `(id, name)` rows
    ///
    /// Rows whose names the domain does not know are skipped; a domain
    /// value missing from the rows is an error.
    pub fn from_rows(table: &'static str, rows: &[(i32, String)], required: &[S]) -> Result<Self, DatabaseError> {
        let mut ids = HashMap::new();
        let mut names = HashMap::new();
        for (id, name) in rows {
            match name.parse::<S>() {
                Ok(status) => {
                    ids.insert(status, *id);
                    names.insert(*id, status);
                }
                Err(_) => warn!(table, id, name = %name, "ignoring unmapped status row"),
            }
        }
        if let Some(missing) = required.iter().find(|s| !ids.contains_key(*s)) {
            return Err(DatabaseError::UnknownStatus {
                table,
                name: missing.to_string(),
            });
        }
        Ok(Self { table, ids, names })
    }

    pub fn id(&self, status: S) -> Result<i32, DatabaseError> {
        self.ids.get(&status).copied().ok_or_else(|| DatabaseError::UnknownStatus {
            table: self.table,
            name: status.to_string(),
        })
    }

    pub fn status(&self, id: i32) -> Result<S, DatabaseError> {
        self.names
            .get(&id)
            .copied()
            .ok_or_else(|| DatabaseError::corrupt(self.table, id))
    }

    pub fn table(&self) -> &'static str {
        self.table
    }
}

const TRANSFER_CATEGORIES: [TransferCategory; 4] = [
    TransferCategory::A,
    TransferCategory::B,
    TransferCategory::C,
    TransferCategory::D,
];

/// Status ids for every workflow the adapters persist
#[derive(Debug, Clone)]
pub struct StatusRegistry {
    pub reports: StatusTable<ReportStatus>,
    pub transfers: StatusTable<TransferStatus>,
    pub transfer_categories: StatusTable<TransferCategory>,
    pub initiative_agreements: StatusTable<IssuanceStatus>,
    pub admin_adjustments: StatusTable<IssuanceStatus>,
}

impl StatusRegistry {
    /// Reads every status table
    pub async fn load(pool: &PgPool) -> Result<Self, DatabaseError> {
        let registry = Self {
            reports: StatusTable::from_rows(
                "compliance_report_status",
                &fetch(pool, "SELECT compliance_report_status_id, status::text FROM compliance_report_status").await?,
                &ReportStatus::ALL,
            )?,
            transfers: StatusTable::from_rows(
                "transfer_status",
                &fetch(pool, "SELECT transfer_status_id, status::text FROM transfer_status").await?,
                &TransferStatus::ALL,
            )?,
            transfer_categories: StatusTable::from_rows(
                "transfer_category",
                &fetch(pool, "SELECT transfer_category_id, category::text FROM transfer_category").await?,
                &TRANSFER_CATEGORIES,
            )?,
            initiative_agreements: StatusTable::from_rows(
                "initiative_agreement_status",
                &fetch(
                    pool,
                    "SELECT initiative_agreement_status_id, status::text FROM initiative_agreement_status",
                )
                .await?,
                &IssuanceStatus::ALL,
            )?,
            admin_adjustments: StatusTable::from_rows(
                "admin_adjustment_status",
                &fetch(pool, "SELECT admin_adjustment_status_id, status::text FROM admin_adjustment_status").await?,
                &IssuanceStatus::ALL,
            )?,
        };
        info!("status registry loaded");
        Ok(registry)
    }

    pub fn issuances(&self, kind: IssuanceKind) -> &StatusTable<IssuanceStatus> {
        match kind {
            IssuanceKind::InitiativeAgreement => &self.initiative_agreements,
            IssuanceKind::AdminAdjustment => &self.admin_adjustments,
        }
    }
}

async fn fetch(pool: &PgPool, sql: &'static str) -> Result<Vec<(i32, String)>, DatabaseError> {
    Ok(sqlx::query_as::<_, (i32, String)>(sql).fetch_all(pool).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_rows() -> Vec<(i32, String)> {
        ReportStatus::ALL
            .iter()
            .enumerate()
            .map(|(i, s)| (i as i32 + 10, s.as_str().to_string()))
            .collect()
    }

    #[test]
    fn test_resolves_both_directions() {
        let table = StatusTable::from_rows("compliance_report_status", &report_rows(), &ReportStatus::ALL).unwrap();
        let id = table.id(ReportStatus::Submitted).unwrap();
        assert_eq!(id, 11);
        assert_eq!(table.status(id).unwrap(), ReportStatus::Submitted);
    }

    #[test]
    fn test_missing_status_fails() {
        let rows: Vec<_> = report_rows()
            .into_iter()
            .filter(|(_, name)| name != "Reassessed")
            .collect();
        let err = StatusTable::from_rows("compliance_report_status", &rows, &ReportStatus::ALL).unwrap_err();
        assert!(matches!(err, DatabaseError::UnknownStatus { name, .. } if name == "Reassessed"));
    }

    #[test]
    fn test_extra_rows_are_ignored() {
        let mut rows = report_rows();
        rows.push((99, "Archived".to_string()));
        let table = StatusTable::from_rows("compliance_report_status", &rows, &ReportStatus::ALL).unwrap();
        assert!(table.status(99).is_err());
    }
}
