//! Report summary repository
//!
//! `compliance_report_summary` keeps every line as a scalar column:
//! renewable lines as `line_{n}_{gasoline|diesel|jet_fuel}` for lines 1 to
//! 11, low-carbon lines as `line_12` to `line_22`. Supplier inputs are a
//! JSONB column. The SQL is generated from the line layout so the column
//! list and the bind order cannot drift apart.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, Row};

use core_kernel::{ComplianceReportId, Money};
use domain_compliance::{CategoryValues, FuelCategory, LowCarbonLines, RenewableLines, ReportSummary, SummaryInputs};

use crate::error::DatabaseError;

fn suffix(category: FuelCategory) -> &'static str {
    match category {
        FuelCategory::Gasoline => "gasoline",
        FuelCategory::Diesel => "diesel",
        FuelCategory::JetFuel => "jet_fuel",
    }
}

/// Lines 1 to 10 in line order
fn renewable_volumes(lines: &RenewableLines) -> [Decimal; 10] {
    [
        lines.line_1,
        lines.line_2,
        lines.line_3,
        lines.line_4,
        lines.line_5,
        lines.line_6,
        lines.line_7,
        lines.line_8,
        lines.line_9,
        lines.line_10,
    ]
}

/// Lines 12 to 20 and 22 in line order
fn low_carbon_units(lines: &LowCarbonLines) -> [i64; 10] {
    [
        lines.line_12,
        lines.line_13,
        lines.line_14,
        lines.line_15,
        lines.line_16,
        lines.line_17,
        lines.line_18,
        lines.line_19,
        lines.line_20,
        lines.line_22,
    ]
}

const LOW_CARBON_UNIT_LINES: [u8; 10] = [12, 13, 14, 15, 16, 17, 18, 19, 20, 22];

fn line_columns() -> Vec<String> {
    let mut columns = Vec::with_capacity(44);
    for category in FuelCategory::ALL {
        for n in 1..=11 {
            columns.push(format!("line_{n}_{}", suffix(category)));
        }
    }
    columns.extend(LOW_CARBON_UNIT_LINES.iter().map(|n| format!("line_{n}")));
    columns.push("line_21".to_string());
    columns
}

fn upsert_sql() -> String {
    let lines = line_columns();
    let mut columns = vec![
        "compliance_report_id".to_string(),
        "is_locked".to_string(),
        "lines_7_and_9_locked".to_string(),
        "computed_at".to_string(),
        "summary_inputs".to_string(),
    ];
    columns.extend(lines.iter().cloned());
    let placeholders = (1..=columns.len()).map(|i| format!("${i}")).collect::<Vec<_>>().join(", ");
    let updates = columns
        .iter()
        .skip(1)
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO compliance_report_summary ({}) VALUES ({placeholders}) \
         ON CONFLICT (compliance_report_id) DO UPDATE SET {updates}, update_date = now()",
        columns.join(", ")
    )
}

fn renewable_from_row(row: &PgRow, category: FuelCategory) -> Result<RenewableLines, sqlx::Error> {
    let line = |n: u8| row.try_get::<Decimal, _>(format!("line_{n}_{}", suffix(category)).as_str());
    Ok(RenewableLines {
        line_1: line(1)?,
        line_2: line(2)?,
        line_3: line(3)?,
        line_4: line(4)?,
        line_5: line(5)?,
        line_6: line(6)?,
        line_7: line(7)?,
        line_8: line(8)?,
        line_9: line(9)?,
        line_10: line(10)?,
        line_11: Money::new(line(11)?),
    })
}

fn summary_from_row(row: &PgRow) -> Result<ReportSummary, sqlx::Error> {
    let units = |n: &str| row.try_get::<i64, _>(n);
    let inputs: Json<CategoryValues<SummaryInputs>> = row.try_get("summary_inputs")?;
    Ok(ReportSummary {
        report_id: ComplianceReportId::new(row.try_get("compliance_report_id")?),
        renewable: CategoryValues {
            gasoline: renewable_from_row(row, FuelCategory::Gasoline)?,
            diesel: renewable_from_row(row, FuelCategory::Diesel)?,
            jet_fuel: renewable_from_row(row, FuelCategory::JetFuel)?,
        },
        low_carbon: LowCarbonLines {
            line_12: units("line_12")?,
            line_13: units("line_13")?,
            line_14: units("line_14")?,
            line_15: units("line_15")?,
            line_16: units("line_16")?,
            line_17: units("line_17")?,
            line_18: units("line_18")?,
            line_19: units("line_19")?,
            line_20: units("line_20")?,
            line_21: Money::new(row.try_get("line_21")?),
            line_22: units("line_22")?,
        },
        inputs: inputs.0,
        is_locked: row.try_get("is_locked")?,
        lines_7_and_9_locked: row.try_get("lines_7_and_9_locked")?,
        computed_at: row.try_get::<Option<DateTime<Utc>>, _>("computed_at")?,
    })
}

/// Data access for `compliance_report_summary`
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryRepository;

impl SummaryRepository {
    pub async fn find(conn: &mut PgConnection, report: ComplianceReportId) -> Result<Option<ReportSummary>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM compliance_report_summary WHERE compliance_report_id = $1")
            .bind(report.value())
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.as_ref().map(summary_from_row).transpose()?)
    }

    pub async fn upsert(conn: &mut PgConnection, summary: &ReportSummary) -> Result<(), DatabaseError> {
        let sql = upsert_sql();
        let mut query = sqlx::query(&sql)
            .bind(summary.report_id.value())
            .bind(summary.is_locked)
            .bind(summary.lines_7_and_9_locked)
            .bind(summary.computed_at)
            .bind(Json(&summary.inputs));
        for (_, lines) in summary.renewable.iter() {
            for value in renewable_volumes(lines) {
                query = query.bind(value);
            }
            query = query.bind(lines.line_11.amount());
        }
        for value in low_carbon_units(&summary.low_carbon) {
            query = query.bind(value);
        }
        query = query.bind(summary.low_carbon.line_21.amount());
        query.execute(&mut *conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_layout_matches_bind_order() {
        let columns = line_columns();
        assert_eq!(columns.len(), 44);
        assert_eq!(columns[0], "line_1_gasoline");
        assert_eq!(columns[10], "line_11_gasoline");
        assert_eq!(columns[11], "line_1_diesel");
        assert_eq!(columns[32], "line_11_jet_fuel");
        assert_eq!(columns[33], "line_12");
        assert_eq!(columns[42], "line_22");
        assert_eq!(columns[43], "line_21");
    }

    #[test]
    fn test_upsert_has_one_placeholder_per_column() {
        let sql = upsert_sql();
        assert!(sql.contains("$49)"));
        assert!(!sql.contains("$50"));
        assert!(sql.contains("is_locked = EXCLUDED.is_locked"));
    }
}
