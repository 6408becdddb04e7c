//! Unit tests for the Identifiers module
//!
//! Tests cover construction, display prefixes, parsing and ordering.

use core_kernel::{
    AdminAdjustmentId, ChildRecordId, ComplianceReportId, EntityGroupId, InitiativeAgreementId,
    OrganizationId, ReportGroupId, SummaryId, TransactionId, TransferId,
};
use uuid::Uuid;

mod sequence_ids {
    use super::*;

    #[test]
    fn test_prefixes() {
        assert_eq!(OrganizationId::prefix(), "ORG");
        assert_eq!(TransactionId::prefix(), "TXN");
        assert_eq!(TransferId::prefix(), "CT");
        assert_eq!(InitiativeAgreementId::prefix(), "IA");
        assert_eq!(AdminAdjustmentId::prefix(), "AA");
        assert_eq!(ComplianceReportId::prefix(), "CR");
        assert_eq!(ChildRecordId::prefix(), "REC");
        assert_eq!(SummaryId::prefix(), "SUM");
    }

    #[test]
    fn test_display_and_parse() {
        let id = ComplianceReportId::new(314);
        assert_eq!(id.to_string(), "CR-314");
        let parsed: ComplianceReportId = "CR-314".parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("CR-abc".parse::<ComplianceReportId>().is_err());
        assert!("".parse::<OrganizationId>().is_err());
    }

    #[test]
    fn test_i64_conversions() {
        let id: TransferId = 12.into();
        let raw: i64 = id.into();
        assert_eq!(raw, 12);
    }

    #[test]
    fn test_sorting_follows_raw_value() {
        let mut ids = vec![OrganizationId::new(3), OrganizationId::new(1), OrganizationId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![OrganizationId::new(1), OrganizationId::new(2), OrganizationId::new(3)]);
    }

    #[test]
    fn test_serde_is_transparent() {
        let json = serde_json::to_string(&TransactionId::new(5)).unwrap();
        assert_eq!(json, "5");
    }
}

mod uuid_ids {
    use super::*;

    #[test]
    fn test_new_generates_unique_groups() {
        assert_ne!(ReportGroupId::new(), ReportGroupId::new());
        assert_ne!(EntityGroupId::new(), EntityGroupId::new());
    }

    #[test]
    fn test_from_uuid() {
        let uuid = Uuid::new_v4();
        assert_eq!(*ReportGroupId::from_uuid(uuid).as_uuid(), uuid);
        assert_eq!(*EntityGroupId::from(uuid).as_uuid(), uuid);
    }

    #[test]
    fn test_parse_with_and_without_prefix() {
        let uuid = Uuid::new_v4();
        let with_prefix: ReportGroupId = format!("GRP-{uuid}").parse().unwrap();
        let bare: ReportGroupId = uuid.to_string().parse().unwrap();
        assert_eq!(with_prefix, bare);
    }
}
