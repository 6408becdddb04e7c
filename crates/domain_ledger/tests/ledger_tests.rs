//! Tests for domain_ledger services and invariants

use std::sync::Arc;

use chrono::NaiveDate;
use proptest::prelude::*;
use rust_decimal_macros::dec;

use core_kernel::{AuditContext, OrganizationId, Role, UserIdentity};
use domain_ledger::ports::mock::MemoryLedgerDatabase;
use domain_ledger::{
    IssuanceKind, IssuanceService, IssuanceStatus, LedgerDatabase, LedgerError, LedgerService,
    NewIssuance, TransactionAction, TransactionStore, TransferCategory, TransferRecommendation, TransferService,
    TransferStatus, TransferTerms,
};

fn org(id: i64) -> OrganizationId {
    OrganizationId::new(id)
}

fn analyst() -> UserIdentity {
    UserIdentity::new("analyst", [Role::Analyst])
}

fn director() -> UserIdentity {
    UserIdentity::new("director", [Role::Director])
}

// ============================================================================
// Transfer Tests
// ============================================================================

mod transfer_tests {
    use super::*;

    fn terms(quantity: i64) -> TransferTerms {
        TransferTerms {
            to_organization_id: org(2),
            agreement_date: chrono::Utc::now().date_naive(),
            quantity,
            price_per_unit: dec!(200.00),
        }
    }

    fn setup() -> (Arc<MemoryLedgerDatabase>, TransferService) {
        let db = Arc::new(MemoryLedgerDatabase::with_balances(&[(org(1), 50_000), (org(2), 50_000)]));
        let service = TransferService::new(db.clone(), LedgerService::new());
        (db, service)
    }

    #[tokio::test]
    async fn test_record_transfer_moves_units() {
        let (db, service) = setup();
        let sender = UserIdentity::supplier("sender", org(1));
        let receiver = UserIdentity::supplier("receiver", org(2));

        let transfer = service.create(&sender, org(1), terms(1_000)).await.unwrap();
        service.send(&sender, transfer.id).await.unwrap();
        service.sign(&receiver, transfer.id).await.unwrap();
        service
            .recommend(&analyst(), transfer.id, TransferRecommendation::Record)
            .await
            .unwrap();
        let recorded = service.record(&director(), transfer.id, None).await.unwrap();

        assert_eq!(recorded.current_status, TransferStatus::Recorded);
        assert_eq!(recorded.category, Some(TransferCategory::A));

        let ledger = LedgerService::new();
        let mut uow = db.begin_ledger(&AuditContext::new("reader")).await.unwrap();
        assert_eq!(ledger.committed_balance(uow.as_mut(), org(1)).await.unwrap(), 49_000);
        assert_eq!(ledger.committed_balance(uow.as_mut(), org(2)).await.unwrap(), 51_000);

        let debit = uow.by_id(recorded.from_transaction_id.unwrap()).await.unwrap().unwrap();
        let credit = uow.by_id(recorded.to_transaction_id.unwrap()).await.unwrap().unwrap();
        assert_eq!((debit.compliance_units, debit.action), (-1_000, TransactionAction::Adjustment));
        assert_eq!((credit.compliance_units, credit.action), (1_000, TransactionAction::Adjustment));
    }

    #[tokio::test]
    async fn test_no_ledger_entries_before_recording() {
        let (db, service) = setup();
        let sender = UserIdentity::supplier("sender", org(1));
        let transfer = service.create(&sender, org(1), terms(10)).await.unwrap();
        service.send(&sender, transfer.id).await.unwrap();

        let state = db.snapshot().await;
        // only the two opening balances
        assert_eq!(state.transactions.len(), 2);
        assert_eq!(state.transfer_history.len(), 2);
    }

    #[tokio::test]
    async fn test_send_requires_available_units() {
        let (_db, service) = setup();
        let sender = UserIdentity::supplier("sender", org(1));
        let transfer = service.create(&sender, org(1), terms(50_001)).await.unwrap();
        let err = service.send(&sender, transfer.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientUnits { shortfall: 1, .. }));
    }

    #[tokio::test]
    async fn test_record_is_atomic_when_sender_drained() {
        let (db, service) = setup();
        let sender = UserIdentity::supplier("sender", org(1));
        let receiver = UserIdentity::supplier("receiver", org(2));
        let transfer = service.create(&sender, org(1), terms(40_000)).await.unwrap();
        service.send(&sender, transfer.id).await.unwrap();
        service.sign(&receiver, transfer.id).await.unwrap();
        service
            .recommend(&analyst(), transfer.id, TransferRecommendation::Record)
            .await
            .unwrap();

        // drain the sender between signing and recording
        {
            let ledger = LedgerService::new();
            let mut uow = db.begin_ledger(&AuditContext::new("director")).await.unwrap();
            ledger.adjust(uow.as_mut(), org(1), -20_000).await.unwrap();
            uow.commit().await.unwrap();
        }

        let err = service.record(&director(), transfer.id, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientUnits { .. }));

        let state = db.snapshot().await;
        assert_eq!(state.transfers[&transfer.id].current_status, TransferStatus::Recommended);
        // two openings plus the drain; no partial leg
        assert_eq!(state.transactions.len(), 3);
    }

    #[tokio::test]
    async fn test_receiver_cannot_rescind() {
        let (_db, service) = setup();
        let sender = UserIdentity::supplier("sender", org(1));
        let receiver = UserIdentity::supplier("receiver", org(2));
        let transfer = service.create(&sender, org(1), terms(10)).await.unwrap();
        service.send(&sender, transfer.id).await.unwrap();

        let err = service.rescind(&receiver, transfer.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Forbidden(_)));
        let rescinded = service.rescind(&sender, transfer.id).await.unwrap();
        assert_eq!(rescinded.current_status, TransferStatus::Rescinded);
    }

    #[tokio::test]
    async fn test_director_category_override() {
        let (_db, service) = setup();
        let sender = UserIdentity::supplier("sender", org(1));
        let receiver = UserIdentity::supplier("receiver", org(2));
        let mut old_terms = terms(10);
        old_terms.agreement_date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let transfer = service.create(&sender, org(1), old_terms).await.unwrap();
        service.send(&sender, transfer.id).await.unwrap();
        service.sign(&receiver, transfer.id).await.unwrap();
        service
            .recommend(&analyst(), transfer.id, TransferRecommendation::Record)
            .await
            .unwrap();
        let recorded = service
            .record(&director(), transfer.id, Some(TransferCategory::D))
            .await
            .unwrap();
        assert_eq!(recorded.category, Some(TransferCategory::D));
    }
}

// ============================================================================
// Issuance Tests
// ============================================================================

mod issuance_tests {
    use super::*;

    fn setup() -> (Arc<MemoryLedgerDatabase>, IssuanceService) {
        let db = Arc::new(MemoryLedgerDatabase::with_balances(&[(org(1), 1_000)]));
        let service = IssuanceService::new(db.clone(), LedgerService::new());
        (db, service)
    }

    fn admin_adjustment(units: i64) -> NewIssuance {
        NewIssuance {
            kind: IssuanceKind::AdminAdjustment,
            organization_id: org(1),
            compliance_units: units,
            transaction_effective_date: None,
            gov_comment: Some("correction".to_string()),
        }
    }

    #[tokio::test]
    async fn test_recommend_reserves_and_approve_confirms() {
        let (db, service) = setup();
        let issuance = service.create(&analyst(), admin_adjustment(-400)).await.unwrap();
        let recommended = service.recommend(&analyst(), issuance.id).await.unwrap();
        let tx = recommended.transaction_id.unwrap();

        let ledger = LedgerService::new();
        {
            let mut uow = db.begin_ledger(&AuditContext::new("reader")).await.unwrap();
            assert_eq!(ledger.available_balance(uow.as_mut(), org(1)).await.unwrap(), 600);
            assert_eq!(ledger.committed_balance(uow.as_mut(), org(1)).await.unwrap(), 1_000);
        }

        let approved = service.approve(&director(), issuance.id).await.unwrap();
        assert_eq!(approved.current_status, IssuanceStatus::Approved);

        let mut uow = db.begin_ledger(&AuditContext::new("reader")).await.unwrap();
        assert_eq!(ledger.committed_balance(uow.as_mut(), org(1)).await.unwrap(), 600);
        let entry = uow.by_id(tx).await.unwrap().unwrap();
        assert_eq!(entry.action, TransactionAction::Adjustment);
    }

    #[tokio::test]
    async fn test_delete_recommended_releases() {
        let (db, service) = setup();
        let issuance = service.create(&analyst(), admin_adjustment(-400)).await.unwrap();
        let recommended = service.recommend(&analyst(), issuance.id).await.unwrap();
        service.delete(&analyst(), issuance.id).await.unwrap();

        let state = db.snapshot().await;
        let entry = &state.transactions[&recommended.transaction_id.unwrap()];
        assert_eq!(entry.action, TransactionAction::Released);
    }

    #[tokio::test]
    async fn test_initiative_agreement_rejects_debit() {
        let (_db, service) = setup();
        let mut bad = admin_adjustment(-1);
        bad.kind = IssuanceKind::InitiativeAgreement;
        assert!(matches!(
            service.create(&analyst(), bad).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_supplier_cannot_create() {
        let (_db, service) = setup();
        let supplier = UserIdentity::supplier("s", org(1));
        let err = service.create(&supplier, admin_adjustment(5)).await.unwrap_err();
        assert_eq!(err.kind(), core_kernel::ErrorKind::Forbidden);
    }
}

// ============================================================================
// Invariant properties
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Adjust(i64),
    Reserve(i64),
    Confirm(usize),
    Release(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (-500i64..500).prop_filter("non-zero", |d| *d != 0).prop_map(Op::Adjust),
        (-500i64..500).prop_filter("non-zero", |d| *d != 0).prop_map(Op::Reserve),
        (0usize..8).prop_map(Op::Confirm),
        (0usize..8).prop_map(Op::Release),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_available_never_negative_and_replay_matches(
        opening in 0i64..1_000,
        ops in prop::collection::vec(op_strategy(), 1..40),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let db = MemoryLedgerDatabase::with_balances(&[(org(1), opening)]);
            let ledger = LedgerService::new();
            let mut uow = db.begin_ledger(&AuditContext::new("prop")).await.unwrap();
            let mut reservations = Vec::new();

            for op in ops {
                let _ = match op {
                    Op::Adjust(d) => ledger.adjust(uow.as_mut(), org(1), d).await.map(|_| ()),
                    Op::Reserve(d) => ledger.reserve(uow.as_mut(), org(1), d).await.map(|t| reservations.push(t.id)),
                    Op::Confirm(i) if !reservations.is_empty() => {
                        let id = reservations[i % reservations.len()];
                        ledger.confirm_reservation(uow.as_mut(), id).await.map(|_| ())
                    }
                    Op::Release(i) if !reservations.is_empty() => {
                        let id = reservations[i % reservations.len()];
                        ledger.release_reservation(uow.as_mut(), id).await.map(|_| ())
                    }
                    _ => Ok(()),
                };

                let view = ledger.balance(uow.as_mut(), org(1)).await.unwrap();
                assert!(view.available_units >= 0, "available went negative: {view:?}");
                let replayed = ledger.replay(uow.as_mut(), org(1)).await.unwrap();
                assert!(view.same_figures(&replayed));
            }
        });
    }

    #[test]
    fn prop_reserve_release_round_trip(opening in 0i64..10_000, delta in -10_000i64..10_000) {
        prop_assume!(delta != 0 && opening + delta >= 0);
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let db = MemoryLedgerDatabase::with_balances(&[(org(1), opening)]);
            let ledger = LedgerService::new();
            let mut uow = db.begin_ledger(&AuditContext::new("prop")).await.unwrap();

            let before = ledger.available_balance(uow.as_mut(), org(1)).await.unwrap();
            let reservation = ledger.reserve(uow.as_mut(), org(1), delta).await.unwrap();
            ledger.release_reservation(uow.as_mut(), reservation.id).await.unwrap();
            assert_eq!(ledger.available_balance(uow.as_mut(), org(1)).await.unwrap(), before);
        });
    }

    #[test]
    fn prop_reserve_confirm_commits_delta(opening in 0i64..10_000, delta in -10_000i64..10_000) {
        prop_assume!(delta != 0 && opening + delta >= 0);
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let db = MemoryLedgerDatabase::with_balances(&[(org(1), opening)]);
            let ledger = LedgerService::new();
            let mut uow = db.begin_ledger(&AuditContext::new("prop")).await.unwrap();

            let reservation = ledger.reserve(uow.as_mut(), org(1), delta).await.unwrap();
            ledger.confirm_reservation(uow.as_mut(), reservation.id).await.unwrap();
            let view = ledger.balance(uow.as_mut(), org(1)).await.unwrap();
            assert_eq!(view.committed_units, opening + delta);
            assert_eq!(view.available_units, opening + delta);
        });
    }
}

#[tokio::test]
async fn test_uncommitted_unit_of_work_rolls_back() {
    let db = MemoryLedgerDatabase::with_balances(&[(org(1), 100)]);
    let ledger = LedgerService::new();
    {
        let mut uow = db.begin_ledger(&AuditContext::new("tester")).await.unwrap();
        ledger.adjust(uow.as_mut(), org(1), -50).await.unwrap();
        // dropped without commit
    }
    let state = db.snapshot().await;
    assert_eq!(state.transactions.len(), 1);
    assert!(state.balance_views.is_empty());
}
