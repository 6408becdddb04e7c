//! Integration Tests for the LCFS workspace
//!
//! Cross-crate scenarios: transfers and issuances from the ledger crate
//! feeding report reservations in the compliance crate, legacy ingestion,
//! and ledger invariants over generated histories. Everything runs on the
//! in-memory adapters.

use std::sync::Arc;

use proptest::prelude::*;
use rust_decimal_macros::dec;

use core_kernel::{AuditContext, OrganizationId};
use domain_compliance::ports::mock::MemoryLegacyInbox;
use domain_compliance::{
    derive_units, ChildPayload, ComplianceError, ConsumerSettings, InboxMessage, LegacyAction, LegacyConsumer,
    LegacyMessage, ReportStatus, SummaryCalculator,
};
use domain_ledger::ports::mock::MemoryLedgerDatabase;
use domain_ledger::{
    LedgerDatabase, LedgerError, LedgerService, TransactionAction, TransferRecommendation, TransferService,
    TransferStatus,
};
use test_utils::{
    assert_balance_consistent, assert_effective_set_sound, assert_replay_matches, child_chains_strategy,
    diesel_debit, ledger_history_strategy, FuelLineBuilder, IdentityFixtures, LedgerOp, PeriodFixtures,
    ReferenceFixtures, TransferTermsBuilder, WorkflowHarness, BIODIESEL,
};

fn org(id: i64) -> OrganizationId {
    OrganizationId::new(id)
}

mod transfer_to_report_workflow {
    use super::*;

    fn transfers(harness: &WorkflowHarness) -> TransferService {
        TransferService::new(harness.database.clone(), harness.ledger.clone())
    }

    /// Draft → Sent → Submitted → Recommended(Record) → Recorded
    async fn record_transfer(harness: &WorkflowHarness, from: i64, to: i64, quantity: i64) {
        let service = transfers(harness);
        let transfer = service
            .create(
                &IdentityFixtures::supplier(from),
                org(from),
                TransferTermsBuilder::to(to).quantity(quantity).build(),
            )
            .await
            .unwrap();
        service.send(&IdentityFixtures::supplier(from), transfer.id).await.unwrap();
        service.sign(&IdentityFixtures::supplier(to), transfer.id).await.unwrap();
        service
            .recommend(&IdentityFixtures::analyst(), transfer.id, TransferRecommendation::Record)
            .await
            .unwrap();
        let recorded = service.record(&IdentityFixtures::director(), transfer.id, None).await.unwrap();
        assert_eq!(recorded.current_status, TransferStatus::Recorded);
    }

    #[tokio::test]
    async fn test_recorded_transfer_moves_units() {
        let harness = WorkflowHarness::new(&[(1, 50_000), (2, 50_000)]);
        record_transfer(&harness, 1, 2, 1_000).await;

        assert_eq!(harness.balances(1).await, (49_000, 49_000));
        assert_eq!(harness.balances(2).await, (51_000, 51_000));

        let state = harness.database.snapshot().await;
        let mut legs: Vec<(OrganizationId, i64)> = state
            .ledger
            .transactions
            .values()
            .filter(|t| t.compliance_units.abs() == 1_000)
            .inspect(|t| assert_eq!(t.action, TransactionAction::Adjustment))
            .map(|t| (t.organization_id, t.compliance_units))
            .collect();
        legs.sort();
        assert_eq!(legs, vec![(org(1), -1_000), (org(2), 1_000)]);
    }

    #[tokio::test]
    async fn test_received_units_fund_an_exact_reservation() {
        let harness = WorkflowHarness::new(&[(1, 50_000), (2, 0)]);
        record_transfer(&harness, 1, 2, 1_000).await;
        let supplier = IdentityFixtures::supplier(2);

        let over = harness
            .workflow
            .create_report(&supplier, org(2), PeriodFixtures::current())
            .await
            .unwrap();
        harness.workflow.add_child(&supplier, over.id, diesel_debit(1_001)).await.unwrap();
        let err = harness.workflow.submit(&supplier, over.id).await.unwrap_err();
        assert!(matches!(err, ComplianceError::Ledger(LedgerError::InsufficientUnits { .. })), "{err:?}");
        assert_eq!(harness.balances(2).await, (1_000, 1_000));

        let state = harness.database.snapshot().await;
        assert_eq!(state.reports[&over.id].current_status, ReportStatus::Draft);
        assert!(state.reports[&over.id].transaction_id.is_none());

        let exact = harness
            .workflow
            .create_report(&supplier, org(2), PeriodFixtures::legacy())
            .await
            .unwrap();
        harness.workflow.add_child(&supplier, exact.id, diesel_debit(1_000)).await.unwrap();
        let submitted = harness.workflow.submit(&supplier, exact.id).await.unwrap();
        assert_eq!(submitted.current_status, ReportStatus::Submitted);
        assert_eq!(harness.balances(2).await, (1_000, 0));
    }

    #[tokio::test]
    async fn test_sender_cannot_overspend_reserved_units() {
        let harness = WorkflowHarness::new(&[(1, 1_000), (2, 0)]);
        let supplier = IdentityFixtures::supplier(1);
        let report = harness
            .workflow
            .create_report(&supplier, org(1), PeriodFixtures::current())
            .await
            .unwrap();
        harness.workflow.add_child(&supplier, report.id, diesel_debit(600)).await.unwrap();
        harness.workflow.submit(&supplier, report.id).await.unwrap();
        assert_eq!(harness.balances(1).await, (1_000, 400));

        let service = transfers(&harness);
        let transfer = service
            .create(&supplier, org(1), TransferTermsBuilder::to(2).quantity(500).build())
            .await
            .unwrap();
        let err = service.send(&supplier, transfer.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientUnits { .. }), "{err:?}");
    }
}

mod legacy_ingestion {
    use super::*;

    fn message(message_id: i64, action: LegacyAction, units: Option<i64>) -> InboxMessage {
        InboxMessage {
            message_id,
            attempts: 0,
            body: LegacyMessage {
                legacy_id: 9_001,
                organization_id: org(1),
                compliance_period: 2023,
                action,
                compliance_units: units,
            },
        }
    }

    #[tokio::test]
    async fn test_redelivered_messages_are_idempotent() {
        let harness = WorkflowHarness::new(&[(1, 10_000)]);
        let inbox = Arc::new(MemoryLegacyInbox::new());
        let consumer = LegacyConsumer::new(harness.workflow.clone(), inbox.clone(), ConsumerSettings::default());

        inbox.push(message(1, LegacyAction::Create, None)).await;
        inbox.push(message(2, LegacyAction::Submit, Some(-300))).await;
        let first = consumer.poll_once().await.unwrap();
        assert_eq!(first.applied, 2);
        let after_first = harness.database.snapshot().await;

        inbox.push(message(3, LegacyAction::Create, None)).await;
        inbox.push(message(4, LegacyAction::Submit, Some(-300))).await;
        let second = consumer.poll_once().await.unwrap();
        assert_eq!(second.duplicates, 2);

        let after_second = harness.database.snapshot().await;
        assert_eq!(after_first.reports, after_second.reports);
        assert_eq!(after_first.ledger.transactions, after_second.ledger.transactions);
        assert_eq!(harness.balances(1).await, (10_000, 9_700));

        inbox.push(message(5, LegacyAction::Assess, None)).await;
        consumer.poll_once().await.unwrap();
        assert_eq!(harness.balances(1).await, (9_700, 9_700));
        let state = harness.database.snapshot().await;
        assert!(state
            .reports
            .values()
            .all(|r| r.current_status == ReportStatus::Assessed));
    }
}

mod calculation {
    use super::*;

    #[test]
    fn test_per_record_formula() {
        let payload: ChildPayload = FuelLineBuilder::biodiesel().quantity(dec!(1000000)).fuel_supply();
        let mut reference = ReferenceFixtures::standard();
        reference.uci.clear();
        reference = reference.with_target_ci(domain_compliance::FuelCategory::Diesel, dec!(78.68));

        let derived = derive_units(
            &payload,
            &reference,
            PeriodFixtures::current(),
            SummaryCalculator::default().settings(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(derived.ci_of_fuel, dec!(10.5));
        assert_eq!(derived.energy, dec!(36000000));
        assert_eq!(derived.compliance_units, 2_454);
    }

    #[test]
    fn test_fuel_code_ci_wins_over_default() {
        let payload = FuelLineBuilder::new()
            .fuel_type(BIODIESEL)
            .fuel_code(test_utils::BIODIESEL_FUEL_CODE)
            .fuel_supply();
        let derived = derive_units(
            &payload,
            &ReferenceFixtures::standard(),
            PeriodFixtures::current(),
            SummaryCalculator::default().settings(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(derived.ci_of_fuel, dec!(5));
    }

    proptest! {
        #[test]
        fn prop_effective_set_is_sound(records in child_chains_strategy(8)) {
            assert_effective_set_sound(&records);
        }
    }
}

mod ledger_invariants {
    use super::*;

    /// Applies a generated history; rejected operations must leave no trace
    async fn apply(ops: &[LedgerOp]) {
        let organization = org(1);
        let database = MemoryLedgerDatabase::with_balances(&[(organization, 1_000)]);
        let ledger = LedgerService::new();
        let mut outstanding = Vec::new();

        for op in ops {
            let mut uow = database.begin_ledger(&AuditContext::new("prop")).await.unwrap();
            let before = ledger.balance(uow.as_mut(), organization).await.unwrap();
            let result = match *op {
                LedgerOp::Adjust(delta) => ledger.adjust(uow.as_mut(), organization, delta).await.map(|_| ()),
                LedgerOp::Reserve(delta) => ledger.reserve(uow.as_mut(), organization, delta).await.map(|t| {
                    outstanding.push(t.id);
                }),
                LedgerOp::Confirm(n) | LedgerOp::Release(n) if !outstanding.is_empty() => {
                    let id = outstanding.remove(n % outstanding.len());
                    if matches!(op, LedgerOp::Confirm(_)) {
                        ledger.confirm_reservation(uow.as_mut(), id).await.map(|_| ())
                    } else {
                        ledger.release_reservation(uow.as_mut(), id).await.map(|_| ())
                    }
                }
                LedgerOp::Confirm(_) | LedgerOp::Release(_) => Ok(()),
            };

            let after = ledger.balance(uow.as_mut(), organization).await.unwrap();
            let replayed = ledger.replay(uow.as_mut(), organization).await.unwrap();
            assert_balance_consistent(&after);
            assert_replay_matches(&after, &replayed);
            match result {
                Ok(()) => uow.commit().await.unwrap(),
                Err(LedgerError::InsufficientUnits { .. }) => {
                    assert!(before.same_figures(&after), "rejected {op:?} changed the balance");
                }
                Err(e) => panic!("unexpected ledger error for {op:?}: {e}"),
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_available_never_negative_and_replay_agrees(ops in ledger_history_strategy(40)) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(apply(&ops));
        }
    }

    #[tokio::test]
    async fn test_reserve_release_round_trip() {
        let database = MemoryLedgerDatabase::with_balances(&[(org(1), 500)]);
        let ledger = LedgerService::new();
        let mut uow = database.begin_ledger(&AuditContext::new("test")).await.unwrap();

        let before = ledger.available_balance(uow.as_mut(), org(1)).await.unwrap();
        let reservation = ledger.reserve(uow.as_mut(), org(1), -200).await.unwrap();
        assert_eq!(ledger.available_balance(uow.as_mut(), org(1)).await.unwrap(), before - 200);
        ledger.release_reservation(uow.as_mut(), reservation.id).await.unwrap();
        assert_eq!(ledger.available_balance(uow.as_mut(), org(1)).await.unwrap(), before);
        uow.commit().await.unwrap();
    }
}
