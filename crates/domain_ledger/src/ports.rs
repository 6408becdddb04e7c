//! Ledger Domain Ports
//!
//! Storage for ledger entries, transfers and issuances is reached through a
//! unit of work: one database transaction, opened with the caller's audit
//! context, exposing the store traits below, and published by `commit`.
//! Dropping a unit of work without committing discards every write.
//!
//! - **Internal Adapter**: PostgreSQL (infra_db)
//! - **Mock Adapter**: in-memory snapshot store behind the `mock` feature
//!
//! ```rust,ignore
//! let mut uow = database.begin(&AuditContext::for_user(&user)).await?;
//! uow.lock_organizations(&[org]).await?;
//! let entry = uow.append(NewTransaction { .. }).await?;
//! uow.commit().await?;
//! ```

use async_trait::async_trait;

use core_kernel::{AuditContext, DomainPort, OrganizationId, PortError, TransactionId, TransferId};

use crate::issuance::{Issuance, IssuanceHistoryEntry, IssuanceId, NewIssuance};
use crate::transaction::{BalanceView, NewTransaction, Transaction, TransactionFilter, UnitSumQuery};
use crate::transfer::{NewTransfer, Transfer, TransferHistoryEntry};

/// Durable storage of ledger entries
///
/// Every method runs inside the surrounding unit of work.
#[async_trait]
pub trait TransactionStore: Send {
    /// Takes the per-organization ledger lock for each organization
    ///
    /// Callers pass ids in ascending order without duplicates; adapters lock
    /// in the order given. Fails with `NotFound` for an unknown organization.
    async fn lock_organizations(&mut self, organizations: &[OrganizationId]) -> Result<(), PortError>;

    /// Inserts a new entry without any balance check
    async fn append(&mut self, entry: NewTransaction) -> Result<Transaction, PortError>;

    /// Reserved → Adjustment; `InvalidState` if the entry is not Reserved
    async fn confirm(&mut self, id: TransactionId) -> Result<Transaction, PortError>;

    /// Reserved → Released; `InvalidState` if the entry is not Reserved
    async fn release(&mut self, id: TransactionId) -> Result<Transaction, PortError>;

    async fn by_id(&mut self, id: TransactionId) -> Result<Option<Transaction>, PortError>;

    /// Entries of one organization ordered by id
    async fn by_org(
        &mut self,
        organization: OrganizationId,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, PortError>;

    /// Sum of `compliance_units` over the entries the query matches
    async fn sum_units(&mut self, query: &UnitSumQuery) -> Result<i64, PortError>;

    /// Upserts the balance read model for one organization
    async fn write_balance_view(&mut self, view: &BalanceView) -> Result<(), PortError>;
}

/// Storage of credit transfers
#[async_trait]
pub trait TransferStore: Send {
    async fn insert_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer, PortError>;

    /// Loads a transfer and locks its row until the unit of work ends
    async fn transfer_for_update(&mut self, id: TransferId) -> Result<Option<Transfer>, PortError>;

    async fn update_transfer(&mut self, transfer: &Transfer) -> Result<(), PortError>;

    async fn record_transfer_history(&mut self, entry: &TransferHistoryEntry) -> Result<(), PortError>;
}

/// Storage of initiative agreements and admin adjustments
#[async_trait]
pub trait IssuanceStore: Send {
    async fn insert_issuance(&mut self, issuance: NewIssuance) -> Result<Issuance, PortError>;

    /// Loads an issuance and locks its row until the unit of work ends
    async fn issuance_for_update(&mut self, id: IssuanceId) -> Result<Option<Issuance>, PortError>;

    async fn update_issuance(&mut self, issuance: &Issuance) -> Result<(), PortError>;

    async fn record_issuance_history(&mut self, entry: &IssuanceHistoryEntry) -> Result<(), PortError>;
}

/// One transaction over every ledger store
#[async_trait]
pub trait LedgerUnitOfWork: TransactionStore + TransferStore + IssuanceStore {
    /// Publishes every write made through this unit of work
    async fn commit(self: Box<Self>) -> Result<(), PortError>;
}

/// Opens ledger units of work
#[async_trait]
pub trait LedgerDatabase: DomainPort {
    /// Begins a transaction attributed to the audit context's user
    async fn begin_ledger(&self, audit: &AuditContext) -> Result<Box<dyn LedgerUnitOfWork>, PortError>;
}

/// Advisory cache of balance views
///
/// Never consulted for admission decisions. Adapters are best effort; the
/// ledger logs and ignores their failures.
#[async_trait]
pub trait BalanceCache: DomainPort {
    async fn get(&self, organization: OrganizationId) -> Result<Option<BalanceView>, PortError>;

    async fn put(&self, view: &BalanceView) -> Result<(), PortError>;

    async fn invalidate(&self, organization: OrganizationId) -> Result<(), PortError>;
}

#[cfg(any(test, feature = "mock"))]
pub mod mock {
    //! In-memory adapters
    //!
    //! `LedgerState` holds every ledger table and implements the store
    //! semantics synchronously so other in-memory databases can embed it.

    use super::*;
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet, HashMap};
    use std::sync::Arc;
    use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

    use crate::issuance::IssuanceKind;
    use crate::transaction::TransactionAction;

    /// Every ledger table, cloned as a snapshot per unit of work
    #[derive(Debug, Clone, Default)]
    pub struct LedgerState {
        pub organizations: BTreeSet<OrganizationId>,
        pub transactions: BTreeMap<TransactionId, Transaction>,
        pub balance_views: HashMap<OrganizationId, BalanceView>,
        pub transfers: BTreeMap<TransferId, Transfer>,
        pub transfer_history: Vec<TransferHistoryEntry>,
        pub issuances: BTreeMap<IssuanceId, Issuance>,
        pub issuance_history: Vec<IssuanceHistoryEntry>,
        /// Organizations locked by the current unit of work, in lock order
        pub lock_log: Vec<OrganizationId>,
        next_id: i64,
    }

    impl LedgerState {
        fn next_id(&mut self) -> i64 {
            self.next_id += 1;
            self.next_id
        }

        /// Registers an organization with a committed opening balance
        ///
        /// The opening entry is back-dated far enough to count toward every
        /// period-start and deadline balance.
        pub fn open_organization(&mut self, organization: OrganizationId, opening_units: i64) {
            self.organizations.insert(organization);
            if opening_units != 0 {
                let id = TransactionId::new(self.next_id());
                let opened = chrono::DateTime::<Utc>::from_timestamp(1_262_304_000, 0).unwrap_or_else(Utc::now);
                self.transactions.insert(
                    id,
                    Transaction {
                        id,
                        organization_id: organization,
                        action: TransactionAction::Adjustment,
                        compliance_units: opening_units,
                        create_date: opened,
                        update_date: opened,
                    },
                );
            }
        }

        pub fn lock_organizations(&mut self, organizations: &[OrganizationId]) -> Result<(), PortError> {
            for org in organizations {
                if !self.organizations.contains(org) {
                    return Err(PortError::not_found("Organization", org));
                }
                self.lock_log.push(*org);
            }
            Ok(())
        }

        pub fn append(&mut self, entry: NewTransaction) -> Result<Transaction, PortError> {
            if !self.organizations.contains(&entry.organization_id) {
                return Err(PortError::not_found("Organization", entry.organization_id));
            }
            let id = TransactionId::new(self.next_id());
            let now = Utc::now();
            let transaction = Transaction {
                id,
                organization_id: entry.organization_id,
                action: entry.action,
                compliance_units: entry.compliance_units,
                create_date: now,
                update_date: now,
            };
            self.transactions.insert(id, transaction.clone());
            Ok(transaction)
        }

        fn finish_reservation(
            &mut self,
            id: TransactionId,
            to: TransactionAction,
        ) -> Result<Transaction, PortError> {
            let entry = self
                .transactions
                .get_mut(&id)
                .ok_or_else(|| PortError::not_found("Transaction", id))?;
            if entry.action != TransactionAction::Reserved {
                return Err(PortError::invalid_state(format!(
                    "transaction {id} is {}, not Reserved",
                    entry.action
                )));
            }
            entry.action = to;
            entry.update_date = Utc::now();
            Ok(entry.clone())
        }

        pub fn confirm(&mut self, id: TransactionId) -> Result<Transaction, PortError> {
            self.finish_reservation(id, TransactionAction::Adjustment)
        }

        pub fn release(&mut self, id: TransactionId) -> Result<Transaction, PortError> {
            self.finish_reservation(id, TransactionAction::Released)
        }

        pub fn by_org(&self, organization: OrganizationId, filter: &TransactionFilter) -> Vec<Transaction> {
            let matching = self
                .transactions
                .values()
                .filter(|t| t.organization_id == organization && filter.matches(t))
                .cloned();
            match filter.limit {
                Some(limit) => matching.take(limit as usize).collect(),
                None => matching.collect(),
            }
        }

        pub fn sum_units(&self, query: &UnitSumQuery) -> i64 {
            self.transactions
                .values()
                .filter(|t| query.matches(t))
                .map(|t| t.compliance_units)
                .sum()
        }

        pub fn insert_transfer(&mut self, transfer: NewTransfer) -> Transfer {
            let id = TransferId::new(self.next_id());
            let transfer = Transfer::draft(id, transfer);
            self.transfers.insert(id, transfer.clone());
            transfer
        }

        pub fn update_transfer(&mut self, transfer: &Transfer) -> Result<(), PortError> {
            match self.transfers.get_mut(&transfer.id) {
                Some(existing) => {
                    *existing = transfer.clone();
                    Ok(())
                }
                None => Err(PortError::not_found("Transfer", transfer.id)),
            }
        }

        pub fn insert_issuance(&mut self, issuance: NewIssuance) -> Issuance {
            let id = IssuanceId::from_parts(issuance.kind, self.next_id());
            let issuance = Issuance::draft(id, issuance);
            self.issuances.insert(id, issuance.clone());
            issuance
        }

        pub fn update_issuance(&mut self, issuance: &Issuance) -> Result<(), PortError> {
            match self.issuances.get_mut(&issuance.id) {
                Some(existing) => {
                    *existing = issuance.clone();
                    Ok(())
                }
                None => Err(PortError::not_found(issuance.kind().entity_name(), issuance.id)),
            }
        }

        /// Issuances of one kind, for assertions
        pub fn issuances_of(&self, kind: IssuanceKind) -> Vec<&Issuance> {
            self.issuances.values().filter(|i| i.kind() == kind).collect()
        }
    }

    /// In-memory ledger database
    ///
    /// A unit of work holds the single state lock for its lifetime, which
    /// serializes writers the way row locks do in PostgreSQL.
    #[derive(Debug, Clone, Default)]
    pub struct MemoryLedgerDatabase {
        state: Arc<Mutex<LedgerState>>,
    }

    impl MemoryLedgerDatabase {
        pub fn new() -> Self {
            Self::default()
        }

        /// Pre-populates organizations with committed opening balances
        pub fn with_balances(balances: &[(OrganizationId, i64)]) -> Self {
            let mut state = LedgerState::default();
            for (org, units) in balances {
                state.open_organization(*org, *units);
            }
            Self {
                state: Arc::new(Mutex::new(state)),
            }
        }

        /// Snapshot of the committed state
        pub async fn snapshot(&self) -> LedgerState {
            self.state.lock().await.clone()
        }
    }

    impl DomainPort for MemoryLedgerDatabase {}

    #[async_trait]
    impl LedgerDatabase for MemoryLedgerDatabase {
        async fn begin_ledger(&self, _audit: &AuditContext) -> Result<Box<dyn LedgerUnitOfWork>, PortError> {
            let guard = self.state.clone().lock_owned().await;
            let mut working = guard.clone();
            working.lock_log.clear();
            Ok(Box::new(MemoryLedgerUnitOfWork { guard, working }))
        }
    }

    /// Unit of work over a private copy of the state
    pub struct MemoryLedgerUnitOfWork {
        guard: OwnedMutexGuard<LedgerState>,
        working: LedgerState,
    }

    #[async_trait]
    impl TransactionStore for MemoryLedgerUnitOfWork {
        async fn lock_organizations(&mut self, organizations: &[OrganizationId]) -> Result<(), PortError> {
            self.working.lock_organizations(organizations)
        }

        async fn append(&mut self, entry: NewTransaction) -> Result<Transaction, PortError> {
            self.working.append(entry)
        }

        async fn confirm(&mut self, id: TransactionId) -> Result<Transaction, PortError> {
            self.working.confirm(id)
        }

        async fn release(&mut self, id: TransactionId) -> Result<Transaction, PortError> {
            self.working.release(id)
        }

        async fn by_id(&mut self, id: TransactionId) -> Result<Option<Transaction>, PortError> {
            Ok(self.working.transactions.get(&id).cloned())
        }

        async fn by_org(
            &mut self,
            organization: OrganizationId,
            filter: &TransactionFilter,
        ) -> Result<Vec<Transaction>, PortError> {
            Ok(self.working.by_org(organization, filter))
        }

        async fn sum_units(&mut self, query: &UnitSumQuery) -> Result<i64, PortError> {
            Ok(self.working.sum_units(query))
        }

        async fn write_balance_view(&mut self, view: &BalanceView) -> Result<(), PortError> {
            self.working.balance_views.insert(view.organization_id, view.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl TransferStore for MemoryLedgerUnitOfWork {
        async fn insert_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer, PortError> {
            Ok(self.working.insert_transfer(transfer))
        }

        async fn transfer_for_update(&mut self, id: TransferId) -> Result<Option<Transfer>, PortError> {
            Ok(self.working.transfers.get(&id).cloned())
        }

        async fn update_transfer(&mut self, transfer: &Transfer) -> Result<(), PortError> {
            self.working.update_transfer(transfer)
        }

        async fn record_transfer_history(&mut self, entry: &TransferHistoryEntry) -> Result<(), PortError> {
            self.working.transfer_history.push(entry.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl IssuanceStore for MemoryLedgerUnitOfWork {
        async fn insert_issuance(&mut self, issuance: NewIssuance) -> Result<Issuance, PortError> {
            Ok(self.working.insert_issuance(issuance))
        }

        async fn issuance_for_update(&mut self, id: IssuanceId) -> Result<Option<Issuance>, PortError> {
            Ok(self.working.issuances.get(&id).cloned())
        }

        async fn update_issuance(&mut self, issuance: &Issuance) -> Result<(), PortError> {
            self.working.update_issuance(issuance)
        }

        async fn record_issuance_history(&mut self, entry: &IssuanceHistoryEntry) -> Result<(), PortError> {
            self.working.issuance_history.push(entry.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl LedgerUnitOfWork for MemoryLedgerUnitOfWork {
        async fn commit(self: Box<Self>) -> Result<(), PortError> {
            let MemoryLedgerUnitOfWork { mut guard, working } = *self;
            *guard = working;
            Ok(())
        }
    }

    /// In-memory balance cache
    #[derive(Debug, Default)]
    pub struct InMemoryBalanceCache {
        views: RwLock<HashMap<OrganizationId, BalanceView>>,
    }

    impl InMemoryBalanceCache {
        pub fn new() -> Self {
            Self::default()
        }

        /// Places a view directly, bypassing the ledger
        pub async fn seed(&self, view: BalanceView) {
            self.views.write().await.insert(view.organization_id, view);
        }
    }

    impl DomainPort for InMemoryBalanceCache {}

    #[async_trait]
    impl BalanceCache for InMemoryBalanceCache {
        async fn get(&self, organization: OrganizationId) -> Result<Option<BalanceView>, PortError> {
            Ok(self.views.read().await.get(&organization).cloned())
        }

        async fn put(&self, view: &BalanceView) -> Result<(), PortError> {
            self.views.write().await.insert(view.organization_id, view.clone());
            Ok(())
        }

        async fn invalidate(&self, organization: OrganizationId) -> Result<(), PortError> {
            self.views.write().await.remove(&organization);
            Ok(())
        }
    }
}
