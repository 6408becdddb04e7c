//! Ledger service
//!
//! Derives balances from the transaction store and issues new entries,
//! enforcing that the available balance of an organization never becomes
//! negative.
//!
//! # Invariants
//!
//! - `available = committed - reserved_debits >= 0` for every organization
//! - `committed` equals a full replay of the organization's entries
//! - Debits are admitted only against balances read from the store under the
//!   organization lock, never against the cache

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use core_kernel::{OrganizationId, TransactionId};

use crate::error::LedgerError;
use crate::ports::{BalanceCache, TransactionStore};
use crate::transaction::{
    BalanceView, NewTransaction, Transaction, TransactionAction, TransactionFilter, UnitSumQuery,
};

/// Balance views and semantic ledger operations
///
/// Every method runs against a store borrowed from the caller's unit of
/// work, so ledger writes commit or roll back together with the workflow
/// change that caused them.
#[derive(Clone, Default)]
pub struct LedgerService {
    cache: Option<Arc<dyn BalanceCache>>,
}

impl LedgerService {
    /// Creates a ledger service without a cache
    pub fn new() -> Self {
        Self { cache: None }
    }

    /// Attaches an advisory balance cache
    pub fn with_cache(mut self, cache: Arc<dyn BalanceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Σ units over Adjustment entries
    pub async fn committed_balance<S>(&self, store: &mut S, organization: OrganizationId) -> Result<i64, LedgerError>
    where
        S: TransactionStore + ?Sized,
    {
        let query = UnitSumQuery::new(organization, TransactionAction::Adjustment);
        Ok(store.sum_units(&query).await?)
    }

    /// Committed balance counting only entries created before `instant`
    pub async fn committed_balance_as_of<S>(
        &self,
        store: &mut S,
        organization: OrganizationId,
        instant: DateTime<Utc>,
    ) -> Result<i64, LedgerError>
    where
        S: TransactionStore + ?Sized,
    {
        let query = UnitSumQuery::new(organization, TransactionAction::Adjustment).before(instant);
        Ok(store.sum_units(&query).await?)
    }

    /// Σ |units| over negative Reserved entries
    pub async fn reserved_debits<S>(&self, store: &mut S, organization: OrganizationId) -> Result<i64, LedgerError>
    where
        S: TransactionStore + ?Sized,
    {
        let query = UnitSumQuery::new(organization, TransactionAction::Reserved).debits();
        Ok(-store.sum_units(&query).await?)
    }

    /// Committed balance minus reserved debits
    pub async fn available_balance<S>(&self, store: &mut S, organization: OrganizationId) -> Result<i64, LedgerError>
    where
        S: TransactionStore + ?Sized,
    {
        Ok(self.balance(store, organization).await?.available_units)
    }

    /// All three balance figures, read from the store
    pub async fn balance<S>(&self, store: &mut S, organization: OrganizationId) -> Result<BalanceView, LedgerError>
    where
        S: TransactionStore + ?Sized,
    {
        let committed = self.committed_balance(store, organization).await?;
        let reserved = self.reserved_debits(store, organization).await?;
        Ok(BalanceView::new(organization, committed, reserved))
    }

    /// Balance served from the cache when present
    ///
    /// On a miss the store is read and the view written through. The result
    /// is for display only.
    pub async fn cached_balance<S>(&self, store: &mut S, organization: OrganizationId) -> Result<BalanceView, LedgerError>
    where
        S: TransactionStore + ?Sized,
    {
        if let Some(cache) = &self.cache {
            match cache.get(organization).await {
                Ok(Some(view)) => {
                    debug!(organization = %organization, "balance cache hit");
                    return Ok(view);
                }
                Ok(None) => {}
                Err(e) => warn!(organization = %organization, error = %e, "balance cache read failed"),
            }
        }
        let view = self.balance(store, organization).await?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(&view).await {
                warn!(organization = %organization, error = %e, "balance cache write failed");
            }
        }
        Ok(view)
    }

    /// Writes a committed entry of `delta` units
    ///
    /// Debits are refused when they would take the available balance below
    /// zero.
    ///
    /// # Errors
    ///
    /// - `InsufficientUnits` naming the shortfall
    /// - `Validation` for a zero delta
    #[instrument(skip(self, store), fields(organization = %organization))]
    pub async fn adjust<S>(&self, store: &mut S, organization: OrganizationId, delta: i64) -> Result<Transaction, LedgerError>
    where
        S: TransactionStore + ?Sized,
    {
        self.write_gated(store, organization, delta, TransactionAction::Adjustment).await
    }

    /// Writes a Reserved entry of `delta` units under the same gate as `adjust`
    #[instrument(skip(self, store), fields(organization = %organization))]
    pub async fn reserve<S>(&self, store: &mut S, organization: OrganizationId, delta: i64) -> Result<Transaction, LedgerError>
    where
        S: TransactionStore + ?Sized,
    {
        self.write_gated(store, organization, delta, TransactionAction::Reserved).await
    }

    async fn write_gated<S>(
        &self,
        store: &mut S,
        organization: OrganizationId,
        delta: i64,
        action: TransactionAction,
    ) -> Result<Transaction, LedgerError>
    where
        S: TransactionStore + ?Sized,
    {
        if delta == 0 {
            return Err(LedgerError::Validation("a ledger entry cannot carry zero units".to_string()));
        }

        store.lock_organizations(&[organization]).await?;

        let before = self.balance(store, organization).await?;
        if delta < 0 && before.available_units + delta < 0 {
            let shortfall = -(before.available_units + delta);
            warn!(
                organization = %organization,
                requested = delta,
                available = before.available_units,
                shortfall,
                "insufficient compliance units"
            );
            return Err(LedgerError::InsufficientUnits {
                organization,
                requested: -delta,
                available: before.available_units,
                shortfall,
            });
        }

        let entry = store
            .append(NewTransaction {
                organization_id: organization,
                action,
                compliance_units: delta,
            })
            .await?;

        info!(
            organization = %organization,
            transaction_id = %entry.id,
            action = %action,
            units = delta,
            "ledger entry written"
        );
        self.refresh(store, organization).await?;
        Ok(entry)
    }

    /// Commits a reservation with unchanged sign and magnitude
    #[instrument(skip(self, store), fields(transaction_id = %id))]
    pub async fn confirm_reservation<S>(&self, store: &mut S, id: TransactionId) -> Result<Transaction, LedgerError>
    where
        S: TransactionStore + ?Sized,
    {
        let organization = self.reserved_owner(store, id).await?;
        store.lock_organizations(&[organization]).await?;
        let entry = store.confirm(id).await.map_err(|e| map_transition_error(id, e))?;
        info!(organization = %organization, units = entry.compliance_units, "reservation confirmed");
        self.refresh(store, organization).await?;
        Ok(entry)
    }

    /// Voids a reservation; a negative reservation returns its units to the available balance
    #[instrument(skip(self, store), fields(transaction_id = %id))]
    pub async fn release_reservation<S>(&self, store: &mut S, id: TransactionId) -> Result<Transaction, LedgerError>
    where
        S: TransactionStore + ?Sized,
    {
        let organization = self.reserved_owner(store, id).await?;
        store.lock_organizations(&[organization]).await?;
        let entry = store.release(id).await.map_err(|e| map_transition_error(id, e))?;
        info!(organization = %organization, units = entry.compliance_units, "reservation released");
        self.refresh(store, organization).await?;
        Ok(entry)
    }

    async fn reserved_owner<S>(&self, store: &mut S, id: TransactionId) -> Result<OrganizationId, LedgerError>
    where
        S: TransactionStore + ?Sized,
    {
        let entry = store.by_id(id).await?.ok_or(LedgerError::TransactionNotFound(id))?;
        if !entry.is_reserved() {
            return Err(LedgerError::InvalidState(format!(
                "transaction {id} is {}, not Reserved",
                entry.action
            )));
        }
        Ok(entry.organization_id)
    }

    /// Entries of one organization
    pub async fn transactions<S>(
        &self,
        store: &mut S,
        organization: OrganizationId,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, LedgerError>
    where
        S: TransactionStore + ?Sized,
    {
        Ok(store.by_org(organization, filter).await?)
    }

    /// Recomputes the balance by folding every entry of the organization
    ///
    /// Used to check the aggregate queries against the raw log.
    pub async fn replay<S>(&self, store: &mut S, organization: OrganizationId) -> Result<BalanceView, LedgerError>
    where
        S: TransactionStore + ?Sized,
    {
        let entries = store.by_org(organization, &TransactionFilter::default()).await?;
        let (committed, reserved) = entries.iter().fold((0i64, 0i64), |(committed, reserved), entry| {
            match entry.action {
                TransactionAction::Adjustment => (committed + entry.compliance_units, reserved),
                TransactionAction::Reserved if entry.compliance_units < 0 => {
                    (committed, reserved - entry.compliance_units)
                }
                _ => (committed, reserved),
            }
        });
        Ok(BalanceView::new(organization, committed, reserved))
    }

    /// Rewrites the read model and drops the cached view
    async fn refresh<S>(&self, store: &mut S, organization: OrganizationId) -> Result<(), LedgerError>
    where
        S: TransactionStore + ?Sized,
    {
        let view = self.balance(store, organization).await?;
        store.write_balance_view(&view).await?;
        self.invalidate(&[organization]).await;
        Ok(())
    }

    /// Drops cached views; called again by workflows once their unit of work commits
    pub async fn invalidate(&self, organizations: &[OrganizationId]) {
        if let Some(cache) = &self.cache {
            for org in organizations {
                if let Err(e) = cache.invalidate(*org).await {
                    warn!(organization = %org, error = %e, "balance cache invalidation failed");
                }
            }
        }
    }
}

impl std::fmt::Debug for LedgerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerService")
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

/// Ascending, de-duplicated lock order for a set of organizations
pub fn lock_order(organizations: &[OrganizationId]) -> Vec<OrganizationId> {
    let mut ordered = organizations.to_vec();
    ordered.sort();
    ordered.dedup();
    ordered
}

fn map_transition_error(id: TransactionId, error: core_kernel::PortError) -> LedgerError {
    match error {
        core_kernel::PortError::InvalidState { message } => LedgerError::InvalidState(message),
        core_kernel::PortError::NotFound { .. } => LedgerError::TransactionNotFound(id),
        other => LedgerError::Port(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mock::{InMemoryBalanceCache, MemoryLedgerDatabase};
    use crate::ports::LedgerDatabase;
    use core_kernel::AuditContext;

    fn org(id: i64) -> OrganizationId {
        OrganizationId::new(id)
    }

    #[tokio::test]
    async fn test_reserve_then_release_restores_available() {
        let db = MemoryLedgerDatabase::with_balances(&[(org(1), 50_000)]);
        let ledger = LedgerService::new();
        let mut uow = db.begin_ledger(&AuditContext::new("tester")).await.unwrap();

        let reservation = ledger.reserve(uow.as_mut(), org(1), -17_639).await.unwrap();
        assert_eq!(ledger.available_balance(uow.as_mut(), org(1)).await.unwrap(), 32_361);

        ledger.release_reservation(uow.as_mut(), reservation.id).await.unwrap();
        assert_eq!(ledger.available_balance(uow.as_mut(), org(1)).await.unwrap(), 50_000);
        assert_eq!(ledger.committed_balance(uow.as_mut(), org(1)).await.unwrap(), 50_000);
    }

    #[tokio::test]
    async fn test_exact_exhaustion_succeeds_one_more_fails() {
        let db = MemoryLedgerDatabase::with_balances(&[(org(1), 100), (org(2), 100)]);
        let ledger = LedgerService::new();
        let mut uow = db.begin_ledger(&AuditContext::new("tester")).await.unwrap();

        assert!(ledger.reserve(uow.as_mut(), org(1), -100).await.is_ok());
        assert_eq!(ledger.available_balance(uow.as_mut(), org(1)).await.unwrap(), 0);

        let err = ledger.reserve(uow.as_mut(), org(2), -101).await.unwrap_err();
        match err {
            LedgerError::InsufficientUnits { requested, available, shortfall, .. } => {
                assert_eq!(requested, 101);
                assert_eq!(available, 100);
                assert_eq!(shortfall, 1);
            }
            other => panic!("expected InsufficientUnits, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_confirm_twice_is_invalid_state() {
        let db = MemoryLedgerDatabase::with_balances(&[(org(1), 10)]);
        let ledger = LedgerService::new();
        let mut uow = db.begin_ledger(&AuditContext::new("tester")).await.unwrap();

        let reservation = ledger.reserve(uow.as_mut(), org(1), -5).await.unwrap();
        ledger.confirm_reservation(uow.as_mut(), reservation.id).await.unwrap();
        let err = ledger.confirm_reservation(uow.as_mut(), reservation.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
        assert!(matches!(
            ledger.release_reservation(uow.as_mut(), TransactionId::new(999)).await,
            Err(LedgerError::TransactionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_delta_rejected() {
        let db = MemoryLedgerDatabase::with_balances(&[(org(1), 10)]);
        let mut uow = db.begin_ledger(&AuditContext::new("tester")).await.unwrap();
        let result = LedgerService::new().adjust(uow.as_mut(), org(1), 0).await;
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }

    #[tokio::test]
    async fn test_mutation_invalidates_cache() {
        let db = MemoryLedgerDatabase::with_balances(&[(org(1), 10)]);
        let cache = Arc::new(InMemoryBalanceCache::new());
        let ledger = LedgerService::new().with_cache(cache.clone());
        let mut uow = db.begin_ledger(&AuditContext::new("tester")).await.unwrap();

        let cached = ledger.cached_balance(uow.as_mut(), org(1)).await.unwrap();
        assert_eq!(cached.available_units, 10);
        assert!(cache.get(org(1)).await.unwrap().is_some());

        ledger.adjust(uow.as_mut(), org(1), 5).await.unwrap();
        assert!(cache.get(org(1)).await.unwrap().is_none());
    }

    #[test]
    fn test_lock_order() {
        assert_eq!(lock_order(&[org(5), org(2), org(5)]), vec![org(2), org(5)]);
    }
}
