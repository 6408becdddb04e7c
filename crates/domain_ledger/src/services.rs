//! Ledger domain services
//!
//! Orchestrate the transfer and issuance workflows: each operation opens one
//! unit of work attributed to the caller, locks the aggregate row, applies
//! the status change and its ledger side effects, writes a history row and
//! commits.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use core_kernel::{AuditContext, OrganizationId, Role, TransferId, UserIdentity};

use crate::error::LedgerError;
use crate::issuance::{Issuance, IssuanceHistoryEntry, IssuanceId, IssuanceStatus, NewIssuance};
use crate::ledger::{lock_order, LedgerService};
use crate::ports::{LedgerDatabase, LedgerUnitOfWork};
use crate::transfer::{
    validate_terms, NewTransfer, Transfer, TransferCategory, TransferHistoryEntry,
    TransferRecommendation, TransferStatus, TransferTerms,
};

/// Service driving the credit-transfer workflow
pub struct TransferService {
    database: Arc<dyn LedgerDatabase>,
    ledger: LedgerService,
}

impl TransferService {
    /// Creates a new transfer service
    ///
    /// # Arguments
    ///
    /// * `database` - Opens ledger units of work
    /// * `ledger` - Balance gate and entry writer
    pub fn new(database: Arc<dyn LedgerDatabase>, ledger: LedgerService) -> Self {
        Self { database, ledger }
    }

    /// Creates a draft transfer from the caller's organization
    #[instrument(skip(self, user, terms), fields(user = %user.username, from = %from))]
    pub async fn create(
        &self,
        user: &UserIdentity,
        from: OrganizationId,
        terms: TransferTerms,
    ) -> Result<Transfer, LedgerError> {
        user.require_role(&[Role::Supplier])?;
        user.require_org(from)?;
        validate_terms(from, &terms)?;

        let mut uow = self.database.begin_ledger(&AuditContext::for_user(user)).await?;
        let transfer = uow
            .insert_transfer(NewTransfer {
                from_organization_id: from,
                terms,
            })
            .await?;
        uow.record_transfer_history(&TransferHistoryEntry::new(&transfer, &user.username)).await?;
        uow.commit().await?;

        info!(transfer_id = %transfer.id, quantity = transfer.quantity, "transfer drafted");
        Ok(transfer)
    }

    /// Replaces the terms of a draft transfer
    #[instrument(skip(self, user, terms), fields(user = %user.username, transfer_id = %id))]
    pub async fn update_draft(
        &self,
        user: &UserIdentity,
        id: TransferId,
        terms: TransferTerms,
    ) -> Result<Transfer, LedgerError> {
        let mut uow = self.database.begin_ledger(&AuditContext::for_user(user)).await?;
        let mut transfer = load_transfer(uow.as_mut(), id).await?;
        user.require_org(transfer.from_organization_id)?;
        transfer.amend(terms)?;
        uow.update_transfer(&transfer).await?;
        uow.commit().await?;
        Ok(transfer)
    }

    /// Draft → Deleted
    pub async fn delete(&self, user: &UserIdentity, id: TransferId) -> Result<Transfer, LedgerError> {
        self.move_by_party(user, id, TransferStatus::Deleted, Party::Sender).await
    }

    /// Draft → Sent
    ///
    /// The sending organization must hold at least the quantity in available
    /// units; nothing is written to the ledger yet.
    #[instrument(skip(self, user), fields(user = %user.username, transfer_id = %id))]
    pub async fn send(&self, user: &UserIdentity, id: TransferId) -> Result<Transfer, LedgerError> {
        user.require_role(&[Role::Supplier])?;
        let mut uow = self.database.begin_ledger(&AuditContext::for_user(user)).await?;
        let mut transfer = load_transfer(uow.as_mut(), id).await?;
        user.require_org(transfer.from_organization_id)?;

        uow.lock_organizations(&[transfer.from_organization_id]).await?;
        let available = self
            .ledger
            .available_balance(uow.as_mut(), transfer.from_organization_id)
            .await?;
        if available < transfer.quantity {
            warn!(available, quantity = transfer.quantity, "transfer exceeds available units");
            return Err(LedgerError::InsufficientUnits {
                organization: transfer.from_organization_id,
                requested: transfer.quantity,
                available,
                shortfall: transfer.quantity - available,
            });
        }

        transfer.transition_to(TransferStatus::Sent)?;
        persist_transfer(uow.as_mut(), &transfer, user).await?;
        uow.commit().await?;
        info!(status = %transfer.current_status, "transfer sent");
        Ok(transfer)
    }

    /// Sent → Submitted, signed by the receiving organization
    pub async fn sign(&self, user: &UserIdentity, id: TransferId) -> Result<Transfer, LedgerError> {
        self.move_by_party(user, id, TransferStatus::Submitted, Party::Receiver).await
    }

    /// Sent → Declined by the receiving organization
    pub async fn decline(&self, user: &UserIdentity, id: TransferId) -> Result<Transfer, LedgerError> {
        self.move_by_party(user, id, TransferStatus::Declined, Party::Receiver).await
    }

    /// Sent or Submitted → Rescinded by the sending organization
    pub async fn rescind(&self, user: &UserIdentity, id: TransferId) -> Result<Transfer, LedgerError> {
        self.move_by_party(user, id, TransferStatus::Rescinded, Party::Sender).await
    }

    /// Submitted → Recommended with the analyst's recommendation
    #[instrument(skip(self, user), fields(user = %user.username, transfer_id = %id))]
    pub async fn recommend(
        &self,
        user: &UserIdentity,
        id: TransferId,
        recommendation: TransferRecommendation,
    ) -> Result<Transfer, LedgerError> {
        user.require_role(&[Role::Analyst])?;
        let mut uow = self.database.begin_ledger(&AuditContext::for_user(user)).await?;
        let mut transfer = load_transfer(uow.as_mut(), id).await?;
        transfer.transition_to(TransferStatus::Recommended)?;
        transfer.recommendation = Some(recommendation);
        persist_transfer(uow.as_mut(), &transfer, user).await?;
        uow.commit().await?;
        info!(recommendation = recommendation.as_str(), "transfer recommended");
        Ok(transfer)
    }

    /// Recommended → Submitted, sent back to the analyst
    pub async fn return_to_analyst(&self, user: &UserIdentity, id: TransferId) -> Result<Transfer, LedgerError> {
        user.require_role(&[Role::ComplianceManager, Role::Director])?;
        let mut uow = self.database.begin_ledger(&AuditContext::for_user(user)).await?;
        let mut transfer = load_transfer(uow.as_mut(), id).await?;
        transfer.transition_to(TransferStatus::Submitted)?;
        transfer.recommendation = None;
        persist_transfer(uow.as_mut(), &transfer, user).await?;
        uow.commit().await?;
        Ok(transfer)
    }

    /// Recommended → Recorded
    ///
    /// Locks both organizations in ascending id order, debits the sender and
    /// credits the receiver. Either both legs commit or neither does.
    ///
    /// # Arguments
    ///
    /// * `category` - Director override; otherwise derived from agreement age
    #[instrument(skip(self, user), fields(user = %user.username, transfer_id = %id))]
    pub async fn record(
        &self,
        user: &UserIdentity,
        id: TransferId,
        category: Option<TransferCategory>,
    ) -> Result<Transfer, LedgerError> {
        user.require_role(&[Role::Director])?;
        let mut uow = self.database.begin_ledger(&AuditContext::for_user(user)).await?;
        let mut transfer = load_transfer(uow.as_mut(), id).await?;
        transfer.transition_to(TransferStatus::Recorded)?;

        let organizations = lock_order(&transfer.lock_order());
        uow.lock_organizations(&organizations).await?;

        let debit = self
            .ledger
            .adjust(uow.as_mut(), transfer.from_organization_id, -transfer.quantity)
            .await?;
        let credit = self
            .ledger
            .adjust(uow.as_mut(), transfer.to_organization_id, transfer.quantity)
            .await?;

        let today = Utc::now().date_naive();
        transfer.from_transaction_id = Some(debit.id);
        transfer.to_transaction_id = Some(credit.id);
        transfer.transaction_effective_date = Some(today);
        transfer.category = Some(
            category.unwrap_or_else(|| TransferCategory::from_agreement_age(transfer.agreement_date, today)),
        );
        persist_transfer(uow.as_mut(), &transfer, user).await?;
        uow.commit().await?;
        self.ledger.invalidate(&organizations).await;

        info!(
            from = %transfer.from_organization_id,
            to = %transfer.to_organization_id,
            quantity = transfer.quantity,
            "transfer recorded"
        );
        Ok(transfer)
    }

    /// Recommended → Refused
    pub async fn refuse(&self, user: &UserIdentity, id: TransferId) -> Result<Transfer, LedgerError> {
        user.require_role(&[Role::Director])?;
        let mut uow = self.database.begin_ledger(&AuditContext::for_user(user)).await?;
        let mut transfer = load_transfer(uow.as_mut(), id).await?;
        transfer.transition_to(TransferStatus::Refused)?;
        persist_transfer(uow.as_mut(), &transfer, user).await?;
        uow.commit().await?;
        info!(transfer_id = %id, "transfer refused");
        Ok(transfer)
    }

    async fn move_by_party(
        &self,
        user: &UserIdentity,
        id: TransferId,
        to: TransferStatus,
        party: Party,
    ) -> Result<Transfer, LedgerError> {
        user.require_role(&[Role::Supplier])?;
        let mut uow = self.database.begin_ledger(&AuditContext::for_user(user)).await?;
        let mut transfer = load_transfer(uow.as_mut(), id).await?;
        let acting_org = match party {
            Party::Sender => transfer.from_organization_id,
            Party::Receiver => transfer.to_organization_id,
        };
        user.require_org(acting_org)?;
        transfer.transition_to(to)?;
        persist_transfer(uow.as_mut(), &transfer, user).await?;
        uow.commit().await?;
        info!(transfer_id = %id, status = %to, "transfer status changed");
        Ok(transfer)
    }
}

#[derive(Debug, Clone, Copy)]
enum Party {
    Sender,
    Receiver,
}

async fn load_transfer(uow: &mut dyn LedgerUnitOfWork, id: TransferId) -> Result<Transfer, LedgerError> {
    uow.transfer_for_update(id)
        .await?
        .ok_or_else(|| LedgerError::not_found("Transfer", id))
}

async fn persist_transfer(
    uow: &mut dyn LedgerUnitOfWork,
    transfer: &Transfer,
    user: &UserIdentity,
) -> Result<(), LedgerError> {
    uow.update_transfer(transfer).await?;
    uow.record_transfer_history(&TransferHistoryEntry::new(transfer, &user.username))
        .await?;
    Ok(())
}

/// Service driving initiative agreements and admin adjustments
pub struct IssuanceService {
    database: Arc<dyn LedgerDatabase>,
    ledger: LedgerService,
}

impl IssuanceService {
    pub fn new(database: Arc<dyn LedgerDatabase>, ledger: LedgerService) -> Self {
        Self { database, ledger }
    }

    /// Creates a draft issuance
    #[instrument(skip(self, user, issuance), fields(user = %user.username, organization = %issuance.organization_id))]
    pub async fn create(&self, user: &UserIdentity, issuance: NewIssuance) -> Result<Issuance, LedgerError> {
        user.require_role(&[Role::Analyst])?;
        issuance.validate()?;
        let mut uow = self.database.begin_ledger(&AuditContext::for_user(user)).await?;
        let issuance = uow.insert_issuance(issuance).await?;
        uow.record_issuance_history(&IssuanceHistoryEntry::new(&issuance, &user.username))
            .await?;
        uow.commit().await?;
        info!(issuance_id = %issuance.id, units = issuance.compliance_units, "issuance drafted");
        Ok(issuance)
    }

    /// Changes the units of a draft issuance
    pub async fn update(&self, user: &UserIdentity, id: IssuanceId, units: i64) -> Result<Issuance, LedgerError> {
        user.require_role(&[Role::Analyst])?;
        let mut uow = self.database.begin_ledger(&AuditContext::for_user(user)).await?;
        let mut issuance = load_issuance(uow.as_mut(), id).await?;
        issuance.set_units(units)?;
        uow.update_issuance(&issuance).await?;
        uow.commit().await?;
        Ok(issuance)
    }

    /// Draft → Recommended; reserves the units against the organization
    #[instrument(skip(self, user), fields(user = %user.username, issuance_id = %id))]
    pub async fn recommend(&self, user: &UserIdentity, id: IssuanceId) -> Result<Issuance, LedgerError> {
        user.require_role(&[Role::Analyst])?;
        let mut uow = self.database.begin_ledger(&AuditContext::for_user(user)).await?;
        let mut issuance = load_issuance(uow.as_mut(), id).await?;
        issuance.transition_to(IssuanceStatus::Recommended)?;
        let reservation = self
            .ledger
            .reserve(uow.as_mut(), issuance.organization_id, issuance.compliance_units)
            .await?;
        issuance.transaction_id = Some(reservation.id);
        self.persist(uow, &issuance, user).await?;
        info!(transaction_id = %reservation.id, "issuance recommended");
        Ok(issuance)
    }

    /// Recommended → Draft; releases the reservation
    pub async fn return_to_draft(&self, user: &UserIdentity, id: IssuanceId) -> Result<Issuance, LedgerError> {
        user.require_role(&[Role::ComplianceManager, Role::Director])?;
        let mut uow = self.database.begin_ledger(&AuditContext::for_user(user)).await?;
        let mut issuance = load_issuance(uow.as_mut(), id).await?;
        issuance.transition_to(IssuanceStatus::Draft)?;
        if let Some(tx) = issuance.transaction_id.take() {
            self.ledger.release_reservation(uow.as_mut(), tx).await?;
        }
        self.persist(uow, &issuance, user).await?;
        Ok(issuance)
    }

    /// Recommended → Approved; confirms the reservation
    #[instrument(skip(self, user), fields(user = %user.username, issuance_id = %id))]
    pub async fn approve(&self, user: &UserIdentity, id: IssuanceId) -> Result<Issuance, LedgerError> {
        user.require_role(&[Role::Director])?;
        let mut uow = self.database.begin_ledger(&AuditContext::for_user(user)).await?;
        let mut issuance = load_issuance(uow.as_mut(), id).await?;
        issuance.transition_to(IssuanceStatus::Approved)?;
        let tx = issuance.transaction_id.ok_or_else(|| {
            LedgerError::InvalidState(format!("{id} has no reservation to confirm"))
        })?;
        self.ledger.confirm_reservation(uow.as_mut(), tx).await?;
        issuance.transaction_effective_date.get_or_insert_with(|| Utc::now().date_naive());
        self.persist(uow, &issuance, user).await?;
        info!(units = issuance.compliance_units, "issuance approved");
        Ok(issuance)
    }

    /// Draft or Recommended → Deleted; releases any reservation
    pub async fn delete(&self, user: &UserIdentity, id: IssuanceId) -> Result<Issuance, LedgerError> {
        user.require_role(&[Role::Analyst, Role::ComplianceManager, Role::Director])?;
        let mut uow = self.database.begin_ledger(&AuditContext::for_user(user)).await?;
        let mut issuance = load_issuance(uow.as_mut(), id).await?;
        issuance.transition_to(IssuanceStatus::Deleted)?;
        if let Some(tx) = issuance.transaction_id.take() {
            self.ledger.release_reservation(uow.as_mut(), tx).await?;
        }
        self.persist(uow, &issuance, user).await?;
        Ok(issuance)
    }

    async fn persist(
        &self,
        mut uow: Box<dyn LedgerUnitOfWork>,
        issuance: &Issuance,
        user: &UserIdentity,
    ) -> Result<(), LedgerError> {
        uow.update_issuance(issuance).await?;
        uow.record_issuance_history(&IssuanceHistoryEntry::new(issuance, &user.username))
            .await?;
        uow.commit().await?;
        self.ledger.invalidate(&[issuance.organization_id]).await;
        Ok(())
    }
}

async fn load_issuance(uow: &mut dyn LedgerUnitOfWork, id: IssuanceId) -> Result<Issuance, LedgerError> {
    uow.issuance_for_update(id)
        .await?
        .ok_or_else(|| LedgerError::not_found(id.kind().entity_name(), id))
}
