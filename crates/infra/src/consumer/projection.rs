use chrono::{DateTime, Utc};
use tracing::{info, warn};

use ledgerflow_core::{AccountNumber, EventId};
use ledgerflow_events::{
    AccountCreated, EventEnvelope, EventTag, FundsDeposited, LedgerEvent, Topic,
    TransferRealized, TransferReceived,
};
use ledgerflow_statements::{MirroredAccount, Movement};

use super::{EventHandler, Handled, HandlerError};
use crate::store::{ApplyOutcome, ProjectionChange, ProjectionStore, StoreError};

/// Projects ledger events into the mirrored accounts and movement history.
///
/// Transfer events carry the ledger's post-transfer balance, which replaces
/// the mirrored one outright; deposits are applied as deltas.
#[derive(Debug, Clone)]
pub struct ProjectionConsumer<S> {
    store: S,
}

impl<S> ProjectionConsumer<S>
where
    S: ProjectionStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn on_account_created(
        &self,
        event_id: EventId,
        e: &AccountCreated,
    ) -> Result<Handled, HandlerError> {
        let account = MirroredAccount::created(e.number, e.document.clone(), e.name.clone());
        match self
            .store
            .apply(event_id, ProjectionChange::CreateAccount(account))
        {
            Ok(outcome) => {
                info!(account_number = %e.number, "mirrored account created");
                Ok(outcome.into())
            }
            Err(StoreError::Conflict(_)) => {
                warn!(account_number = %e.number, "mirrored account already exists");
                Ok(Handled::Skipped)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn on_funds_deposited(
        &self,
        event_id: EventId,
        at: DateTime<Utc>,
        e: &FundsDeposited,
    ) -> Result<Handled, HandlerError> {
        ensure_positive(e.value)?;
        let Some(mut account) = self.mirrored(e.number)? else {
            return Ok(Handled::Skipped);
        };

        account.credit(e.value)?;
        let movement = Movement::deposit(e.number, e.value, at);
        self.update(event_id, account, movement)
    }

    fn on_transfer_realized(
        &self,
        event_id: EventId,
        at: DateTime<Utc>,
        e: &TransferRealized,
    ) -> Result<Handled, HandlerError> {
        ensure_positive(e.value)?;
        let Some(mut account) = self.mirrored(e.from_number)? else {
            return Ok(Handled::Skipped);
        };

        account.set_balance(e.balance);
        let movement = Movement::transfer_out(e.from_number, e.to_number, e.value, at);
        self.update(event_id, account, movement)
    }

    fn on_transfer_received(
        &self,
        event_id: EventId,
        at: DateTime<Utc>,
        e: &TransferReceived,
    ) -> Result<Handled, HandlerError> {
        ensure_positive(e.value)?;
        // `from_number` is the receiving account here.
        let Some(mut account) = self.mirrored(e.from_number)? else {
            return Ok(Handled::Skipped);
        };

        match e.to_balance {
            Some(balance) => account.set_balance(balance),
            None => account.credit(e.value)?,
        }
        let movement = Movement::transfer_in(e.from_number, e.to_number, e.value, at);
        self.update(event_id, account, movement)
    }

    fn mirrored(&self, number: AccountNumber) -> Result<Option<MirroredAccount>, HandlerError> {
        let account = self.store.account(number)?;
        if account.is_none() {
            warn!(account_number = %number, "event for unknown mirrored account, skipping");
        }
        Ok(account)
    }

    fn update(
        &self,
        event_id: EventId,
        account: MirroredAccount,
        movement: Movement,
    ) -> Result<Handled, HandlerError> {
        let number = account.number();
        let outcome = self
            .store
            .apply(event_id, ProjectionChange::UpdateAccount { account, movement })?;
        if outcome == ApplyOutcome::Duplicate {
            info!(account_number = %number, event_id = %event_id, "event already projected");
        }
        Ok(outcome.into())
    }
}

fn ensure_positive(value: i64) -> Result<(), HandlerError> {
    if value <= 0 {
        return Err(HandlerError::Rejected(format!(
            "event carries non-positive value {value}"
        )));
    }
    Ok(())
}

impl From<ApplyOutcome> for Handled {
    fn from(outcome: ApplyOutcome) -> Self {
        match outcome {
            ApplyOutcome::Applied => Handled::Applied,
            ApplyOutcome::Duplicate => Handled::Duplicate,
        }
    }
}

impl<S> EventHandler for ProjectionConsumer<S>
where
    S: ProjectionStore,
{
    fn name(&self) -> &'static str {
        "projection"
    }

    fn accepts(&self, tag: EventTag) -> bool {
        tag.topic() == Topic::Account
    }

    fn handle(
        &self,
        envelope: &EventEnvelope,
        event: &LedgerEvent,
    ) -> Result<Handled, HandlerError> {
        let id = envelope.id();
        let at = envelope.occurred_at();
        match event {
            LedgerEvent::AccountCreated(e) => self.on_account_created(id, e),
            LedgerEvent::FundsDeposited(e) => self.on_funds_deposited(id, at, e),
            LedgerEvent::TransferRealized(e) => self.on_transfer_realized(id, at, e),
            LedgerEvent::TransferReceived(e) => self.on_transfer_received(id, at, e),
            LedgerEvent::StatementGenerationRequested(_) => Ok(Handled::Skipped),
        }
    }
}
