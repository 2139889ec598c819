use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hourglass_rs::SafeTimeProvider;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::decimal::{Currency, Money};
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventStore};
use crate::ledger::guard::{AccountGuards, AccountState};
use crate::ledger::transaction_log::{NewTransaction, Transaction, TransactionLog};
use crate::loan::Loan;
use crate::store::{LedgerStore, WriteBatch};
use crate::types::{AccountId, OwnerId, TransactionId, TransactionStatus, TransactionType};

/// member cash account; the balance is derived from completed transactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner_id: OwnerId,
    pub currency: Currency,
    /// sequence of the latest transaction appended for this account
    pub sequence: u64,
    pub balance: Money,
    pub active: bool,
    pub opened_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

/// both legs of a completed transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub outgoing: Transaction,
    pub incoming: Transaction,
}

/// account balances and the only entry point for balance-affecting writes
pub struct AccountLedger {
    config: LedgerConfig,
    guards: AccountGuards,
    log: TransactionLog,
    owners: DashMap<OwnerId, Vec<AccountId>>,
    store: Arc<dyn LedgerStore>,
    events: Mutex<EventStore>,
    time: Arc<SafeTimeProvider>,
}

impl AccountLedger {
    pub fn new(
        config: LedgerConfig,
        store: Arc<dyn LedgerStore>,
        time: Arc<SafeTimeProvider>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            guards: AccountGuards::new(config.lock_timeout()),
            config,
            log: TransactionLog::new(),
            owners: DashMap::new(),
            store,
            events: Mutex::new(EventStore::new()),
            time,
        })
    }

    /// rebuild accounts and their logs from the store; balances are recomputed
    /// from the transaction rows rather than trusted from the account rows
    pub fn restore(
        config: LedgerConfig,
        store: Arc<dyn LedgerStore>,
        time: Arc<SafeTimeProvider>,
    ) -> Result<Self> {
        let ledger = Self::new(config, store, time)?;

        for stored in ledger.store.load_accounts()? {
            let rows = ledger.store.load_transactions(stored.id)?;
            ledger.log.restore(stored.id, rows)?;

            let (balance, revision) = ledger.log.completed_balance(stored.id, stored.currency)?;
            if balance != stored.balance {
                warn!(
                    account_id = %stored.id,
                    stored = %stored.balance,
                    derived = %balance,
                    "stored balance disagrees with transaction rows"
                );
            }

            let account = Account {
                balance,
                sequence: ledger.log.last_sequence(stored.id),
                ..stored
            };
            ledger
                .owners
                .entry(account.owner_id.clone())
                .or_default()
                .push(account.id);
            ledger.guards.insert(AccountState::new(account, revision));
        }

        for loan in ledger.store.load_loans()? {
            if loan.status.is_open() {
                ledger.guards.with_account(loan.borrower_account_id, |state| {
                    state.track_loan(&loan);
                    Ok(())
                })?;
            }
        }

        info!(accounts = ledger.guards.ids().len(), "ledger restored");
        Ok(ledger)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn open_account(&self, owner_id: impl Into<OwnerId>, currency: Currency) -> Result<Account> {
        let now = self.now();
        let account = Account {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            currency,
            sequence: 0,
            balance: Money::zero(currency),
            active: true,
            opened_at: now,
            deactivated_at: None,
        };

        self.commit(WriteBatch::new().account(account.clone()))?;

        self.owners
            .entry(account.owner_id.clone())
            .or_default()
            .push(account.id);
        self.guards.insert(AccountState::new(account.clone(), 0));

        info!(account_id = %account.id, owner_id = %account.owner_id, %currency, "account opened");
        self.emit(Event::AccountOpened {
            account_id: account.id,
            owner_id: account.owner_id.clone(),
            timestamp: now,
        });
        Ok(account)
    }

    /// open an account in the ledger's configured currency
    pub fn open_default_account(&self, owner_id: impl Into<OwnerId>) -> Result<Account> {
        self.open_account(owner_id, self.config.currency)
    }

    /// close an empty account with no open loans; it stays readable but
    /// rejects new activity
    pub fn deactivate_account(&self, account_id: AccountId) -> Result<Account> {
        self.guards.with_account(account_id, |state| {
            self.refresh(state)?;
            ensure_active(&state.account)?;

            if !state.open_loans.is_empty() {
                return Err(LedgerError::AccountHasOpenLoans {
                    id: account_id,
                    open_loans: state.open_loans.len(),
                });
            }

            if !state.account.balance.is_zero() || self.log.pending_count(account_id) > 0 {
                return Err(LedgerError::AccountNotEmpty {
                    id: account_id,
                    balance: state.account.balance,
                });
            }

            let now = self.now();
            let updated = Account {
                active: false,
                deactivated_at: Some(now),
                ..state.account.clone()
            };
            self.commit(WriteBatch::new().account(updated.clone()))?;
            state.account = updated.clone();

            info!(%account_id, "account deactivated");
            self.emit(Event::AccountDeactivated {
                account_id,
                timestamp: now,
            });
            Ok(updated)
        })
    }

    pub fn get_account(&self, account_id: AccountId) -> Result<Account> {
        self.guards.with_account(account_id, |state| {
            self.refresh(state)?;
            Ok(state.account.clone())
        })
    }

    pub fn accounts_for_owner(&self, owner_id: &str) -> Result<Vec<Account>> {
        let ids = self
            .owners
            .get(owner_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        ids.into_iter().map(|id| self.get_account(id)).collect()
    }

    /// completed balance, read under the account guard
    pub fn get_balance(&self, account_id: AccountId) -> Result<Money> {
        self.guards.with_account(account_id, |state| {
            self.refresh(state)?;
            Ok(state.account.balance)
        })
    }

    /// balance less funds reserved by pending outflows
    pub fn available_balance(&self, account_id: AccountId) -> Result<Money> {
        self.guards.with_account(account_id, |state| {
            self.refresh(state)?;
            self.available(state)
        })
    }

    pub fn deposit(&self, account_id: AccountId, amount: Money) -> Result<Transaction> {
        let new = NewTransaction::new(account_id, TransactionType::Deposit, amount, self.now());
        self.post_instant(new, WriteBatch::new())
    }

    pub fn withdraw(&self, account_id: AccountId, amount: Money) -> Result<Transaction> {
        let new = NewTransaction::new(account_id, TransactionType::Withdrawal, amount, self.now());
        self.post_instant(new, WriteBatch::new())
    }

    /// move funds between two accounts; both legs complete or neither does
    pub fn transfer(&self, from: AccountId, to: AccountId, amount: Money) -> Result<TransferReceipt> {
        self.guards.with_pair(from, to, |source, destination| {
            let now = self.now();
            ensure_active(&source.account)?;
            ensure_active(&destination.account)?;
            validate_amount(&source.account, amount)?;
            validate_amount(&destination.account, amount)?;

            self.refresh(source)?;
            self.refresh(destination)?;
            self.ensure_available(source, amount)?;

            let outgoing = NewTransaction::new(from, TransactionType::TransferOut, amount, now);
            let incoming = NewTransaction::new(to, TransactionType::TransferIn, amount, now)
                .counterparty(outgoing.id);
            let outgoing = outgoing.counterparty(incoming.id);

            let out_pending = self.log.append_new(outgoing)?;
            let in_pending = match self.log.append_new(incoming) {
                Ok(tx) => tx,
                Err(err) => {
                    self.log.mark_failed(out_pending.id, err.to_string(), now)?;
                    return Err(err);
                }
            };

            let out_done = out_pending.completed(now);
            let in_done = in_pending.completed(now);
            let source_row = Account {
                sequence: out_done.sequence,
                balance: source.account.balance.checked_add(out_done.amount)?,
                ..source.account.clone()
            };
            let destination_row = Account {
                sequence: in_done.sequence,
                balance: destination.account.balance.checked_add(in_done.amount)?,
                ..destination.account.clone()
            };

            let batch = WriteBatch::new()
                .account(source_row.clone())
                .account(destination_row.clone())
                .transaction(out_done.clone())
                .transaction(in_done.clone());
            if let Err(err) = self.commit(batch) {
                let reason = err.to_string();
                self.log.mark_failed(out_pending.id, reason.clone(), now)?;
                self.log.mark_failed(in_pending.id, reason, now)?;
                return Err(err);
            }

            self.log.mark_completed(out_pending.id, now)?;
            self.log.mark_completed(in_pending.id, now)?;
            source.account = source_row;
            source.balance_revision = self.log.revision(from);
            destination.account = destination_row;
            destination.balance_revision = self.log.revision(to);

            info!(
                from_account = %from,
                to_account = %to,
                %amount,
                outgoing_id = %out_done.id,
                incoming_id = %in_done.id,
                "transfer completed"
            );
            self.emit_completed(&out_done, source.account.balance, now);
            self.emit_completed(&in_done, destination.account.balance, now);

            Ok(TransferReceipt {
                outgoing: out_done,
                incoming: in_done,
            })
        })
    }

    /// record a deposit arriving over an external rail; it counts once settled
    pub fn begin_deposit(&self, account_id: AccountId, amount: Money) -> Result<Transaction> {
        self.begin_pending(account_id, TransactionType::Deposit, amount)
    }

    /// reserve funds for a withdrawal paid out over an external rail
    pub fn begin_withdrawal(&self, account_id: AccountId, amount: Money) -> Result<Transaction> {
        self.begin_pending(account_id, TransactionType::Withdrawal, amount)
    }

    fn begin_pending(
        &self,
        account_id: AccountId,
        kind: TransactionType,
        amount: Money,
    ) -> Result<Transaction> {
        self.guards.with_account(account_id, |state| {
            let now = self.now();
            ensure_active(&state.account)?;
            validate_amount(&state.account, amount)?;
            self.refresh(state)?;
            if !kind.is_inflow() {
                self.ensure_available(state, amount)?;
            }

            let pending = self
                .log
                .append_new(NewTransaction::new(account_id, kind, amount, now))?;
            let row = Account {
                sequence: pending.sequence,
                ..state.account.clone()
            };
            let batch = WriteBatch::new()
                .account(row.clone())
                .transaction(pending.clone());
            if let Err(err) = self.commit(batch) {
                self.log.mark_failed(pending.id, err.to_string(), now)?;
                return Err(err);
            }
            state.account = row;

            info!(%account_id, transaction_id = %pending.id, %kind, %amount, "pending transaction recorded");
            self.emit(Event::TransactionAppended {
                transaction_id: pending.id,
                account_id,
                kind,
                amount: pending.amount,
                timestamp: now,
            });
            Ok(pending)
        })
    }

    /// pending -> completed for a transaction started with `begin_*`
    pub fn settle_transaction(&self, transaction_id: TransactionId) -> Result<Transaction> {
        let account_id = self.owning_account(transaction_id)?;
        self.guards.with_account(account_id, |state| {
            let now = self.now();
            let pending = self.pending(transaction_id)?;
            self.refresh(state)?;

            let completed = pending.completed(now);
            let row = Account {
                balance: state.account.balance.checked_add(completed.amount)?,
                ..state.account.clone()
            };
            self.commit(
                WriteBatch::new()
                    .account(row.clone())
                    .transaction(completed.clone()),
            )?;

            self.log.mark_completed(transaction_id, now)?;
            state.account = row;
            state.balance_revision = self.log.revision(account_id);

            info!(%account_id, %transaction_id, amount = %completed.amount, "transaction settled");
            self.emit_completed(&completed, state.account.balance, now);
            Ok(completed)
        })
    }

    /// pending -> failed; releases any reserved funds
    pub fn fail_transaction(
        &self,
        transaction_id: TransactionId,
        reason: impl Into<String>,
    ) -> Result<Transaction> {
        let reason = reason.into();
        let account_id = self.owning_account(transaction_id)?;
        self.guards.with_account(account_id, |_state| {
            let now = self.now();
            let failed = self.pending(transaction_id)?.failed(reason.clone(), now);
            self.commit(WriteBatch::new().transaction(failed.clone()))?;
            self.log.mark_failed(transaction_id, reason.clone(), now)?;

            info!(%account_id, %transaction_id, %reason, "transaction failed");
            self.emit(Event::TransactionFailed {
                transaction_id,
                account_id,
                reason: reason.clone(),
                timestamp: now,
            });
            Ok(failed)
        })
    }

    pub fn get_transaction(&self, transaction_id: TransactionId) -> Result<Transaction> {
        self.log
            .get(transaction_id)
            .ok_or(LedgerError::TransactionNotFound { id: transaction_id })
    }

    /// statement lines in sequence order
    pub fn transactions(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        if !self.guards.contains(account_id) {
            return Err(LedgerError::AccountNotFound { id: account_id });
        }
        Ok(self.log.transactions_for(account_id))
    }

    pub fn take_events(&self) -> Vec<Event> {
        self.events.lock().take_events()
    }

    /// append and complete one transaction under the account guard, committing
    /// `companion` rows in the same batch
    pub(crate) fn post_instant(&self, new: NewTransaction, companion: WriteBatch) -> Result<Transaction> {
        let account_id = new.account_id;
        self.guards.with_account(account_id, |state| {
            let now = self.now();
            ensure_active(&state.account)?;
            validate_amount(&state.account, new.amount)?;
            self.refresh(state)?;
            if !new.kind.is_inflow() {
                self.ensure_available(state, new.amount)?;
            }

            let pending = self.log.append_new(new)?;
            let completed = pending.completed(now);
            let row = Account {
                sequence: completed.sequence,
                balance: state.account.balance.checked_add(completed.amount)?,
                ..state.account.clone()
            };

            let loans = companion.loans.clone();
            let batch = WriteBatch::new()
                .account(row.clone())
                .transaction(completed.clone())
                .merge(companion);
            if let Err(err) = self.commit(batch) {
                self.log.mark_failed(pending.id, err.to_string(), now)?;
                return Err(err);
            }

            self.log.mark_completed(pending.id, now)?;
            state.account = row;
            state.balance_revision = self.log.revision(account_id);
            for loan in &loans {
                state.track_loan(loan);
            }

            info!(
                %account_id,
                transaction_id = %completed.id,
                kind = %completed.kind,
                amount = %completed.amount,
                balance = %state.account.balance,
                "transaction completed"
            );
            self.emit_completed(&completed, state.account.balance, now);
            Ok(completed)
        })
    }

    /// commit a loan row that moves no money, under the borrower's guard so
    /// deactivation sees which loans are still open
    pub(crate) fn commit_loan(&self, loan: &Loan) -> Result<()> {
        self.guards.with_account(loan.borrower_account_id, |state| {
            if loan.status.is_open() {
                ensure_active(&state.account)?;
            }
            self.commit(WriteBatch::new().loan(loan.clone()))?;
            state.track_loan(loan);
            Ok(())
        })
    }

    pub(crate) fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// commit a batch that touches no account balance
    pub(crate) fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.store.commit(&batch).map_err(|err| {
            warn!(error = %err, "ledger commit failed");
            LedgerError::from(err)
        })
    }

    /// recompute the cached balance when the log has moved on since it was taken
    fn refresh(&self, state: &mut AccountState) -> Result<()> {
        let id = state.account.id;
        if self.log.revision(id) == state.balance_revision {
            return Ok(());
        }
        let (balance, revision) = self.log.completed_balance(id, state.account.currency)?;
        debug!(account_id = %id, %balance, revision, "cached balance recomputed");
        state.account.balance = balance;
        state.balance_revision = revision;
        Ok(())
    }

    fn available(&self, state: &AccountState) -> Result<Money> {
        let reserved = self
            .log
            .pending_outflow(state.account.id, state.account.currency)?;
        state.account.balance.checked_sub(reserved)
    }

    fn ensure_available(&self, state: &AccountState, amount: Money) -> Result<()> {
        let available = self.available(state)?;
        if amount > available {
            return Err(LedgerError::InsufficientFunds {
                available,
                requested: amount,
            });
        }
        Ok(())
    }

    fn owning_account(&self, transaction_id: TransactionId) -> Result<AccountId> {
        Ok(self.get_transaction(transaction_id)?.account_id)
    }

    /// fresh read of a transaction that must still be pending
    fn pending(&self, transaction_id: TransactionId) -> Result<Transaction> {
        let tx = self.get_transaction(transaction_id)?;
        if tx.status != TransactionStatus::Pending {
            return Err(LedgerError::InvalidTransactionState {
                id: transaction_id,
                status: tx.status,
            });
        }
        Ok(tx)
    }

    fn emit(&self, event: Event) {
        self.events.lock().emit(event);
    }

    fn emit_completed(&self, tx: &Transaction, new_balance: Money, at: DateTime<Utc>) {
        self.emit(Event::TransactionCompleted {
            transaction_id: tx.id,
            account_id: tx.account_id,
            new_balance,
            timestamp: at,
        });
    }
}

fn ensure_active(account: &Account) -> Result<()> {
    if !account.active {
        return Err(LedgerError::AccountInactive { id: account.id });
    }
    Ok(())
}

fn validate_amount(account: &Account, amount: Money) -> Result<()> {
    if amount.currency() != account.currency {
        return Err(LedgerError::CurrencyMismatch {
            expected: account.currency,
            found: amount.currency(),
        });
    }
    if !amount.is_positive() {
        return Err(LedgerError::InvalidAmount {
            message: format!("amount must be positive, got {amount}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::TimeZone;
    use hourglass_rs::TimeSource;

    fn gmd(major: i64) -> Money {
        Money::from_major(major, Currency::Gmd).unwrap()
    }

    fn setup() -> (AccountLedger, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let time = Arc::new(SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )));
        let ledger = AccountLedger::new(LedgerConfig::default(), store.clone(), time).unwrap();
        (ledger, store)
    }

    #[test]
    fn test_deposit_and_withdraw() {
        let (ledger, _) = setup();
        let account = ledger.open_account("member-1", Currency::Gmd).unwrap();

        let deposit = ledger.deposit(account.id, gmd(500)).unwrap();
        assert_eq!(deposit.status, TransactionStatus::Completed);
        ledger.withdraw(account.id, gmd(200)).unwrap();

        assert_eq!(ledger.get_balance(account.id).unwrap(), gmd(300));
        assert_eq!(ledger.get_account(account.id).unwrap().sequence, 2);
    }

    #[test]
    fn test_overdraw_is_rejected_without_effect() {
        let (ledger, _) = setup();
        let account = ledger.open_account("member-1", Currency::Gmd).unwrap();
        ledger.deposit(account.id, gmd(100)).unwrap();

        let err = ledger.withdraw(account.id, gmd(101)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                available: gmd(100),
                requested: gmd(101)
            }
        );
        assert_eq!(ledger.get_balance(account.id).unwrap(), gmd(100));
        assert_eq!(ledger.transactions(account.id).unwrap().len(), 1);
    }

    #[test]
    fn test_amount_validation() {
        let (ledger, _) = setup();
        let account = ledger.open_account("member-1", Currency::Gmd).unwrap();

        assert!(matches!(
            ledger.deposit(account.id, gmd(0)),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(matches!(
            ledger.deposit(account.id, Money::from_major(5, Currency::Usd).unwrap()),
            Err(LedgerError::CurrencyMismatch { .. })
        ));
        assert!(matches!(
            ledger.deposit(Uuid::new_v4(), gmd(5)),
            Err(LedgerError::AccountNotFound { .. })
        ));
    }

    #[test]
    fn test_transfer_links_legs() {
        let (ledger, _) = setup();
        let a = ledger.open_account("member-1", Currency::Gmd).unwrap();
        let b = ledger.open_account("member-2", Currency::Gmd).unwrap();
        ledger.deposit(a.id, gmd(1_000)).unwrap();

        let receipt = ledger.transfer(a.id, b.id, gmd(400)).unwrap();
        assert_eq!(receipt.outgoing.counterparty_id, Some(receipt.incoming.id));
        assert_eq!(receipt.incoming.counterparty_id, Some(receipt.outgoing.id));
        assert_eq!(receipt.outgoing.amount, -gmd(400));
        assert_eq!(ledger.get_balance(a.id).unwrap(), gmd(600));
        assert_eq!(ledger.get_balance(b.id).unwrap(), gmd(400));

        assert!(ledger.transfer(a.id, a.id, gmd(1)).is_err());
    }

    #[test]
    fn test_round_trip_transfer_restores_balances() {
        let (ledger, _) = setup();
        let a = ledger.open_account("member-1", Currency::Gmd).unwrap();
        let b = ledger.open_account("member-2", Currency::Gmd).unwrap();
        ledger.deposit(a.id, gmd(250)).unwrap();
        ledger.deposit(b.id, gmd(75)).unwrap();

        ledger.transfer(a.id, b.id, gmd(100)).unwrap();
        ledger.transfer(b.id, a.id, gmd(100)).unwrap();

        assert_eq!(ledger.get_balance(a.id).unwrap(), gmd(250));
        assert_eq!(ledger.get_balance(b.id).unwrap(), gmd(75));
    }

    #[test]
    fn test_commit_failure_leaves_balance_unchanged() {
        let (ledger, store) = setup();
        let account = ledger.open_account("member-1", Currency::Gmd).unwrap();
        ledger.deposit(account.id, gmd(100)).unwrap();

        store.fail_next_commits(1);
        let err = ledger.deposit(account.id, gmd(50)).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(ledger.get_balance(account.id).unwrap(), gmd(100));

        let statement = ledger.transactions(account.id).unwrap();
        assert_eq!(statement[1].status, TransactionStatus::Failed);
    }

    #[test]
    fn test_pending_withdrawal_reserves_funds() {
        let (ledger, _) = setup();
        let account = ledger.open_account("member-1", Currency::Gmd).unwrap();
        ledger.deposit(account.id, gmd(100)).unwrap();

        let pending = ledger.begin_withdrawal(account.id, gmd(80)).unwrap();
        assert_eq!(ledger.get_balance(account.id).unwrap(), gmd(100));
        assert_eq!(ledger.available_balance(account.id).unwrap(), gmd(20));
        assert!(matches!(
            ledger.withdraw(account.id, gmd(30)),
            Err(LedgerError::InsufficientFunds { .. })
        ));

        ledger.settle_transaction(pending.id).unwrap();
        assert_eq!(ledger.get_balance(account.id).unwrap(), gmd(20));

        let replay = ledger.settle_transaction(pending.id);
        assert!(matches!(replay, Err(LedgerError::InvalidTransactionState { .. })));
        assert_eq!(ledger.get_balance(account.id).unwrap(), gmd(20));
    }

    #[test]
    fn test_failed_rail_deposit_has_no_effect() {
        let (ledger, _) = setup();
        let account = ledger.open_account("member-1", Currency::Gmd).unwrap();
        let pending = ledger.begin_deposit(account.id, gmd(100)).unwrap();

        let failed = ledger.fail_transaction(pending.id, "bounced").unwrap();
        assert_eq!(failed.status, TransactionStatus::Failed);
        assert_eq!(ledger.get_balance(account.id).unwrap(), gmd(0));
        assert!(ledger.settle_transaction(pending.id).is_err());
    }

    #[test]
    fn test_deactivation_requires_empty_account() {
        let (ledger, _) = setup();
        let account = ledger.open_account("member-1", Currency::Gmd).unwrap();
        ledger.deposit(account.id, gmd(10)).unwrap();

        assert!(matches!(
            ledger.deactivate_account(account.id),
            Err(LedgerError::AccountNotEmpty { .. })
        ));

        ledger.withdraw(account.id, gmd(10)).unwrap();
        let closed = ledger.deactivate_account(account.id).unwrap();
        assert!(!closed.active);
        assert_eq!(
            ledger.deposit(account.id, gmd(1)),
            Err(LedgerError::AccountInactive { id: account.id })
        );
    }

    #[test]
    fn test_accounts_for_owner() {
        let (ledger, _) = setup();
        ledger.open_account("member-1", Currency::Gmd).unwrap();
        ledger.open_account("member-1", Currency::Usd).unwrap();
        ledger.open_account("member-2", Currency::Gmd).unwrap();

        assert_eq!(ledger.accounts_for_owner("member-1").unwrap().len(), 2);
        assert!(ledger.accounts_for_owner("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_default_account_uses_configured_currency() {
        let store = Arc::new(InMemoryStore::new());
        let time = Arc::new(SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )));
        let config = LedgerConfig {
            currency: Currency::Usd,
            loan: crate::config::LoanPolicy::micro_loan(Currency::Usd),
            ..LedgerConfig::default()
        };
        let ledger = AccountLedger::new(config, store, time).unwrap();

        let account = ledger.open_default_account("member-1").unwrap();
        assert_eq!(account.currency, Currency::Usd);
        assert_eq!(account.balance, Money::zero(Currency::Usd));
    }

    #[test]
    fn test_restore_recomputes_from_rows() {
        let (ledger, store) = setup();
        let account = ledger.open_account("member-1", Currency::Gmd).unwrap();
        ledger.deposit(account.id, gmd(300)).unwrap();
        store.fail_next_commits(1);
        assert!(ledger.deposit(account.id, gmd(5)).is_err());
        ledger.withdraw(account.id, gmd(120)).unwrap();

        let time = Arc::new(SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        )));
        let restored = AccountLedger::restore(LedgerConfig::default(), store, time).unwrap();
        assert_eq!(restored.get_balance(account.id).unwrap(), gmd(180));
        // the failed deposit never reached the store
        assert_eq!(restored.transactions(account.id).unwrap().len(), 2);

        let next = restored.deposit(account.id, gmd(1)).unwrap();
        assert_eq!(next.sequence, 4);
    }

    #[test]
    fn test_events_record_completions() {
        let (ledger, _) = setup();
        let account = ledger.open_account("member-1", Currency::Gmd).unwrap();
        ledger.deposit(account.id, gmd(10)).unwrap();

        let events = ledger.take_events();
        assert!(matches!(events[0], Event::AccountOpened { .. }));
        assert!(matches!(
            events[1],
            Event::TransactionCompleted { new_balance, .. } if new_balance == gmd(10)
        ));
        assert!(ledger.take_events().is_empty());
    }
}
