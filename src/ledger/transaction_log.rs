use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::decimal::{Currency, Money};
use crate::errors::{LedgerError, Result};
use crate::types::{AccountId, LoanId, TransactionId, TransactionStatus, TransactionType};

/// one monetary event against one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    /// position in the account's log, starting at 1
    pub sequence: u64,
    pub kind: TransactionType,
    /// signed: inflows positive, outflows negative
    pub amount: Money,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub loan_id: Option<LoanId>,
    /// the other leg of a transfer
    pub counterparty_id: Option<TransactionId>,
    pub failure_reason: Option<String>,
}

impl Transaction {
    /// unsigned size of the movement
    pub fn magnitude(&self) -> Money {
        self.amount.abs()
    }

    /// what this transaction currently contributes to the balance
    pub fn balance_effect(&self) -> Money {
        match self.status {
            TransactionStatus::Completed => self.amount,
            TransactionStatus::Pending | TransactionStatus::Failed => {
                Money::zero(self.amount.currency())
            }
        }
    }

    /// copy of this record in its failed form
    pub fn failed(&self, reason: impl Into<String>, at: DateTime<Utc>) -> Transaction {
        Transaction {
            status: TransactionStatus::Failed,
            settled_at: Some(at),
            failure_reason: Some(reason.into()),
            ..self.clone()
        }
    }

    /// copy of this record in its completed form
    pub fn completed(&self, at: DateTime<Utc>) -> Transaction {
        Transaction {
            status: TransactionStatus::Completed,
            settled_at: Some(at),
            ..self.clone()
        }
    }
}

/// request to append a transaction
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub kind: TransactionType,
    /// positive magnitude; the sign comes from `kind`
    pub amount: Money,
    pub loan_id: Option<LoanId>,
    pub counterparty_id: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
}

impl NewTransaction {
    pub fn new(
        account_id: AccountId,
        kind: TransactionType,
        amount: Money,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            kind,
            amount,
            loan_id: None,
            counterparty_id: None,
            created_at,
        }
    }

    pub fn loan(mut self, loan_id: Option<LoanId>) -> Self {
        self.loan_id = loan_id;
        self
    }

    pub fn counterparty(mut self, transaction_id: TransactionId) -> Self {
        self.counterparty_id = Some(transaction_id);
        self
    }
}

#[derive(Debug, Default)]
struct AccountLog {
    entries: Vec<Transaction>,
    /// highest sequence handed out; rows that never reached the store leave gaps
    last_sequence: u64,
    /// bumped whenever a transaction of this account completes
    revision: u64,
}

#[derive(Debug, Clone, Copy)]
struct Position {
    account_id: AccountId,
    offset: usize,
}

/// append-only record of every monetary event, sharded by account
#[derive(Debug, Default)]
pub struct TransactionLog {
    accounts: DashMap<AccountId, AccountLog>,
    index: DashMap<TransactionId, Position>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// append a pending transaction
    pub fn append(
        &self,
        account_id: AccountId,
        kind: TransactionType,
        amount: Money,
        loan_id: Option<LoanId>,
        created_at: DateTime<Utc>,
    ) -> Result<Transaction> {
        self.append_new(NewTransaction::new(account_id, kind, amount, created_at).loan(loan_id))
    }

    pub fn append_new(&self, new: NewTransaction) -> Result<Transaction> {
        if !new.amount.is_positive() {
            return Err(LedgerError::InvalidAmount {
                message: format!("{} must be positive, got {}", new.kind, new.amount),
            });
        }
        if self.index.contains_key(&new.id) {
            return Err(LedgerError::DuplicateTransaction { id: new.id });
        }

        let mut log = self.accounts.entry(new.account_id).or_default();
        log.last_sequence += 1;
        let transaction = Transaction {
            id: new.id,
            account_id: new.account_id,
            sequence: log.last_sequence,
            kind: new.kind,
            amount: new.kind.signed(new.amount),
            status: TransactionStatus::Pending,
            created_at: new.created_at,
            settled_at: None,
            loan_id: new.loan_id,
            counterparty_id: new.counterparty_id,
            failure_reason: None,
        };

        self.index.insert(
            transaction.id,
            Position {
                account_id: transaction.account_id,
                offset: log.entries.len(),
            },
        );
        log.entries.push(transaction.clone());

        debug!(
            transaction_id = %transaction.id,
            account_id = %transaction.account_id,
            kind = %transaction.kind,
            sequence = transaction.sequence,
            "transaction appended"
        );
        Ok(transaction)
    }

    /// pending -> completed; the account's revision moves so cached balances
    /// are recomputed
    pub fn mark_completed(&self, id: TransactionId, at: DateTime<Utc>) -> Result<Transaction> {
        self.transition(id, |tx, log| {
            tx.status = TransactionStatus::Completed;
            tx.settled_at = Some(at);
            log.revision += 1;
        })
    }

    /// pending -> failed; no effect on the balance
    pub fn mark_failed(
        &self,
        id: TransactionId,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<Transaction> {
        let reason = reason.into();
        self.transition(id, move |tx, _| {
            tx.status = TransactionStatus::Failed;
            tx.settled_at = Some(at);
            tx.failure_reason = Some(reason);
        })
    }

    fn transition<F>(&self, id: TransactionId, apply: F) -> Result<Transaction>
    where
        F: FnOnce(&mut Transaction, &mut AccountLog),
    {
        let position = *self
            .index
            .get(&id)
            .ok_or(LedgerError::TransactionNotFound { id })?;

        let mut log = self
            .accounts
            .get_mut(&position.account_id)
            .ok_or(LedgerError::TransactionNotFound { id })?;

        let mut tx = log.entries[position.offset].clone();
        if tx.status.is_terminal() {
            return Err(LedgerError::InvalidTransactionState {
                id,
                status: tx.status,
            });
        }

        apply(&mut tx, &mut log);
        log.entries[position.offset] = tx.clone();
        Ok(tx)
    }

    pub fn get(&self, id: TransactionId) -> Option<Transaction> {
        let position = *self.index.get(&id)?;
        self.accounts
            .get(&position.account_id)
            .map(|log| log.entries[position.offset].clone())
    }

    /// all transactions of an account in sequence order
    pub fn transactions_for(&self, account_id: AccountId) -> Vec<Transaction> {
        self.accounts
            .get(&account_id)
            .map(|log| log.entries.clone())
            .unwrap_or_default()
    }

    /// revision counter used to detect stale cached balances
    pub fn revision(&self, account_id: AccountId) -> u64 {
        self.accounts.get(&account_id).map(|log| log.revision).unwrap_or(0)
    }

    /// highest sequence handed out for the account
    pub fn last_sequence(&self, account_id: AccountId) -> u64 {
        self.accounts
            .get(&account_id)
            .map(|log| log.last_sequence)
            .unwrap_or(0)
    }

    /// signed sum of completed transactions together with the revision it reflects
    pub fn completed_balance(&self, account_id: AccountId, currency: Currency) -> Result<(Money, u64)> {
        match self.accounts.get(&account_id) {
            Some(log) => {
                let balance = log
                    .entries
                    .iter()
                    .try_fold(Money::zero(currency), |acc, tx| acc.checked_add(tx.balance_effect()))?;
                Ok((balance, log.revision))
            }
            None => Ok((Money::zero(currency), 0)),
        }
    }

    /// total of pending withdrawals and other outflows, as a positive amount
    pub fn pending_outflow(&self, account_id: AccountId, currency: Currency) -> Result<Money> {
        self.sum_pending(account_id, currency, |tx| tx.amount.is_negative())
    }

    pub fn pending_count(&self, account_id: AccountId) -> usize {
        self.accounts
            .get(&account_id)
            .map(|log| {
                log.entries
                    .iter()
                    .filter(|tx| tx.status == TransactionStatus::Pending)
                    .count()
            })
            .unwrap_or(0)
    }

    fn sum_pending<P>(&self, account_id: AccountId, currency: Currency, keep: P) -> Result<Money>
    where
        P: Fn(&Transaction) -> bool,
    {
        match self.accounts.get(&account_id) {
            Some(log) => log
                .entries
                .iter()
                .filter(|tx| tx.status == TransactionStatus::Pending && keep(tx))
                .try_fold(Money::zero(currency), |acc, tx| acc.checked_add(tx.magnitude())),
            None => Ok(Money::zero(currency)),
        }
    }

    /// rebuild an account's log from stored rows
    pub fn restore(&self, account_id: AccountId, mut rows: Vec<Transaction>) -> Result<()> {
        rows.sort_by_key(|tx| tx.sequence);
        let mut previous = 0;
        for tx in &rows {
            if tx.account_id != account_id || tx.sequence <= previous {
                return Err(LedgerError::PersistenceFailure {
                    message: format!(
                        "transaction rows for account {account_id} are not strictly ordered"
                    ),
                });
            }
            previous = tx.sequence;
        }

        let mut log = self.accounts.entry(account_id).or_default();
        if !log.entries.is_empty() {
            return Err(LedgerError::PersistenceFailure {
                message: format!("account {account_id} already has a loaded log"),
            });
        }
        for (offset, tx) in rows.iter().enumerate() {
            self.index.insert(tx.id, Position { account_id, offset });
        }
        log.revision = rows
            .iter()
            .filter(|tx| tx.status == TransactionStatus::Completed)
            .count() as u64;
        log.last_sequence = previous;
        log.entries = rows;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn gmd(minor: i64) -> Money {
        Money::from_minor(minor, Currency::Gmd)
    }

    #[test]
    fn test_append_starts_pending_with_signed_amount() {
        let log = TransactionLog::new();
        let account = Uuid::new_v4();

        let deposit = log.append(account, TransactionType::Deposit, gmd(500), None, at()).unwrap();
        let withdrawal = log
            .append(account, TransactionType::Withdrawal, gmd(200), None, at())
            .unwrap();

        assert_eq!(deposit.status, TransactionStatus::Pending);
        assert_eq!(deposit.sequence, 1);
        assert_eq!(withdrawal.sequence, 2);
        assert_eq!(withdrawal.amount, gmd(-200));
        assert_eq!(log.completed_balance(account, Currency::Gmd).unwrap().0, gmd(0));
        assert_eq!(log.pending_outflow(account, Currency::Gmd).unwrap(), gmd(200));
    }

    #[test]
    fn test_completion_changes_balance_once() {
        let log = TransactionLog::new();
        let account = Uuid::new_v4();
        let tx = log.append(account, TransactionType::Deposit, gmd(500), None, at()).unwrap();

        log.mark_completed(tx.id, at()).unwrap();
        assert_eq!(log.completed_balance(account, Currency::Gmd).unwrap(), (gmd(500), 1));

        let replay = log.mark_completed(tx.id, at());
        assert!(matches!(
            replay,
            Err(LedgerError::InvalidTransactionState {
                status: TransactionStatus::Completed,
                ..
            })
        ));
        assert_eq!(log.completed_balance(account, Currency::Gmd).unwrap(), (gmd(500), 1));
    }

    #[test]
    fn test_failed_transactions_have_no_effect() {
        let log = TransactionLog::new();
        let account = Uuid::new_v4();
        let tx = log.append(account, TransactionType::Deposit, gmd(500), None, at()).unwrap();

        let failed = log.mark_failed(tx.id, "rail rejected", at()).unwrap();
        assert_eq!(failed.failure_reason.as_deref(), Some("rail rejected"));
        assert_eq!(log.completed_balance(account, Currency::Gmd).unwrap().0, gmd(0));
        assert!(log.mark_completed(tx.id, at()).is_err());
        assert_eq!(log.revision(account), 0);
    }

    #[test]
    fn test_rejects_non_positive_amounts() {
        let log = TransactionLog::new();
        let account = Uuid::new_v4();
        assert!(log.append(account, TransactionType::Deposit, gmd(0), None, at()).is_err());
        assert!(log.append(account, TransactionType::Deposit, gmd(-5), None, at()).is_err());
        assert!(log.transactions_for(account).is_empty());
    }

    #[test]
    fn test_rejects_reused_transaction_id() {
        let log = TransactionLog::new();
        let account = Uuid::new_v4();
        let new = NewTransaction::new(account, TransactionType::Deposit, gmd(500), at());
        let id = new.id;

        log.append_new(new.clone()).unwrap();
        assert_eq!(log.append_new(new), Err(LedgerError::DuplicateTransaction { id }));
        assert_eq!(log.transactions_for(account).len(), 1);
        assert_eq!(log.last_sequence(account), 1);
    }

    #[test]
    fn test_unknown_transaction() {
        let log = TransactionLog::new();
        let id = Uuid::new_v4();
        assert_eq!(
            log.mark_completed(id, at()),
            Err(LedgerError::TransactionNotFound { id })
        );
    }

    #[test]
    fn test_restore_keeps_sequences() {
        let source = TransactionLog::new();
        let account = Uuid::new_v4();
        let first = source.append(account, TransactionType::Deposit, gmd(100), None, at()).unwrap();
        source.mark_completed(first.id, at()).unwrap();
        let second = source.append(account, TransactionType::Deposit, gmd(100), None, at()).unwrap();

        let rows = source.transactions_for(account);
        let restored = TransactionLog::new();
        restored.restore(account, rows).unwrap();
        assert_eq!(restored.completed_balance(account, Currency::Gmd).unwrap(), (gmd(100), 1));
        assert_eq!(restored.get(second.id).unwrap().status, TransactionStatus::Pending);

        let next = restored
            .append(account, TransactionType::Deposit, gmd(5), None, at())
            .unwrap();
        assert_eq!(next.sequence, 3);

        let duplicated = vec![source.get(first.id).unwrap(), source.get(first.id).unwrap()];
        assert!(TransactionLog::new().restore(account, duplicated).is_err());
    }
}
