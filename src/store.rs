use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use tracing::warn;

use crate::errors::LedgerError;
use crate::ledger::{Account, Transaction};
use crate::loan::Loan;
use crate::payments::Installment;
use crate::types::{AccountId, LoanId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("transaction row ({account_id}, {sequence}) already holds a different transaction")]
    SequenceConflict { account_id: AccountId, sequence: u64 },
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        LedgerError::PersistenceFailure {
            message: err.to_string(),
        }
    }
}

/// rows written together by one operation
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub accounts: Vec<Account>,
    pub transactions: Vec<Transaction>,
    pub loans: Vec<Loan>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(mut self, account: Account) -> Self {
        self.accounts.push(account);
        self
    }

    pub fn transaction(mut self, transaction: Transaction) -> Self {
        self.transactions.push(transaction);
        self
    }

    pub fn loan(mut self, loan: Loan) -> Self {
        self.loans.push(loan);
        self
    }

    /// fold another batch into this one
    pub fn merge(mut self, other: WriteBatch) -> Self {
        self.accounts.extend(other.accounts);
        self.transactions.extend(other.transactions);
        self.loans.extend(other.loans);
        self
    }
}

/// durable storage behind the ledger; `commit` applies a whole batch or nothing
pub trait LedgerStore: Send + Sync {
    fn commit(&self, batch: &WriteBatch) -> Result<(), StoreError>;

    fn load_accounts(&self) -> Result<Vec<Account>, StoreError>;

    /// transactions of one account in sequence order
    fn load_transactions(&self, account_id: AccountId) -> Result<Vec<Transaction>, StoreError>;

    fn load_loans(&self) -> Result<Vec<Loan>, StoreError>;

    /// schedule rows of one loan in installment order
    fn load_schedule(&self, loan_id: LoanId) -> Result<Vec<Installment>, StoreError>;
}

/// in-memory store used by default and in tests
#[derive(Debug, Default)]
pub struct InMemoryStore {
    accounts: DashMap<AccountId, Account>,
    transactions: DashMap<(AccountId, u64), Transaction>,
    loans: DashMap<LoanId, Loan>,
    installments: DashMap<(LoanId, u32), Installment>,
    commit_lock: Mutex<()>,
    failing_commits: AtomicU32,
    commits: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// make the next `n` commits fail without writing anything
    pub fn fail_next_commits(&self, n: u32) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// number of successful commits so far
    pub fn commit_count(&self) -> u32 {
        self.commits.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_sequences(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        for tx in &batch.transactions {
            if let Some(existing) = self.transactions.get(&(tx.account_id, tx.sequence)) {
                if existing.id != tx.id {
                    return Err(StoreError::SequenceConflict {
                        account_id: tx.account_id,
                        sequence: tx.sequence,
                    });
                }
            }
        }
        Ok(())
    }
}

impl LedgerStore for InMemoryStore {
    fn commit(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let _serial = self.commit_lock.lock();

        if self.take_injected_failure() {
            warn!(
                transactions = batch.transactions.len(),
                "injected commit failure"
            );
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        // validate everything before the first write
        self.check_sequences(batch)?;

        for account in &batch.accounts {
            self.accounts.insert(account.id, account.clone());
        }
        for tx in &batch.transactions {
            self.transactions.insert((tx.account_id, tx.sequence), tx.clone());
        }
        for loan in &batch.loans {
            if let Some(schedule) = &loan.schedule {
                for installment in &schedule.installments {
                    self.installments
                        .insert((loan.id, installment.index), installment.clone());
                }
            }
            self.loans.insert(loan.id, loan.clone());
        }

        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let mut accounts: Vec<Account> = self.accounts.iter().map(|e| e.value().clone()).collect();
        accounts.sort_by_key(|a| a.opened_at);
        Ok(accounts)
    }

    fn load_transactions(&self, account_id: AccountId) -> Result<Vec<Transaction>, StoreError> {
        let mut rows: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|e| e.key().0 == account_id)
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by_key(|tx| tx.sequence);
        Ok(rows)
    }

    fn load_loans(&self) -> Result<Vec<Loan>, StoreError> {
        let mut loans: Vec<Loan> = self.loans.iter().map(|e| e.value().clone()).collect();
        loans.sort_by_key(|l| l.application_date);
        Ok(loans)
    }

    fn load_schedule(&self, loan_id: LoanId) -> Result<Vec<Installment>, StoreError> {
        let mut rows: Vec<Installment> = self
            .installments
            .iter()
            .filter(|e| e.key().0 == loan_id)
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by_key(|i| i.index);
        Ok(rows)
    }
}
