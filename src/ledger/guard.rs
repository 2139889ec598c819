use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::errors::{LedgerError, Result};
use crate::ledger::Account;
use crate::loan::Loan;
use crate::types::{AccountId, LoanId};

/// state protected by an account's guard
#[derive(Debug, Clone)]
pub struct AccountState {
    pub account: Account,
    /// log revision `account.balance` was computed at
    pub balance_revision: u64,
    /// approved or active loans this account is the borrower of
    pub open_loans: BTreeSet<LoanId>,
}

impl AccountState {
    pub fn new(account: Account, balance_revision: u64) -> Self {
        Self {
            account,
            balance_revision,
            open_loans: BTreeSet::new(),
        }
    }

    /// follow a committed loan row of this account
    pub fn track_loan(&mut self, loan: &Loan) {
        if loan.borrower_account_id != self.account.id {
            return;
        }
        if loan.status.is_open() {
            self.open_loans.insert(loan.id);
        } else {
            self.open_loans.remove(&loan.id);
        }
    }
}

type Cell = Arc<Mutex<AccountState>>;

/// one mutex per account; operations on different accounts never contend
#[derive(Debug)]
pub struct AccountGuards {
    cells: DashMap<AccountId, Cell>,
    timeout: Duration,
}

impl AccountGuards {
    pub fn new(timeout: Duration) -> Self {
        Self {
            cells: DashMap::new(),
            timeout,
        }
    }

    /// register a freshly opened or restored account
    pub fn insert(&self, state: AccountState) {
        self.cells
            .insert(state.account.id, Arc::new(Mutex::new(state)));
    }

    pub fn contains(&self, id: AccountId) -> bool {
        self.cells.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<AccountId> {
        self.cells.iter().map(|e| *e.key()).collect()
    }

    fn cell(&self, id: AccountId) -> Result<Cell> {
        // clone the Arc out so no map shard stays locked while we wait
        self.cells
            .get(&id)
            .map(|c| Arc::clone(c.value()))
            .ok_or(LedgerError::AccountNotFound { id })
    }

    /// run `f` while holding the account's guard
    pub fn with_account<T, F>(&self, id: AccountId, f: F) -> Result<T>
    where
        F: FnOnce(&mut AccountState) -> Result<T>,
    {
        let cell = self.cell(id)?;
        let mut state = cell.try_lock_for(self.timeout).ok_or_else(|| {
            warn!(account_id = %id, "timed out waiting for account guard");
            LedgerError::ConcurrencyConflict { id }
        })?;
        f(&mut state)
    }

    /// run `f` while holding both guards, always locked in ascending id order
    pub fn with_pair<T, F>(&self, a: AccountId, b: AccountId, f: F) -> Result<T>
    where
        F: FnOnce(&mut AccountState, &mut AccountState) -> Result<T>,
    {
        if a == b {
            return Err(LedgerError::InvalidAmount {
                message: "source and destination account are the same".to_string(),
            });
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first_cell = self.cell(first)?;
        let second_cell = self.cell(second)?;

        let mut first_state = first_cell.try_lock_for(self.timeout).ok_or_else(|| {
            warn!(account_id = %first, "timed out waiting for account guard");
            LedgerError::ConcurrencyConflict { id: first }
        })?;
        let mut second_state = second_cell.try_lock_for(self.timeout).ok_or_else(|| {
            warn!(account_id = %second, "timed out waiting for account guard");
            LedgerError::ConcurrencyConflict { id: second }
        })?;

        if a < b {
            f(&mut first_state, &mut second_state)
        } else {
            f(&mut second_state, &mut first_state)
        }
    }
}
