use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::LoanPolicy;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventStore};
use crate::ledger::{AccountLedger, NewTransaction, Transaction};
use crate::loan::Loan;
use crate::payments::{allocate, compute_schedule, AmortizationSchedule, AmountsDue, Installment};
use crate::store::WriteBatch;
use crate::types::{AccountId, LoanId, LoanStatus, LoanType, PaymentApplication, TransactionType};

/// outcome of one loan payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanPayment {
    pub loan_id: LoanId,
    /// the repayment withdrawn from the borrower, for the applied amount only
    pub transaction: Transaction,
    pub application: PaymentApplication,
    pub outstanding_principal: Money,
    pub installments_paid: u32,
    pub status: LoanStatus,
}

/// amount that settles a loan in full as of a moment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoffQuote {
    pub loan_id: LoanId,
    pub interest: Money,
    pub principal: Money,
    pub total: Money,
    pub as_of: DateTime<Utc>,
}

type LoanCell = Arc<Mutex<Loan>>;

/// loan state machine; every money movement goes through the ledger
pub struct LoanEngine {
    ledger: Arc<AccountLedger>,
    policy: LoanPolicy,
    loans: DashMap<LoanId, LoanCell>,
    by_account: DashMap<AccountId, Vec<LoanId>>,
    events: Mutex<EventStore>,
}

impl LoanEngine {
    pub fn new(ledger: Arc<AccountLedger>) -> Self {
        Self {
            policy: ledger.config().loan.clone(),
            ledger,
            loans: DashMap::new(),
            by_account: DashMap::new(),
            events: Mutex::new(EventStore::new()),
        }
    }

    /// reload loans persisted by an earlier engine over the same store
    pub fn restore(ledger: Arc<AccountLedger>) -> Result<Self> {
        let engine = Self::new(ledger);
        let store = Arc::clone(engine.ledger.store());

        for mut loan in store.load_loans()? {
            let rows = store.load_schedule(loan.id)?;
            if let Some(schedule) = loan.schedule.as_mut() {
                if rows.len() != schedule.installments.len() {
                    return Err(LedgerError::PersistenceFailure {
                        message: format!(
                            "loan {} has {} schedule rows, expected {}",
                            loan.id,
                            rows.len(),
                            schedule.installments.len()
                        ),
                    });
                }
                schedule.installments = rows;
            }
            engine.insert(loan);
        }

        info!(loans = engine.loans.len(), "loans restored");
        Ok(engine)
    }

    pub fn policy(&self) -> &LoanPolicy {
        &self.policy
    }

    /// record an application; nothing moves until disbursement
    pub fn apply(
        &self,
        borrower_account_id: AccountId,
        loan_type: LoanType,
        amount: Money,
        term_months: u32,
        purpose: impl Into<String>,
    ) -> Result<Loan> {
        self.validate_application(borrower_account_id, amount, term_months)?;

        let now = self.ledger.now();
        let loan = Loan::new(
            borrower_account_id,
            loan_type,
            amount,
            self.policy.annual_rate,
            term_months,
            purpose,
            now,
        );
        self.ledger.commit(WriteBatch::new().loan(loan.clone()))?;
        self.insert(loan.clone());

        info!(loan_id = %loan.id, account_id = %borrower_account_id, %amount, term_months, "loan applied");
        self.emit(Event::LoanApplied {
            loan_id: loan.id,
            account_id: borrower_account_id,
            principal: amount,
            term_months,
            timestamp: now,
        });
        Ok(loan)
    }

    /// fix the schedule; due dates count from the approval date
    pub fn approve(&self, loan_id: LoanId) -> Result<Loan> {
        self.with_loan(loan_id, |loan| {
            loan.ensure_status(LoanStatus::Pending, "approve")?;
            let now = self.ledger.now();
            let schedule = compute_schedule(loan.principal, loan.annual_rate, loan.term_months, now)?;

            let mut updated = loan.clone();
            let previous = updated.approve(schedule, now)?;
            self.ledger.commit_loan(&updated)?;
            *loan = updated;

            info!(
                %loan_id,
                monthly_payment = ?loan.monthly_payment,
                total_payment = ?loan.total_payment,
                "loan approved"
            );
            if let (Some(monthly_payment), Some(total_payment)) = (loan.monthly_payment, loan.total_payment) {
                self.emit(Event::LoanApproved {
                    loan_id,
                    monthly_payment,
                    total_payment,
                    timestamp: now,
                });
            }
            self.emit_status(loan, previous, now);
            Ok(loan.clone())
        })
    }

    pub fn reject(&self, loan_id: LoanId, reason: impl Into<String>) -> Result<Loan> {
        let reason = reason.into();
        self.with_loan(loan_id, |loan| {
            let now = self.ledger.now();
            let mut updated = loan.clone();
            let previous = updated.reject(reason.clone(), now)?;
            self.ledger.commit(WriteBatch::new().loan(updated.clone()))?;
            *loan = updated;

            info!(%loan_id, %reason, "loan rejected");
            self.emit(Event::LoanRejected {
                loan_id,
                reason: reason.clone(),
                timestamp: now,
            });
            self.emit_status(loan, previous, now);
            Ok(loan.clone())
        })
    }

    /// credit the principal to the borrower; the loan row and the ledger
    /// posting commit together or not at all
    pub fn disburse(&self, loan_id: LoanId) -> Result<Loan> {
        self.with_loan(loan_id, |loan| {
            loan.ensure_status(LoanStatus::Approved, "disburse")?;
            let now = self.ledger.now();
            let posting = NewTransaction::new(
                loan.borrower_account_id,
                TransactionType::LoanDisbursement,
                loan.principal,
                now,
            )
            .loan(Some(loan_id));

            let mut updated = loan.clone();
            let previous = updated.activate(posting.id, now)?;
            let transaction = self
                .ledger
                .post_instant(posting, WriteBatch::new().loan(updated.clone()))?;
            *loan = updated;

            info!(
                %loan_id,
                transaction_id = %transaction.id,
                amount = %loan.principal,
                "loan disbursed"
            );
            self.emit(Event::LoanDisbursed {
                loan_id,
                transaction_id: transaction.id,
                amount: loan.principal,
                timestamp: now,
            });
            self.emit_status(loan, previous, now);
            Ok(loan.clone())
        })
    }

    /// interest of the current period first, then principal; anything past a
    /// full payoff is reported as excess and left with the borrower
    pub fn apply_payment(&self, loan_id: LoanId, amount: Money) -> Result<LoanPayment> {
        self.with_loan(loan_id, |loan| {
            loan.ensure_status(LoanStatus::Active, "accept payment on")?;
            let now = self.ledger.now();

            let mut due = AmountsDue {
                interest: loan.interest_due()?,
                principal: loan.outstanding_principal,
            };
            let application = allocate(amount, &mut due)?;
            let collected = application.total_applied();

            let mut updated = loan.clone();
            let previous = updated.record_payment(&application, now)?;
            let posting = NewTransaction::new(
                loan.borrower_account_id,
                TransactionType::LoanRepayment,
                collected,
                now,
            )
            .loan(Some(loan_id));
            let transaction = self
                .ledger
                .post_instant(posting, WriteBatch::new().loan(updated.clone()))?;
            *loan = updated;

            info!(
                %loan_id,
                transaction_id = %transaction.id,
                to_interest = %application.to_interest,
                to_principal = %application.to_principal,
                excess = %application.excess,
                outstanding = %loan.outstanding_principal,
                "loan payment applied"
            );
            self.emit(Event::LoanPaymentApplied {
                loan_id,
                transaction_id: transaction.id,
                to_interest: application.to_interest,
                to_principal: application.to_principal,
                outstanding_principal: loan.outstanding_principal,
                timestamp: now,
            });
            if let Some(previous) = previous {
                self.emit_status(loan, previous, now);
            }

            Ok(LoanPayment {
                loan_id,
                transaction,
                application,
                outstanding_principal: loan.outstanding_principal,
                installments_paid: loan.installments_paid,
                status: loan.status,
            })
        })
    }

    pub fn mark_defaulted(&self, loan_id: LoanId) -> Result<Loan> {
        self.with_loan(loan_id, |loan| {
            let now = self.ledger.now();
            let mut updated = loan.clone();
            let previous = updated.mark_defaulted(now)?;
            self.ledger.commit_loan(&updated)?;
            *loan = updated;

            warn!(%loan_id, outstanding = %loan.outstanding_principal, "loan defaulted");
            self.emit_status(loan, previous, now);
            Ok(loan.clone())
        })
    }

    /// active loans whose next installment is past the grace period
    pub fn overdue_loans(&self) -> Result<Vec<Loan>> {
        let now = self.ledger.now();
        let grace = self.policy.grace_period_days;
        let mut overdue: Vec<Loan> = self
            .snapshot()?
            .into_iter()
            .filter(|loan| loan.is_overdue(now, grace))
            .collect();
        overdue.sort_by_key(|loan| loan.next_due_date());
        Ok(overdue)
    }

    /// default every overdue loan; returns the ids that were moved
    pub fn sweep_overdue(&self) -> Result<Vec<LoanId>> {
        let mut defaulted = Vec::new();
        for loan in self.overdue_loans()? {
            match self.mark_defaulted(loan.id) {
                Ok(_) => defaulted.push(loan.id),
                // paid or defaulted since the snapshot was taken
                Err(LedgerError::InvalidLoanState { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(defaulted)
    }

    pub fn get_loan(&self, loan_id: LoanId) -> Result<Loan> {
        self.with_loan(loan_id, |loan| Ok(loan.clone()))
    }

    pub fn loans_for_account(&self, account_id: AccountId) -> Result<Vec<Loan>> {
        let ids = self
            .by_account
            .get(&account_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        ids.into_iter().map(|id| self.get_loan(id)).collect()
    }

    pub fn schedule(&self, loan_id: LoanId) -> Result<AmortizationSchedule> {
        self.with_loan(loan_id, |loan| {
            loan.schedule.clone().ok_or(LedgerError::InvalidLoanState {
                id: loan_id,
                current: loan.status,
                operation: "view the schedule of",
            })
        })
    }

    pub fn next_installment(&self, loan_id: LoanId) -> Result<Option<Installment>> {
        self.with_loan(loan_id, |loan| Ok(loan.next_installment().cloned()))
    }

    pub fn payoff_quote(&self, loan_id: LoanId) -> Result<PayoffQuote> {
        self.with_loan(loan_id, |loan| {
            loan.ensure_status(LoanStatus::Active, "quote a payoff for")?;
            let interest = loan.interest_due()?;
            Ok(PayoffQuote {
                loan_id,
                interest,
                principal: loan.outstanding_principal,
                total: interest.checked_add(loan.outstanding_principal)?,
                as_of: self.ledger.now(),
            })
        })
    }

    pub fn take_events(&self) -> Vec<Event> {
        self.events.lock().take_events()
    }

    fn validate_application(
        &self,
        borrower_account_id: AccountId,
        amount: Money,
        term_months: u32,
    ) -> Result<()> {
        let invalid = |message: String| LedgerError::InvalidLoanParameters { message };

        let account = self.ledger.get_account(borrower_account_id).map_err(|err| match err {
            LedgerError::AccountNotFound { id } => invalid(format!("unknown borrower account {id}")),
            other => other,
        })?;
        if !account.active {
            return Err(invalid(format!("borrower account {} is closed", account.id)));
        }
        if amount.currency() != self.policy.min_principal.currency()
            || amount.currency() != account.currency
        {
            return Err(invalid(format!(
                "loans are issued in {}, not {}",
                self.policy.min_principal.currency(),
                amount.currency()
            )));
        }
        if amount < self.policy.min_principal || amount > self.policy.max_principal {
            return Err(invalid(format!(
                "amount {amount} outside {} to {}",
                self.policy.min_principal, self.policy.max_principal
            )));
        }
        if term_months == 0 || term_months > self.policy.max_term_months {
            return Err(invalid(format!(
                "term of {term_months} months outside 1 to {}",
                self.policy.max_term_months
            )));
        }
        Ok(())
    }

    fn insert(&self, loan: Loan) {
        self.by_account
            .entry(loan.borrower_account_id)
            .or_default()
            .push(loan.id);
        self.loans.insert(loan.id, Arc::new(Mutex::new(loan)));
    }

    /// run `f` under the loan's own mutex; account guards are only ever taken
    /// inside it, never the other way round
    fn with_loan<T, F>(&self, loan_id: LoanId, f: F) -> Result<T>
    where
        F: FnOnce(&mut Loan) -> Result<T>,
    {
        let cell = self
            .loans
            .get(&loan_id)
            .map(|c| Arc::clone(c.value()))
            .ok_or(LedgerError::LoanNotFound { id: loan_id })?;
        let mut loan = cell
            .try_lock_for(self.ledger.config().lock_timeout())
            .ok_or_else(|| {
                warn!(%loan_id, "timed out waiting for loan");
                LedgerError::ConcurrencyConflict { id: loan_id }
            })?;
        f(&mut loan)
    }

    fn snapshot(&self) -> Result<Vec<Loan>> {
        let ids: Vec<LoanId> = self.loans.iter().map(|e| *e.key()).collect();
        ids.into_iter().map(|id| self.get_loan(id)).collect()
    }

    fn emit(&self, event: Event) {
        self.events.lock().emit(event);
    }

    fn emit_status(&self, loan: &Loan, previous: LoanStatus, at: DateTime<Utc>) {
        info!(loan_id = %loan.id, from = %previous, to = %loan.status, "loan status changed");
        self.emit(Event::LoanStatusChanged {
            loan_id: loan.id,
            old_status: previous,
            new_status: loan.status,
            timestamp: at,
        });
    }
}
