//! serializable read models for statements and loan dashboards
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Currency, Money, Rate};
use crate::errors::Result;
use crate::ledger::AccountLedger;
use crate::loan::Loan;
use crate::payments::Installment;
use crate::types::{AccountId, LoanId, LoanStatus, LoanType, OwnerId};

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountView {
    pub id: AccountId,
    pub owner_id: OwnerId,
    pub currency: Currency,
    pub balance: Money,
    pub available_balance: Money,
    pub active: bool,
    pub transaction_count: usize,
    pub opened_at: DateTime<Utc>,
}

impl AccountView {
    pub fn from_ledger(ledger: &AccountLedger, account_id: AccountId) -> Result<Self> {
        let account = ledger.get_account(account_id)?;
        Ok(AccountView {
            id: account.id,
            owner_id: account.owner_id,
            currency: account.currency,
            balance: account.balance,
            available_balance: ledger.available_balance(account_id)?,
            active: account.active,
            transaction_count: ledger.transactions(account_id)?.len(),
            opened_at: account.opened_at,
        })
    }

    pub fn to_json_pretty(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InstallmentView {
    pub index: u32,
    pub due_date: DateTime<Utc>,
    pub payment: Money,
    pub principal_portion: Money,
    pub interest_portion: Money,
    pub ending_balance: Money,
    pub paid: bool,
}

impl InstallmentView {
    fn from_installment(installment: &Installment, loan: &Loan) -> Self {
        InstallmentView {
            index: installment.index,
            due_date: installment.due_date,
            payment: installment.payment,
            principal_portion: installment.principal_portion,
            interest_portion: installment.interest_portion,
            ending_balance: installment.ending_balance,
            paid: loan.status == LoanStatus::Paid || installment.index <= loan.installments_paid,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoanView {
    pub id: LoanId,
    pub borrower_account_id: AccountId,
    pub loan_type: LoanType,
    pub purpose: String,
    pub status: LoanStatus,
    pub principal: Money,
    pub annual_rate: Rate,
    pub term_months: u32,
    pub monthly_payment: Option<Money>,
    pub total_payment: Option<Money>,
    pub outstanding_principal: Money,
    pub total_interest_paid: Money,
    pub total_principal_paid: Money,
    pub installments_paid: u32,
    pub next_due_date: Option<DateTime<Utc>>,
    pub next_amount_due: Option<Money>,
    pub payoff_amount: Money,
    pub application_date: DateTime<Utc>,
    pub closed_date: Option<DateTime<Utc>>,
    pub schedule: Vec<InstallmentView>,
}

impl LoanView {
    pub fn from_loan(loan: &Loan) -> Result<Self> {
        let schedule = loan
            .schedule
            .as_ref()
            .map(|s| {
                s.installments
                    .iter()
                    .map(|i| InstallmentView::from_installment(i, loan))
                    .collect()
            })
            .unwrap_or_default();

        Ok(LoanView {
            id: loan.id,
            borrower_account_id: loan.borrower_account_id,
            loan_type: loan.loan_type,
            purpose: loan.purpose.clone(),
            status: loan.status,
            principal: loan.principal,
            annual_rate: loan.annual_rate,
            term_months: loan.term_months,
            monthly_payment: loan.monthly_payment,
            total_payment: loan.total_payment,
            outstanding_principal: loan.outstanding_principal,
            total_interest_paid: loan.total_interest_paid,
            total_principal_paid: loan.total_principal_paid,
            installments_paid: loan.installments_paid,
            next_due_date: loan.next_due_date(),
            next_amount_due: loan.installment_remaining()?,
            payoff_amount: loan.payoff_amount()?,
            application_date: loan.application_date,
            closed_date: loan.closed_date,
            schedule,
        })
    }

    pub fn to_json_pretty(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
