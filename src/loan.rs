use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate, RoundingRule};
use crate::errors::{LedgerError, Result};
use crate::payments::{monthly_interest, AmortizationSchedule, Installment};
use crate::types::{AccountId, LoanId, LoanStatus, LoanType, PaymentApplication, TransactionId};

/// member loan with its fixed schedule and servicing position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub borrower_account_id: AccountId,
    pub loan_type: LoanType,
    pub purpose: String,
    pub principal: Money,
    pub annual_rate: Rate,
    pub term_months: u32,
    pub status: LoanStatus,

    // dates
    pub application_date: DateTime<Utc>,
    pub approval_date: Option<DateTime<Utc>>,
    pub disbursement_date: Option<DateTime<Utc>>,
    pub closed_date: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub disbursement_transaction_id: Option<TransactionId>,

    // fixed at approval
    pub monthly_payment: Option<Money>,
    pub total_interest: Option<Money>,
    pub total_payment: Option<Money>,
    pub schedule: Option<AmortizationSchedule>,

    // servicing
    pub outstanding_principal: Money,
    /// installments fully satisfied so far
    pub installments_paid: u32,
    /// paid toward the next installment
    pub installment_credit: Money,
    /// principal outstanding when the current installment period began
    pub period_opening_balance: Money,
    pub period_interest_paid: Money,
    pub total_interest_paid: Money,
    pub total_principal_paid: Money,
    pub last_payment_date: Option<DateTime<Utc>>,
}

impl Loan {
    pub fn new(
        borrower_account_id: AccountId,
        loan_type: LoanType,
        principal: Money,
        annual_rate: Rate,
        term_months: u32,
        purpose: impl Into<String>,
        application_date: DateTime<Utc>,
    ) -> Self {
        let zero = Money::zero(principal.currency());
        Self {
            id: Uuid::new_v4(),
            borrower_account_id,
            loan_type,
            purpose: purpose.into(),
            principal,
            annual_rate,
            term_months,
            status: LoanStatus::Pending,
            application_date,
            approval_date: None,
            disbursement_date: None,
            closed_date: None,
            rejection_reason: None,
            disbursement_transaction_id: None,
            monthly_payment: None,
            total_interest: None,
            total_payment: None,
            schedule: None,
            outstanding_principal: zero,
            installments_paid: 0,
            installment_credit: zero,
            period_opening_balance: zero,
            period_interest_paid: zero,
            total_interest_paid: zero,
            total_principal_paid: zero,
            last_payment_date: None,
        }
    }

    /// fail with `InvalidLoanState` unless the loan is in `expected`
    pub fn ensure_status(&self, expected: LoanStatus, operation: &'static str) -> Result<()> {
        if self.status != expected {
            return Err(LedgerError::InvalidLoanState {
                id: self.id,
                current: self.status,
                operation,
            });
        }
        Ok(())
    }

    fn transition(&mut self, to: LoanStatus, at: DateTime<Utc>) -> LoanStatus {
        let from = self.status;
        self.status = to;
        if to.is_terminal() {
            self.closed_date = Some(at);
        }
        from
    }

    pub fn approve(&mut self, schedule: AmortizationSchedule, at: DateTime<Utc>) -> Result<LoanStatus> {
        self.ensure_status(LoanStatus::Pending, "approve")?;
        self.approval_date = Some(at);
        self.monthly_payment = Some(schedule.monthly_payment);
        self.total_interest = Some(schedule.total_interest);
        self.total_payment = Some(schedule.total_payment);
        self.schedule = Some(schedule);
        Ok(self.transition(LoanStatus::Approved, at))
    }

    pub fn reject(&mut self, reason: impl Into<String>, at: DateTime<Utc>) -> Result<LoanStatus> {
        self.ensure_status(LoanStatus::Pending, "reject")?;
        self.rejection_reason = Some(reason.into());
        Ok(self.transition(LoanStatus::Rejected, at))
    }

    /// funds released; servicing starts from the full principal
    pub fn activate(&mut self, transaction_id: TransactionId, at: DateTime<Utc>) -> Result<LoanStatus> {
        self.ensure_status(LoanStatus::Approved, "disburse")?;
        self.disbursement_date = Some(at);
        self.disbursement_transaction_id = Some(transaction_id);
        self.outstanding_principal = self.principal;
        self.period_opening_balance = self.principal;
        Ok(self.transition(LoanStatus::Active, at))
    }

    pub fn mark_defaulted(&mut self, at: DateTime<Utc>) -> Result<LoanStatus> {
        self.ensure_status(LoanStatus::Active, "default")?;
        Ok(self.transition(LoanStatus::Defaulted, at))
    }

    /// the installment the next payment counts toward
    pub fn next_installment(&self) -> Option<&Installment> {
        if self.status != LoanStatus::Active {
            return None;
        }
        self.schedule
            .as_ref()
            .and_then(|s| s.installment(self.installments_paid + 1))
    }

    pub fn next_due_date(&self) -> Option<DateTime<Utc>> {
        self.next_installment().map(|i| i.due_date)
    }

    /// still owed on the next installment
    pub fn installment_remaining(&self) -> Result<Option<Money>> {
        match self.next_installment() {
            Some(installment) => Ok(Some(
                installment
                    .payment
                    .checked_sub(self.installment_credit)?
                    .max(Money::zero(self.principal.currency())),
            )),
            None => Ok(None),
        }
    }

    /// unpaid interest of the current installment period; nothing accrues once
    /// every scheduled installment has been met
    pub fn interest_due(&self) -> Result<Money> {
        let zero = Money::zero(self.principal.currency());
        if self.status != LoanStatus::Active || self.installments_paid >= self.term_months {
            return Ok(zero);
        }
        let period_interest =
            monthly_interest(self.period_opening_balance, self.annual_rate, RoundingRule::HalfUp)?;
        Ok(period_interest.checked_sub(self.period_interest_paid)?.max(zero))
    }

    /// amount that would close the loan today
    pub fn payoff_amount(&self) -> Result<Money> {
        self.interest_due()?.checked_add(self.outstanding_principal)
    }

    /// next unpaid installment is more than `grace_days` past its due date
    pub fn is_overdue(&self, now: DateTime<Utc>, grace_days: u32) -> bool {
        self.next_due_date()
            .map(|due| now > due + Duration::days(i64::from(grace_days)))
            .unwrap_or(false)
    }

    /// fold an allocated payment into the servicing position; returns the
    /// previous status when the loan moves to paid
    pub fn record_payment(
        &mut self,
        application: &PaymentApplication,
        at: DateTime<Utc>,
    ) -> Result<Option<LoanStatus>> {
        self.ensure_status(LoanStatus::Active, "accept payment on")?;

        let applied = application.total_applied();
        self.period_interest_paid = self.period_interest_paid.checked_add(application.to_interest)?;
        self.total_interest_paid = self.total_interest_paid.checked_add(application.to_interest)?;
        self.total_principal_paid = self.total_principal_paid.checked_add(application.to_principal)?;
        self.outstanding_principal = self
            .outstanding_principal
            .subtract_non_negative(application.to_principal)?;
        self.installment_credit = self.installment_credit.checked_add(applied)?;
        self.last_payment_date = Some(at);

        if self.outstanding_principal.is_zero() {
            return Ok(Some(self.transition(LoanStatus::Paid, at)));
        }

        let satisfied = self
            .next_installment()
            .map(|i| self.installment_credit >= i.payment)
            .unwrap_or(false);
        if satisfied {
            // overpaid credit is principal prepayment, not a head start on the next one
            let zero = Money::zero(self.principal.currency());
            self.installments_paid += 1;
            self.installment_credit = zero;
            self.period_interest_paid = zero;
            self.period_opening_balance = self.outstanding_principal;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Currency;
    use crate::payments::{allocate, compute_schedule, AmountsDue};
    use chrono::TimeZone;

    fn gmd(minor: i64) -> Money {
        Money::from_minor(minor, Currency::Gmd)
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn active_loan(principal: i64, term: u32) -> Loan {
        let rate = Rate::from_percentage(1);
        let mut loan = Loan::new(
            Uuid::new_v4(),
            LoanType::Personal,
            gmd(principal),
            rate,
            term,
            "seed for the rainy season",
            at(),
        );
        let schedule = compute_schedule(gmd(principal), rate, term, at()).unwrap();
        loan.approve(schedule, at()).unwrap();
        loan.activate(Uuid::new_v4(), at()).unwrap();
        loan
    }

    fn pay(loan: &mut Loan, amount: i64) -> PaymentApplication {
        let mut due = AmountsDue {
            interest: loan.interest_due().unwrap(),
            principal: loan.outstanding_principal,
        };
        let application = allocate(gmd(amount), &mut due).unwrap();
        loan.record_payment(&application, at()).unwrap();
        application
    }

    #[test]
    fn test_transitions_follow_the_state_machine() {
        let mut loan = Loan::new(
            Uuid::new_v4(),
            LoanType::Business,
            gmd(100_000),
            Rate::from_percentage(1),
            12,
            "stock",
            at(),
        );
        assert!(matches!(
            loan.activate(Uuid::new_v4(), at()),
            Err(LedgerError::InvalidLoanState {
                current: LoanStatus::Pending,
                operation: "disburse",
                ..
            })
        ));
        assert!(loan.mark_defaulted(at()).is_err());

        loan.reject("incomplete documents", at()).unwrap();
        assert_eq!(loan.status, LoanStatus::Rejected);
        assert_eq!(loan.closed_date, Some(at()));
        assert!(loan.reject("again", at()).is_err());
    }

    #[test]
    fn test_scheduled_payments_advance_installments() {
        let mut loan = active_loan(100_000, 12);
        assert_eq!(loan.interest_due().unwrap(), gmd(83));

        let application = pay(&mut loan, 8_379);
        assert_eq!(application.to_interest, gmd(83));
        assert_eq!(application.to_principal, gmd(8_296));
        assert_eq!(loan.installments_paid, 1);
        assert_eq!(loan.outstanding_principal, gmd(91_704));
        assert_eq!(loan.period_opening_balance, gmd(91_704));
        assert_eq!(loan.installment_credit, gmd(0));
    }

    #[test]
    fn test_partial_payments_accumulate() {
        let mut loan = active_loan(100_000, 12);
        pay(&mut loan, 5_000);
        assert_eq!(loan.installments_paid, 0);
        assert_eq!(loan.interest_due().unwrap(), gmd(0));
        assert_eq!(loan.installment_remaining().unwrap(), Some(gmd(3_379)));

        let application = pay(&mut loan, 3_379);
        assert_eq!(application.to_interest, gmd(0));
        assert_eq!(loan.installments_paid, 1);
        assert_eq!(loan.outstanding_principal, gmd(91_704));
    }

    #[test]
    fn test_prepayment_does_not_carry_forward() {
        let mut loan = active_loan(100_000, 12);
        pay(&mut loan, 20_000);
        assert_eq!(loan.installments_paid, 1);
        assert_eq!(loan.installment_credit, gmd(0));
        assert_eq!(loan.outstanding_principal, gmd(80_083));
        // next period's interest is on the reduced balance
        assert_eq!(loan.interest_due().unwrap(), gmd(67));
    }

    #[test]
    fn test_payoff_closes_the_loan() {
        let mut loan = active_loan(50_000, 5);
        assert_eq!(loan.payoff_amount().unwrap(), gmd(50_042));

        let application = pay(&mut loan, 60_000);
        assert_eq!(application.excess, gmd(9_958));
        assert_eq!(loan.status, LoanStatus::Paid);
        assert_eq!(loan.outstanding_principal, gmd(0));
        assert!(loan.next_installment().is_none());
        assert_eq!(loan.interest_due().unwrap(), gmd(0));
    }

    #[test]
    fn test_overdue_after_grace_period() {
        let loan = active_loan(100_000, 12);
        let due = loan.next_due_date().unwrap();
        assert!(!loan.is_overdue(due + Duration::days(7), 7));
        assert!(loan.is_overdue(due + Duration::days(8), 7));
    }
}
