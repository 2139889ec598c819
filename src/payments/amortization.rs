use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate, RoundingRule};
use crate::errors::{LedgerError, Result};

/// one row of an amortization schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    /// 1-based
    pub index: u32,
    pub due_date: DateTime<Utc>,
    pub payment: Money,
    pub principal_portion: Money,
    pub interest_portion: Money,
    pub ending_balance: Money,
}

/// fixed repayment plan produced once at approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmortizationSchedule {
    pub principal: Money,
    pub annual_rate: Rate,
    pub term_months: u32,
    pub start_date: DateTime<Utc>,
    /// level payment of every installment but possibly the last
    pub monthly_payment: Money,
    pub total_interest: Money,
    pub total_payment: Money,
    pub installments: Vec<Installment>,
}

impl AmortizationSchedule {
    /// installment by 1-based index
    pub fn installment(&self, index: u32) -> Option<&Installment> {
        index
            .checked_sub(1)
            .and_then(|i| self.installments.get(i as usize))
    }

    /// balance expected after `index` installments; the principal before the first
    pub fn balance_after(&self, index: u32) -> Money {
        self.installment(index)
            .map(|i| i.ending_balance)
            .unwrap_or(self.principal)
    }

    pub fn final_installment(&self) -> Option<&Installment> {
        self.installments.last()
    }
}

/// one month's interest on `balance` at an annual rate, rounded once
pub fn monthly_interest(balance: Money, annual_rate: Rate, rule: RoundingRule) -> Result<Money> {
    balance.multiply_by_ratio(annual_rate.as_decimal(), Decimal::from(12), rule)
}

/// schedule with the credit union's rounding (half-up to the minor unit)
pub fn compute_schedule(
    principal: Money,
    annual_rate: Rate,
    term_months: u32,
    start_date: DateTime<Utc>,
) -> Result<AmortizationSchedule> {
    AmortizationCalculator::new(RoundingRule::HalfUp)
        .calculate(principal, annual_rate, term_months, start_date)
}

/// level-payment amortization calculator
#[derive(Debug, Clone, Copy, Default)]
pub struct AmortizationCalculator {
    rounding: RoundingRule,
}

impl AmortizationCalculator {
    pub fn new(rounding: RoundingRule) -> Self {
        Self { rounding }
    }

    pub fn calculate(
        &self,
        principal: Money,
        annual_rate: Rate,
        term_months: u32,
        start_date: DateTime<Utc>,
    ) -> Result<AmortizationSchedule> {
        validate(principal, annual_rate, term_months)?;
        // reject terms whose last due date chrono cannot represent before allocating rows
        due_date(start_date, term_months)?;

        let installments = if annual_rate.is_zero() {
            self.interest_free(principal, term_months, start_date)?
        } else {
            let payment = self.level_payment(principal, annual_rate, term_months)?;
            self.level(principal, annual_rate, term_months, payment, start_date)?
        };

        let currency = principal.currency();
        let total_interest = Money::sum(currency, installments.iter().map(|i| &i.interest_portion))?;
        let total_payment = Money::sum(currency, installments.iter().map(|i| &i.payment))?;
        let monthly_payment = installments
            .first()
            .map(|i| i.payment)
            .unwrap_or(Money::zero(currency));

        Ok(AmortizationSchedule {
            principal,
            annual_rate,
            term_months,
            start_date,
            monthly_payment,
            total_interest,
            total_payment,
            installments,
        })
    }

    /// payment = P·r / (1 − (1 + r)^−n), rounded to the minor unit
    pub fn level_payment(&self, principal: Money, annual_rate: Rate, term_months: u32) -> Result<Money> {
        validate(principal, annual_rate, term_months)?;
        if annual_rate.is_zero() {
            return self
                .rounding
                .apply(Decimal::from(principal.minor()) / Decimal::from(term_months))
                .map(|minor| Money::from_minor(minor, principal.currency()));
        }

        let r = annual_rate.monthly_rate().as_decimal();
        let base = Decimal::ONE + r;
        let mut compound = Decimal::ONE;
        for _ in 0..term_months {
            compound = compound
                .checked_mul(base)
                .ok_or(LedgerError::ArithmeticOverflow)?;
        }

        // P·r·(1+r)^n / ((1+r)^n − 1), the same quantity without negative powers
        let payment = Decimal::from(principal.minor())
            .checked_mul(r)
            .and_then(|x| x.checked_mul(compound))
            .and_then(|x| x.checked_div(compound - Decimal::ONE))
            .ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(Money::from_minor(self.rounding.apply(payment)?, principal.currency()))
    }

    fn level(
        &self,
        principal: Money,
        annual_rate: Rate,
        term_months: u32,
        payment: Money,
        start_date: DateTime<Utc>,
    ) -> Result<Vec<Installment>> {
        let zero = Money::zero(principal.currency());
        let mut outstanding = principal;
        let mut rows = Vec::with_capacity(term_months as usize);

        for index in 1..=term_months {
            let interest = monthly_interest(outstanding, annual_rate, self.rounding)?;
            let principal_portion = if index == term_months {
                outstanding
            } else {
                // a payment below the interest repays nothing; never past zero
                payment.checked_sub(interest)?.max(zero).min(outstanding)
            };
            outstanding = outstanding.checked_sub(principal_portion)?;

            rows.push(Installment {
                index,
                due_date: due_date(start_date, index)?,
                payment: interest.checked_add(principal_portion)?,
                principal_portion,
                interest_portion: interest,
                ending_balance: outstanding,
            });
        }
        Ok(rows)
    }

    fn interest_free(
        &self,
        principal: Money,
        term_months: u32,
        start_date: DateTime<Utc>,
    ) -> Result<Vec<Installment>> {
        let parts = principal.split_evenly(term_months, self.rounding)?;
        let mut outstanding = principal;

        parts
            .into_iter()
            .zip(1..=term_months)
            .map(|(part, index)| -> Result<Installment> {
                outstanding = outstanding.checked_sub(part)?;
                Ok(Installment {
                    index,
                    due_date: due_date(start_date, index)?,
                    payment: part,
                    principal_portion: part,
                    interest_portion: Money::zero(principal.currency()),
                    ending_balance: outstanding,
                })
            })
            .collect()
    }
}

fn validate(principal: Money, annual_rate: Rate, term_months: u32) -> Result<()> {
    if term_months == 0 {
        return Err(LedgerError::InvalidLoanParameters {
            message: "term must be at least one month".to_string(),
        });
    }
    if !principal.is_positive() {
        return Err(LedgerError::InvalidLoanParameters {
            message: format!("principal must be positive, got {principal}"),
        });
    }
    if annual_rate.is_negative() {
        return Err(LedgerError::InvalidLoanParameters {
            message: format!("negative interest rate {annual_rate}"),
        });
    }
    Ok(())
}

/// `index` calendar months after `start`, clamped to the end of shorter months
pub fn due_date(start: DateTime<Utc>, index: u32) -> Result<DateTime<Utc>> {
    start
        .checked_add_months(Months::new(index))
        .ok_or(LedgerError::InvalidLoanParameters {
            message: format!("due date {index} months after {start} is out of range"),
        })
}
