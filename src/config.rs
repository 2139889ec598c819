use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::decimal::{Currency, Money, Rate};
use crate::errors::{LedgerError, Result};

/// ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// currency new accounts are opened in unless told otherwise
    pub currency: Currency,
    /// how long an operation waits for a busy account before giving up
    pub lock_timeout_ms: u64,
    pub loan: LoanPolicy,
}

/// terms the credit union lends on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanPolicy {
    pub annual_rate: Rate,
    pub min_principal: Money,
    pub max_principal: Money,
    pub max_term_months: u32,
    /// days an installment may stay unpaid before the loan counts as overdue
    pub grace_period_days: u32,
}

impl LoanPolicy {
    /// the 1% micro-loan product
    pub fn micro_loan(currency: Currency) -> Self {
        Self {
            annual_rate: Rate::from_percentage(1),
            // every booked currency has two decimal places
            min_principal: Money::from_minor(50_000, currency),
            max_principal: Money::from_minor(10_000_000, currency),
            max_term_months: 36,
            grace_period_days: 7,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.annual_rate.is_negative() {
            return Err(LedgerError::InvalidConfiguration {
                message: format!("negative annual rate {}", self.annual_rate),
            });
        }
        if self.min_principal.currency() != self.max_principal.currency() {
            return Err(LedgerError::InvalidConfiguration {
                message: "principal limits use different currencies".to_string(),
            });
        }
        if !self.min_principal.is_positive() || self.min_principal > self.max_principal {
            return Err(LedgerError::InvalidConfiguration {
                message: format!(
                    "principal limits must satisfy 0 < min <= max, got {} and {}",
                    self.min_principal, self.max_principal
                ),
            });
        }
        if self.max_term_months == 0 {
            return Err(LedgerError::InvalidConfiguration {
                message: "max_term_months must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl LedgerConfig {
    /// parse and validate a json document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: LedgerConfig =
            serde_json::from_str(json).map_err(|e| LedgerError::InvalidConfiguration {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| LedgerError::InvalidConfiguration {
            message: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.lock_timeout_ms == 0 {
            return Err(LedgerError::InvalidConfiguration {
                message: "lock_timeout_ms must be positive".to_string(),
            });
        }
        if self.loan.min_principal.currency() != self.currency {
            return Err(LedgerError::InvalidConfiguration {
                message: format!(
                    "loan limits are in {} but the ledger books in {}",
                    self.loan.min_principal.currency(),
                    self.currency
                ),
            });
        }
        self.loan.validate()
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            currency: Currency::Gmd,
            lock_timeout_ms: 5_000,
            loan: LoanPolicy::micro_loan(Currency::Gmd),
        }
    }
}
