use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::LedgerError;

/// member cash account
pub type AccountId = Uuid;

pub type TransactionId = Uuid;

pub type LoanId = Uuid;

/// identity supplied by the auth collaborator; never re-derived here
pub type OwnerId = String;

/// monetary event kinds recorded in the transaction log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    TransferIn,
    TransferOut,
    LoanDisbursement,
    LoanRepayment,
}

impl TransactionType {
    /// true when the kind adds to the account balance
    pub fn is_inflow(&self) -> bool {
        matches!(
            self,
            TransactionType::Deposit | TransactionType::TransferIn | TransactionType::LoanDisbursement
        )
    }

    /// signed ledger amount for a positive magnitude
    pub fn signed(&self, magnitude: Money) -> Money {
        if self.is_inflow() { magnitude } else { -magnitude }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::TransferIn => "transfer-in",
            TransactionType::TransferOut => "transfer-out",
            TransactionType::LoanDisbursement => "loan-disbursement",
            TransactionType::LoanRepayment => "loan-repayment",
        }
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "transfer-in" => Ok(TransactionType::TransferIn),
            "transfer-out" => Ok(TransactionType::TransferOut),
            "loan-disbursement" => Ok(TransactionType::LoanDisbursement),
            "loan-repayment" => Ok(TransactionType::LoanRepayment),
            other => Err(LedgerError::UnknownStatus {
                field: "transaction type",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// appended, not yet settled
    Pending,
    /// settled; counts toward the balance
    Completed,
    /// rejected; no effect on the balance
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl FromStr for TransactionStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(LedgerError::UnknownStatus {
                field: "transaction status",
                value: other.to_string(),
            }),
        }
    }
}

/// loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    /// application received
    Pending,
    /// schedule fixed, funds not yet released
    Approved,
    /// disbursed and being repaid
    Active,
    /// fully repaid
    Paid,
    /// declined at review
    Rejected,
    /// written off after an overdue installment
    Defaulted,
}

impl LoanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanStatus::Paid | LoanStatus::Rejected | LoanStatus::Defaulted)
    }

    /// approved or active; the borrower account has to stay open for it
    pub fn is_open(&self) -> bool {
        matches!(self, LoanStatus::Approved | LoanStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Active => "active",
            LoanStatus::Paid => "paid",
            LoanStatus::Rejected => "rejected",
            LoanStatus::Defaulted => "defaulted",
        }
    }
}

/// stored statuses outside the closed set are a data-integrity error
impl FromStr for LoanStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LoanStatus::Pending),
            "approved" => Ok(LoanStatus::Approved),
            "active" => Ok(LoanStatus::Active),
            "paid" => Ok(LoanStatus::Paid),
            "rejected" => Ok(LoanStatus::Rejected),
            "defaulted" => Ok(LoanStatus::Defaulted),
            other => Err(LedgerError::UnknownStatus {
                field: "loan status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// loan purposes offered to members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanType {
    Personal,
    Business,
    Education,
    Emergency,
    Agriculture,
}

/// split of one loan payment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaymentApplication {
    pub to_interest: Money,
    pub to_principal: Money,
    /// offered beyond a full payoff and not collected
    pub excess: Money,
}

impl PaymentApplication {
    pub fn total_applied(&self) -> Money {
        self.to_interest + self.to_principal
    }
}
