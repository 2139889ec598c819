use thiserror::Error;
use uuid::Uuid;

use crate::decimal::{Currency, Money};
use crate::types::{LoanStatus, TransactionStatus};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Money,
        requested: Money,
    },

    #[error("transaction {id} is already {status:?}")]
    InvalidTransactionState {
        id: Uuid,
        status: TransactionStatus,
    },

    #[error("cannot {operation} loan {id}: current status is {current:?}")]
    InvalidLoanState {
        id: Uuid,
        current: LoanStatus,
        operation: &'static str,
    },

    #[error("invalid loan parameters: {message}")]
    InvalidLoanParameters {
        message: String,
    },

    #[error("{id} is busy with another operation")]
    ConcurrencyConflict {
        id: Uuid,
    },

    #[error("persistence failure: {message}")]
    PersistenceFailure {
        message: String,
    },

    #[error("account not found: {id}")]
    AccountNotFound {
        id: Uuid,
    },

    #[error("transaction not found: {id}")]
    TransactionNotFound {
        id: Uuid,
    },

    #[error("loan not found: {id}")]
    LoanNotFound {
        id: Uuid,
    },

    #[error("account {id} is deactivated")]
    AccountInactive {
        id: Uuid,
    },

    #[error("account {id} still holds {balance} or has pending transactions")]
    AccountNotEmpty {
        id: Uuid,
        balance: Money,
    },

    #[error("account {id} still backs {open_loans} open loan(s)")]
    AccountHasOpenLoans {
        id: Uuid,
        open_loans: usize,
    },

    #[error("transaction {id} was already appended")]
    DuplicateTransaction {
        id: Uuid,
    },

    #[error("currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch {
        expected: Currency,
        found: Currency,
    },

    #[error("invalid amount: {message}")]
    InvalidAmount {
        message: String,
    },

    #[error("arithmetic overflow")]
    ArithmeticOverflow,

    #[error("unrecognised {field} value in stored data: {value:?}")]
    UnknownStatus {
        field: &'static str,
        value: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },
}

impl LedgerError {
    /// only storage trouble is worth retrying as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::PersistenceFailure { .. })
    }

    /// message suitable for showing to a member
    pub fn user_message(&self) -> &'static str {
        match self {
            LedgerError::InsufficientFunds { .. } => {
                "Your balance is too low for this transaction."
            }
            LedgerError::InvalidTransactionState { .. } => {
                "This transaction has already been processed."
            }
            LedgerError::InvalidLoanState { .. } => {
                "This action is not available for the loan in its current state."
            }
            LedgerError::InvalidLoanParameters { .. } => {
                "The loan amount or term is outside what we can offer."
            }
            LedgerError::ConcurrencyConflict { .. } => {
                "Another transaction on this account is in progress. Please wait a moment."
            }
            LedgerError::PersistenceFailure { .. } => {
                "Something went wrong saving your request. Please try again."
            }
            LedgerError::AccountNotFound { .. } => "We could not find that account.",
            LedgerError::TransactionNotFound { .. } => "We could not find that transaction.",
            LedgerError::LoanNotFound { .. } => "We could not find that loan.",
            LedgerError::AccountInactive { .. } => "This account has been closed.",
            LedgerError::AccountNotEmpty { .. } => {
                "The account must be emptied before it can be closed."
            }
            LedgerError::AccountHasOpenLoans { .. } => {
                "The account cannot be closed while a loan on it is still open."
            }
            LedgerError::DuplicateTransaction { .. } => {
                "This transaction has already been recorded."
            }
            LedgerError::CurrencyMismatch { .. } => {
                "The amount is not in the currency of this account."
            }
            LedgerError::InvalidAmount { .. } => "Please enter a valid amount.",
            LedgerError::ArithmeticOverflow => "The amount is too large.",
            LedgerError::UnknownStatus { .. } | LedgerError::InvalidConfiguration { .. } => {
                "The service is temporarily unavailable. Please contact the credit union."
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
