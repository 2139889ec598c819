use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{AccountId, LoanId, LoanStatus, OwnerId, TransactionId, TransactionType};

/// all events emitted by the ledger and the loan engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // account events
    AccountOpened {
        account_id: AccountId,
        owner_id: OwnerId,
        timestamp: DateTime<Utc>,
    },
    AccountDeactivated {
        account_id: AccountId,
        timestamp: DateTime<Utc>,
    },

    // transaction events
    TransactionAppended {
        transaction_id: TransactionId,
        account_id: AccountId,
        kind: TransactionType,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    TransactionCompleted {
        transaction_id: TransactionId,
        account_id: AccountId,
        new_balance: Money,
        timestamp: DateTime<Utc>,
    },
    TransactionFailed {
        transaction_id: TransactionId,
        account_id: AccountId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // loan events
    LoanApplied {
        loan_id: LoanId,
        account_id: AccountId,
        principal: Money,
        term_months: u32,
        timestamp: DateTime<Utc>,
    },
    LoanApproved {
        loan_id: LoanId,
        monthly_payment: Money,
        total_payment: Money,
        timestamp: DateTime<Utc>,
    },
    LoanRejected {
        loan_id: LoanId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    LoanDisbursed {
        loan_id: LoanId,
        transaction_id: TransactionId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    LoanPaymentApplied {
        loan_id: LoanId,
        transaction_id: TransactionId,
        to_interest: Money,
        to_principal: Money,
        outstanding_principal: Money,
        timestamp: DateTime<Utc>,
    },
    LoanStatusChanged {
        loan_id: LoanId,
        old_status: LoanStatus,
        new_status: LoanStatus,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}
