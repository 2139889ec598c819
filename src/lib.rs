pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod lifecycle;
pub mod loan;
pub mod payments;
pub mod store;
pub mod types;
pub mod views;

// re-export key types
pub use config::{LedgerConfig, LoanPolicy};
pub use decimal::{Currency, Money, Rate, RoundingRule};
pub use errors::{LedgerError, Result};
pub use events::{Event, EventStore};
pub use ledger::{Account, AccountLedger, Transaction, TransactionLog, TransferReceipt};
pub use lifecycle::{LoanEngine, LoanPayment, PayoffQuote};
pub use loan::Loan;
pub use payments::{compute_schedule, AmortizationCalculator, AmortizationSchedule, Installment};
pub use store::{InMemoryStore, LedgerStore, StoreError, WriteBatch};
pub use types::{
    AccountId, LoanId, LoanStatus, LoanType, OwnerId, PaymentApplication, TransactionId,
    TransactionStatus, TransactionType,
};
pub use views::{AccountView, InstallmentView, LoanView};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
