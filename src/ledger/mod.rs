pub mod account;
pub mod guard;
pub mod transaction_log;

pub use account::{Account, AccountLedger, TransferReceipt};
pub use guard::{AccountGuards, AccountState};
pub use transaction_log::{NewTransaction, Transaction, TransactionLog};
