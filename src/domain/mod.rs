//! Domain module
//!
//! Shared kernel: value types, events and errors used by every domain.
//! Nothing in here performs I/O.

pub mod account_number;
pub mod context;
pub mod error;
pub mod events;
pub mod money;
pub mod transaction_id;
pub mod types;

pub use account_number::{AccountNumber, AccountNumberError};
pub use context::OperationContext;
pub use error::DomainError;
pub use events::{AccountEvent, PaymentEvent, TransactionDetails, TransferEvent, TransferFailureReason};
pub use money::{Balance, Money, MoneyError, MONEY_SCALE};
pub use transaction_id::{generate_transaction_id, is_valid_transaction_id, transfer_in_id};
pub use types::{
    AccountStatus, AccountType, PaymentStatus, TransactionType, TransferStatus, UnknownVariant,
};
