//! Transaction identifiers
//!
//! Clients may supply their own id (`[A-Za-z0-9_-]{1,50}`); otherwise one is
//! generated as type prefix + UTC timestamp + random suffix.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

use super::TransactionType;

pub const MAX_TRANSACTION_ID_LENGTH: usize = 50;

const SUFFIX_LENGTH: usize = 6;

/// Suffix of the credit-side record of a transfer
pub const TRANSFER_IN_SUFFIX: &str = "_IN";

pub fn is_valid_transaction_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_TRANSACTION_ID_LENGTH
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

pub fn generate_transaction_id(kind: TransactionType, now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LENGTH)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();

    format!("{}{}{}", kind.id_prefix(), now.format("%Y%m%d%H%M%S%3f"), suffix)
}

/// Id of the incoming leg for a transfer whose outgoing leg is `id`
pub fn transfer_in_id(id: &str) -> String {
    format!("{}{}", id, TRANSFER_IN_SUFFIX)
}
