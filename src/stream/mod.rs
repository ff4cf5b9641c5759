//! Event stream
//!
//! Committed events leave the database through the outbox relay and are
//! handed to an [`EventPublisher`], one topic per aggregate type.

mod publisher;
mod relay;

pub use publisher::{BroadcastPublisher, EventPublisher, LoggingPublisher, PublishError, StreamMessage};
pub use relay::{OutboxRelay, RelayError};

/// Topic for events of the given aggregate type
pub fn topic_for(aggregate_type: &str) -> String {
    match aggregate_type {
        "Account" => "account-events".to_string(),
        "Transfer" => "transfer-events".to_string(),
        "Payment" => "payment-events".to_string(),
        other => format!("{}-events", other.to_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_for() {
        assert_eq!(topic_for("Account"), "account-events");
        assert_eq!(topic_for("Transfer"), "transfer-events");
        assert_eq!(topic_for("Payment"), "payment-events");
        assert_eq!(topic_for("Ledger"), "ledger-events");
    }
}
