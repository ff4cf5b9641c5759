//! Aggregate module
//!
//! Aggregate Root pattern implementation for Event Sourcing.

pub mod account;
pub mod payment;
pub mod transfer;

pub use account::{Account, DailyUsage};
pub use payment::{Payment, PendingOperation};
pub use transfer::Transfer;

use serde::Serialize;

use crate::domain::{AccountEvent, PaymentEvent, TransferEvent};

/// Events that can be appended to the event store
pub trait DomainEvent: Serialize {
    /// Event type name stored next to the payload
    fn event_type(&self) -> &'static str;
}

impl DomainEvent for AccountEvent {
    fn event_type(&self) -> &'static str {
        AccountEvent::event_type(self)
    }
}

impl DomainEvent for TransferEvent {
    fn event_type(&self) -> &'static str {
        TransferEvent::event_type(self)
    }
}

impl DomainEvent for PaymentEvent {
    fn event_type(&self) -> &'static str {
        PaymentEvent::event_type(self)
    }
}

/// Aggregate trait that all aggregates must implement
pub trait Aggregate: Sized + Default {
    /// The type of events this aggregate handles
    type Event: DomainEvent;

    /// Get the aggregate type name (for storage)
    fn aggregate_type() -> &'static str;

    /// Get the aggregate ID
    fn id(&self) -> uuid::Uuid;

    /// Get the current version (number of events applied)
    fn version(&self) -> i64;

    /// Apply an event to update the aggregate state
    fn apply(self, event: Self::Event) -> Self;

    /// Check if a snapshot should be created
    fn should_snapshot(&self) -> bool {
        const SNAPSHOT_INTERVAL: i64 = 100;
        self.version() > 0 && self.version() % SNAPSHOT_INTERVAL == 0
    }
}
