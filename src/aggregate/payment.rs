//! Payment Aggregate
//!
//! State machine:
//!
//! ```text
//! AUTHORIZED -> CAPTURED -> PARTIALLY_REFUNDED -> REFUNDED
//!            \-> CANCELLED          \--------------^
//! FAILED (terminal, gateway declined)
//! ```
//!
//! Cancels and refunds go through a pending step: the request is recorded
//! before the gateway is called and completed afterwards, so a retried
//! request resumes the same gateway operation instead of starting another.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{DomainError, Money, PaymentEvent, PaymentStatus};

use super::Aggregate;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payment {
    id: Uuid,
    account_number: String,
    merchant_id: String,
    order_id: String,
    amount: Decimal,
    captured_amount: Decimal,
    refunded_amount: Decimal,
    gateway_reference: Option<String>,
    description: Option<String>,
    status: PaymentStatus,
    failure_reason: Option<String>,
    #[serde(default)]
    pending: Option<PendingOperation>,
    version: i64,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

/// Gateway operation recorded but not yet completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PendingOperation {
    Cancel,
    Refund {
        amount: Decimal,
        transaction_id: String,
    },
}

impl Payment {
    /// Capture the full authorized amount
    pub fn capture(
        &self,
        transaction_id: String,
        now: DateTime<Utc>,
    ) -> Result<PaymentEvent, DomainError> {
        self.ensure_status(PaymentStatus::Authorized, "capture")?;
        self.ensure_nothing_pending("capture")?;

        Ok(PaymentEvent::PaymentCaptured {
            payment_id: self.id,
            amount: self.amount,
            transaction_id,
            captured_at: now,
        })
    }

    /// First half of a cancel. Blocks captures until the cancel completes.
    pub fn request_cancel(&self, now: DateTime<Utc>) -> Result<PaymentEvent, DomainError> {
        self.ensure_status(PaymentStatus::Authorized, "cancel")?;
        self.ensure_nothing_pending("cancel")?;

        Ok(PaymentEvent::PaymentCancelRequested {
            payment_id: self.id,
            requested_at: now,
        })
    }

    /// Complete a requested cancel once the gateway voided the authorization
    pub fn cancel(&self, now: DateTime<Utc>) -> Result<PaymentEvent, DomainError> {
        self.ensure_status(PaymentStatus::Authorized, "cancel")?;
        if self.pending != Some(PendingOperation::Cancel) {
            return Err(DomainError::invalid_state("No cancel was requested"));
        }

        Ok(PaymentEvent::PaymentCancelled {
            payment_id: self.id,
            cancelled_at: now,
        })
    }

    /// First half of a refund: part or all of the captured amount.
    /// `None` refunds whatever is still refundable.
    pub fn request_refund(
        &self,
        amount: Option<Money>,
        transaction_id: String,
        now: DateTime<Utc>,
    ) -> Result<PaymentEvent, DomainError> {
        if !matches!(
            self.status,
            PaymentStatus::Captured | PaymentStatus::PartiallyRefunded
        ) {
            return Err(DomainError::invalid_state(format!(
                "Cannot refund a payment in status {}",
                self.status
            )));
        }
        self.ensure_nothing_pending("refund")?;

        let refundable = self.refundable_amount();
        let amount = match amount {
            Some(m) => m.value(),
            None => refundable,
        };

        if amount > refundable {
            return Err(DomainError::InvalidAmount(format!(
                "Refund {} exceeds refundable amount {}",
                amount, refundable
            )));
        }

        Ok(PaymentEvent::PaymentRefundRequested {
            payment_id: self.id,
            amount,
            transaction_id,
            requested_at: now,
        })
    }

    /// Complete the requested refund once the gateway accepted it
    pub fn refund(&self, now: DateTime<Utc>) -> Result<PaymentEvent, DomainError> {
        match &self.pending {
            Some(PendingOperation::Refund {
                amount,
                transaction_id,
            }) => Ok(PaymentEvent::PaymentRefunded {
                payment_id: self.id,
                amount: *amount,
                transaction_id: transaction_id.clone(),
                refunded_at: now,
            }),
            _ => Err(DomainError::invalid_state("No refund was requested")),
        }
    }

    fn ensure_nothing_pending(&self, action: &str) -> Result<(), DomainError> {
        match &self.pending {
            None => Ok(()),
            Some(PendingOperation::Cancel) => Err(DomainError::invalid_state(format!(
                "Cannot {} a payment while a cancel is in progress",
                action
            ))),
            Some(PendingOperation::Refund { amount, .. }) => {
                Err(DomainError::invalid_state(format!(
                    "Cannot {} a payment while a refund of {} is in progress",
                    action, amount
                )))
            }
        }
    }

    fn ensure_status(&self, expected: PaymentStatus, action: &str) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(DomainError::invalid_state(format!(
                "Cannot {} a payment in status {}",
                action, self.status
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn account_number(&self) -> &str {
        &self.account_number
    }

    pub fn merchant_id(&self) -> &str {
        &self.merchant_id
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn captured_amount(&self) -> Decimal {
        self.captured_amount
    }

    pub fn refunded_amount(&self) -> Decimal {
        self.refunded_amount
    }

    pub fn refundable_amount(&self) -> Decimal {
        self.captured_amount - self.refunded_amount
    }

    pub fn gateway_reference(&self) -> Option<&str> {
        self.gateway_reference.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn pending(&self) -> Option<&PendingOperation> {
        self.pending.as_ref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl Aggregate for Payment {
    type Event = PaymentEvent;

    fn aggregate_type() -> &'static str {
        "Payment"
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(mut self, event: Self::Event) -> Self {
        match event {
            PaymentEvent::PaymentAuthorized {
                payment_id,
                account_number,
                merchant_id,
                order_id,
                amount,
                gateway_reference,
                description,
                authorized_at,
            } => {
                self.id = payment_id;
                self.account_number = account_number;
                self.merchant_id = merchant_id;
                self.order_id = order_id;
                self.amount = amount;
                self.gateway_reference = Some(gateway_reference);
                self.description = description;
                self.status = PaymentStatus::Authorized;
                self.created_at = Some(authorized_at);
                self.updated_at = Some(authorized_at);
            }

            PaymentEvent::PaymentFailed {
                payment_id,
                account_number,
                merchant_id,
                order_id,
                amount,
                reason,
                failed_at,
            } => {
                self.id = payment_id;
                self.account_number = account_number;
                self.merchant_id = merchant_id;
                self.order_id = order_id;
                self.amount = amount;
                self.status = PaymentStatus::Failed;
                self.failure_reason = Some(reason);
                self.created_at = Some(failed_at);
                self.updated_at = Some(failed_at);
            }

            PaymentEvent::PaymentCaptured {
                amount,
                captured_at,
                ..
            } => {
                self.captured_amount = amount;
                self.status = PaymentStatus::Captured;
                self.updated_at = Some(captured_at);
            }

            PaymentEvent::PaymentCancelRequested { requested_at, .. } => {
                self.pending = Some(PendingOperation::Cancel);
                self.updated_at = Some(requested_at);
            }

            PaymentEvent::PaymentCancelled { cancelled_at, .. } => {
                self.pending = None;
                self.status = PaymentStatus::Cancelled;
                self.updated_at = Some(cancelled_at);
            }

            PaymentEvent::PaymentRefundRequested {
                amount,
                transaction_id,
                requested_at,
                ..
            } => {
                self.pending = Some(PendingOperation::Refund {
                    amount,
                    transaction_id,
                });
                self.updated_at = Some(requested_at);
            }

            PaymentEvent::PaymentRefunded {
                amount,
                refunded_at,
                ..
            } => {
                self.pending = None;
                self.refunded_amount += amount;
                self.status = if self.refunded_amount >= self.captured_amount {
                    PaymentStatus::Refunded
                } else {
                    PaymentStatus::PartiallyRefunded
                };
                self.updated_at = Some(refunded_at);
            }
        }

        self.version += 1;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn authorized(amount: Decimal) -> Payment {
        Payment::default().apply(PaymentEvent::PaymentAuthorized {
            payment_id: Uuid::new_v4(),
            account_number: "1001234567890".to_string(),
            merchant_id: "M-1".to_string(),
            order_id: "O-1".to_string(),
            amount,
            gateway_reference: "SIM-1".to_string(),
            description: None,
            authorized_at: Utc::now(),
        })
    }

    fn captured(amount: Decimal) -> Payment {
        let payment = authorized(amount);
        let event = payment.capture("PAY1".to_string(), Utc::now()).unwrap();
        payment.apply(event)
    }

    fn refunded(payment: Payment, amount: Option<Money>, transaction_id: &str) -> Payment {
        let requested = payment
            .request_refund(amount, transaction_id.to_string(), Utc::now())
            .unwrap();
        let payment = payment.apply(requested);
        let done = payment.refund(Utc::now()).unwrap();
        payment.apply(done)
    }

    #[test]
    fn test_capture() {
        let payment = captured(dec!(100.00));
        assert_eq!(payment.status(), PaymentStatus::Captured);
        assert_eq!(payment.captured_amount(), dec!(100.00));
        assert_eq!(payment.version(), 2);

        // Only AUTHORIZED can be captured or cancelled
        assert!(matches!(
            payment.capture("PAY2".to_string(), Utc::now()),
            Err(DomainError::InvalidState(_))
        ));
        assert!(matches!(
            payment.request_cancel(Utc::now()),
            Err(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn test_cancel() {
        let payment = authorized(dec!(10.00));

        // Completing needs a recorded request
        assert!(payment.cancel(Utc::now()).is_err());

        let payment = payment.clone().apply(payment.request_cancel(Utc::now()).unwrap());
        assert_eq!(payment.status(), PaymentStatus::Authorized);
        assert_eq!(payment.pending(), Some(&PendingOperation::Cancel));

        let payment = payment.clone().apply(payment.cancel(Utc::now()).unwrap());
        assert_eq!(payment.status(), PaymentStatus::Cancelled);
        assert!(payment.status().is_terminal());
        assert!(payment.pending().is_none());
        assert!(payment
            .request_refund(None, "R".to_string(), Utc::now())
            .is_err());
    }

    #[test]
    fn test_requested_cancel_blocks_capture() {
        let payment = authorized(dec!(10.00));
        let payment = payment.clone().apply(payment.request_cancel(Utc::now()).unwrap());

        assert!(matches!(
            payment.capture("PAY1".to_string(), Utc::now()),
            Err(DomainError::InvalidState(_))
        ));
        assert!(payment.request_cancel(Utc::now()).is_err());
    }

    #[test]
    fn test_authorized_cannot_be_refunded() {
        let payment = authorized(dec!(10.00));
        assert!(matches!(
            payment.request_refund(None, "R".to_string(), Utc::now()),
            Err(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn test_partial_then_full_refund() {
        let payment = captured(dec!(100.00));

        let payment = refunded(payment, Some(Money::new(dec!(30)).unwrap()), "R1");
        assert_eq!(payment.status(), PaymentStatus::PartiallyRefunded);
        assert_eq!(payment.refundable_amount(), dec!(70.00));

        // Cumulative refunds cannot exceed the captured amount
        let too_much = Money::new(dec!(70.01)).unwrap();
        assert!(matches!(
            payment.request_refund(Some(too_much), "R2".to_string(), Utc::now()),
            Err(DomainError::InvalidAmount(_))
        ));

        let payment = refunded(payment, None, "R3");
        assert_eq!(payment.status(), PaymentStatus::Refunded);
        assert_eq!(payment.refunded_amount(), dec!(100.00));
        assert!(payment
            .request_refund(None, "R4".to_string(), Utc::now())
            .is_err());
    }

    #[test]
    fn test_pending_refund_blocks_second_refund() {
        let payment = captured(dec!(100.00));
        let requested = payment
            .request_refund(Some(Money::new(dec!(40)).unwrap()), "R1".to_string(), Utc::now())
            .unwrap();
        let payment = payment.apply(requested);

        // Nothing moves until the pending refund completes
        assert_eq!(payment.status(), PaymentStatus::Captured);
        assert_eq!(payment.refunded_amount(), dec!(0));
        assert_eq!(
            payment.pending(),
            Some(&PendingOperation::Refund {
                amount: dec!(40),
                transaction_id: "R1".to_string(),
            })
        );
        assert!(matches!(
            payment.request_refund(Some(Money::new(dec!(10)).unwrap()), "R2".to_string(), Utc::now()),
            Err(DomainError::InvalidState(_))
        ));

        match payment.refund(Utc::now()).unwrap() {
            PaymentEvent::PaymentRefunded {
                amount,
                transaction_id,
                ..
            } => {
                assert_eq!(amount, dec!(40));
                assert_eq!(transaction_id, "R1");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_refund_without_request_is_rejected() {
        let payment = captured(dec!(100.00));
        assert!(matches!(
            payment.refund(Utc::now()),
            Err(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn test_failed_payment() {
        let payment = Payment::default().apply(PaymentEvent::PaymentFailed {
            payment_id: Uuid::new_v4(),
            account_number: "1001234567890".to_string(),
            merchant_id: "M-1".to_string(),
            order_id: "O-1".to_string(),
            amount: dec!(5.00),
            reason: "card declined".to_string(),
            failed_at: Utc::now(),
        });

        assert_eq!(payment.status(), PaymentStatus::Failed);
        assert_eq!(payment.failure_reason(), Some("card declined"));
        assert!(payment.capture("P".to_string(), Utc::now()).is_err());
    }
}
