//! Payment Handler
//!
//! Runs payments against the external gateway. Gateway calls never happen
//! inside a database transaction; when recording fails after the gateway
//! approved, the authorization is voided again.
//!
//! Cancels and refunds are recorded as requested, with every account-side
//! check already passed, before the gateway is called. A request that fails
//! at the gateway or while completing leaves the operation pending, and the
//! next request for the same payment resumes it.

use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregate::{Aggregate, Payment, PendingOperation};
use crate::cache::AccountCache;
use crate::config::TransactionLimits;
use crate::domain::{
    generate_transaction_id, DomainError, Money, OperationContext, PaymentEvent,
    TransactionDetails, TransactionType,
};
use crate::error::AppError;
use crate::gateway::{AuthorizationOutcome, AuthorizationRequest, PaymentGateway};

use super::account_handler::ensure_within_limit;
use super::recorder::EventRecorder;
use super::retry::with_conflict_retry;
use super::{AuthorizePaymentCommand, RefundPaymentCommand};

/// Handler for the payment lifecycle
#[derive(Clone)]
pub struct PaymentHandler {
    recorder: EventRecorder,
    gateway: Arc<dyn PaymentGateway>,
    limits: TransactionLimits,
}

impl PaymentHandler {
    pub fn new(
        pool: PgPool,
        cache: Arc<dyn AccountCache>,
        gateway: Arc<dyn PaymentGateway>,
        limits: TransactionLimits,
    ) -> Self {
        Self {
            recorder: EventRecorder::new(pool, cache),
            gateway,
            limits,
        }
    }

    // =========================================================================
    // Authorize
    // =========================================================================

    /// Authorize a payment and hold the funds.
    ///
    /// A gateway decline is recorded as a FAILED payment and returned as
    /// `PaymentDeclined`.
    pub async fn authorize(
        &self,
        command: AuthorizePaymentCommand,
        context: &OperationContext,
    ) -> Result<Payment, AppError> {
        ensure_within_limit(&command.amount, &self.limits)?;

        let payment_id = Uuid::new_v4();

        // Fail fast before reaching out to the gateway
        let account = self
            .recorder
            .load_account(command.account_number.as_str())
            .await?;
        account.hold(
            payment_id,
            &command.amount,
            self.limits.daily_withdrawal_limit,
            Utc::now(),
        )?;

        let request = AuthorizationRequest {
            payment_id,
            account_number: command.account_number.to_string(),
            merchant_id: command.merchant_id.clone(),
            order_id: command.order_id.clone(),
            amount: command.amount.value(),
        };

        let reference = match self.gateway.authorize(&request).await? {
            AuthorizationOutcome::Approved { reference } => reference,
            AuthorizationOutcome::Declined { reason } => {
                self.record_decline(&command, payment_id, &reason, context).await?;
                return Err(DomainError::PaymentDeclined { reason }.into());
            }
        };

        let recorded = with_conflict_retry("authorize_payment", || {
            self.try_record_authorization(&command, payment_id, &reference, context)
        })
        .await;

        match recorded {
            Ok(payment) => {
                tracing::info!(
                    payment_id = %payment_id,
                    merchant_id = %command.merchant_id,
                    amount = %command.amount,
                    "Payment authorized"
                );
                Ok(payment)
            }
            Err(e) => {
                tracing::warn!(
                    payment_id = %payment_id,
                    error = %e,
                    "Recording authorization failed, voiding at gateway"
                );
                if let Err(cancel_err) = self.gateway.cancel(&reference).await {
                    tracing::error!(
                        payment_id = %payment_id,
                        gateway_reference = %reference,
                        error = %cancel_err,
                        "Compensating gateway cancel failed"
                    );
                }
                Err(e)
            }
        }
    }

    async fn try_record_authorization(
        &self,
        command: &AuthorizePaymentCommand,
        payment_id: Uuid,
        reference: &str,
        context: &OperationContext,
    ) -> Result<Payment, AppError> {
        let account = self
            .recorder
            .load_account(command.account_number.as_str())
            .await?;
        let now = Utc::now();

        let held = account.hold(
            payment_id,
            &command.amount,
            self.limits.daily_withdrawal_limit,
            now,
        )?;

        let authorized = PaymentEvent::PaymentAuthorized {
            payment_id,
            account_number: command.account_number.to_string(),
            merchant_id: command.merchant_id.clone(),
            order_id: command.order_id.clone(),
            amount: command.amount.value(),
            gateway_reference: reference.to_string(),
            description: command.description.clone(),
            authorized_at: now,
        };

        let mut tx = self.recorder.begin().await?;
        let account = self
            .recorder
            .record_account(&mut tx, account, vec![held], context)
            .await?;
        let payment = self
            .recorder
            .record_payment(&mut tx, Payment::default(), authorized, context)
            .await?;
        tx.commit().await?;

        self.recorder.account_committed(&account).await;

        Ok(payment)
    }

    async fn record_decline(
        &self,
        command: &AuthorizePaymentCommand,
        payment_id: Uuid,
        reason: &str,
        context: &OperationContext,
    ) -> Result<(), AppError> {
        let failed = PaymentEvent::PaymentFailed {
            payment_id,
            account_number: command.account_number.to_string(),
            merchant_id: command.merchant_id.clone(),
            order_id: command.order_id.clone(),
            amount: command.amount.value(),
            reason: reason.to_string(),
            failed_at: Utc::now(),
        };

        let mut tx = self.recorder.begin().await?;
        self.recorder
            .record_payment(&mut tx, Payment::default(), failed, context)
            .await?;
        tx.commit().await?;

        tracing::info!(payment_id = %payment_id, reason = %reason, "Payment declined");

        Ok(())
    }

    // =========================================================================
    // Capture
    // =========================================================================

    /// Debit the held funds. The movement is a PAYMENT transaction and
    /// counts toward the daily withdrawal usage.
    pub async fn capture(
        &self,
        payment_id: Uuid,
        context: &OperationContext,
    ) -> Result<Payment, AppError> {
        let transaction_id = generate_transaction_id(TransactionType::Payment, Utc::now());

        let payment = with_conflict_retry("capture_payment", || async {
            let payment = self.recorder.load_payment(payment_id).await?;
            let account = self.recorder.load_account(payment.account_number()).await?;
            let now = Utc::now();

            let captured = payment.capture(transaction_id.clone(), now)?;
            let details = TransactionDetails::new(
                transaction_id.clone(),
                TransactionType::Payment,
                history_description("", &payment),
            )
            .with_reference(payment_id)
            .with_counterpart(payment.merchant_id(), None);
            let debited = account.capture_hold(payment_id, details, now)?;

            let mut tx = self.recorder.begin().await?;
            let account = self
                .recorder
                .record_account(&mut tx, account, vec![debited], context)
                .await?;
            let payment = self
                .recorder
                .record_payment(&mut tx, payment, captured, context)
                .await?;
            tx.commit().await?;

            self.recorder.account_committed(&account).await;
            self.recorder.snapshot(&payment).await;

            Ok(payment)
        })
        .await?;

        tracing::info!(
            payment_id = %payment_id,
            transaction_id = %transaction_id,
            amount = %payment.captured_amount(),
            "Payment captured"
        );

        Ok(payment)
    }

    // =========================================================================
    // Cancel
    // =========================================================================

    /// Void the authorization at the gateway, then release the hold
    pub async fn cancel(
        &self,
        payment_id: Uuid,
        context: &OperationContext,
    ) -> Result<Payment, AppError> {
        let payment = with_conflict_retry("request_cancel", || async {
            let payment = self.recorder.load_payment(payment_id).await?;
            if payment.pending() == Some(&PendingOperation::Cancel) {
                tracing::info!(payment_id = %payment_id, "Resuming pending cancel");
                return Ok(payment);
            }

            let account = self.recorder.load_account(payment.account_number()).await?;
            let now = Utc::now();

            let requested = payment.request_cancel(now)?;
            account.release_hold(payment_id, now)?;

            let mut tx = self.recorder.begin().await?;
            let payment = self
                .recorder
                .record_payment(&mut tx, payment, requested, context)
                .await?;
            tx.commit().await?;

            Ok(payment)
        })
        .await?;

        if let Some(reference) = payment.gateway_reference() {
            self.gateway.cancel(reference).await?;
        }

        let payment = with_conflict_retry("cancel_payment", || async {
            let payment = self.recorder.load_payment(payment_id).await?;
            let account = self.recorder.load_account(payment.account_number()).await?;
            let now = Utc::now();

            let cancelled = payment.cancel(now)?;
            let released = account.release_hold(payment_id, now)?;

            let mut tx = self.recorder.begin().await?;
            let account = self
                .recorder
                .record_account(&mut tx, account, vec![released], context)
                .await?;
            let payment = self
                .recorder
                .record_payment(&mut tx, payment, cancelled, context)
                .await?;
            tx.commit().await?;

            self.recorder.account_committed(&account).await;

            Ok(payment)
        })
        .await?;

        tracing::info!(payment_id = %payment_id, "Payment cancelled");

        Ok(payment)
    }

    // =========================================================================
    // Refund
    // =========================================================================

    /// Refund at the gateway, then credit the account with a REFUND
    /// transaction
    pub async fn refund(
        &self,
        command: RefundPaymentCommand,
        context: &OperationContext,
    ) -> Result<Payment, AppError> {
        let payment_id = command.payment_id;
        let new_transaction_id = generate_transaction_id(TransactionType::Refund, Utc::now());

        let payment = with_conflict_retry("request_refund", || async {
            let payment = self.recorder.load_payment(payment_id).await?;

            if let Some(PendingOperation::Refund { amount, .. }) = payment.pending() {
                if command.amount.is_some_and(|m| m.value() != *amount) {
                    return Err(AppError::Domain(DomainError::invalid_state(format!(
                        "A refund of {} is already in progress",
                        amount
                    ))));
                }
                tracing::info!(payment_id = %payment_id, amount = %amount, "Resuming pending refund");
                return Ok(payment);
            }

            let account = self.recorder.load_account(payment.account_number()).await?;
            let now = Utc::now();

            let requested = payment.request_refund(command.amount, new_transaction_id.clone(), now)?;

            // The credit has to be possible before the gateway moves money
            let (amount, details) = refund_credit(&payment.clone().apply(requested.clone()))?;
            account.credit(&amount, details, now)?;

            let mut tx = self.recorder.begin().await?;
            let payment = self
                .recorder
                .record_payment(&mut tx, payment, requested, context)
                .await?;
            tx.commit().await?;

            Ok(payment)
        })
        .await?;

        let (amount, details) = refund_credit(&payment)?;
        let transaction_id = details.transaction_id;

        if let Some(reference) = payment.gateway_reference() {
            self.gateway
                .refund(reference, &transaction_id, amount.value())
                .await?;
        }

        let payment = with_conflict_retry("refund_payment", || async {
            let payment = self.recorder.load_payment(payment_id).await?;
            let account = self.recorder.load_account(payment.account_number()).await?;
            let now = Utc::now();

            let (credit, details) = refund_credit(&payment)?;
            if details.transaction_id != transaction_id {
                return Err(AppError::Domain(DomainError::invalid_state(format!(
                    "Refund {} is no longer pending",
                    transaction_id
                ))));
            }

            let refunded = payment.refund(now)?;
            let credited = account.credit(&credit, details, now)?;

            let mut tx = self.recorder.begin().await?;
            let account = self
                .recorder
                .record_account(&mut tx, account, vec![credited], context)
                .await?;
            let payment = self
                .recorder
                .record_payment(&mut tx, payment, refunded, context)
                .await?;
            tx.commit().await?;

            self.recorder.account_committed(&account).await;
            self.recorder.snapshot(&payment).await;

            Ok(payment)
        })
        .await?;

        tracing::info!(
            payment_id = %payment_id,
            transaction_id = %transaction_id,
            amount = %amount,
            status = %payment.status(),
            "Payment refunded"
        );

        Ok(payment)
    }
}

/// Longest description the transaction history stores
const MAX_DESCRIPTION_CHARS: usize = 100;

/// History description of a payment movement, prefix included
fn history_description(prefix: &str, payment: &Payment) -> String {
    let description = match payment.description() {
        Some(d) if !d.trim().is_empty() => d.to_string(),
        _ => format!("Payment {} / {}", payment.merchant_id(), payment.order_id()),
    };
    format!("{}{}", prefix, description)
        .chars()
        .take(MAX_DESCRIPTION_CHARS)
        .collect()
}

/// Credit that completes the pending refund of `payment`
fn refund_credit(payment: &Payment) -> Result<(Money, TransactionDetails), AppError> {
    match payment.pending() {
        Some(PendingOperation::Refund {
            amount,
            transaction_id,
        }) => {
            let details = TransactionDetails::new(
                transaction_id.clone(),
                TransactionType::Refund,
                history_description("Refund: ", payment),
            )
            .with_reference(payment.id())
            .with_counterpart(payment.merchant_id(), None);
            Ok((Money::new(*amount)?, details))
        }
        _ => Err(DomainError::invalid_state("No refund is pending").into()),
    }
}
