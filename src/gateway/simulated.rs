use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{AuthorizationOutcome, AuthorizationRequest, GatewayError, PaymentGateway};

/// Merchants whose id starts with this prefix are always declined
const DECLINE_PREFIX: &str = "DECLINE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthorizationState {
    Open,
    Voided,
}

#[derive(Debug)]
struct Authorization {
    state: AuthorizationState,
    authorized: Decimal,
    refunded: Decimal,
    refund_ids: HashSet<String>,
}

/// In-process gateway that approves everything except merchants whose id
/// starts with `DECLINE`. Tracks authorizations so cancel and refund fail
/// for unknown references.
#[derive(Debug, Clone, Default)]
pub struct SimulatedGateway {
    authorizations: Arc<RwLock<HashMap<String, Authorization>>>,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationOutcome, GatewayError> {
        if request.merchant_id.starts_with(DECLINE_PREFIX) {
            return Ok(AuthorizationOutcome::Declined {
                reason: "Declined by issuer".to_string(),
            });
        }

        let reference = format!("SIM-{}", request.payment_id.simple());
        self.authorizations.write().await.insert(
            reference.clone(),
            Authorization {
                state: AuthorizationState::Open,
                authorized: request.amount,
                refunded: Decimal::ZERO,
                refund_ids: HashSet::new(),
            },
        );

        Ok(AuthorizationOutcome::Approved { reference })
    }

    async fn cancel(&self, reference: &str) -> Result<(), GatewayError> {
        let mut authorizations = self.authorizations.write().await;
        match authorizations.get_mut(reference) {
            Some(authorization) => {
                authorization.state = AuthorizationState::Voided;
                Ok(())
            }
            None => Err(GatewayError::Api {
                status: 404,
                message: format!("unknown authorization {}", reference),
            }),
        }
    }

    async fn refund(
        &self,
        reference: &str,
        refund_id: &str,
        amount: Decimal,
    ) -> Result<(), GatewayError> {
        let mut authorizations = self.authorizations.write().await;
        match authorizations.get_mut(reference) {
            Some(authorization) if authorization.refund_ids.contains(refund_id) => Ok(()),
            Some(authorization)
                if authorization.state == AuthorizationState::Open
                    && authorization.refunded + amount <= authorization.authorized =>
            {
                authorization.refunded += amount;
                authorization.refund_ids.insert(refund_id.to_string());
                Ok(())
            }
            Some(_) => Err(GatewayError::Api {
                status: 422,
                message: format!("refund not allowed for {}", reference),
            }),
            None => Err(GatewayError::Api {
                status: 404,
                message: format!("unknown authorization {}", reference),
            }),
        }
    }
}
