use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

use super::{AuthorizationOutcome, AuthorizationRequest, GatewayError, PaymentGateway};

/// JSON-over-HTTP payment gateway client
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct AuthorizationResponse {
    approved: bool,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    decline_reason: Option<String>,
}

#[derive(Serialize)]
struct RefundBody<'a> {
    refund_id: &'a str,
    amount: Decimal,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

impl HttpGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
        idempotency_key: Option<&str>,
    ) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        let resp = request.send().await?;
        Self::handle_response(resp).await
    }

    async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, GatewayError> {
        let status = resp.status();
        let text = resp.text().await?;

        if status.is_server_error() {
            return Err(GatewayError::Unavailable(format!("HTTP {}", status)));
        }

        if !status.is_success() {
            let message = serde_json::from_str::<ApiError>(&text)
                .map(|e| e.message)
                .unwrap_or(text);
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        if text.is_empty() {
            return serde_json::from_str("null").map_err(|e| GatewayError::Parse(e.to_string()));
        }

        serde_json::from_str(&text).map_err(|e| GatewayError::Parse(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationOutcome, GatewayError> {
        let resp: AuthorizationResponse = self.post("/authorizations", request, None).await?;
        into_outcome(resp)
    }

    async fn cancel(&self, reference: &str) -> Result<(), GatewayError> {
        let path = format!("/authorizations/{}/cancel", reference);
        let _: Option<serde_json::Value> = self.post(&path, &serde_json::json!({}), Some(reference)).await?;
        Ok(())
    }

    async fn refund(
        &self,
        reference: &str,
        refund_id: &str,
        amount: Decimal,
    ) -> Result<(), GatewayError> {
        let path = format!("/authorizations/{}/refunds", reference);
        let body = RefundBody { refund_id, amount };
        let _: Option<serde_json::Value> = self.post(&path, &body, Some(refund_id)).await?;
        Ok(())
    }
}

fn into_outcome(resp: AuthorizationResponse) -> Result<AuthorizationOutcome, GatewayError> {
    if !resp.approved {
        return Ok(AuthorizationOutcome::Declined {
            reason: resp
                .decline_reason
                .unwrap_or_else(|| "Declined by gateway".to_string()),
        });
    }

    resp.reference
        .map(|reference| AuthorizationOutcome::Approved { reference })
        .ok_or_else(|| GatewayError::Parse("approved authorization without reference".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_outcome() {
        let approved: AuthorizationResponse =
            serde_json::from_str(r#"{"approved":true,"reference":"PSP-1"}"#).unwrap();
        assert_eq!(
            into_outcome(approved).unwrap(),
            AuthorizationOutcome::Approved {
                reference: "PSP-1".to_string()
            }
        );

        let declined: AuthorizationResponse =
            serde_json::from_str(r#"{"approved":false,"decline_reason":"stolen card"}"#).unwrap();
        assert_eq!(
            into_outcome(declined).unwrap(),
            AuthorizationOutcome::Declined {
                reason: "stolen card".to_string()
            }
        );

        let broken: AuthorizationResponse = serde_json::from_str(r#"{"approved":true}"#).unwrap();
        assert!(matches!(into_outcome(broken), Err(GatewayError::Parse(_))));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let gateway = HttpGateway::new("http://localhost:9000/", Duration::from_secs(1)).unwrap();
        assert_eq!(gateway.base_url, "http://localhost:9000");
    }
}
