//! Response envelope
//!
//! Every body the API returns, success or error, has the same shape:
//! `code`, `message`, optional `data` and `errors`, `timestamp`,
//! optional `request_id` and the API `version`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const API_VERSION: &str = "v1.0";
pub const SUCCESS_CODE: &str = "SUCCESS";

/// One rejected input field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_value: Option<serde_json::Value>,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            rejected_value: None,
            message: message.into(),
        }
    }

    pub fn rejected(mut self, value: impl Serialize) -> Self {
        self.rejected_value = serde_json::to_value(value).ok();
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub version: &'static str,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            code: SUCCESS_CODE.to_string(),
            message: message.into(),
            data: Some(data),
            errors: None,
            timestamp: Utc::now(),
            request_id: None,
            version: API_VERSION,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Body as JSON, for storing next to an idempotency key
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl ApiResponse<()> {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            data: None,
            errors: None,
            timestamp: Utc::now(),
            request_id: None,
            version: API_VERSION,
        }
    }

    pub fn with_errors(mut self, errors: Vec<FieldError>) -> Self {
        if !errors.is_empty() {
            self.errors = Some(errors);
        }
        self
    }
}

/// A status code plus an already serialized envelope
#[derive(Debug, Clone)]
pub struct ApiReply {
    pub status: StatusCode,
    pub body: serde_json::Value,
    pub replayed: bool,
}

impl ApiReply {
    pub fn new<T: Serialize>(status: StatusCode, response: ApiResponse<T>) -> Self {
        Self {
            status,
            body: response.to_value(),
            replayed: false,
        }
    }

    pub fn ok<T: Serialize>(response: ApiResponse<T>) -> Self {
        Self::new(StatusCode::OK, response)
    }

    pub fn created<T: Serialize>(response: ApiResponse<T>) -> Self {
        Self::new(StatusCode::CREATED, response)
    }

    /// A response stored under an idempotency key, sent again as is
    pub fn replay(status: u16, body: serde_json::Value) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
            body,
            replayed: true,
        }
    }
}

impl IntoResponse for ApiReply {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if self.replayed {
            response
                .headers_mut()
                .insert("Idempotent-Replayed", axum::http::HeaderValue::from_static("true"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope() {
        let body = ApiResponse::success("Account opened", json!({"balance": "0.00"}))
            .with_request_id(Some("req-1".to_string()))
            .to_value();

        assert_eq!(body["code"], "SUCCESS");
        assert_eq!(body["message"], "Account opened");
        assert_eq!(body["data"]["balance"], "0.00");
        assert_eq!(body["request_id"], "req-1");
        assert_eq!(body["version"], "v1.0");
        assert!(body.get("errors").is_none());
        assert!(body["timestamp"].is_string());
    }

    #[test]
    fn test_error_envelope_with_field_errors() {
        let body = serde_json::to_value(
            ApiResponse::error("VALIDATION_ERROR", "Validation failed").with_errors(vec![
                FieldError::new("description", "must be 1-100 characters").rejected(""),
            ]),
        )
        .unwrap();

        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert!(body.get("data").is_none());
        assert!(body.get("request_id").is_none());
        assert_eq!(body["errors"][0]["field"], "description");
        assert_eq!(body["errors"][0]["rejected_value"], "");
    }

    #[test]
    fn test_empty_errors_are_omitted() {
        let body = serde_json::to_value(ApiResponse::error("SYSTEM_ERROR", "x").with_errors(vec![])).unwrap();
        assert!(body.get("errors").is_none());
    }
}
