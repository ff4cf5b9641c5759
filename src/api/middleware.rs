//! API Middleware
//!
//! Request id, API key authentication and request logging.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use sqlx::PgPool;
use std::net::IpAddr;
use uuid::Uuid;

use crate::domain::OperationContext;
use crate::error::AppError;

pub const API_KEY_HEADER: &str = "X-API-Key";
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

const MAX_REQUEST_ID_LENGTH: usize = 100;

/// API Key authentication result
#[derive(Debug, Clone)]
pub struct AuthenticatedApiKey {
    pub id: Uuid,
    pub name: String,
    pub permissions: Vec<String>,
}

impl AuthenticatedApiKey {
    /// Check if this API key has a specific permission
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission || p == "admin")
    }

    pub fn require(&self, permission: &str) -> Result<(), AppError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(AppError::PermissionDenied(format!("{} permission required", permission)))
        }
    }
}

/// Id of the current request, client supplied or generated
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

// =========================================================================
// Request id
// =========================================================================

/// Take `X-Request-ID` from the client or generate one, and echo it back
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| is_acceptable_request_id(id))
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn is_acceptable_request_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_REQUEST_ID_LENGTH && id.chars().all(|c| c.is_ascii_graphic())
}

// =========================================================================
// API Key Authentication
// =========================================================================

/// Validate the X-API-Key header and attach the key and the operation
/// context to the request
pub async fn auth_middleware(
    State(pool): State<PgPool>,
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|key| !key.is_empty())
        .ok_or(AppError::InvalidApiKey)?;

    let record: Option<(Uuid, String, Vec<String>, bool)> = sqlx::query_as(
        r#"
        SELECT id, name, permissions, is_active
        FROM api_keys
        WHERE key_hash = encode(sha256($1::bytea), 'hex')
        "#,
    )
    .bind(api_key.as_bytes())
    .fetch_optional(&pool)
    .await?;

    let (api_key_id, name, permissions, is_active) = record.ok_or(AppError::InvalidApiKey)?;

    if !is_active {
        tracing::warn!(api_key_id = %api_key_id, "Disabled API key used");
        return Err(AppError::InvalidApiKey);
    }

    if let Err(e) = sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = $1")
        .bind(api_key_id)
        .execute(&pool)
        .await
    {
        tracing::warn!(api_key_id = %api_key_id, error = %e, "Failed to touch API key");
    }

    let mut context = OperationContext::new()
        .with_api_key(api_key_id)
        .with_correlation_id(Uuid::new_v4());

    if let Some(RequestId(id)) = request.extensions().get::<RequestId>() {
        context = context.with_request_id(id.clone());
    }
    if let Some(key) = headers.get(IDEMPOTENCY_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        context = context.with_idempotency_key(key);
    }
    if let Some(ip) = client_ip(&headers) {
        context = context.with_client_ip(ip);
    }

    request.extensions_mut().insert(AuthenticatedApiKey {
        id: api_key_id,
        name,
        permissions,
    });
    request.extensions_mut().insert(context);

    Ok(next.run(request).await)
}

/// First address of X-Forwarded-For
fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
}

// =========================================================================
// Logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &[
    "x-api-key",
    "authorization",
    "cookie",
    "set-cookie",
];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = mask_headers_for_logging(request.headers());
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|RequestId(id)| id.clone());

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        request_id = ?request_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = %start.elapsed().as_millis(),
        request_id = ?request_id,
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_headers_for_logging() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("x-api-key", "secret-key-12345".parse().unwrap());
        headers.insert("idempotency-key", "order-77".parse().unwrap());

        let masked = mask_headers_for_logging(&headers);

        let api_key = masked.iter().find(|(k, _)| k == "x-api-key");
        let content_type = masked.iter().find(|(k, _)| k == "content-type");
        let idempotency = masked.iter().find(|(k, _)| k == "idempotency-key");

        assert_eq!(api_key.unwrap().1, "[REDACTED]");
        assert_eq!(content_type.unwrap().1, "application/json");
        assert_eq!(idempotency.unwrap().1, "order-77");
    }

    #[test]
    fn test_permissions_with_admin_wildcard() {
        let key = AuthenticatedApiKey {
            id: Uuid::new_v4(),
            name: "teller".to_string(),
            permissions: vec!["accounts:read".to_string()],
        };
        assert!(key.require("accounts:read").is_ok());
        assert!(matches!(
            key.require("payments:write"),
            Err(AppError::PermissionDenied(_))
        ));

        let admin = AuthenticatedApiKey {
            permissions: vec!["admin".to_string()],
            ..key
        };
        assert!(admin.has_permission("payments:write"));
    }

    #[test]
    fn test_request_id_acceptance() {
        assert!(is_acceptable_request_id("req-123"));
        assert!(!is_acceptable_request_id(""));
        assert!(!is_acceptable_request_id("has space"));
        assert!(!is_acceptable_request_id(&"x".repeat(101)));
    }

    #[test]
    fn test_client_ip_from_forwarded_for() {
        let mut headers = HeaderMap::new();
        assert!(client_ip(&headers).is_none());

        headers.insert("X-Forwarded-For", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), Some("203.0.113.7".parse().unwrap()));
    }
}
