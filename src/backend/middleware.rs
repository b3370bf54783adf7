use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Json, Request, State},
    http::{StatusCode, request::Parts},
    middleware::Next,
    response::Response,
};

use subtle::ConstantTimeEq;

use crate::utils::error::LedgerpayError;

pub const USER_ID_HEADER: &str = "x-user-id";

pub async fn api_key_auth(
    State(expected): State<Arc<str>>,
    req: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<serde_json::Value>)> {
    let provided = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(key) if bool::from(key.as_bytes().ct_eq(expected.as_bytes())) => Ok(next.run(req).await),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "invalid or missing API key" })),
        )),
    }
}

/// Caller identity forwarded by the calling application.
#[derive(Debug, Clone)]
pub struct UserId(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = LedgerpayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| UserId(v.to_string()))
            .ok_or_else(|| LedgerpayError::Validation("missing X-User-Id header".to_string()))
    }
}
