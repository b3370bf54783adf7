use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum LedgerpayError {
    /// Any failed chain read. Callers treat this as "unknown", never as "not paid".
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Unsupported product SKU: {0}")]
    UnsupportedSku(String),
    #[error("Product not found: {0}")]
    ProductNotFound(String),
    #[error("Product is not active: {0}")]
    ProductInactive(String),
    #[error("Insufficient token balance: required {required}, available {available}")]
    InsufficientBalance { required: String, available: String },
    #[error("Insufficient allowance: required {required}, approved {approved}")]
    InsufficientAllowance { required: String, approved: String },
    #[error("Insufficient credits: requested {requested}, available {available}")]
    InsufficientCredits { requested: u64, available: u64 },
    #[error("Order not found: {0}")]
    OrderNotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl LedgerpayError {
    /// Transient failures leave order state untouched and are retried by the
    /// next probe tick or the next delivery of the same event.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerpayError::Rpc(_) | LedgerpayError::Database(_))
    }

    pub fn rpc(err: impl std::fmt::Display) -> Self {
        LedgerpayError::Rpc(err.to_string())
    }

    fn status(&self) -> StatusCode {
        match self {
            LedgerpayError::Rpc(_) => StatusCode::BAD_GATEWAY,
            LedgerpayError::ProductNotFound(_) | LedgerpayError::OrderNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            LedgerpayError::ProductInactive(_)
            | LedgerpayError::InsufficientBalance { .. }
            | LedgerpayError::InsufficientAllowance { .. }
            | LedgerpayError::Validation(_) => StatusCode::BAD_REQUEST,
            LedgerpayError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            LedgerpayError::Redis(_) => StatusCode::SERVICE_UNAVAILABLE,
            LedgerpayError::Database(_)
            | LedgerpayError::UnsupportedSku(_)
            | LedgerpayError::Config(_)
            | LedgerpayError::Serde(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LedgerpayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Internal details stay in the logs.
            LedgerpayError::Database(_) => "Database error".to_string(),
            other => other.to_string(),
        };

        let body = Json(serde_json::json!({
            "error": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<alloy::contract::Error> for LedgerpayError {
    fn from(err: alloy::contract::Error) -> Self {
        LedgerpayError::Rpc(err.to_string())
    }
}

impl From<alloy::transports::TransportError> for LedgerpayError {
    fn from(err: alloy::transports::TransportError) -> Self {
        LedgerpayError::Rpc(err.to_string())
    }
}
