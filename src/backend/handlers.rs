use alloy::primitives::Address;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    backend::{AppState, middleware::UserId},
    db::health_check,
    ledger::state::{BillingSnapshot, CreditBucket},
    orders::service::parse_wallet,
    utils::{amount::format_units, error::LedgerpayError},
};

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub wallet_address: String,
    pub product_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    pub amount: u64,
}

#[derive(Debug, Deserialize)]
pub struct PriorityRequest {
    pub priority: Vec<CreditBucket>,
}

/// Token amount in minor units plus its human readable form.
#[derive(Debug, Serialize)]
pub struct TokenAmount {
    pub address: Address,
    pub raw: String,
    pub formatted: String,
    pub decimals: u8,
}

#[derive(Debug, Serialize)]
pub struct FaucetCooldown {
    pub address: Address,
    pub cooldown_secs: u64,
    pub can_request: bool,
}

pub async fn create_order_handler(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, LedgerpayError> {
    info!(
        user_id = %user_id,
        product_id = %payload.product_id,
        "Create order request"
    );

    let order = state
        .orders
        .create_order(&user_id, &payload.wallet_address, &payload.product_id)
        .await?;

    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_orders_handler(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl IntoResponse, LedgerpayError> {
    let orders = state
        .orders
        .list_orders(&user_id, query.limit, query.offset)
        .await?;
    Ok(Json(orders))
}

pub async fn get_order_handler(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, LedgerpayError> {
    let order = state.orders.get_order(&user_id, &order_id).await?;
    Ok(Json(order))
}

pub async fn list_products_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, LedgerpayError> {
    Ok(Json(state.gateway.get_products().await?))
}

pub async fn get_product_handler(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<impl IntoResponse, LedgerpayError> {
    let product = state
        .gateway
        .get_product(&product_id)
        .await?
        .ok_or(LedgerpayError::ProductNotFound(product_id))?;
    Ok(Json(product))
}

pub async fn balance_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, LedgerpayError> {
    let owner = parse_wallet(&address)?;
    let raw = state.gateway.get_balance(owner).await?;
    let decimals = state.gateway.token_decimals().await?;
    Ok(Json(TokenAmount {
        address: owner,
        raw: raw.to_string(),
        formatted: format_units(raw, decimals),
        decimals,
    }))
}

pub async fn allowance_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, LedgerpayError> {
    let owner = parse_wallet(&address)?;
    let raw = state.gateway.get_allowance(owner).await?;
    let decimals = state.gateway.token_decimals().await?;
    Ok(Json(TokenAmount {
        address: owner,
        raw: raw.to_string(),
        formatted: format_units(raw, decimals),
        decimals,
    }))
}

pub async fn faucet_cooldown_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, LedgerpayError> {
    if !state.network.is_testnet() {
        return Err(LedgerpayError::Validation(format!(
            "faucet is only available on testnet, not {}",
            state.network.name()
        )));
    }

    let owner = parse_wallet(&address)?;
    let cooldown_secs = state.gateway.faucet_cooldown(owner).await?;
    Ok(Json(FaucetCooldown {
        address: owner,
        cooldown_secs,
        can_request: cooldown_secs == 0,
    }))
}

pub async fn network_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, LedgerpayError> {
    Ok(Json(state.gateway.network_info().await?))
}

pub async fn listener_status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.listener.status().await)
}

pub async fn billing_handler(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<impl IntoResponse, LedgerpayError> {
    let billing = state.billing.load(&user_id).await?;
    Ok(Json(BillingSnapshot::from(billing)))
}

pub async fn consume_handler(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(payload): Json<ConsumeRequest>,
) -> Result<impl IntoResponse, LedgerpayError> {
    let billing = state.billing.consume(&user_id, payload.amount).await?;
    Ok(Json(BillingSnapshot::from(billing)))
}

pub async fn priority_handler(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(payload): Json<PriorityRequest>,
) -> Result<impl IntoResponse, LedgerpayError> {
    let billing = state
        .billing
        .set_priority(&user_id, &payload.priority)
        .await?;
    info!(user_id = %user_id, priority = ?billing.spending_priority, "Spending priority updated");
    Ok(Json(BillingSnapshot::from(billing)))
}

pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let listener = state.listener.state().await;

    match health_check(&state.pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ok", "listener": listener })),
        ),
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "degraded", "listener": listener })),
            )
        }
    }
}
