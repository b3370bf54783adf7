use std::sync::Arc;

use alloy::primitives::Address;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    client::gateway::ChainGateway,
    db::{
        models::{NewPaymentOrder, PaymentOrder},
        repository::OrderStore,
    },
    events::{
        handlers::PaymentHandler,
        listener::BlockchainListener,
        types::{EventSource, PaymentEvent},
    },
    fulfillment::sku::Sku,
    utils::{amount::order_digest, error::LedgerpayError, logs_fmt::abbrev},
};

pub const MAX_PAGE_SIZE: i64 = 100;

/// `order_<unix millis>_<8 hex chars>`, passed on chain as the correlation key.
pub fn new_order_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("order_{}_{}", Utc::now().timestamp_millis(), &suffix[..8])
}

pub fn parse_wallet(wallet: &str) -> Result<Address, LedgerpayError> {
    wallet
        .trim()
        .parse::<Address>()
        .map_err(|_| LedgerpayError::Validation(format!("invalid wallet address: {}", wallet)))
}

pub struct OrderService {
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn ChainGateway>,
    handler: Arc<PaymentHandler>,
    listener: BlockchainListener,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        gateway: Arc<dyn ChainGateway>,
        handler: Arc<PaymentHandler>,
        listener: BlockchainListener,
    ) -> Self {
        Self {
            store,
            gateway,
            handler,
            listener,
        }
    }

    /// Validates the product and the payer's funds, records a `pending`
    /// order and wakes the probe loop.
    pub async fn create_order(
        &self,
        user_id: &str,
        wallet: &str,
        product_id: &str,
    ) -> Result<PaymentOrder, LedgerpayError> {
        if user_id.trim().is_empty() {
            return Err(LedgerpayError::Validation("user id is required".to_string()));
        }
        let payer = parse_wallet(wallet)?;

        let product = self
            .gateway
            .get_product(product_id)
            .await?
            .ok_or_else(|| LedgerpayError::ProductNotFound(product_id.to_string()))?;
        if !product.active {
            return Err(LedgerpayError::ProductInactive(product_id.to_string()));
        }
        if !Sku::parse(&product.product_id).is_valid() {
            return Err(LedgerpayError::Validation(format!(
                "product {} cannot be fulfilled",
                product_id
            )));
        }

        let balance = self.gateway.get_balance(payer).await?;
        if balance < product.price {
            return Err(LedgerpayError::InsufficientBalance {
                required: product.price.to_string(),
                available: balance.to_string(),
            });
        }
        let allowance = self.gateway.get_allowance(payer).await?;
        if allowance < product.price {
            return Err(LedgerpayError::InsufficientAllowance {
                required: product.price.to_string(),
                approved: allowance.to_string(),
            });
        }

        let order_id = new_order_id();
        let order = self
            .store
            .insert_order(NewPaymentOrder {
                order_digest: order_digest(&order_id).to_string(),
                order_id,
                user_id: user_id.to_string(),
                user_wallet: payer.to_string(),
                product_id: product.product_id,
                amount: product.price,
            })
            .await?;

        self.listener.activate_polling().await;

        info!(
            order_id = %order.order_id,
            user_id,
            wallet = %abbrev(&order.user_wallet),
            product_id = %order.product_id,
            amount = %order.amount,
            "Payment order created"
        );
        Ok(order)
    }

    /// Owner-scoped read. Open orders are re-checked against the chain once
    /// before returning.
    pub async fn get_order(
        &self,
        user_id: &str,
        order_id: &str,
    ) -> Result<PaymentOrder, LedgerpayError> {
        let order = self.owned_order(user_id, order_id).await?;
        if order.status.is_final() {
            return Ok(order);
        }

        let event = PaymentEvent::probe(order_id, EventSource::OnDemand);
        if let Err(e) = self.handler.handle(&event).await {
            warn!(order_id, "On-demand check failed, returning stored order: {}", e);
            return Ok(order);
        }

        self.owned_order(user_id, order_id).await
    }

    pub async fn list_orders(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PaymentOrder>, LedgerpayError> {
        self.store
            .list_user_orders(user_id, limit.clamp(1, MAX_PAGE_SIZE), offset.max(0))
            .await
    }

    async fn owned_order(&self, user_id: &str, order_id: &str) -> Result<PaymentOrder, LedgerpayError> {
        self.store
            .find_order(order_id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| LedgerpayError::OrderNotFound(order_id.to_string()))
    }
}
