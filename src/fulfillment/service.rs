use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::{
    db::{
        billing::{lock_state, save_state},
        models::{OrderStatus, PaymentOrder},
    },
    fulfillment::sku::{Sku, apply_grant},
    ledger::state::BillingState,
    utils::{error::LedgerpayError, metrics::METRICS},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyFulfilled,
    /// The order was failed before its value could be granted.
    OrderClosed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FulfillmentOutcome {
    pub fulfilled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    /// State written by this call; `None` when nothing was applied.
    #[serde(skip)]
    pub billing: Option<BillingState>,
}

impl FulfillmentOutcome {
    pub fn applied(billing: BillingState) -> Self {
        Self {
            fulfilled: true,
            reason: None,
            billing: Some(billing),
        }
    }

    pub fn already_fulfilled() -> Self {
        Self {
            fulfilled: false,
            reason: Some(SkipReason::AlreadyFulfilled),
            billing: None,
        }
    }

    pub fn order_closed() -> Self {
        Self {
            fulfilled: false,
            reason: Some(SkipReason::OrderClosed),
            billing: None,
        }
    }
}

/// Grants the value of a verified order exactly once.
#[async_trait]
pub trait Fulfiller: Send + Sync {
    async fn fulfill(&self, order: &PaymentOrder) -> Result<FulfillmentOutcome, LedgerpayError>;
}

pub struct FulfillmentService {
    pool: Arc<PgPool>,
}

impl FulfillmentService {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Fulfiller for FulfillmentService {
    /// One transaction: order row lock, guard lookup, billing row lock, grant,
    /// guard insert. Any error drops the transaction, which rolls everything
    /// back.
    async fn fulfill(&self, order: &PaymentOrder) -> Result<FulfillmentOutcome, LedgerpayError> {
        let mut tx = self.pool.begin().await?;

        let status: Option<(OrderStatus,)> =
            sqlx::query_as("SELECT status FROM payment_orders WHERE order_id = $1 FOR UPDATE")
                .bind(&order.order_id)
                .fetch_optional(&mut *tx)
                .await?;

        if matches!(status, None | Some((OrderStatus::Failed,))) {
            warn!(order_id = %order.order_id, "Order closed before fulfillment, nothing granted");
            return Ok(FulfillmentOutcome::order_closed());
        }

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT order_id FROM crypto_payment_fulfillments WHERE order_id = $1")
                .bind(&order.order_id)
                .fetch_optional(&mut *tx)
                .await?;

        if existing.is_some() {
            tx.commit().await?;
            METRICS.duplicate_deliveries.inc();
            info!(order_id = %order.order_id, "Order already fulfilled, skipping");
            return Ok(FulfillmentOutcome::already_fulfilled());
        }

        let now = Utc::now();
        let current = lock_state(&mut tx, &order.user_id, now).await?;

        let sku = Sku::parse(&order.product_id);
        let Some(next) = apply_grant(current, &sku, now) else {
            error!(
                order_id = %order.order_id,
                product_id = %order.product_id,
                "Unsupported product SKU at fulfillment; order needs manual intervention"
            );
            return Err(LedgerpayError::UnsupportedSku(order.product_id.clone()));
        };

        save_state(&mut tx, &order.user_id, &next).await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO crypto_payment_fulfillments (order_id, user_id, product_id)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&order.order_id)
        .bind(&order.user_id)
        .bind(&order.product_id)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            // A concurrent attempt committed first; dropping `tx` discards our grant.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                METRICS.duplicate_deliveries.inc();
                info!(order_id = %order.order_id, "Order fulfilled concurrently, skipping");
                return Ok(FulfillmentOutcome::already_fulfilled());
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;

        METRICS.orders_fulfilled.inc();
        info!(
            order_id = %order.order_id,
            user_id = %order.user_id,
            product_id = %order.product_id,
            tier = next.tier.name(),
            total_credits = next.total_credits(),
            "Order fulfilled"
        );

        Ok(FulfillmentOutcome::applied(next))
    }
}
