use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

use crate::utils::{
    amount::{parse_minor_units, serialize_decimal},
    error::LedgerpayError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OrderStatus {
    /// Completed and failed orders are never reopened.
    pub fn is_final(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
        }
    }
}

/// Raw `payment_orders` row; `amount` is selected as text.
#[derive(Debug, Clone, FromRow)]
pub struct PaymentOrderRow {
    pub order_id: String,
    pub user_id: String,
    pub wallet_address: String,
    pub product_id: String,
    pub amount: String,
    pub order_digest: String,
    pub status: OrderStatus,
    pub tx_hash: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentOrder {
    pub order_id: String,
    pub user_id: String,
    pub user_wallet: String,
    pub product_id: String,
    #[serde(serialize_with = "serialize_decimal")]
    pub amount: U256,
    pub order_digest: String,
    pub status: OrderStatus,
    pub tx_hash: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentOrderRow> for PaymentOrder {
    type Error = LedgerpayError;

    fn try_from(row: PaymentOrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            amount: parse_minor_units(&row.amount)?,
            order_id: row.order_id,
            user_id: row.user_id,
            user_wallet: row.wallet_address,
            product_id: row.product_id,
            order_digest: row.order_digest,
            status: row.status,
            tx_hash: row.tx_hash,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

/// Input for inserting a fresh `pending` order.
#[derive(Debug, Clone)]
pub struct NewPaymentOrder {
    pub order_id: String,
    pub user_id: String,
    pub user_wallet: String,
    pub product_id: String,
    pub amount: U256,
    pub order_digest: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FulfillmentRecord {
    pub order_id: String,
    pub user_id: String,
    pub product_id: String,
    pub fulfilled_at: DateTime<Utc>,
}

/// One row of the append-only webhook/audit log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookRecord {
    pub order_id: Option<String>,
    pub event_type: String,
    pub source: String,
    pub tx_hash: Option<String>,
    pub block_number: Option<i64>,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub error: Option<String>,
}

impl WebhookRecord {
    /// Downgrades the record when the status update it accompanies found the
    /// order already closed.
    pub fn closed_unless(mut self, updated: bool) -> Self {
        if !updated {
            self.processed = false;
            self.error.get_or_insert_with(|| "order_already_closed".to_string());
        }
        self
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookEntry {
    pub id: i64,
    pub order_id: Option<String>,
    pub event_type: String,
    pub source: String,
    pub tx_hash: Option<String>,
    pub block_number: Option<i64>,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub error: Option<String>,
    pub received_at: DateTime<Utc>,
}
