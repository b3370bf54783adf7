use std::{sync::Arc, time::Duration};

use alloy::primitives::B256;
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use crate::{
    db::models::{
        FulfillmentRecord, NewPaymentOrder, PaymentOrder, PaymentOrderRow, WebhookEntry,
        WebhookRecord,
    },
    utils::error::LedgerpayError,
};

const ORDER_COLUMNS: &str = "order_id, user_id, wallet_address, product_id, amount::text AS amount, \
     order_digest, status, tx_hash, failure_reason, created_at, completed_at";

/// Persistence seam for the payment order lifecycle and its audit log.
///
/// Every status transition is guarded in SQL so that completed and failed
/// orders are never reopened, whichever producer gets there first.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_order(&self, order_id: &str) -> Result<Option<PaymentOrder>, LedgerpayError>;

    async fn find_order_by_digest(
        &self,
        digest: B256,
    ) -> Result<Option<PaymentOrder>, LedgerpayError>;

    async fn insert_order(&self, order: NewPaymentOrder) -> Result<PaymentOrder, LedgerpayError>;

    /// Open orders created within `lookback` but older than `grace`, oldest first.
    async fn open_orders_in_window(
        &self,
        lookback: Duration,
        grace: Duration,
        limit: i64,
    ) -> Result<Vec<PaymentOrder>, LedgerpayError>;

    /// Claims an open order for fulfillment: `pending` or `processing` ends up
    /// `processing`. Returns false once the order is completed or failed.
    async fn mark_processing(&self, order_id: &str) -> Result<bool, LedgerpayError>;

    /// Moves an open order to `completed` and appends the audit row atomically.
    /// When the order was already closed the row is stored with
    /// `processed = false`.
    async fn complete_order(
        &self,
        order_id: &str,
        tx_hash: Option<&str>,
        audit: WebhookRecord,
    ) -> Result<bool, LedgerpayError>;

    /// Moves an open order to `failed` and appends the audit row atomically.
    async fn fail_order(
        &self,
        order_id: &str,
        reason: &str,
        audit: WebhookRecord,
    ) -> Result<bool, LedgerpayError>;

    async fn record_webhook(&self, audit: WebhookRecord) -> Result<(), LedgerpayError>;

    /// Fails `pending` orders older than `max_age`; returns their ids.
    async fn expire_stale_orders(&self, max_age: Duration) -> Result<Vec<String>, LedgerpayError>;

    async fn list_user_orders(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PaymentOrder>, LedgerpayError>;
}

pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn webhooks_for_order(
        &self,
        order_id: &str,
    ) -> Result<Vec<WebhookEntry>, LedgerpayError> {
        let rows = sqlx::query_as::<_, WebhookEntry>(
            r#"
            SELECT id, order_id, event_type, source, tx_hash, block_number,
                   payload, processed, error, received_at
            FROM crypto_payment_webhooks
            WHERE order_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    pub async fn find_fulfillment(
        &self,
        order_id: &str,
    ) -> Result<Option<FulfillmentRecord>, LedgerpayError> {
        let record = sqlx::query_as::<_, FulfillmentRecord>(
            r#"
            SELECT order_id, user_id, product_id, fulfilled_at
            FROM crypto_payment_fulfillments
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(record)
    }

    async fn fetch_one_order(
        &self,
        filter: &str,
        value: &str,
    ) -> Result<Option<PaymentOrder>, LedgerpayError> {
        let sql = format!("SELECT {} FROM payment_orders WHERE {} = $1", ORDER_COLUMNS, filter);
        let row = sqlx::query_as::<_, PaymentOrderRow>(&sql)
            .bind(value)
            .fetch_optional(self.pool())
            .await?;

        row.map(PaymentOrder::try_from).transpose()
    }

    async fn close_order(
        &self,
        sql: &str,
        order_id: &str,
        value: Option<&str>,
        audit: WebhookRecord,
    ) -> Result<bool, LedgerpayError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(sql)
            .bind(order_id)
            .bind(value)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            == 1;

        insert_webhook(&mut tx, &audit.closed_unless(updated)).await?;
        tx.commit().await?;

        Ok(updated)
    }
}

async fn insert_webhook(conn: &mut PgConnection, audit: &WebhookRecord) -> Result<(), LedgerpayError> {
    sqlx::query(
        r#"
        INSERT INTO crypto_payment_webhooks
        (order_id, event_type, source, tx_hash, block_number, payload, processed, error)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(&audit.order_id)
    .bind(&audit.event_type)
    .bind(&audit.source)
    .bind(&audit.tx_hash)
    .bind(audit.block_number)
    .bind(&audit.payload)
    .bind(audit.processed)
    .bind(&audit.error)
    .execute(conn)
    .await?;

    Ok(())
}

#[async_trait]
impl OrderStore for Repository {
    async fn find_order(&self, order_id: &str) -> Result<Option<PaymentOrder>, LedgerpayError> {
        self.fetch_one_order("order_id", order_id).await
    }

    async fn find_order_by_digest(
        &self,
        digest: B256,
    ) -> Result<Option<PaymentOrder>, LedgerpayError> {
        self.fetch_one_order("order_digest", &digest.to_string())
            .await
    }

    async fn insert_order(&self, order: NewPaymentOrder) -> Result<PaymentOrder, LedgerpayError> {
        let sql = format!(
            r#"
            INSERT INTO payment_orders
            (order_id, user_id, wallet_address, product_id, amount, order_digest)
            VALUES ($1, $2, $3, $4, $5::numeric, $6)
            RETURNING {}
            "#,
            ORDER_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentOrderRow>(&sql)
            .bind(&order.order_id)
            .bind(&order.user_id)
            .bind(&order.user_wallet)
            .bind(&order.product_id)
            .bind(order.amount.to_string())
            .bind(&order.order_digest)
            .fetch_one(self.pool())
            .await?;

        PaymentOrder::try_from(row)
    }

    async fn open_orders_in_window(
        &self,
        lookback: Duration,
        grace: Duration,
        limit: i64,
    ) -> Result<Vec<PaymentOrder>, LedgerpayError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM payment_orders
            WHERE status IN ('pending', 'processing')
              AND created_at > NOW() - make_interval(secs => $1)
              AND created_at < NOW() - make_interval(secs => $2)
            ORDER BY created_at ASC
            LIMIT $3
            "#,
            ORDER_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentOrderRow>(&sql)
            .bind(lookback.as_secs_f64())
            .bind(grace.as_secs_f64())
            .bind(limit)
            .fetch_all(self.pool())
            .await?;

        rows.into_iter().map(PaymentOrder::try_from).collect()
    }

    async fn mark_processing(&self, order_id: &str) -> Result<bool, LedgerpayError> {
        let updated = sqlx::query(
            r#"
            UPDATE payment_orders
            SET status = 'processing', updated_at = NOW()
            WHERE order_id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(order_id)
        .execute(self.pool())
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn complete_order(
        &self,
        order_id: &str,
        tx_hash: Option<&str>,
        audit: WebhookRecord,
    ) -> Result<bool, LedgerpayError> {
        self.close_order(
            r#"
            UPDATE payment_orders
            SET status = 'completed', tx_hash = COALESCE($2, tx_hash), completed_at = NOW(), updated_at = NOW()
            WHERE order_id = $1 AND status IN ('pending', 'processing')
            "#,
            order_id,
            tx_hash,
            audit,
        )
        .await
    }

    async fn fail_order(
        &self,
        order_id: &str,
        reason: &str,
        audit: WebhookRecord,
    ) -> Result<bool, LedgerpayError> {
        self.close_order(
            r#"
            UPDATE payment_orders
            SET status = 'failed', failure_reason = $2, updated_at = NOW()
            WHERE order_id = $1 AND status IN ('pending', 'processing')
            "#,
            order_id,
            Some(reason),
            audit,
        )
        .await
    }

    async fn record_webhook(&self, audit: WebhookRecord) -> Result<(), LedgerpayError> {
        let mut conn = self.pool.acquire().await?;
        insert_webhook(&mut conn, &audit).await
    }

    async fn expire_stale_orders(&self, max_age: Duration) -> Result<Vec<String>, LedgerpayError> {
        let expired: Vec<(String,)> = sqlx::query_as(
            r#"
            UPDATE payment_orders
            SET status = 'failed', failure_reason = 'expired', updated_at = NOW()
            WHERE status = 'pending'
              AND created_at < NOW() - make_interval(secs => $1)
            RETURNING order_id
            "#,
        )
        .bind(max_age.as_secs_f64())
        .fetch_all(self.pool())
        .await?;

        Ok(expired.into_iter().map(|(id,)| id).collect())
    }

    async fn list_user_orders(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PaymentOrder>, LedgerpayError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM payment_orders
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            ORDER_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentOrderRow>(&sql)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await?;

        rows.into_iter().map(PaymentOrder::try_from).collect()
    }
}
