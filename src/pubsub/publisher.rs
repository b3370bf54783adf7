use async_trait::async_trait;
use redis::{Client as RedisClient, aio::MultiplexedConnection};
use tracing::info;

use crate::{
    pubsub::types::BillingNotice,
    utils::{error::LedgerpayError, get_channel},
};

/// Outbound billing change notifications. Delivery is at-least-once at best.
#[async_trait]
pub trait BillingNotifier: Send + Sync {
    async fn publish(&self, notice: &BillingNotice) -> Result<(), LedgerpayError>;
}

pub struct RedisNotifier {
    redis: MultiplexedConnection,
}

impl RedisNotifier {
    pub async fn new(redis_client: RedisClient) -> Result<Self, LedgerpayError> {
        let redis = redis_client.get_multiplexed_async_connection().await?;
        Ok(Self { redis })
    }
}

#[async_trait]
impl BillingNotifier for RedisNotifier {
    async fn publish(&self, notice: &BillingNotice) -> Result<(), LedgerpayError> {
        let channel = get_channel(&notice.user_id);
        let message = serde_json::to_string(notice)?;

        let mut conn = self.redis.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(&channel)
            .arg(message)
            .query_async(&mut conn)
            .await?;

        info!(
            event = "billing.published",
            %channel,
            order_id = %notice.order_id,
            receivers,
        );
        Ok(())
    }
}
