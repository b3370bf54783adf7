use futures::StreamExt;
use redis::{Client as RedisClient, aio::PubSub};
use tracing::{info, warn};

use crate::{
    pubsub::types::BillingNotice,
    utils::{error::LedgerpayError, get_channel},
};

/// Follows one user's billing channel, calling `on_notice` per message until
/// the connection closes.
pub async fn watch_billing<F>(
    redis_client: &RedisClient,
    user_id: &str,
    mut on_notice: F,
) -> Result<(), LedgerpayError>
where
    F: FnMut(BillingNotice),
{
    let mut pubsub_conn: PubSub = redis_client.get_async_pubsub().await?;

    let channel = get_channel(user_id);
    pubsub_conn.subscribe(&channel).await?;

    info!(%channel, "Subscribed to billing channel");

    let mut stream = pubsub_conn.on_message();

    while let Some(msg) = stream.next().await {
        let payload = msg.get_payload::<String>()?;
        match serde_json::from_str::<BillingNotice>(&payload) {
            Ok(notice) => on_notice(notice),
            Err(e) => warn!(%channel, "Ignoring malformed billing notice: {}", e),
        }
    }

    info!(%channel, "Billing channel closed");
    Ok(())
}
