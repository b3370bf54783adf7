use std::sync::Arc;

use alloy::primitives::Address;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::{
    client::{gateway::ChainGateway, types::PaymentInfo},
    db::{
        models::{OrderStatus, PaymentOrder, WebhookRecord},
        repository::OrderStore,
    },
    events::types::{OrderKey, PaymentEvent},
    fulfillment::service::{Fulfiller, SkipReason},
    pubsub::{publisher::BillingNotifier, types::BillingNotice},
    utils::{
        amount::amount_matches, constants::PAYMENT_EVENT_NAME, error::LedgerpayError,
        logs_fmt::abbrev, metrics::METRICS,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandleOutcome {
    UnknownOrder,
    AlreadyCompleted,
    AlreadyFailed,
    /// The gateway has no record of the payment yet.
    NotProcessed,
    Rejected { reason: String },
    /// `fulfilled` is false when an earlier delivery already granted the value.
    Completed { fulfilled: bool },
}

/// The single consumer of payment events, shared by every producer.
///
/// Never trusts the event payload: the gateway's own record is re-read before
/// anything is granted. Safe to run concurrently for the same order; the
/// fulfillment guard absorbs the second delivery.
pub struct PaymentHandler {
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn ChainGateway>,
    fulfiller: Arc<dyn Fulfiller>,
    notifier: Option<Arc<dyn BillingNotifier>>,
}

impl PaymentHandler {
    pub fn new(
        store: Arc<dyn OrderStore>,
        gateway: Arc<dyn ChainGateway>,
        fulfiller: Arc<dyn Fulfiller>,
        notifier: Option<Arc<dyn BillingNotifier>>,
    ) -> Self {
        Self {
            store,
            gateway,
            fulfiller,
            notifier,
        }
    }

    pub async fn handle(&self, event: &PaymentEvent) -> Result<HandleOutcome, LedgerpayError> {
        METRICS
            .events_received
            .with_label_values(&[event.source.as_str()])
            .inc();

        let order = match &event.order {
            OrderKey::Id(id) => self.store.find_order(id).await?,
            OrderKey::Digest(digest) => self.store.find_order_by_digest(*digest).await?,
        };

        let Some(order) = order else {
            warn!(order = %event.order, source = event.source.as_str(), "Payment event for unknown order");
            self.store
                .record_webhook(audit(event, None, false, Some("unknown_order"), None))
                .await?;
            return Ok(HandleOutcome::UnknownOrder);
        };

        match order.status {
            OrderStatus::Completed => return self.handle_completed_order(event, &order).await,
            OrderStatus::Failed => return self.handle_failed_order(event, &order).await,
            OrderStatus::Pending | OrderStatus::Processing => {}
        }

        if !self.chain(self.gateway.is_order_processed(&order.order_id)).await? {
            debug!(order_id = %order.order_id, "Order not processed on chain yet");
            return Ok(HandleOutcome::NotProcessed);
        }

        let payment = self.chain(self.gateway.get_payment_info(&order.order_id)).await?;
        let decimals = self.chain(self.gateway.token_decimals()).await?;

        if let Some(reason) = mismatch(&order, &payment, decimals) {
            return self.reject(event, &order, &payment, reason).await;
        }

        if let Ok(wallet) = order.user_wallet.parse::<Address>() {
            if wallet != payment.payer {
                warn!(
                    order_id = %order.order_id,
                    expected = %abbrev(&wallet.to_string()),
                    payer = %abbrev(&payment.payer.to_string()),
                    "Order paid from a different wallet"
                );
            }
        }

        if !self.store.mark_processing(&order.order_id).await? {
            return self.closed_meanwhile(event, &order.order_id).await;
        }

        let outcome = match self.fulfiller.fulfill(&order).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(order_id = %order.order_id, "Fulfillment failed, order left processing: {}", e);
                let record = audit(event, Some(&order.order_id), false, Some(&e.to_string()), None);
                if let Err(audit_err) = self.store.record_webhook(record).await {
                    warn!(order_id = %order.order_id, "Failed to write audit row: {}", audit_err);
                }
                return Err(e);
            }
        };

        if outcome.reason == Some(SkipReason::OrderClosed) {
            return self.closed_meanwhile(event, &order.order_id).await;
        }

        let tx_hash = event.tx_hash.map(|h| h.to_string());
        let record = audit(event, Some(&order.order_id), true, None, None);
        if !self
            .store
            .complete_order(&order.order_id, tx_hash.as_deref(), record)
            .await?
        {
            debug!(order_id = %order.order_id, "Order was closed by another delivery");
        }

        info!(
            order_id = %order.order_id,
            source = event.source.as_str(),
            tx_hash = %tx_hash.as_deref().map(abbrev).unwrap_or_else(|| "-".to_string()),
            fulfilled = outcome.fulfilled,
            "Order completed"
        );

        if let (Some(notifier), Some(billing)) = (&self.notifier, &outcome.billing) {
            let notice = BillingNotice::new(&order.user_id, &order.order_id, &order.product_id, billing);
            if let Err(e) = notifier.publish(&notice).await {
                warn!(order_id = %order.order_id, "Billing notification not delivered: {}", e);
            }
        }

        Ok(HandleOutcome::Completed {
            fulfilled: outcome.fulfilled,
        })
    }

    /// Chain reads count toward the RPC error metric and surface as transient.
    async fn chain<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, LedgerpayError>>,
    ) -> Result<T, LedgerpayError> {
        call.await.inspect_err(|e| {
            METRICS.rpc_errors.inc();
            warn!("Chain read failed, will retry: {}", e);
        })
    }

    async fn handle_completed_order(
        &self,
        event: &PaymentEvent,
        order: &PaymentOrder,
    ) -> Result<HandleOutcome, LedgerpayError> {
        debug!(order_id = %order.order_id, "Order already completed");
        self.store
            .record_webhook(audit(
                event,
                Some(&order.order_id),
                false,
                Some("order_already_completed"),
                None,
            ))
            .await?;

        Ok(HandleOutcome::AlreadyCompleted)
    }

    /// Another writer closed the order after it was first read.
    async fn closed_meanwhile(
        &self,
        event: &PaymentEvent,
        order_id: &str,
    ) -> Result<HandleOutcome, LedgerpayError> {
        match self.store.find_order(order_id).await? {
            Some(order) if order.status == OrderStatus::Failed => {
                warn!(
                    order_id,
                    reason = order.failure_reason.as_deref().unwrap_or("-"),
                    "Order failed while its payment was being verified"
                );
                self.handle_failed_order(event, &order).await
            }
            Some(order) => self.handle_completed_order(event, &order).await,
            None => Ok(HandleOutcome::UnknownOrder),
        }
    }

    async fn handle_failed_order(
        &self,
        event: &PaymentEvent,
        order: &PaymentOrder,
    ) -> Result<HandleOutcome, LedgerpayError> {
        let paid = self.chain(self.gateway.is_order_processed(&order.order_id)).await?;
        if paid {
            error!(
                order_id = %order.order_id,
                user_id = %order.user_id,
                reason = order.failure_reason.as_deref().unwrap_or("-"),
                "Payment confirmed on chain for a failed order; manual review required"
            );
        }

        self.store
            .record_webhook(audit(
                event,
                Some(&order.order_id),
                false,
                Some("order_already_failed"),
                Some(json!({ "paid_on_chain": paid })),
            ))
            .await?;

        Ok(HandleOutcome::AlreadyFailed)
    }

    async fn reject(
        &self,
        event: &PaymentEvent,
        order: &PaymentOrder,
        payment: &PaymentInfo,
        reason: &str,
    ) -> Result<HandleOutcome, LedgerpayError> {
        METRICS.fraud_rejections.inc();
        error!(
            order_id = %order.order_id,
            reason,
            expected_product = %order.product_id,
            observed_product = %payment.product_id,
            expected_amount = %order.amount,
            observed_amount = %payment.amount,
            "Payment does not match order, failing it"
        );

        let details = json!({
            "expected": {
                "product_id": order.product_id,
                "amount": order.amount.to_string(),
            },
            "observed": {
                "product_id": payment.product_id,
                "amount": payment.amount.to_string(),
                "payer": payment.payer.to_string(),
            },
        });
        let record = audit(event, Some(&order.order_id), false, Some(reason), Some(details));
        self.store.fail_order(&order.order_id, reason, record).await?;

        Ok(HandleOutcome::Rejected {
            reason: reason.to_string(),
        })
    }
}

/// Product must match exactly; amount may be stored in minor units or whole tokens.
fn mismatch(order: &PaymentOrder, payment: &PaymentInfo, decimals: u8) -> Option<&'static str> {
    if payment.product_id != order.product_id {
        return Some("product_mismatch");
    }
    if !amount_matches(payment.amount, order.amount, decimals) {
        return Some("amount_mismatch");
    }
    None
}

fn audit(
    event: &PaymentEvent,
    order_id: Option<&str>,
    processed: bool,
    error: Option<&str>,
    details: Option<serde_json::Value>,
) -> WebhookRecord {
    let mut payload = event.audit_payload();
    if let Some(details) = details {
        payload["details"] = details;
    }

    WebhookRecord {
        order_id: order_id.map(str::to_string),
        event_type: PAYMENT_EVENT_NAME.to_string(),
        source: event.source.as_str().to_string(),
        tx_hash: event.tx_hash.map(|h| h.to_string()),
        block_number: event
            .block_number
            .and_then(|n| i64::try_from(n).ok()),
        payload,
        processed,
        error: error.map(str::to_string),
    }
}
