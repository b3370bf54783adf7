//! Runs against a real Postgres:
//! `TEST_DATABASE_URL=postgres://... cargo test -- --ignored`

mod support;

use std::sync::Arc;

use alloy::primitives::U256;
use chrono::{Duration, Utc};
use ledgerpay::{
    db::{
        billing::read_state,
        models::{NewPaymentOrder, OrderStatus, PaymentOrder, WebhookRecord},
        repository::{OrderStore, Repository},
    },
    fulfillment::service::{Fulfiller, FulfillmentService, SkipReason},
    ledger::{
        service::BillingService,
        state::{CreditBucket, Tier},
    },
    utils::{amount::order_digest, error::LedgerpayError},
};
use sqlx::PgPool;
use support::{init_test_db, unique};

async fn insert_order(pool: &Arc<PgPool>, user_id: &str, product_id: &str) -> PaymentOrder {
    let order_id = unique("order");
    Repository::new(pool.clone())
        .insert_order(NewPaymentOrder {
            order_digest: order_digest(&order_id).to_string(),
            order_id,
            user_id: user_id.to_string(),
            user_wallet: "0x1111111111111111111111111111111111111111".to_string(),
            product_id: product_id.to_string(),
            amount: U256::from(5_000_000u64),
        })
        .await
        .expect("insert order")
}

fn audit(order_id: &str, processed: bool) -> WebhookRecord {
    WebhookRecord {
        order_id: Some(order_id.to_string()),
        event_type: "PaymentProcessed".to_string(),
        source: "poll".to_string(),
        tx_hash: None,
        block_number: None,
        payload: serde_json::json!({ "order": order_id }),
        processed,
        error: None,
    }
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn credit_pack_grants_purchased_credits_once() {
    let pool = init_test_db().await;
    let user = unique("user");
    let order = insert_order(&pool, &user, "credits_50").await;
    let fulfiller = FulfillmentService::new(pool.clone());

    let first = fulfiller.fulfill(&order).await.unwrap();
    assert!(first.fulfilled);
    let billing = first.billing.unwrap();
    assert_eq!(billing.purchased_credits, 50);
    assert_eq!(billing.total_credits(), 60);

    let replay = fulfiller.fulfill(&order).await.unwrap();
    assert!(!replay.fulfilled);
    assert!(replay.billing.is_none());

    let stored = read_state(&pool, &user, Utc::now()).await.unwrap().unwrap();
    assert_eq!(stored.purchased_credits, 50);

    let guard = Repository::new(pool.clone())
        .find_fulfillment(&order.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(guard.product_id, "credits_50");
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn concurrent_deliveries_grant_exactly_once() {
    let pool = init_test_db().await;
    let user = unique("user");
    let order = insert_order(&pool, &user, "credits_50").await;

    let a = FulfillmentService::new(pool.clone());
    let b = FulfillmentService::new(pool.clone());
    let (ra, rb) = tokio::join!(a.fulfill(&order), b.fulfill(&order));

    let fulfilled = [ra.unwrap(), rb.unwrap()]
        .iter()
        .filter(|o| o.fulfilled)
        .count();
    assert_eq!(fulfilled, 1);

    let stored = read_state(&pool, &user, Utc::now()).await.unwrap().unwrap();
    assert_eq!(stored.purchased_credits, 50);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn plan_purchase_sets_tier_and_cycle() {
    let pool = init_test_db().await;
    let user = unique("user");
    let order = insert_order(&pool, &user, "plan_pro_monthly").await;

    let before = Utc::now();
    let outcome = FulfillmentService::new(pool.clone())
        .fulfill(&order)
        .await
        .unwrap();
    let billing = outcome.billing.unwrap();

    assert_eq!(billing.tier, Tier::Pro);
    assert_eq!(billing.plan_credits, 100);
    assert_eq!(billing.limits, Tier::Pro.limits());
    assert!(billing.billing_cycle.next_reset >= before + Duration::days(30));
    assert!(billing.billing_cycle.next_reset <= Utc::now() + Duration::days(30));
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn unsupported_sku_rolls_back() {
    let pool = init_test_db().await;
    let user = unique("user");
    let order = insert_order(&pool, &user, "gift_card_10").await;

    let err = FulfillmentService::new(pool.clone())
        .fulfill(&order)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerpayError::UnsupportedSku(_)));

    let repo = Repository::new(pool.clone());
    assert!(repo.find_fulfillment(&order.order_id).await.unwrap().is_none());
    assert!(read_state(&pool, &user, Utc::now()).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn insufficient_credits_leave_balance_untouched() {
    let pool = init_test_db().await;
    let user = unique("user");
    let billing = BillingService::new(pool.clone());

    let err = billing.consume(&user, 11).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerpayError::InsufficientCredits {
            requested: 11,
            available: 10
        }
    ));

    let state = billing.consume(&user, 4).await.unwrap();
    assert_eq!(state.plan_credits, 6);
    assert_eq!(billing.load(&user).await.unwrap().total_credits(), 6);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn bonus_and_priority_round_through_storage() {
    let pool = init_test_db().await;
    let user = unique("user");
    let billing = BillingService::new(pool.clone());

    billing
        .grant_bonus(&user, 5, Utc::now() + Duration::days(7), Some("welcome".into()))
        .await
        .unwrap();
    billing
        .set_priority(
            &user,
            &[CreditBucket::Plan, CreditBucket::Bonus, CreditBucket::Purchased],
        )
        .await
        .unwrap();

    let state = billing.consume(&user, 12).await.unwrap();
    assert_eq!(state.plan_credits, 0);
    assert_eq!(state.bonus_total(), 3);

    let err = billing
        .set_priority(&user, &[CreditBucket::Plan, CreditBucket::Plan])
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerpayError::Validation(_)));
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn closed_orders_are_never_reopened() {
    let pool = init_test_db().await;
    let user = unique("user");
    let order = insert_order(&pool, &user, "credits_50").await;
    let repo = Repository::new(pool.clone());

    assert!(repo.mark_processing(&order.order_id).await.unwrap());
    assert!(
        repo.complete_order(&order.order_id, Some("0xabc"), audit(&order.order_id, true))
            .await
            .unwrap()
    );
    assert!(
        !repo
            .fail_order(&order.order_id, "amount_mismatch", audit(&order.order_id, false))
            .await
            .unwrap()
    );

    let stored = repo.find_order(&order.order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Completed);
    assert_eq!(stored.tx_hash.as_deref(), Some("0xabc"));
    assert_eq!(stored.amount, U256::from(5_000_000u64));

    let by_digest = repo
        .find_order_by_digest(order_digest(&order.order_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_digest.order_id, order.order_id);

    assert!(!repo.mark_processing(&order.order_id).await.unwrap());

    let webhooks = repo.webhooks_for_order(&order.order_id).await.unwrap();
    assert_eq!(webhooks.len(), 2);
    assert!(webhooks[0].processed);
    assert!(!webhooks[1].processed);
    assert_eq!(webhooks[1].error.as_deref(), Some("order_already_closed"));
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn failed_order_is_never_fulfilled() {
    let pool = init_test_db().await;
    let user = unique("user");
    let order = insert_order(&pool, &user, "credits_50").await;
    let repo = Repository::new(pool.clone());

    assert!(repo.mark_processing(&order.order_id).await.unwrap());
    assert!(
        repo.fail_order(&order.order_id, "expired", audit(&order.order_id, false))
            .await
            .unwrap()
    );

    let outcome = FulfillmentService::new(pool.clone())
        .fulfill(&order)
        .await
        .unwrap();
    assert!(!outcome.fulfilled);
    assert_eq!(outcome.reason, Some(SkipReason::OrderClosed));

    assert!(read_state(&pool, &user, Utc::now()).await.unwrap().is_none());
    assert!(repo.find_fulfillment(&order.order_id).await.unwrap().is_none());
}
