mod support;

use std::sync::Arc;

use alloy::primitives::U256;
use ledgerpay::{
    client::types::Product,
    db::models::OrderStatus,
    events::{handlers::PaymentHandler, listener::BlockchainListener},
    orders::service::OrderService,
    pubsub::publisher::BillingNotifier,
    utils::{amount::order_digest, config::ListenerSettings, error::LedgerpayError},
};
use support::{FakeGateway, MemoryFulfiller, MemoryStore, RecordingNotifier, payment, wallet};
use tokio::sync::mpsc;

struct Fixture {
    store: Arc<MemoryStore>,
    gateway: Arc<FakeGateway>,
    listener: BlockchainListener,
    orders: OrderService,
}

fn product(id: &str, price: u64, active: bool) -> Product {
    Product {
        product_id: id.to_string(),
        price: U256::from(price),
        active,
        description: String::new(),
    }
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::default());
    let gateway = Arc::new(FakeGateway::default());
    *gateway.products.lock().unwrap() = vec![
        product("credits_50", 5_000_000, true),
        product("credits_10", 1_000_000, false),
        product("gift_card_10", 1_000_000, true),
    ];
    *gateway.balance.lock().unwrap() = U256::from(10_000_000u64);
    *gateway.allowance.lock().unwrap() = U256::from(10_000_000u64);

    let handler = Arc::new(PaymentHandler::new(
        store.clone(),
        gateway.clone(),
        Arc::new(MemoryFulfiller::default()),
        Some(Arc::new(RecordingNotifier::default()) as Arc<dyn BillingNotifier>),
    ));
    let (tx, _rx) = mpsc::channel(16);
    let listener = BlockchainListener::new(
        gateway.clone(),
        store.clone(),
        tx,
        ListenerSettings::default(),
    );
    let orders = OrderService::new(store.clone(), gateway.clone(), handler, listener.clone());

    Fixture {
        store,
        gateway,
        listener,
        orders,
    }
}

#[tokio::test]
async fn creates_pending_order_with_digest() {
    let f = fixture();
    let order = f
        .orders
        .create_order("user_1", &wallet().to_string(), "credits_50")
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.amount, U256::from(5_000_000u64));
    assert_eq!(order.order_digest, order_digest(&order.order_id).to_string());
    assert!(order.order_id.starts_with("order_"));
    assert_eq!(f.listener.status().await.last_order_seen_secs_ago, Some(0));
}

#[tokio::test]
async fn refuses_orders_that_cannot_be_paid_or_fulfilled() {
    let f = fixture();
    let w = wallet().to_string();

    let missing = f.orders.create_order("user_1", &w, "credits_999").await;
    assert!(matches!(missing, Err(LedgerpayError::ProductNotFound(_))));

    let inactive = f.orders.create_order("user_1", &w, "credits_10").await;
    assert!(matches!(inactive, Err(LedgerpayError::ProductInactive(_))));

    let unsupported = f.orders.create_order("user_1", &w, "gift_card_10").await;
    assert!(matches!(unsupported, Err(LedgerpayError::Validation(_))));

    let bad_wallet = f.orders.create_order("user_1", "0x12", "credits_50").await;
    assert!(matches!(bad_wallet, Err(LedgerpayError::Validation(_))));

    *f.gateway.allowance.lock().unwrap() = U256::from(1u64);
    let allowance = f.orders.create_order("user_1", &w, "credits_50").await;
    assert!(matches!(allowance, Err(LedgerpayError::InsufficientAllowance { .. })));

    *f.gateway.balance.lock().unwrap() = U256::ZERO;
    let balance = f.orders.create_order("user_1", &w, "credits_50").await;
    assert!(matches!(balance, Err(LedgerpayError::InsufficientBalance { .. })));

    assert!(f.orders.list_orders("user_1", 20, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn get_order_reconciles_paid_orders_on_demand() {
    let f = fixture();
    let order = f
        .orders
        .create_order("user_1", &wallet().to_string(), "credits_50")
        .await
        .unwrap();

    let unpaid = f.orders.get_order("user_1", &order.order_id).await.unwrap();
    assert_eq!(unpaid.status, OrderStatus::Pending);

    f.gateway.pay(&order.order_id, payment("credits_50", 5_000_000));
    let paid = f.orders.get_order("user_1", &order.order_id).await.unwrap();
    assert_eq!(paid.status, OrderStatus::Completed);
    assert_eq!(f.store.webhooks()[0].source, "on_demand");
}

#[tokio::test]
async fn get_order_falls_back_to_stored_row_when_rpc_is_down() {
    let f = fixture();
    let order = f
        .orders
        .create_order("user_1", &wallet().to_string(), "credits_50")
        .await
        .unwrap();

    f.gateway.set_rpc_down(true);
    let stored = f.orders.get_order("user_1", &order.order_id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Pending);
}

#[tokio::test]
async fn orders_are_scoped_to_their_owner() {
    let f = fixture();
    let order = f
        .orders
        .create_order("user_1", &wallet().to_string(), "credits_50")
        .await
        .unwrap();

    let other = f.orders.get_order("user_2", &order.order_id).await;
    assert!(matches!(other, Err(LedgerpayError::OrderNotFound(_))));
    assert!(f.orders.list_orders("user_2", 20, 0).await.unwrap().is_empty());
    assert_eq!(f.orders.list_orders("user_1", 500, -3).await.unwrap().len(), 1);
}
