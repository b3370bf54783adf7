#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use ledgerpay::{
    client::{
        gateway::ChainGateway,
        types::{NetworkInfo, PaymentInfo, Product},
    },
    db::{
        models::{NewPaymentOrder, OrderStatus, PaymentOrder, WebhookRecord},
        repository::OrderStore,
    },
    events::{handlers::PaymentHandler, types::PaymentEvent},
    fulfillment::{
        service::{Fulfiller, FulfillmentOutcome},
        sku::{Sku, apply_grant},
    },
    ledger::state::BillingState,
    pubsub::{publisher::BillingNotifier, types::BillingNotice},
    utils::{amount::order_digest, error::LedgerpayError},
};
use sqlx::PgPool;

pub fn wallet() -> Address {
    Address::repeat_byte(0x11)
}
pub const DECIMALS: u8 = 6;

pub fn order(order_id: &str, product_id: &str, amount: u64) -> PaymentOrder {
    order_created_at(order_id, product_id, amount, Utc::now())
}

pub fn order_created_at(
    order_id: &str,
    product_id: &str,
    amount: u64,
    created_at: DateTime<Utc>,
) -> PaymentOrder {
    PaymentOrder {
        order_id: order_id.to_string(),
        user_id: "user_1".to_string(),
        user_wallet: wallet().to_string(),
        product_id: product_id.to_string(),
        amount: U256::from(amount),
        order_digest: order_digest(order_id).to_string(),
        status: OrderStatus::Pending,
        tx_hash: None,
        failure_reason: None,
        created_at,
        completed_at: None,
    }
}

pub fn payment(product_id: &str, amount: u64) -> PaymentInfo {
    PaymentInfo {
        payer: wallet(),
        product_id: product_id.to_string(),
        amount: U256::from(amount),
        timestamp: 1_700_000_000,
    }
}

/// In-memory [`OrderStore`] with the same status guards as the SQL one.
#[derive(Default)]
pub struct MemoryStore {
    orders: Mutex<Vec<PaymentOrder>>,
    webhooks: Mutex<Vec<WebhookRecord>>,
    /// Expires the order just before the next claim, as the sweep would.
    pub expire_on_claim: AtomicBool,
}

impl MemoryStore {
    pub fn with_orders(orders: Vec<PaymentOrder>) -> Self {
        Self {
            orders: Mutex::new(orders),
            ..Self::default()
        }
    }

    pub fn order(&self, order_id: &str) -> PaymentOrder {
        self.orders
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.order_id == order_id)
            .cloned()
            .expect("order exists")
    }

    pub fn webhooks(&self) -> Vec<WebhookRecord> {
        self.webhooks.lock().unwrap().clone()
    }

    fn close(&self, order_id: &str, audit: WebhookRecord, f: impl FnOnce(&mut PaymentOrder)) -> bool {
        let mut orders = self.orders.lock().unwrap();
        let updated = match orders
            .iter_mut()
            .find(|o| o.order_id == order_id && !o.status.is_final())
        {
            Some(order) => {
                f(order);
                true
            }
            None => false,
        };
        self.webhooks.lock().unwrap().push(audit.closed_unless(updated));
        updated
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn find_order(&self, order_id: &str) -> Result<Option<PaymentOrder>, LedgerpayError> {
        let orders = self.orders.lock().unwrap();
        Ok(orders.iter().find(|o| o.order_id == order_id).cloned())
    }

    async fn find_order_by_digest(
        &self,
        digest: B256,
    ) -> Result<Option<PaymentOrder>, LedgerpayError> {
        let digest = digest.to_string();
        let orders = self.orders.lock().unwrap();
        Ok(orders.iter().find(|o| o.order_digest == digest).cloned())
    }

    async fn insert_order(&self, new: NewPaymentOrder) -> Result<PaymentOrder, LedgerpayError> {
        let order = PaymentOrder {
            order_id: new.order_id,
            user_id: new.user_id,
            user_wallet: new.user_wallet,
            product_id: new.product_id,
            amount: new.amount,
            order_digest: new.order_digest,
            status: OrderStatus::Pending,
            tx_hash: None,
            failure_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.orders.lock().unwrap().push(order.clone());
        Ok(order)
    }

    async fn open_orders_in_window(
        &self,
        lookback: Duration,
        grace: Duration,
        limit: i64,
    ) -> Result<Vec<PaymentOrder>, LedgerpayError> {
        let now = Utc::now();
        let oldest = now - chrono::Duration::from_std(lookback).unwrap();
        let newest = now - chrono::Duration::from_std(grace).unwrap();

        let mut open: Vec<PaymentOrder> = self
            .orders
            .lock()
            .unwrap()
            .iter()
            .filter(|o| !o.status.is_final() && o.created_at > oldest && o.created_at < newest)
            .cloned()
            .collect();
        open.sort_by_key(|o| o.created_at);
        open.truncate(limit as usize);
        Ok(open)
    }

    async fn mark_processing(&self, order_id: &str) -> Result<bool, LedgerpayError> {
        if self.expire_on_claim.swap(false, Ordering::SeqCst) {
            let mut orders = self.orders.lock().unwrap();
            if let Some(order) = orders
                .iter_mut()
                .find(|o| o.order_id == order_id && o.status == OrderStatus::Pending)
            {
                order.status = OrderStatus::Failed;
                order.failure_reason = Some("expired".to_string());
            }
        }

        let mut orders = self.orders.lock().unwrap();
        match orders
            .iter_mut()
            .find(|o| o.order_id == order_id && !o.status.is_final())
        {
            Some(order) => {
                order.status = OrderStatus::Processing;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete_order(
        &self,
        order_id: &str,
        tx_hash: Option<&str>,
        audit: WebhookRecord,
    ) -> Result<bool, LedgerpayError> {
        Ok(self.close(order_id, audit, |order| {
            order.status = OrderStatus::Completed;
            if let Some(hash) = tx_hash {
                order.tx_hash = Some(hash.to_string());
            }
            order.completed_at = Some(Utc::now());
        }))
    }

    async fn fail_order(
        &self,
        order_id: &str,
        reason: &str,
        audit: WebhookRecord,
    ) -> Result<bool, LedgerpayError> {
        Ok(self.close(order_id, audit, |order| {
            order.status = OrderStatus::Failed;
            order.failure_reason = Some(reason.to_string());
        }))
    }

    async fn record_webhook(&self, audit: WebhookRecord) -> Result<(), LedgerpayError> {
        self.webhooks.lock().unwrap().push(audit);
        Ok(())
    }

    async fn expire_stale_orders(&self, max_age: Duration) -> Result<Vec<String>, LedgerpayError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap();
        let mut expired = Vec::new();
        for order in self.orders.lock().unwrap().iter_mut() {
            if order.status == OrderStatus::Pending && order.created_at < cutoff {
                order.status = OrderStatus::Failed;
                order.failure_reason = Some("expired".to_string());
                expired.push(order.order_id.clone());
            }
        }
        Ok(expired)
    }

    async fn list_user_orders(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PaymentOrder>, LedgerpayError> {
        let mut orders: Vec<PaymentOrder> = self
            .orders
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

/// Scriptable chain view. Payments are keyed by order id.
#[derive(Default)]
pub struct FakeGateway {
    pub products: Mutex<Vec<Product>>,
    pub payments: Mutex<HashMap<String, PaymentInfo>>,
    pub balance: Mutex<U256>,
    pub allowance: Mutex<U256>,
    pub rpc_down: AtomicBool,
    pub processed_checks: AtomicUsize,
    pub faucet_cooldown: Mutex<u64>,
}

impl FakeGateway {
    pub fn pay(&self, order_id: &str, info: PaymentInfo) {
        self.payments
            .lock()
            .unwrap()
            .insert(order_id.to_string(), info);
    }

    pub fn set_rpc_down(&self, down: bool) {
        self.rpc_down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), LedgerpayError> {
        if self.rpc_down.load(Ordering::SeqCst) {
            return Err(LedgerpayError::rpc("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainGateway for FakeGateway {
    async fn get_balance(&self, _owner: Address) -> Result<U256, LedgerpayError> {
        self.check()?;
        Ok(*self.balance.lock().unwrap())
    }

    async fn get_allowance(&self, _owner: Address) -> Result<U256, LedgerpayError> {
        self.check()?;
        Ok(*self.allowance.lock().unwrap())
    }

    async fn token_decimals(&self) -> Result<u8, LedgerpayError> {
        self.check()?;
        Ok(DECIMALS)
    }

    async fn get_products(&self) -> Result<Vec<Product>, LedgerpayError> {
        self.check()?;
        Ok(self
            .products
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.active)
            .cloned()
            .collect())
    }

    async fn get_product(&self, product_id: &str) -> Result<Option<Product>, LedgerpayError> {
        self.check()?;
        Ok(self
            .products
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.product_id == product_id)
            .cloned())
    }

    async fn is_order_processed(&self, order_id: &str) -> Result<bool, LedgerpayError> {
        self.check()?;
        self.processed_checks.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(self.payments.lock().unwrap().contains_key(order_id))
    }

    async fn get_payment_info(&self, order_id: &str) -> Result<PaymentInfo, LedgerpayError> {
        self.check()?;
        tokio::task::yield_now().await;
        self.payments
            .lock()
            .unwrap()
            .get(order_id)
            .cloned()
            .ok_or_else(|| LedgerpayError::rpc("payment not found"))
    }

    async fn get_user_payments(
        &self,
        payer: Address,
        limit: u64,
    ) -> Result<Vec<String>, LedgerpayError> {
        self.check()?;
        Ok(self
            .payments
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, p)| p.payer == payer)
            .map(|(id, _)| id.clone())
            .take(limit as usize)
            .collect())
    }

    async fn network_info(&self) -> Result<NetworkInfo, LedgerpayError> {
        self.check()?;
        Ok(NetworkInfo {
            network: "sepolia".to_string(),
            chain_id: 11_155_111,
            latest_block: 1,
            token_address: Address::ZERO,
            gateway_address: Address::ZERO,
            token_decimals: DECIMALS,
        })
    }

    async fn faucet_cooldown(&self, _owner: Address) -> Result<u64, LedgerpayError> {
        self.check()?;
        Ok(*self.faucet_cooldown.lock().unwrap())
    }

    async fn subscribe_payments(&self) -> Result<BoxStream<'static, PaymentEvent>, LedgerpayError> {
        self.check()?;
        Ok(stream::pending().boxed())
    }
}

/// Applies grants to a per-user in-memory state, once per order id.
#[derive(Default)]
pub struct MemoryFulfiller {
    fulfilled: Mutex<HashSet<String>>,
    states: Mutex<HashMap<String, BillingState>>,
    pub calls: AtomicUsize,
}

impl MemoryFulfiller {
    pub fn state_of(&self, user_id: &str) -> Option<BillingState> {
        self.states.lock().unwrap().get(user_id).cloned()
    }
}

#[async_trait]
impl Fulfiller for MemoryFulfiller {
    async fn fulfill(&self, order: &PaymentOrder) -> Result<FulfillmentOutcome, LedgerpayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut fulfilled = self.fulfilled.lock().unwrap();
        if fulfilled.contains(&order.order_id) {
            return Ok(FulfillmentOutcome::already_fulfilled());
        }

        let now = Utc::now();
        let mut states = self.states.lock().unwrap();
        let current = states
            .get(&order.user_id)
            .cloned()
            .unwrap_or_else(|| BillingState::new_default(now));
        let next = apply_grant(current, &Sku::parse(&order.product_id), now)
            .ok_or_else(|| LedgerpayError::UnsupportedSku(order.product_id.clone()))?;

        states.insert(order.user_id.clone(), next.clone());
        fulfilled.insert(order.order_id.clone());
        Ok(FulfillmentOutcome::applied(next))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<BillingNotice>>,
}

#[async_trait]
impl BillingNotifier for RecordingNotifier {
    async fn publish(&self, notice: &BillingNotice) -> Result<(), LedgerpayError> {
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub fulfiller: Arc<MemoryFulfiller>,
    pub notifier: Arc<RecordingNotifier>,
    pub handler: PaymentHandler,
}

impl Harness {
    pub fn new(orders: Vec<PaymentOrder>) -> Self {
        let store = Arc::new(MemoryStore::with_orders(orders));
        let gateway = Arc::new(FakeGateway::default());
        let fulfiller = Arc::new(MemoryFulfiller::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let handler = PaymentHandler::new(
            store.clone(),
            gateway.clone(),
            fulfiller.clone(),
            Some(notifier.clone() as Arc<dyn BillingNotifier>),
        );
        Self {
            store,
            gateway,
            fulfiller,
            notifier,
            handler,
        }
    }
}

/// Connects to `TEST_DATABASE_URL` and applies migrations.
pub async fn init_test_db() -> Arc<PgPool> {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let pool = ledgerpay::db::create_pool(&url, 5)
        .await
        .expect("connect to test database");
    ledgerpay::db::run_migrations(&pool)
        .await
        .expect("apply migrations");
    Arc::new(pool)
}

/// Unique id so tests sharing one database never collide.
pub fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}
