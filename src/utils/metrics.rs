use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub struct ReconcileMetrics {
    pub events_received: IntCounterVec,
    pub orders_fulfilled: IntCounter,
    pub duplicate_deliveries: IntCounter,
    pub fraud_rejections: IntCounter,
    pub rpc_errors: IntCounter,
    pub probe_ticks: IntCounter,
    registry: Registry,
}

impl ReconcileMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let events_received = IntCounterVec::new(
            Opts::new(
                "ledgerpay_payment_events_total",
                "Payment events received, by producer",
            ),
            &["source"],
        )
        .expect("valid metric");
        let orders_fulfilled = IntCounter::new(
            "ledgerpay_orders_fulfilled_total",
            "Orders whose value was granted to a user",
        )
        .expect("valid metric");
        let duplicate_deliveries = IntCounter::new(
            "ledgerpay_duplicate_deliveries_total",
            "Fulfillment attempts absorbed by the idempotency guard",
        )
        .expect("valid metric");
        let fraud_rejections = IntCounter::new(
            "ledgerpay_fraud_rejections_total",
            "Orders failed because on-chain product or amount did not match",
        )
        .expect("valid metric");
        let rpc_errors = IntCounter::new(
            "ledgerpay_rpc_errors_total",
            "Chain reads that failed and were left for retry",
        )
        .expect("valid metric");
        let probe_ticks = IntCounter::new(
            "ledgerpay_probe_ticks_total",
            "Polling probe iterations",
        )
        .expect("valid metric");

        registry
            .register(Box::new(events_received.clone()))
            .expect("unique metric");
        registry
            .register(Box::new(orders_fulfilled.clone()))
            .expect("unique metric");
        registry
            .register(Box::new(duplicate_deliveries.clone()))
            .expect("unique metric");
        registry
            .register(Box::new(fraud_rejections.clone()))
            .expect("unique metric");
        registry
            .register(Box::new(rpc_errors.clone()))
            .expect("unique metric");
        registry
            .register(Box::new(probe_ticks.clone()))
            .expect("unique metric");

        Self {
            events_received,
            orders_fulfilled,
            duplicate_deliveries,
            fraud_rejections,
            rpc_errors,
            probe_ticks,
            registry,
        }
    }

    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder.encode_to_string(&families).unwrap_or_default()
    }
}

pub static METRICS: Lazy<ReconcileMetrics> = Lazy::new(ReconcileMetrics::new);

pub async fn metrics_handler() -> String {
    METRICS.encode()
}
