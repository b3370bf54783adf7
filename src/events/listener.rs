use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use serde::Serialize;
use tokio::{
    sync::{Mutex, RwLock, mpsc, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval},
};
use tracing::{debug, error, info, warn};

use crate::{
    client::gateway::ChainGateway,
    db::repository::OrderStore,
    events::{
        metrics::ListenerMetrics,
        types::{EventSource, PaymentEvent},
    },
    utils::{
        config::ListenerSettings,
        constants::{HEALTH_INTERVAL_SECS, SUBSCRIPTION_ALERT_SECS},
        metrics::METRICS,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    Idle,
    Listening,
    ListeningAndPolling,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListenerStatus {
    pub state: ListenerState,
    pub listening: bool,
    pub polling: bool,
    pub subscription_connected: bool,
    pub last_order_seen_secs_ago: Option<u64>,
    pub polling_time_remaining_secs: u64,
    pub total_events: u64,
    pub total_probes: u64,
}

#[derive(Default)]
struct Supervisor {
    listening: bool,
    polling: bool,
    last_order_seen: Option<Instant>,
    /// Bumped for every probe loop so a stale loop cannot switch off a newer one.
    probe_epoch: u64,
    probe_stop: Option<watch::Sender<bool>>,
    subscription: Option<JoinHandle<()>>,
    health: Option<JoinHandle<()>>,
}

impl Supervisor {
    fn state(&self) -> ListenerState {
        match (self.listening, self.polling) {
            (false, _) => ListenerState::Idle,
            (true, false) => ListenerState::Listening,
            (true, true) => ListenerState::ListeningAndPolling,
        }
    }
}

struct Inner {
    gateway: Arc<dyn ChainGateway>,
    store: Arc<dyn OrderStore>,
    events: mpsc::Sender<PaymentEvent>,
    settings: ListenerSettings,
    supervisor: Mutex<Supervisor>,
    metrics: Arc<RwLock<ListenerMetrics>>,
}

/// Supervises the two payment producers: a process-lifetime event
/// subscription and a probe loop that only runs while orders are being
/// created. Both send into the same channel.
///
/// Cheap to clone; every clone drives the same supervisor.
#[derive(Clone)]
pub struct BlockchainListener {
    inner: Arc<Inner>,
}

impl BlockchainListener {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        store: Arc<dyn OrderStore>,
        events: mpsc::Sender<PaymentEvent>,
        settings: ListenerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                gateway,
                store,
                events,
                settings,
                supervisor: Mutex::new(Supervisor::default()),
                metrics: Arc::new(RwLock::new(ListenerMetrics::default())),
            }),
        }
    }

    /// Idle -> Listening. Calling it again is a no-op.
    pub async fn start(&self) {
        let mut sup = self.inner.supervisor.lock().await;
        if sup.listening {
            return;
        }

        info!("Starting blockchain listener");
        sup.subscription = Some(tokio::spawn(run_subscription(self.inner.clone())));
        sup.health = Some(tokio::spawn(health_monitor(self.inner.metrics.clone())));
        sup.listening = true;
    }

    /// Records order activity and makes sure the probe loop is running.
    ///
    /// While polling, this only extends the quiet window. An idle listener
    /// only records the timestamp.
    pub async fn activate_polling(&self) {
        let mut sup = self.inner.supervisor.lock().await;
        sup.last_order_seen = Some(Instant::now());

        if !sup.listening {
            debug!("Listener not started, order activity recorded only");
            return;
        }
        if sup.polling {
            debug!("Polling window extended");
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        sup.probe_epoch += 1;
        sup.probe_stop = Some(stop_tx);
        sup.polling = true;

        info!(
            interval_secs = self.inner.settings.poll_interval.as_secs(),
            quiet_window_secs = self.inner.settings.quiet_window.as_secs(),
            "Temporary polling activated"
        );
        tokio::spawn(probe_loop(self.inner.clone(), stop_rx, sup.probe_epoch));
    }

    /// Any state -> Idle. An in-flight probe finishes before its loop exits.
    pub async fn stop(&self) {
        let mut sup = self.inner.supervisor.lock().await;

        if let Some(stop) = sup.probe_stop.take() {
            let _ = stop.send(true);
        }
        if let Some(handle) = sup.subscription.take() {
            handle.abort();
        }
        if let Some(handle) = sup.health.take() {
            handle.abort();
        }
        sup.polling = false;
        sup.listening = false;

        self.inner.metrics.write().await.mark_disconnected();
        info!("Blockchain listener stopped");
    }

    pub async fn state(&self) -> ListenerState {
        self.inner.supervisor.lock().await.state()
    }

    pub async fn status(&self) -> ListenerStatus {
        let (state, listening, polling, last_order_seen) = {
            let sup = self.inner.supervisor.lock().await;
            (sup.state(), sup.listening, sup.polling, sup.last_order_seen)
        };
        let metrics = self.inner.metrics.read().await;

        let since_order = last_order_seen.map(|t| t.elapsed());
        let remaining = match (polling, since_order) {
            (true, Some(elapsed)) => self.inner.settings.quiet_window.saturating_sub(elapsed),
            _ => Duration::ZERO,
        };

        ListenerStatus {
            state,
            listening,
            polling,
            subscription_connected: metrics.connected,
            last_order_seen_secs_ago: since_order.map(|d| d.as_secs()),
            polling_time_remaining_secs: remaining.as_secs(),
            total_events: metrics.total_events,
            total_probes: metrics.total_probes,
        }
    }
}

impl Inner {
    /// Switches polling off if the quiet window has passed. Returns true when
    /// the calling loop must exit.
    async fn polling_expired(&self, epoch: u64) -> bool {
        let mut sup = self.supervisor.lock().await;
        if sup.probe_epoch != epoch || !sup.polling {
            return true;
        }

        let quiet = sup
            .last_order_seen
            .is_none_or(|t| t.elapsed() >= self.settings.quiet_window);
        if quiet {
            sup.polling = false;
            sup.probe_stop = None;
            info!("No new orders in the quiet window, polling deactivated");
        }
        quiet
    }

    async fn probe_once(&self) {
        METRICS.probe_ticks.inc();
        {
            let mut metrics = self.metrics.write().await;
            metrics.total_probes += 1;
            metrics.last_probe_at = Some(Instant::now());
        }

        let settings = &self.settings;
        match self
            .store
            .open_orders_in_window(
                settings.probe_lookback,
                settings.probe_grace,
                settings.probe_batch_size,
            )
            .await
        {
            Ok(orders) if orders.is_empty() => debug!("No open orders to probe"),
            Ok(orders) => {
                debug!(count = orders.len(), "Probing open orders");
                for order in orders {
                    match self.gateway.is_order_processed(&order.order_id).await {
                        Ok(true) => {
                            let event = PaymentEvent::probe(&order.order_id, EventSource::Poll);
                            if self.events.send(event).await.is_err() {
                                warn!("Event receiver dropped, skipping probe results");
                                return;
                            }
                        }
                        Ok(false) => {}
                        Err(e) => {
                            METRICS.rpc_errors.inc();
                            warn!(order_id = %order.order_id, "Probe check failed, retrying next tick: {}", e);
                        }
                    }
                }
            }
            Err(e) => warn!("Failed to load open orders: {}", e),
        }

        match self.store.expire_stale_orders(settings.order_expiry).await {
            Ok(expired) if !expired.is_empty() => {
                info!(count = expired.len(), orders = ?expired, "Expired stale pending orders");
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to expire stale orders: {}", e),
        }
    }
}

async fn probe_loop(inner: Arc<Inner>, mut stop: watch::Receiver<bool>, epoch: u64) {
    // First tick completes immediately so activation sweeps at once.
    let mut ticker = interval(inner.settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }
        if *stop.borrow() || inner.polling_expired(epoch).await {
            break;
        }
        inner.probe_once().await;
    }

    debug!(epoch, "Probe loop exited");
}

async fn run_subscription(inner: Arc<Inner>) {
    loop {
        match inner.gateway.subscribe_payments().await {
            Ok(mut stream) => {
                inner.metrics.write().await.mark_connected();

                while let Some(event) = stream.next().await {
                    {
                        let mut metrics = inner.metrics.write().await;
                        metrics.last_event_at = Some(Instant::now());
                        metrics.total_events += 1;
                    }
                    debug!(order = %event.order, "Payment event received");

                    if inner.events.send(event).await.is_err() {
                        warn!("Event receiver dropped, shutting down subscription");
                        return;
                    }
                }
                warn!("Payment event stream ended");
            }
            Err(e) => error!("Payment subscription failed: {}", e),
        }

        inner.metrics.write().await.mark_disconnected();
        warn!(
            "Re-subscribing in {}s...",
            inner.settings.reconnect_delay.as_secs()
        );
        tokio::time::sleep(inner.settings.reconnect_delay).await;
    }
}

async fn health_monitor(metrics: Arc<RwLock<ListenerMetrics>>) {
    let mut ticker = interval(Duration::from_secs(HEALTH_INTERVAL_SECS));

    loop {
        ticker.tick().await;

        let metrics = metrics.read().await;
        let now = Instant::now();

        let connection = if metrics.connected {
            "connected".to_string()
        } else {
            match metrics.disconnected_since {
                Some(t) => format!("disconnected ({}s)", now.duration_since(t).as_secs()),
                None => "connecting".to_string(),
            }
        };
        let last_event = metrics
            .last_event_at
            .map(|t| format!("{}s ago", now.duration_since(t).as_secs()))
            .unwrap_or_else(|| "never".to_string());
        let last_probe = metrics
            .last_probe_at
            .map(|t| format!("{}s ago", now.duration_since(t).as_secs()))
            .unwrap_or_else(|| "never".to_string());

        info!(
            target: "health",
            "Health | Subscription: {} | Last event: {} | Last probe: {} | Totals: {} events, {} probes, {} reconnects",
            connection,
            last_event,
            last_probe,
            metrics.total_events,
            metrics.total_probes,
            metrics.reconnects
        );

        if let Some(since) = metrics.disconnected_since {
            let elapsed = now.duration_since(since).as_secs();
            if !metrics.connected && elapsed > SUBSCRIPTION_ALERT_SECS {
                error!("ALERT: payment subscription disconnected for {}s", elapsed);
            }
        }
    }
}
