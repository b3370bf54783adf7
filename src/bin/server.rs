use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use ledgerpay::{
    backend::{AppState, router::build_router},
    client::gateway::EvmGateway,
    db::{create_pool, repository::Repository, run_migrations},
    events::{handlers::PaymentHandler, listener::BlockchainListener, worker::EventWorker},
    fulfillment::service::FulfillmentService,
    ledger::service::BillingService,
    orders::service::OrderService,
    pubsub::publisher::{BillingNotifier, RedisNotifier},
    utils::{config::AppConfig, constants::EVENT_CHANNEL_CAPACITY},
};
use tokio::{signal, sync::mpsc};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,ledgerpay=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let stdout = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true)
            .boxed()
    };

    let (file, guard) = match std::env::var("LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "ledgerpay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AppConfig::load()?;
    let _log_guard = init_tracing();

    info!(network = cfg.network.name(), "Starting ledgerpay server");

    let api_key = cfg
        .api_key
        .clone()
        .context("API_KEY must be set for the HTTP surface")?;
    let chain = cfg.chain()?;

    let pool = Arc::new(create_pool(&cfg.database_url, cfg.db_max_connections).await?);
    run_migrations(&pool).await?;

    let settings = cfg.listener_settings();
    let gateway = Arc::new(EvmGateway::new(
        chain,
        cfg.product_cache_ttl(),
        settings.poll_interval,
    )?);
    let repo = Arc::new(Repository::new(pool.clone()));
    let fulfiller = Arc::new(FulfillmentService::new(pool.clone()));

    let notifier: Option<Arc<dyn BillingNotifier>> = match &cfg.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            Some(Arc::new(RedisNotifier::new(client).await?))
        }
        None => {
            warn!("REDIS_URL not set, billing notifications disabled");
            None
        }
    };

    let handler = Arc::new(PaymentHandler::new(
        repo.clone(),
        gateway.clone(),
        fulfiller,
        notifier,
    ));

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let listener = BlockchainListener::new(gateway.clone(), repo.clone(), tx, settings);
    listener.start().await;

    let worker = EventWorker::new(handler.clone(), rx);
    let worker_handle = tokio::spawn(worker.run());

    let orders = Arc::new(OrderService::new(
        repo,
        gateway.clone(),
        handler,
        listener.clone(),
    ));
    let state = AppState {
        orders,
        billing: Arc::new(BillingService::new(pool.clone())),
        gateway,
        listener: listener.clone(),
        pool,
        network: cfg.network,
    };
    let app = build_router(
        state,
        &api_key,
        Duration::from_millis(cfg.request_timeout_ms),
    );

    let addr = format!("0.0.0.0:{}", cfg.port);
    info!("HTTP server listening on {}", addr);
    let tcp = tokio::net::TcpListener::bind(&addr).await?;
    let server_handle = tokio::spawn(async move { axum::serve(tcp, app).await });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("HTTP server stopped"),
                Ok(Err(e)) => tracing::error!("HTTP server failed: {}", e),
                Err(e) => tracing::error!("HTTP server task panicked: {}", e),
            }
        }
        result = worker_handle => {
            match result {
                Ok(_) => info!("Worker task completed"),
                Err(e) => tracing::error!("Worker task panicked: {}", e),
            }
        }
    }

    info!("Shutting down gracefully...");
    listener.stop().await;

    Ok(())
}
