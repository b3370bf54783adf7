use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    middleware::{self},
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::{
    backend::{
        AppState,
        handlers::{
            allowance_handler, balance_handler, billing_handler, consume_handler,
            create_order_handler, faucet_cooldown_handler, get_order_handler, get_product_handler,
            health_handler, list_orders_handler, list_products_handler, listener_status_handler,
            network_handler, priority_handler,
        },
        middleware::api_key_auth,
    },
    utils::metrics::metrics_handler,
};

pub fn build_router(state: AppState, api_key: &str, request_timeout: Duration) -> Router {
    let api_key: Arc<str> = Arc::from(api_key);

    let api = Router::new()
        .route("/orders", post(create_order_handler).get(list_orders_handler))
        .route("/orders/:id", get(get_order_handler))
        .route("/products", get(list_products_handler))
        .route("/products/:id", get(get_product_handler))
        .route("/balance/:address", get(balance_handler))
        .route("/allowance/:address", get(allowance_handler))
        .route("/network", get(network_handler))
        .route("/faucet/cooldown/:address", get(faucet_cooldown_handler))
        .route("/listener/status", get(listener_status_handler))
        .route("/billing", get(billing_handler))
        .route("/billing/consume", post(consume_handler))
        .route("/billing/priority", put(priority_handler))
        .route_layer(middleware::from_fn_with_state(api_key, api_key_auth));

    Router::new()
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
