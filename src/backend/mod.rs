pub mod handlers;
pub mod middleware;
pub mod router;

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    client::gateway::ChainGateway, events::listener::BlockchainListener,
    ledger::service::BillingService, orders::service::OrderService, utils::config::Network,
};

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub billing: Arc<BillingService>,
    pub gateway: Arc<dyn ChainGateway>,
    pub listener: BlockchainListener,
    pub pool: Arc<PgPool>,
    pub network: Network,
}
