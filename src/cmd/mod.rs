pub mod billing;
pub mod order;
pub mod products;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use tracing::info;

use crate::{
    client::gateway::{ChainGateway, EvmGateway},
    cmd::{billing::BillingCommands, order::OrderCommands, products::ProductCommands},
    db::create_pool,
    utils::config::AppConfig,
};

#[derive(Parser)]
#[command(name = "ledgerpay")]
#[command(about = "Operator tooling for crypto payment reconciliation", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Overrides RPC_URL from the environment
    #[arg(long, global = true)]
    pub rpc_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read the on-chain product catalog
    #[command(subcommand)]
    Products(ProductCommands),

    /// Inspect and reconcile payment orders
    #[command(subcommand)]
    Order(OrderCommands),

    /// Inspect and adjust credit balances
    #[command(subcommand)]
    Billing(BillingCommands),

    /// Show the configured chain and contracts
    Network,
}

/// Shared handles for one CLI invocation, built from the server's config.
pub struct CliContext {
    pub config: AppConfig,
}

impl CliContext {
    pub fn new(mut config: AppConfig, rpc_url: Option<String>) -> Self {
        if rpc_url.is_some() {
            config.rpc_url = rpc_url;
        }
        Self { config }
    }

    pub fn gateway(&self) -> Result<Arc<EvmGateway>> {
        let chain = self.config.chain()?;
        info!("Connecting to {} RPC: {}", chain.network.name(), chain.rpc_url);
        let gateway = EvmGateway::new(
            chain,
            self.config.product_cache_ttl(),
            self.config.listener_settings().poll_interval,
        )?;
        Ok(Arc::new(gateway))
    }

    pub async fn pool(&self) -> Result<Arc<PgPool>> {
        let pool = create_pool(&self.config.database_url, 2).await?;
        Ok(Arc::new(pool))
    }
}

impl Commands {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        match self {
            Commands::Products(cmd) => cmd.execute(ctx).await,
            Commands::Order(cmd) => cmd.execute(ctx).await,
            Commands::Billing(cmd) => cmd.execute(ctx).await,
            Commands::Network => {
                let network = ctx.gateway()?.network_info().await?;
                println!("{}", serde_json::to_string_pretty(&network)?);
                Ok(())
            }
        }
    }
}
