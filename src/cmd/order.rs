use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::Subcommand;
use tracing::{info, warn};

use crate::{
    client::gateway::ChainGateway,
    cmd::CliContext,
    db::repository::{OrderStore, Repository},
    events::{
        handlers::PaymentHandler,
        types::{EventSource, PaymentEvent},
    },
    fulfillment::service::FulfillmentService,
    orders::service::parse_wallet,
    pubsub::publisher::{BillingNotifier, RedisNotifier},
};

#[derive(Subcommand)]
pub enum OrderCommands {
    /// Show an order with its fulfillment and audit trail
    Show {
        order_id: String,
    },

    /// Run one order through the reconciliation path again
    Reconcile {
        order_id: String,
    },

    /// List order ids the gateway has recorded for a payer wallet
    Payments {
        wallet: String,

        #[arg(short, long, default_value_t = 20)]
        limit: u64,
    },
}

impl OrderCommands {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        if let OrderCommands::Payments { wallet, limit } = self {
            let payer = parse_wallet(wallet)?;
            let ids = ctx.gateway()?.get_user_payments(payer, *limit).await?;
            if ids.is_empty() {
                println!("No payments recorded for {}", payer);
            }
            for id in ids {
                println!("{}", id);
            }
            return Ok(());
        }

        let pool = ctx.pool().await?;
        let repo = Arc::new(Repository::new(pool.clone()));

        match self {
            OrderCommands::Show { order_id } => {
                let order = repo
                    .find_order(order_id)
                    .await?
                    .ok_or_else(|| anyhow!("order {} not found", order_id))?;
                println!("{}", serde_json::to_string_pretty(&order)?);

                match repo.find_fulfillment(order_id).await? {
                    Some(f) => println!("fulfilled at {}", f.fulfilled_at),
                    None => println!("not fulfilled"),
                }

                for entry in repo.webhooks_for_order(order_id).await? {
                    println!(
                        "[{}] {} source={} processed={} error={}",
                        entry.received_at,
                        entry.event_type,
                        entry.source,
                        entry.processed,
                        entry.error.as_deref().unwrap_or("-")
                    );
                }
            }
            OrderCommands::Reconcile { order_id } => {
                let notifier: Option<Arc<dyn BillingNotifier>> = match &ctx.config.redis_url {
                    Some(url) => {
                        let client = redis::Client::open(url.as_str())?;
                        Some(Arc::new(RedisNotifier::new(client).await?))
                    }
                    None => None,
                };

                let handler = PaymentHandler::new(
                    repo,
                    ctx.gateway()?,
                    Arc::new(FulfillmentService::new(pool)),
                    notifier,
                );

                info!(%order_id, "Reconciling order");
                match handler
                    .handle(&PaymentEvent::probe(order_id, EventSource::OnDemand))
                    .await
                {
                    Ok(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
                    Err(e) => {
                        warn!(%order_id, transient = e.is_transient(), "Reconcile failed");
                        return Err(e.into());
                    }
                }
            }
            OrderCommands::Payments { .. } => {}
        }
        Ok(())
    }
}
