use anyhow::{Result, anyhow};
use chrono::{Duration, Utc};
use clap::Subcommand;

use crate::{
    cmd::CliContext, ledger::service::BillingService, ledger::state::BillingSnapshot,
    pubsub::subscriber::watch_billing,
};

#[derive(Subcommand)]
pub enum BillingCommands {
    /// Show a user's credits, renewing the cycle if due
    Show {
        user_id: String,
    },

    /// Grant expiring bonus credits
    GrantBonus {
        user_id: String,

        #[arg(short, long)]
        amount: u64,

        /// Days until the bonus expires
        #[arg(short, long, default_value_t = 30)]
        expires_in_days: i64,

        /// Free-form origin, e.g. a campaign name
        #[arg(short, long)]
        source: Option<String>,
    },

    /// Print billing notices for a user as they are published
    Watch {
        user_id: String,
    },
}

impl BillingCommands {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        match self {
            BillingCommands::Show { user_id } => {
                let billing = BillingService::new(ctx.pool().await?);
                let state = billing.load(user_id).await?;
                println!("{}", serde_json::to_string_pretty(&BillingSnapshot::from(state))?);
            }
            BillingCommands::GrantBonus {
                user_id,
                amount,
                expires_in_days,
                source,
            } => {
                let billing = BillingService::new(ctx.pool().await?);
                let expires_at = Utc::now() + Duration::days(*expires_in_days);
                let state = billing
                    .grant_bonus(user_id, *amount, expires_at, source.clone())
                    .await?;
                println!("{}", serde_json::to_string_pretty(&BillingSnapshot::from(state))?);
            }
            BillingCommands::Watch { user_id } => {
                let url = ctx
                    .config
                    .redis_url
                    .as_deref()
                    .ok_or_else(|| anyhow!("REDIS_URL must be set to watch notifications"))?;
                let client = redis::Client::open(url)?;

                watch_billing(&client, user_id, |notice| {
                    println!(
                        "{} order={} product={} tier={} total_credits={}",
                        notice.user_id,
                        notice.order_id,
                        notice.product_id,
                        notice.tier.name(),
                        notice.total_credits
                    );
                })
                .await?;
            }
        }
        Ok(())
    }
}
