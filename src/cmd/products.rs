use anyhow::{Result, anyhow};
use clap::Subcommand;

use crate::{client::gateway::ChainGateway, cmd::CliContext, utils::amount::format_units};

#[derive(Subcommand)]
pub enum ProductCommands {
    /// List active products
    List,

    /// Show one product, active or not
    Show {
        /// Product id, e.g. credits_50
        product_id: String,
    },
}

impl ProductCommands {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let gateway = ctx.gateway()?;
        let decimals = gateway.token_decimals().await?;

        match self {
            ProductCommands::List => {
                let products = gateway.get_products().await?;
                if products.is_empty() {
                    println!("No active products");
                }
                for p in products {
                    println!(
                        "{:<24} {:>14}  {}",
                        p.product_id,
                        format_units(p.price, decimals),
                        p.description
                    );
                }
            }
            ProductCommands::Show { product_id } => {
                let product = gateway
                    .get_product(product_id)
                    .await?
                    .ok_or_else(|| anyhow!("product {} not found", product_id))?;
                println!("{}", serde_json::to_string_pretty(&product)?);
                println!("price: {}", format_units(product.price, decimals));
            }
        }
        Ok(())
    }
}
