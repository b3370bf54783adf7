use anyhow::Result;
use clap::Parser;
use ledgerpay::{
    cmd::{Cli, CliContext},
    utils::config::AppConfig,
};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let ctx = CliContext::new(AppConfig::load()?, cli.rpc_url);
    cli.command.execute(&ctx).await
}
