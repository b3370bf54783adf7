use std::{sync::Arc, time::Duration};

use alloy::{
    primitives::{Address, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::{Filter, Log},
    sol_types::SolEvent,
};
use async_trait::async_trait;
use futures::{
    StreamExt,
    future::{ready, try_join_all},
    stream::BoxStream,
};
use moka::future::Cache;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::{
    client::{
        contracts::{IERC20, IPaymentGateway, ITestToken},
        types::{NetworkInfo, PaymentInfo, Product},
    },
    events::types::{EventSource, OrderKey, PaymentEvent},
    utils::{
        config::ChainConfig, constants::PAYMENT_EVENT_NAME, error::LedgerpayError,
        logs_fmt::abbrev,
    },
};

const CATALOG_KEY: &str = "catalog";

/// Read-only view of the token and payment-gateway contracts.
///
/// Every error is an RPC failure and means "unknown". Callers must never read
/// an `Err` as "not paid".
#[async_trait]
pub trait ChainGateway: Send + Sync {
    async fn get_balance(&self, owner: Address) -> Result<U256, LedgerpayError>;

    /// Amount the gateway contract may pull from `owner`.
    async fn get_allowance(&self, owner: Address) -> Result<U256, LedgerpayError>;

    async fn token_decimals(&self) -> Result<u8, LedgerpayError>;

    /// Active catalog entries.
    async fn get_products(&self) -> Result<Vec<Product>, LedgerpayError>;

    /// Any catalog entry, active or not.
    async fn get_product(&self, product_id: &str) -> Result<Option<Product>, LedgerpayError>;

    async fn is_order_processed(&self, order_id: &str) -> Result<bool, LedgerpayError>;

    async fn get_payment_info(&self, order_id: &str) -> Result<PaymentInfo, LedgerpayError>;

    async fn get_user_payments(
        &self,
        payer: Address,
        limit: u64,
    ) -> Result<Vec<String>, LedgerpayError>;

    async fn network_info(&self) -> Result<NetworkInfo, LedgerpayError>;

    /// Seconds until `owner` may draw from the testnet token faucet again.
    async fn faucet_cooldown(&self, owner: Address) -> Result<u64, LedgerpayError>;

    /// Live `PaymentProcessed` events. Dropping the stream unsubscribes; a
    /// stream that ends means the caller should subscribe again.
    async fn subscribe_payments(&self) -> Result<BoxStream<'static, PaymentEvent>, LedgerpayError>;
}

pub struct EvmGateway {
    provider: DynProvider,
    chain: ChainConfig,
    token: IERC20::IERC20Instance<DynProvider>,
    faucet: ITestToken::ITestTokenInstance<DynProvider>,
    gateway: IPaymentGateway::IPaymentGatewayInstance<DynProvider>,
    catalog: Cache<&'static str, Arc<Vec<Product>>>,
    decimals: OnceCell<u8>,
    log_poll_interval: Duration,
}

impl EvmGateway {
    pub fn new(
        chain: ChainConfig,
        catalog_ttl: Duration,
        log_poll_interval: Duration,
    ) -> Result<Self, LedgerpayError> {
        let url = chain
            .rpc_url
            .parse()
            .map_err(|e| LedgerpayError::Config(format!("invalid rpc_url {}: {}", chain.rpc_url, e)))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();

        let token = IERC20::new(chain.token_address, provider.clone());
        let faucet = ITestToken::new(chain.token_address, provider.clone());
        let gateway = IPaymentGateway::new(chain.gateway_address, provider.clone());

        let catalog = Cache::builder()
            .max_capacity(1)
            .time_to_live(catalog_ttl)
            .build();

        info!(
            network = chain.network.name(),
            chain_id = chain.chain_id,
            token = %chain.token_address,
            gateway = %chain.gateway_address,
            "Chain gateway configured"
        );

        Ok(Self {
            provider,
            chain,
            token,
            faucet,
            gateway,
            catalog,
            decimals: OnceCell::new(),
            log_poll_interval,
        })
    }

    pub fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    async fn catalog(&self) -> Result<Arc<Vec<Product>>, LedgerpayError> {
        self.catalog
            .try_get_with(CATALOG_KEY, self.fetch_catalog())
            .await
            .map_err(LedgerpayError::rpc)
    }

    async fn fetch_catalog(&self) -> Result<Arc<Vec<Product>>, LedgerpayError> {
        let ids = self.gateway.getAllProducts().call().await?;

        let products = try_join_all(ids.into_iter().map(|id| async move {
            let product = self.gateway.getProduct(id.clone()).call().await?;
            Ok::<_, LedgerpayError>(Product {
                product_id: id,
                price: product.price,
                active: product.active,
                description: product.description,
            })
        }))
        .await?;

        debug!(count = products.len(), "Product catalog refreshed");
        Ok(Arc::new(products))
    }
}

#[async_trait]
impl ChainGateway for EvmGateway {
    async fn get_balance(&self, owner: Address) -> Result<U256, LedgerpayError> {
        Ok(self.token.balanceOf(owner).call().await?)
    }

    async fn get_allowance(&self, owner: Address) -> Result<U256, LedgerpayError> {
        Ok(self
            .token
            .allowance(owner, self.chain.gateway_address)
            .call()
            .await?)
    }

    async fn token_decimals(&self) -> Result<u8, LedgerpayError> {
        self.decimals
            .get_or_try_init(|| async {
                let decimals = self.token.decimals().call().await?;
                info!(decimals, "Token decimals loaded");
                Ok::<_, LedgerpayError>(decimals)
            })
            .await
            .copied()
    }

    async fn get_products(&self) -> Result<Vec<Product>, LedgerpayError> {
        let catalog = self.catalog().await?;
        Ok(catalog.iter().filter(|p| p.active).cloned().collect())
    }

    async fn get_product(&self, product_id: &str) -> Result<Option<Product>, LedgerpayError> {
        let catalog = self.catalog().await?;
        Ok(catalog.iter().find(|p| p.product_id == product_id).cloned())
    }

    async fn is_order_processed(&self, order_id: &str) -> Result<bool, LedgerpayError> {
        Ok(self
            .gateway
            .isOrderProcessed(order_id.to_string())
            .call()
            .await?)
    }

    async fn get_payment_info(&self, order_id: &str) -> Result<PaymentInfo, LedgerpayError> {
        let payment = self.gateway.getPayment(order_id.to_string()).call().await?;
        Ok(PaymentInfo {
            payer: payment.user,
            product_id: payment.productId,
            amount: payment.amount,
            timestamp: payment.timestamp.saturating_to::<u64>(),
        })
    }

    async fn get_user_payments(
        &self,
        payer: Address,
        limit: u64,
    ) -> Result<Vec<String>, LedgerpayError> {
        Ok(self
            .gateway
            .getUserPayments(payer, U256::from(limit))
            .call()
            .await?)
    }

    async fn network_info(&self) -> Result<NetworkInfo, LedgerpayError> {
        let latest_block = self.provider.get_block_number().await?;
        Ok(NetworkInfo {
            network: self.chain.network.name().to_string(),
            chain_id: self.chain.chain_id,
            latest_block,
            token_address: self.chain.token_address,
            gateway_address: self.chain.gateway_address,
            token_decimals: self.token_decimals().await?,
        })
    }

    async fn faucet_cooldown(&self, owner: Address) -> Result<u64, LedgerpayError> {
        let remaining = self.faucet.timeUntilNextFaucet(owner).call().await?;
        Ok(remaining.saturating_to::<u64>())
    }

    async fn subscribe_payments(&self) -> Result<BoxStream<'static, PaymentEvent>, LedgerpayError> {
        let filter = Filter::new()
            .address(self.chain.gateway_address)
            .event_signature(IPaymentGateway::PaymentProcessed::SIGNATURE_HASH);

        let poller = self
            .provider
            .watch_logs(&filter)
            .await?
            .with_poll_interval(self.log_poll_interval);

        info!(
            event = PAYMENT_EVENT_NAME,
            gateway = %abbrev(&self.chain.gateway_address.to_string()),
            "Subscribed to payment events"
        );

        let stream = poller
            .into_stream()
            .flat_map(futures::stream::iter)
            .filter_map(|log| ready(decode_payment_log(&log)));

        Ok(stream.boxed())
    }
}

fn decode_payment_log(log: &Log) -> Option<PaymentEvent> {
    match log.log_decode::<IPaymentGateway::PaymentProcessed>() {
        Ok(decoded) => {
            let event = decoded.inner.data;
            Some(PaymentEvent {
                order: OrderKey::Digest(event.orderId),
                payer: Some(event.user),
                product_id: Some(event.productId),
                amount: Some(event.amount),
                tx_hash: log.transaction_hash,
                block_number: log.block_number,
                source: EventSource::Subscription,
            })
        }
        Err(e) => {
            warn!(
                tx_hash = ?log.transaction_hash,
                "Skipping undecodable {} log: {}",
                PAYMENT_EVENT_NAME,
                e
            );
            None
        }
    }
}
