use std::time::Duration;

use alloy::primitives::Address;
use serde::Deserialize;

use crate::utils::{
    constants::{
        BSC_RPC, BSC_TESTNET_RPC, BSC_USDT, MAINNET_RPC, MAINNET_USDT, SEPOLIA_RPC,
    },
    error::LedgerpayError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    #[default]
    Sepolia,
    BscTestnet,
    Bsc,
    Mainnet,
}

impl Network {
    pub fn name(&self) -> &'static str {
        match self {
            Network::Sepolia => "sepolia",
            Network::BscTestnet => "bsc-testnet",
            Network::Bsc => "bsc",
            Network::Mainnet => "mainnet",
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Sepolia => 11_155_111,
            Network::BscTestnet => 97,
            Network::Bsc => 56,
            Network::Mainnet => 1,
        }
    }

    pub fn is_testnet(&self) -> bool {
        matches!(self, Network::Sepolia | Network::BscTestnet)
    }

    fn default_rpc_url(&self) -> &'static str {
        match self {
            Network::Sepolia => SEPOLIA_RPC,
            Network::BscTestnet => BSC_TESTNET_RPC,
            Network::Bsc => BSC_RPC,
            Network::Mainnet => MAINNET_RPC,
        }
    }

    fn default_token_address(&self) -> Option<&'static str> {
        match self {
            Network::Bsc => Some(BSC_USDT),
            Network::Mainnet => Some(MAINNET_USDT),
            Network::Sepolia | Network::BscTestnet => None,
        }
    }

    /// Resolve the network's built-in defaults, letting explicit config win.
    pub fn chain_config(&self, cfg: &AppConfig) -> Result<ChainConfig, LedgerpayError> {
        let rpc_url = cfg
            .rpc_url
            .clone()
            .unwrap_or_else(|| self.default_rpc_url().to_string());

        let token = cfg
            .token_address
            .as_deref()
            .or(self.default_token_address())
            .ok_or_else(|| {
                LedgerpayError::Config(format!(
                    "token_address must be set for network {}",
                    self.name()
                ))
            })?;

        let gateway = cfg.gateway_address.as_deref().ok_or_else(|| {
            LedgerpayError::Config(format!(
                "gateway_address must be set for network {}",
                self.name()
            ))
        })?;

        Ok(ChainConfig {
            network: *self,
            rpc_url,
            chain_id: self.chain_id(),
            token_address: parse_address("token_address", token)?,
            gateway_address: parse_address("gateway_address", gateway)?,
        })
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address, LedgerpayError> {
    value
        .parse::<Address>()
        .map_err(|e| LedgerpayError::Config(format!("invalid {}: {} ({})", field, value, e)))
}

#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub network: Network,
    pub rpc_url: String,
    pub chain_id: u64,
    pub token_address: Address,
    pub gateway_address: Address,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default)]
    pub network: Network,

    /// Overrides the network's public RPC endpoint
    pub rpc_url: Option<String>,
    pub token_address: Option<String>,
    pub gateway_address: Option<String>,

    /// Probe loop interval while temporary polling is active
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Polling stops after this long without a new order
    #[serde(default = "default_quiet_window_secs")]
    pub polling_quiet_window_secs: u64,

    /// Only orders created within this window are probed
    #[serde(default = "default_probe_lookback_secs")]
    pub probe_lookback_secs: u64,

    /// Orders younger than this are left to the event subscription
    #[serde(default = "default_probe_grace_secs")]
    pub probe_grace_secs: u64,

    #[serde(default = "default_probe_batch_size")]
    pub probe_batch_size: i64,

    #[serde(default = "default_product_cache_ttl_secs")]
    pub product_cache_ttl_secs: u64,

    /// Pending orders older than this are marked failed
    #[serde(default = "default_order_expiry_secs")]
    pub order_expiry_secs: u64,

    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token expected from the calling application
    pub api_key: Option<String>,

    /// Enables billing notifications when set
    pub redis_url: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, LedgerpayError> {
        dotenvy::dotenv().ok();

        let cfg: AppConfig = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| LedgerpayError::Config(e.to_string()))?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), LedgerpayError> {
        if self.poll_interval_secs == 0 {
            return Err(LedgerpayError::Config(
                "poll_interval_secs must be > 0".to_string(),
            ));
        }
        if self.probe_grace_secs >= self.probe_lookback_secs {
            return Err(LedgerpayError::Config(
                "probe_grace_secs must be smaller than probe_lookback_secs".to_string(),
            ));
        }
        if self.probe_batch_size <= 0 {
            return Err(LedgerpayError::Config(
                "probe_batch_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn chain(&self) -> Result<ChainConfig, LedgerpayError> {
        self.network.chain_config(self)
    }

    pub fn listener_settings(&self) -> ListenerSettings {
        ListenerSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            quiet_window: Duration::from_secs(self.polling_quiet_window_secs),
            probe_lookback: Duration::from_secs(self.probe_lookback_secs),
            probe_grace: Duration::from_secs(self.probe_grace_secs),
            probe_batch_size: self.probe_batch_size,
            order_expiry: Duration::from_secs(self.order_expiry_secs),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
        }
    }

    pub fn product_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.product_cache_ttl_secs)
    }
}

/// Timing knobs for the blockchain listener.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub poll_interval: Duration,
    pub quiet_window: Duration,
    pub probe_lookback: Duration,
    pub probe_grace: Duration,
    pub probe_batch_size: i64,
    pub order_expiry: Duration,
    pub reconnect_delay: Duration,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(default_poll_interval_secs()),
            quiet_window: Duration::from_secs(default_quiet_window_secs()),
            probe_lookback: Duration::from_secs(default_probe_lookback_secs()),
            probe_grace: Duration::from_secs(default_probe_grace_secs()),
            probe_batch_size: default_probe_batch_size(),
            order_expiry: Duration::from_secs(default_order_expiry_secs()),
            reconnect_delay: Duration::from_secs(default_reconnect_delay_secs()),
        }
    }
}

fn default_db_max_connections() -> u32 {
    20
}
fn default_poll_interval_secs() -> u64 {
    10
}
fn default_quiet_window_secs() -> u64 {
    300
}
fn default_probe_lookback_secs() -> u64 {
    600
}
fn default_probe_grace_secs() -> u64 {
    30
}
fn default_probe_batch_size() -> i64 {
    20
}
fn default_product_cache_ttl_secs() -> u64 {
    60
}
fn default_order_expiry_secs() -> u64 {
    86_400
}
fn default_reconnect_delay_secs() -> u64 {
    5
}
fn default_port() -> u16 {
    8080
}
fn default_timeout_ms() -> u64 {
    10_000
}
