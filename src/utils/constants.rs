pub const EVENT_CHANNEL_CAPACITY: usize = 256;
pub const BILLING_CHANNEL_PREFIX: &str = "ledgerpay:billing";

pub const PAYMENT_EVENT_NAME: &str = "PaymentProcessed";

// Canonical USDT deployments
pub const BSC_USDT: &str = "0x55d398326f99059fF775485246999027B3197955";
pub const MAINNET_USDT: &str = "0xdAC17F958D2ee523a2206206994597C13D831ec7";

pub const SEPOLIA_RPC: &str = "https://rpc.sepolia.org";
pub const BSC_TESTNET_RPC: &str = "https://data-seed-prebsc-1-s1.binance.org:8545";
pub const BSC_RPC: &str = "https://bsc-dataseed.binance.org";
pub const MAINNET_RPC: &str = "https://eth.llamarpc.com";

pub const HEALTH_INTERVAL_SECS: u64 = 30;
pub const SUBSCRIPTION_ALERT_SECS: u64 = 120;
