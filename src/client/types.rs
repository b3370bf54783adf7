use alloy::primitives::{Address, U256};
use serde::Serialize;

use crate::utils::amount::serialize_decimal;

/// Catalog entry read from the gateway contract. `price` is in minor units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub product_id: String,
    #[serde(serialize_with = "serialize_decimal")]
    pub price: U256,
    pub active: bool,
    pub description: String,
}

/// The gateway's authoritative record of a processed order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentInfo {
    pub payer: Address,
    pub product_id: String,
    #[serde(serialize_with = "serialize_decimal")]
    pub amount: U256,
    /// Unix seconds
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkInfo {
    pub network: String,
    pub chain_id: u64,
    pub latest_block: u64,
    pub token_address: Address,
    pub gateway_address: Address,
    pub token_decimals: u8,
}
