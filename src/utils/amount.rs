use std::str::FromStr;

use alloy::primitives::{B256, U256, keccak256};
use serde::Serializer;

use crate::utils::error::LedgerpayError;

pub fn parse_minor_units(value: &str) -> Result<U256, LedgerpayError> {
    U256::from_str(value.trim())
        .map_err(|e| LedgerpayError::Validation(format!("invalid amount {:?}: {}", value, e)))
}

/// `10^decimals`, the factor between whole tokens and minor units.
pub fn decimal_factor(decimals: u8) -> U256 {
    U256::from(10u64).pow(U256::from(decimals))
}

/// The on-chain amount matches the stored order when it equals the stored
/// value as-is (minor units) or scaled by the token's decimals (whole tokens).
pub fn amount_matches(observed: U256, stored: U256, decimals: u8) -> bool {
    if observed == stored {
        return true;
    }
    stored
        .checked_mul(decimal_factor(decimals))
        .is_some_and(|scaled| scaled == observed)
}

/// Human readable token amount, e.g. `12.5` for 12_500_000 at 6 decimals.
pub fn format_units(value: U256, decimals: u8) -> String {
    let factor = decimal_factor(decimals);
    let whole = value / factor;
    let frac = value % factor;
    if frac.is_zero() {
        return whole.to_string();
    }
    let frac = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

/// Topic value the gateway contract emits for an indexed `string orderId`.
pub fn order_digest(order_id: &str) -> B256 {
    keccak256(order_id.as_bytes())
}

pub fn serialize_decimal<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}
