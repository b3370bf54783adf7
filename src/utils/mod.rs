use crate::utils::constants::BILLING_CHANNEL_PREFIX;

pub mod amount;
pub mod config;
pub mod constants;
pub mod error;
pub mod logs_fmt;
pub mod metrics;

pub fn get_channel(user_id: &str) -> String {
    format!("{}:{}", BILLING_CHANNEL_PREFIX, user_id)
}
