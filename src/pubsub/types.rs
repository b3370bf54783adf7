use serde::{Deserialize, Serialize};

use crate::ledger::state::{BillingState, Tier};

/// Published after an order's value has been granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingNotice {
    pub user_id: String,
    pub order_id: String,
    pub product_id: String,
    pub tier: Tier,
    pub total_credits: u64,
}

impl BillingNotice {
    pub fn new(user_id: &str, order_id: &str, product_id: &str, billing: &BillingState) -> Self {
        Self {
            user_id: user_id.to_string(),
            order_id: order_id.to_string(),
            product_id: product_id.to_string(),
            tier: billing.tier,
            total_credits: billing.total_credits(),
        }
    }
}
