use std::fmt;

use alloy::primitives::{Address, B256, U256};

use crate::utils::{amount::order_digest, logs_fmt::abbrev};

/// How a payment event identifies its order.
///
/// Live logs only carry the keccak256 topic of the indexed `orderId`, while
/// the probe and on-demand paths start from a stored row and know the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderKey {
    Id(String),
    Digest(B256),
}

impl OrderKey {
    pub fn digest(&self) -> B256 {
        match self {
            OrderKey::Id(id) => order_digest(id),
            OrderKey::Digest(digest) => *digest,
        }
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKey::Id(id) => f.write_str(id),
            OrderKey::Digest(digest) => write!(f, "digest:{}", abbrev(&digest.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    Subscription,
    Poll,
    OnDemand,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Subscription => "subscription",
            EventSource::Poll => "poll",
            EventSource::OnDemand => "on_demand",
        }
    }
}

/// A payment observed on chain or a request to re-check one.
///
/// Subscription events carry the decoded log payload. Probe events carry no
/// payload; the handler reads the authoritative payment record either way.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub order: OrderKey,
    pub payer: Option<Address>,
    pub product_id: Option<String>,
    pub amount: Option<U256>,
    pub tx_hash: Option<B256>,
    pub block_number: Option<u64>,
    pub source: EventSource,
}

impl PaymentEvent {
    /// Probe-originated event for a known order id.
    pub fn probe(order_id: &str, source: EventSource) -> Self {
        Self {
            order: OrderKey::Id(order_id.to_string()),
            payer: None,
            product_id: None,
            amount: None,
            tx_hash: None,
            block_number: None,
            source,
        }
    }

    /// Raw payload kept in the audit log for replay diagnostics.
    pub fn audit_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "order": self.order.to_string(),
            "order_digest": self.order.digest().to_string(),
            "payer": self.payer.map(|p| p.to_string()),
            "product_id": self.product_id,
            "amount": self.amount.map(|a| a.to_string()),
            "tx_hash": self.tx_hash.map(|h| h.to_string()),
            "block_number": self.block_number,
            "source": self.source.as_str(),
        })
    }
}
