use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    db::billing::{lock_state, read_state, save_state},
    ledger::{
        rules::{consume_by_priority, maybe_renew},
        state::{BillingState, BonusCredit, CreditBucket, is_valid_priority},
    },
    utils::error::LedgerpayError,
};

/// Read and write paths over a user's persisted [`BillingState`].
///
/// Every mutation runs as a read-modify-write under the row lock taken by
/// [`lock_state`]; nothing here locks in-process.
pub struct BillingService {
    pool: Arc<PgPool>,
}

impl BillingService {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Current state with renewal applied. Persists only when renewal fired.
    pub async fn load(&self, user_id: &str) -> Result<BillingState, LedgerpayError> {
        let now = Utc::now();

        if let Some(state) = read_state(&self.pool, user_id, now).await? {
            if now < state.billing_cycle.next_reset {
                return Ok(state);
            }
        }

        self.mutate(user_id, now, |state| Ok(state)).await
    }

    pub async fn consume(&self, user_id: &str, amount: u64) -> Result<BillingState, LedgerpayError> {
        if amount == 0 {
            return Err(LedgerpayError::Validation("amount must be > 0".to_string()));
        }

        let state = self
            .mutate(user_id, Utc::now(), |state| {
                consume_by_priority(&state, amount).ok_or(LedgerpayError::InsufficientCredits {
                    requested: amount,
                    available: state.total_credits(),
                })
            })
            .await?;

        debug!(user_id, amount, remaining = state.total_credits(), "Credits consumed");
        Ok(state)
    }

    pub async fn set_priority(
        &self,
        user_id: &str,
        priority: &[CreditBucket],
    ) -> Result<BillingState, LedgerpayError> {
        if !is_valid_priority(priority) {
            return Err(LedgerpayError::Validation(
                "priority must name bonus, plan and purchased exactly once".to_string(),
            ));
        }
        let priority = [priority[0], priority[1], priority[2]];

        self.mutate(user_id, Utc::now(), |mut state| {
            state.spending_priority = priority;
            Ok(state)
        })
        .await
    }

    pub async fn grant_bonus(
        &self,
        user_id: &str,
        amount: u64,
        expires_at: DateTime<Utc>,
        source: Option<String>,
    ) -> Result<BillingState, LedgerpayError> {
        let now = Utc::now();
        if amount == 0 {
            return Err(LedgerpayError::Validation("bonus amount must be > 0".to_string()));
        }
        if expires_at <= now {
            return Err(LedgerpayError::Validation(
                "bonus expiry must be in the future".to_string(),
            ));
        }

        let bonus = BonusCredit {
            id: format!("bonus_{}", Uuid::new_v4().simple()),
            amount,
            expires_at,
            source,
        };
        let bonus_id = bonus.id.clone();

        let state = self
            .mutate(user_id, now, move |mut state| {
                state.bonus_credits.push(bonus);
                Ok(state)
            })
            .await?;

        info!(user_id, bonus_id = %bonus_id, amount, %expires_at, "Bonus credits granted");
        Ok(state)
    }

    /// Lock, normalize, renew, apply `change`, write back. An error from
    /// `change` rolls the transaction back with the row untouched.
    async fn mutate<F>(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        change: F,
    ) -> Result<BillingState, LedgerpayError>
    where
        F: FnOnce(BillingState) -> Result<BillingState, LedgerpayError>,
    {
        let mut tx = self.pool.begin().await?;

        let current = maybe_renew(lock_state(&mut tx, user_id, now).await?, now);
        let next = change(current)?;
        save_state(&mut tx, user_id, &next).await?;

        tx.commit().await?;
        Ok(next)
    }
}
