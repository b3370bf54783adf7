use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgConnection, PgPool, types::Json};

use crate::{
    ledger::{rules::normalize, state::BillingState},
    utils::error::LedgerpayError,
};

/// Ensures the user has a billing row, then locks it for the rest of the
/// surrounding transaction and returns the normalized state.
pub async fn lock_state(
    conn: &mut PgConnection,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<BillingState, LedgerpayError> {
    sqlx::query(
        r#"
        INSERT INTO billing_states (user_id, state)
        VALUES ($1, $2)
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(Json(BillingState::new_default(now)))
    .execute(&mut *conn)
    .await?;

    let (raw,): (Value,) =
        sqlx::query_as("SELECT state FROM billing_states WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_one(&mut *conn)
            .await?;

    Ok(normalize(&raw, now))
}

pub async fn save_state(
    conn: &mut PgConnection,
    user_id: &str,
    state: &BillingState,
) -> Result<(), LedgerpayError> {
    sqlx::query(
        r#"
        UPDATE billing_states
        SET state = $2, updated_at = NOW()
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .bind(Json(state))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Unlocked read. `None` when the user has never been billed.
pub async fn read_state(
    pool: &PgPool,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<BillingState>, LedgerpayError> {
    let raw: Option<(Value,)> = sqlx::query_as("SELECT state FROM billing_states WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(raw.map(|(value,)| normalize(&value, now)))
}
