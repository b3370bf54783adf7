//! Pure transitions over [`BillingState`]. No I/O; `now` is always passed in.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::ledger::state::{
    BillingCycle, BillingState, BonusCredit, CreditBucket, DEFAULT_PRIORITY, RENEWAL_PERIOD_DAYS,
    Tier, is_valid_priority,
};

/// Coerce an arbitrary stored billing document into a valid state.
///
/// Unknown tiers fall back to `free`, malformed or expired bonus entries are
/// dropped, negative counters clamp to zero and an invalid spending priority
/// is replaced by the default `[bonus, plan, purchased]`. Documents written
/// before plan and purchased credits were split carry a single
/// `ai_task_credits` counter, which is read as plan credits.
pub fn normalize(raw: &Value, now: DateTime<Utc>) -> BillingState {
    let empty = serde_json::Map::new();
    let billing = raw.as_object().unwrap_or(&empty);

    let tier = billing
        .get("tier")
        .and_then(Value::as_str)
        .and_then(Tier::parse)
        .unwrap_or(Tier::Free);

    let plan_credits = billing
        .get("plan_credits")
        .and_then(non_negative)
        .or_else(|| billing.get("ai_task_credits").and_then(non_negative))
        .unwrap_or_else(|| tier.plan_allotment());

    let purchased_credits = billing
        .get("purchased_credits")
        .and_then(non_negative)
        .unwrap_or(0);

    let bonus_credits = billing
        .get("bonus_credits")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_bonus).collect())
        .unwrap_or_default();

    let cycle = billing.get("billing_cycle");
    let next_reset = cycle
        .and_then(|c| c.get("next_reset"))
        .and_then(parse_time)
        .unwrap_or_else(|| now + Duration::days(RENEWAL_PERIOD_DAYS));
    let last_reset = cycle
        .and_then(|c| c.get("last_reset"))
        .and_then(parse_time)
        .unwrap_or(now);

    let spending_priority = billing
        .get("credit_spending_priority")
        .and_then(parse_priority)
        .unwrap_or(DEFAULT_PRIORITY);

    prune(
        BillingState {
            tier,
            plan_credits,
            purchased_credits,
            bonus_credits,
            spending_priority,
            limits: tier.limits(),
            billing_cycle: BillingCycle {
                last_reset,
                next_reset,
            },
        },
        now,
    )
}

/// Typed counterpart of [`normalize`] for states already in memory.
pub fn prune(mut state: BillingState, now: DateTime<Utc>) -> BillingState {
    state
        .bonus_credits
        .retain(|bonus| bonus.amount > 0 && bonus.expires_at > now);
    if !is_valid_priority(&state.spending_priority) {
        state.spending_priority = DEFAULT_PRIORITY;
    }
    state.limits = state.tier.limits();
    state
}

/// Reset plan credits when the cycle anchor has passed. Not due: unchanged.
pub fn maybe_renew(state: BillingState, now: DateTime<Utc>) -> BillingState {
    if now < state.billing_cycle.next_reset {
        return state;
    }
    BillingState {
        plan_credits: state.tier.plan_allotment(),
        billing_cycle: BillingCycle::starting_at(now),
        ..state
    }
}

/// Deduct `amount` walking the spending priority. Bonus entries are spent
/// earliest-expiry first and removed once exhausted.
///
/// Returns `None` when the buckets together cannot cover `amount`; the input
/// is never partially modified. Expects a normalized state.
pub fn consume_by_priority(state: &BillingState, amount: u64) -> Option<BillingState> {
    if amount == 0 {
        return Some(state.clone());
    }
    if state.total_credits() < amount {
        return None;
    }

    let mut next = state.clone();
    let mut pending = amount;

    for bucket in state.spending_priority {
        if pending == 0 {
            break;
        }
        match bucket {
            CreditBucket::Plan => {
                let used = next.plan_credits.min(pending);
                next.plan_credits -= used;
                pending -= used;
            }
            CreditBucket::Purchased => {
                let used = next.purchased_credits.min(pending);
                next.purchased_credits -= used;
                pending -= used;
            }
            CreditBucket::Bonus => {
                next.bonus_credits.sort_by_key(|b| b.expires_at);
                for bonus in next.bonus_credits.iter_mut() {
                    if pending == 0 {
                        break;
                    }
                    let used = bonus.amount.min(pending);
                    bonus.amount -= used;
                    pending -= used;
                }
                next.bonus_credits.retain(|b| b.amount > 0);
            }
        }
    }

    if pending > 0 {
        return None;
    }
    Some(next)
}

fn non_negative(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    if value.as_i64().is_some() {
        return Some(0);
    }
    value
        .as_f64()
        .filter(|n| n.is_finite())
        .map(|n| n.max(0.0).floor() as u64)
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn parse_bonus(value: &Value) -> Option<BonusCredit> {
    let id = value.get("id")?.as_str()?.to_string();
    let amount = value.get("amount")?.as_u64().filter(|a| *a > 0)?;
    let expires_at = parse_time(value.get("expires_at")?)?;
    let source = value
        .get("source")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(BonusCredit {
        id,
        amount,
        expires_at,
        source,
    })
}

fn parse_priority(value: &Value) -> Option<[CreditBucket; 3]> {
    let items = value.as_array()?;
    let buckets = items
        .iter()
        .map(|v| v.as_str().and_then(CreditBucket::parse))
        .collect::<Option<Vec<_>>>()?;
    if !is_valid_priority(&buckets) {
        return None;
    }
    Some([buckets[0], buckets[1], buckets[2]])
}
