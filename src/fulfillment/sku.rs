use chrono::{DateTime, Duration, Months, Utc};

use crate::ledger::{
    rules::prune,
    state::{BillingCycle, BillingState, RENEWAL_PERIOD_DAYS, Tier},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanPeriod {
    Monthly,
    Yearly,
}

impl PlanPeriod {
    /// Cycle anchor set when the plan is bought.
    pub fn next_reset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            PlanPeriod::Monthly => now + Duration::days(RENEWAL_PERIOD_DAYS),
            PlanPeriod::Yearly => now
                .checked_add_months(Months::new(12))
                .unwrap_or(now + Duration::days(365)),
        }
    }
}

/// What a product grants, parsed once from its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sku {
    /// `credits_<n>`, n > 0
    Credits(u64),
    /// `plan_<pro|vip>_<monthly|yearly>`
    Plan { tier: Tier, period: PlanPeriod },
    Invalid(String),
}

impl Sku {
    pub fn parse(product_id: &str) -> Self {
        let normalized = product_id.trim().to_ascii_lowercase();
        let parts: Vec<&str> = normalized.split('_').collect();

        match parts.as_slice() {
            ["credits", amount] => match amount.parse::<u64>() {
                Ok(n) if n > 0 && amount.bytes().all(|b| b.is_ascii_digit()) => Sku::Credits(n),
                _ => Sku::Invalid(product_id.to_string()),
            },
            ["plan", tier, period] => {
                let tier = match Tier::parse(tier) {
                    Some(Tier::Free) | None => return Sku::Invalid(product_id.to_string()),
                    Some(tier) => tier,
                };
                let period = match *period {
                    "monthly" => PlanPeriod::Monthly,
                    "yearly" => PlanPeriod::Yearly,
                    _ => return Sku::Invalid(product_id.to_string()),
                };
                Sku::Plan { tier, period }
            }
            _ => Sku::Invalid(product_id.to_string()),
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Sku::Invalid(_))
    }
}

/// Apply a parsed grant to a billing state. `None` for [`Sku::Invalid`].
pub fn apply_grant(state: BillingState, sku: &Sku, now: DateTime<Utc>) -> Option<BillingState> {
    let next = match sku {
        Sku::Credits(n) => BillingState {
            purchased_credits: state.purchased_credits.saturating_add(*n),
            ..state
        },
        Sku::Plan { tier, period } => BillingState {
            tier: *tier,
            plan_credits: tier.plan_allotment(),
            billing_cycle: BillingCycle {
                last_reset: now,
                next_reset: period.next_reset(now),
            },
            ..state
        },
        Sku::Invalid(_) => return None,
    };
    Some(prune(next, now))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-15T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn parses_credit_packs() {
        assert_eq!(Sku::parse("credits_50"), Sku::Credits(50));
        assert_eq!(Sku::parse("  CREDITS_500 "), Sku::Credits(500));
    }

    #[test]
    fn parses_plans() {
        assert_eq!(
            Sku::parse("plan_pro_monthly"),
            Sku::Plan {
                tier: Tier::Pro,
                period: PlanPeriod::Monthly
            }
        );
        assert_eq!(
            Sku::parse("Plan_VIP_Yearly"),
            Sku::Plan {
                tier: Tier::Vip,
                period: PlanPeriod::Yearly
            }
        );
    }

    #[test]
    fn rejects_everything_else() {
        for raw in [
            "credits_0",
            "credits_-5",
            "credits_12abc",
            "credits_+7",
            "credits_",
            "plan_free_monthly",
            "plan_gold_monthly",
            "plan_pro_weekly",
            "plan_pro",
            "plan_pro_monthly_extra",
            "subscription",
            "",
        ] {
            assert!(!Sku::parse(raw).is_valid(), "{raw} should be invalid");
        }
    }

    #[test]
    fn credit_pack_adds_purchased_only() {
        let state = BillingState::new_default(now());
        let next = apply_grant(state.clone(), &Sku::Credits(50), now()).unwrap();
        assert_eq!(next.purchased_credits, 50);
        assert_eq!(next.plan_credits, state.plan_credits);
        assert_eq!(next.tier, Tier::Free);
        assert_eq!(next.total_credits(), 60);
    }

    #[test]
    fn monthly_plan_sets_tier_allotment_and_cycle() {
        let mut state = BillingState::new_default(now() - Duration::days(3));
        state.plan_credits = 2;
        state.purchased_credits = 7;

        let sku = Sku::parse("plan_pro_monthly");
        let next = apply_grant(state, &sku, now()).unwrap();

        assert_eq!(next.tier, Tier::Pro);
        assert_eq!(next.plan_credits, 100);
        assert_eq!(next.purchased_credits, 7);
        assert_eq!(next.limits, Tier::Pro.limits());
        assert_eq!(next.billing_cycle.last_reset, now());
        assert_eq!(next.billing_cycle.next_reset, now() + Duration::days(30));
    }

    #[test]
    fn yearly_plan_anchors_one_year_out() {
        let state = BillingState::new_default(now());
        let sku = Sku::parse("plan_vip_yearly");
        let next = apply_grant(state, &sku, now()).unwrap();

        assert_eq!(next.plan_credits, 500);
        assert_eq!(
            next.billing_cycle.next_reset,
            DateTime::parse_from_rfc3339("2027-01-15T08:30:00Z")
                .unwrap()
                .with_timezone(&Utc)
        );
    }

    #[test]
    fn invalid_sku_grants_nothing() {
        let state = BillingState::new_default(now());
        assert!(apply_grant(state, &Sku::parse("plan_free_monthly"), now()).is_none());
    }
}
