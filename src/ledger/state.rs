use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Credit renewal cadence applied to every tier.
pub const RENEWAL_PERIOD_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Vip,
}

impl Tier {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Some(Tier::Free),
            "pro" => Some(Tier::Pro),
            "vip" => Some(Tier::Vip),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Vip => "vip",
        }
    }

    /// Plan credits granted at purchase and at every renewal.
    pub fn plan_allotment(&self) -> u64 {
        match self {
            Tier::Free => 10,
            Tier::Pro => 100,
            Tier::Vip => 500,
        }
    }

    pub fn limits(&self) -> TierLimits {
        match self {
            Tier::Free => TierLimits {
                max_projects: 3,
                max_documents: 5,
                max_task_per_projects: 250,
                max_team_members: 10,
                github_integration: false,
                bank_ideas: false,
                chat: false,
                custom_gemini_token: true,
                priority_support: false,
            },
            Tier::Pro => TierLimits {
                priority_support: false,
                ..TierLimits::unlimited()
            },
            Tier::Vip => TierLimits::unlimited(),
        }
    }
}

/// Feature limits derived from the tier; `-1` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub max_projects: i64,
    pub max_documents: i64,
    pub max_task_per_projects: i64,
    pub max_team_members: i64,
    pub github_integration: bool,
    pub bank_ideas: bool,
    pub chat: bool,
    pub custom_gemini_token: bool,
    pub priority_support: bool,
}

impl TierLimits {
    fn unlimited() -> Self {
        Self {
            max_projects: -1,
            max_documents: -1,
            max_task_per_projects: -1,
            max_team_members: -1,
            github_integration: true,
            bank_ideas: true,
            chat: true,
            custom_gemini_token: true,
            priority_support: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditBucket {
    Bonus,
    Plan,
    Purchased,
}

impl CreditBucket {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "bonus" => Some(CreditBucket::Bonus),
            "plan" => Some(CreditBucket::Plan),
            "purchased" => Some(CreditBucket::Purchased),
            _ => None,
        }
    }
}

pub const DEFAULT_PRIORITY: [CreditBucket; 3] =
    [CreditBucket::Bonus, CreditBucket::Plan, CreditBucket::Purchased];

/// True when `priority` names each of the three buckets exactly once.
pub fn is_valid_priority(priority: &[CreditBucket]) -> bool {
    priority.len() == 3
        && [CreditBucket::Bonus, CreditBucket::Plan, CreditBucket::Purchased]
            .iter()
            .all(|bucket| priority.contains(bucket))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusCredit {
    pub id: String,
    pub amount: u64,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingCycle {
    pub last_reset: DateTime<Utc>,
    pub next_reset: DateTime<Utc>,
}

impl BillingCycle {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            last_reset: now,
            next_reset: now + Duration::days(RENEWAL_PERIOD_DAYS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingState {
    pub tier: Tier,
    pub plan_credits: u64,
    pub purchased_credits: u64,
    pub bonus_credits: Vec<BonusCredit>,
    #[serde(rename = "credit_spending_priority")]
    pub spending_priority: [CreditBucket; 3],
    pub limits: TierLimits,
    pub billing_cycle: BillingCycle,
}

impl BillingState {
    /// State assigned to a freshly created user.
    pub fn new_default(now: DateTime<Utc>) -> Self {
        let tier = Tier::Free;
        Self {
            tier,
            plan_credits: tier.plan_allotment(),
            purchased_credits: 0,
            bonus_credits: Vec::new(),
            spending_priority: DEFAULT_PRIORITY,
            limits: tier.limits(),
            billing_cycle: BillingCycle::starting_at(now),
        }
    }

    pub fn bonus_total(&self) -> u64 {
        self.bonus_credits
            .iter()
            .fold(0u64, |total, b| total.saturating_add(b.amount))
    }

    /// Always derived, never stored.
    pub fn total_credits(&self) -> u64 {
        self.plan_credits
            .saturating_add(self.purchased_credits)
            .saturating_add(self.bonus_total())
    }

    pub fn balance_of(&self, bucket: CreditBucket) -> u64 {
        match bucket {
            CreditBucket::Bonus => self.bonus_total(),
            CreditBucket::Plan => self.plan_credits,
            CreditBucket::Purchased => self.purchased_credits,
        }
    }
}

/// API view of a billing state with the derived total attached.
#[derive(Debug, Clone, Serialize)]
pub struct BillingSnapshot {
    #[serde(flatten)]
    pub state: BillingState,
    pub total_credits: u64,
}

impl From<BillingState> for BillingSnapshot {
    fn from(state: BillingState) -> Self {
        let total_credits = state.total_credits();
        Self {
            state,
            total_credits,
        }
    }
}
