use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Upgraded,
    Cancelled,
    Failed,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Upgraded => "upgraded",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Failed => "failed",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Map a provider subscription status string onto ours. Unknown statuses
    /// never grant access.
    pub fn from_provider(s: &str) -> Self {
        match s {
            "live" | "active" | "trial" => SubscriptionStatus::Active,
            "cancelled" | "canceled" => SubscriptionStatus::Cancelled,
            "expired" => SubscriptionStatus::Expired,
            "unpaid" | "dunning" => SubscriptionStatus::Failed,
            _ => SubscriptionStatus::Pending,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SubscriptionStatus::Active)
    }

    /// Terminal rows are audit history; the resolver never mutates them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Upgraded
                | SubscriptionStatus::Cancelled
                | SubscriptionStatus::Failed
                | SubscriptionStatus::Expired
        )
    }

    /// Transition validity for the resolver state machine.
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        match (*self, next) {
            // Re-applying the same live state is how replays stay no-ops.
            (Pending, Pending) | (Active, Active) => true,
            (Pending, Active) => true,
            (Pending, Failed) => true,
            (Pending, Cancelled) => true,
            (Active, Upgraded) => true,
            (Active, Cancelled) => true,
            (Active, Expired) => true,
            _ => false,
        }
    }
}

/// One billing relationship attempt for a user. Superseded rows are retained
/// with status `upgraded`/`cancelled`/`failed` for audit; nothing is deleted.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    /// Null until the first successful webhook attaches provider ids.
    pub provider_subscription_id: Option<String>,
    pub provider_customer_id: Option<String>,
    pub amount_cents: Option<i64>,
    pub currency: String,
    pub current_term_start: Option<NaiveDateTime>,
    pub current_term_end: Option<NaiveDateTime>,
    pub auto_renew: bool,
    /// Reason for the last transition, free text.
    pub notes: Option<String>,
    pub activated_at: Option<NaiveDateTime>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl Subscription {
    pub fn is_live(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Pending | SubscriptionStatus::Active
        )
    }
}
