use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog entry for a purchasable add-on. Reference data, read-only to the
/// reconciliation engine.
#[derive(Debug, Clone, Serialize)]
pub struct AddonDefinition {
    pub id: Uuid,
    /// Provider-side add-on code (e.g. "MSG100").
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i32,
    pub currency: String,
    pub is_recurring: bool,
    /// Consumable add-ons (message-credit packs) never expire by date; they
    /// are deactivated only by explicit cancellation or exhaustion.
    pub non_expiring: bool,
    /// Message capacity granted per purchased unit, for metered add-ons.
    pub unit_message_limit: Option<i32>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl AddonDefinition {
    pub fn is_metered(&self) -> bool {
        self.unit_message_limit.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "addon_instance_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AddonInstanceStatus {
    Active,
    Pending,
    Cancelled,
    Expired,
}

impl AddonInstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddonInstanceStatus::Active => "active",
            AddonInstanceStatus::Pending => "pending",
            AddonInstanceStatus::Cancelled => "cancelled",
            AddonInstanceStatus::Expired => "expired",
        }
    }

    /// Live rows are the ones counted against the provider-reported quantity.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            AddonInstanceStatus::Active | AddonInstanceStatus::Pending
        )
    }
}

/// One purchased unit of an add-on. Quantity is represented extensionally:
/// three units of "MSG100" are three rows, not a counter of 3.
#[derive(Debug, Clone, Serialize)]
pub struct AddonInstance {
    pub id: Uuid,
    pub user_id: Uuid,
    pub addon_id: Uuid,
    pub subscription_id: Uuid,
    pub status: AddonInstanceStatus,
    pub is_active: bool,
    pub purchased_at: NaiveDateTime,
    /// None for non-expiring consumables.
    pub expires_at: Option<NaiveDateTime>,
    pub provider_instance_id: Option<String>,
    pub initial_count: Option<i32>,
    pub remaining_count: Option<i32>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}
