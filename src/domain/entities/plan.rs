use chrono::NaiveDateTime;
use serde::Serialize;
use uuid::Uuid;

/// Catalog entry for a subscription plan. Reference data, read-only to the
/// reconciliation engine; mirrors the plan configured at the billing provider
/// under the same `code`.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub id: Uuid,
    /// Provider-side plan code (e.g. "P1").
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i32,
    pub currency: String,
    pub word_limit: i64,
    pub storage_limit_mb: i64,
    pub message_limit: i64,
    pub is_public: bool,
    pub display_order: i32,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}
