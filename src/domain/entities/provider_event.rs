use chrono::NaiveDateTime;
use serde::Serialize;

/// Canonical kind of a classified provider event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SubscriptionActive,
    SubscriptionCancelled,
    SubscriptionUpdated,
    PaymentSuccess,
    PaymentFailed,
    Unclassified,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SubscriptionActive => "subscription_active",
            EventKind::SubscriptionCancelled => "subscription_cancelled",
            EventKind::SubscriptionUpdated => "subscription_updated",
            EventKind::PaymentSuccess => "payment_success",
            EventKind::PaymentFailed => "payment_failed",
            EventKind::Unclassified => "unclassified",
        }
    }
}

/// A classified webhook event. Downstream components only ever see this
/// tagged union, never the raw payload map.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    Subscription(SubscriptionEventData),
    Payment(PaymentEventData),
    Unclassified(UnclassifiedEvent),
}

impl ProviderEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ProviderEvent::Subscription(data) => match data.kind {
                SubscriptionEventKind::Activated => EventKind::SubscriptionActive,
                SubscriptionEventKind::Cancelled => EventKind::SubscriptionCancelled,
                SubscriptionEventKind::Updated => EventKind::SubscriptionUpdated,
            },
            ProviderEvent::Payment(data) => match data.kind {
                PaymentEventKind::Succeeded => EventKind::PaymentSuccess,
                PaymentEventKind::Failed => EventKind::PaymentFailed,
            },
            ProviderEvent::Unclassified(_) => EventKind::Unclassified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEventKind {
    Activated,
    Cancelled,
    Updated,
}

/// An add-on entry inside a subscription event, straight from the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EventAddon {
    pub addon_code: String,
    pub quantity: i64,
    pub provider_instance_id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubscriptionEventData {
    pub kind: SubscriptionEventKind,
    pub provider_subscription_id: String,
    /// Raw provider status string ("live", "cancelled", ...).
    pub status: Option<String>,
    pub plan_code: Option<String>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub provider_customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub current_term_start: Option<NaiveDateTime>,
    pub current_term_end: Option<NaiveDateTime>,
    pub next_billing_at: Option<NaiveDateTime>,
    pub auto_renew: Option<bool>,
    pub addons: Vec<EventAddon>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEventKind {
    Succeeded,
    Failed,
}

/// A line item of an invoice embedded in a payment event.
#[derive(Debug, Clone)]
pub struct EventLineItem {
    pub code: Option<String>,
    pub description: Option<String>,
    pub item_type: Option<String>,
    pub price_cents: Option<i64>,
    pub quantity: i64,
}

#[derive(Debug, Clone)]
pub struct EventInvoice {
    pub invoice_id: Option<String>,
    pub transaction_type: Option<String>,
    pub subscription_ids: Vec<String>,
    pub line_items: Vec<EventLineItem>,
}

/// An add-on purchase detected inside a generic payment event, via the
/// line-item heuristics (explicit type, keyword, or catalog price match).
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedAddonPurchase {
    pub addon_code: String,
    pub quantity: i64,
    /// How the line item was matched, for audit logs.
    pub matched_by: AddonMatchRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddonMatchRule {
    ItemType,
    Keyword,
    Price,
}

#[derive(Debug, Clone)]
pub struct PaymentEventData {
    pub kind: PaymentEventKind,
    pub provider_customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub invoices: Vec<EventInvoice>,
    /// Add-on purchases detected in upgrade-type invoices.
    pub detected_addons: Vec<DetectedAddonPurchase>,
}

impl PaymentEventData {
    /// Provider subscription ids referenced by any invoice in the event.
    pub fn subscription_ids(&self) -> Vec<&str> {
        self.invoices
            .iter()
            .flat_map(|inv| inv.subscription_ids.iter().map(String::as_str))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct UnclassifiedEvent {
    /// The provider's own event type field, when present.
    pub event_type: Option<String>,
}
