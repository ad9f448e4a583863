use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use uuid::Uuid;

use crate::application::app_error::AppResult;

// ============================================================================
// Port Types - Provider-agnostic domain types
// ============================================================================

/// The local identity a checkout is started for.
#[derive(Debug, Clone)]
pub struct CheckoutCustomer {
    pub user_id: Uuid,
    pub email: String,
    /// Provider customer id, when one was learned from a prior webhook.
    pub provider_customer_id: Option<String>,
}

/// URLs for hosted-page redirects.
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
}

/// One add-on line requested at checkout or in a subscription change.
#[derive(Debug, Clone, Serialize)]
pub struct AddonOrder {
    pub addon_code: String,
    pub quantity: i64,
}

/// A hosted checkout page created at the provider.
#[derive(Debug, Clone, Serialize)]
pub struct HostedPage {
    pub url: String,
    pub page_id: Option<String>,
}

/// A plan/add-on change requested on an existing subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionChange {
    pub plan_code: Option<String>,
    pub addons: Vec<AddonOrder>,
    /// Defer the change to the end of the current term instead of charging
    /// immediately.
    pub end_of_term: bool,
}

/// An add-on entry in the provider's view of a subscription.
#[derive(Debug, Clone)]
pub struct ProviderAddon {
    pub addon_code: String,
    pub quantity: i64,
    pub addon_instance_id: Option<String>,
    pub name: Option<String>,
}

/// The provider's authoritative view of a subscription, fetched when an
/// event is too ambiguous or incomplete to reconcile from alone.
#[derive(Debug, Clone)]
pub struct ProviderSubscription {
    pub subscription_id: String,
    /// Raw provider status string ("live", "cancelled", ...).
    pub status: String,
    pub plan_code: Option<String>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub current_term_start: Option<NaiveDateTime>,
    pub current_term_end: Option<NaiveDateTime>,
    pub next_billing_at: Option<NaiveDateTime>,
    pub auto_renew: Option<bool>,
    pub addons: Vec<ProviderAddon>,
}

#[derive(Debug, Clone)]
pub struct ProviderCustomer {
    pub customer_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

// ============================================================================
// Billing Provider Port
// ============================================================================

/// Thin boundary over the external billing provider's REST surface. Pure
/// I/O: no reconciliation logic lives behind this trait, and implementations
/// are only ever called outside the reconciliation transaction.
#[async_trait]
pub trait BillingProviderPort: Send + Sync {
    /// Create a hosted checkout page for a new plan subscription, with
    /// optional add-on lines.
    async fn create_hosted_checkout(
        &self,
        customer: &CheckoutCustomer,
        plan_code: &str,
        addons: &[AddonOrder],
        urls: &CheckoutUrls,
    ) -> AppResult<HostedPage>;

    /// Create a hosted page for buying add-ons on an existing subscription.
    async fn create_addon_checkout(
        &self,
        provider_subscription_id: &str,
        addons: &[AddonOrder],
        urls: &CheckoutUrls,
    ) -> AppResult<HostedPage>;

    /// Change plan or add-ons on an existing subscription. With
    /// `change.end_of_term` the provider schedules the change instead of
    /// charging immediately.
    async fn update_subscription(
        &self,
        provider_subscription_id: &str,
        change: &SubscriptionChange,
    ) -> AppResult<ProviderSubscription>;

    /// Cancel a subscription, immediately or at the end of the current term.
    async fn cancel_subscription(
        &self,
        provider_subscription_id: &str,
        at_term_end: bool,
    ) -> AppResult<()>;

    /// Fetch the provider's current view of a subscription. `None` when the
    /// provider does not know the id.
    async fn fetch_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> AppResult<Option<ProviderSubscription>>;

    /// Fetch customer detail by provider customer id.
    async fn fetch_customer(&self, customer_id: &str) -> AppResult<Option<ProviderCustomer>>;
}
