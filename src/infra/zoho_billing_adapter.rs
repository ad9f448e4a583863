//! Maps the provider port onto the Zoho Billing REST client.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::{
    application::app_error::{AppError, AppResult},
    application::ports::billing_provider::{
        AddonOrder, BillingProviderPort, CheckoutCustomer, CheckoutUrls, HostedPage,
        ProviderAddon, ProviderCustomer, ProviderSubscription, SubscriptionChange,
    },
    domain::classifier::parse_time_str,
    infra::zoho_client::{ZohoBillingClient, ZohoSubscription},
};

pub struct ZohoBillingAdapter {
    client: Arc<ZohoBillingClient>,
}

impl ZohoBillingAdapter {
    pub fn new(client: Arc<ZohoBillingClient>) -> Self {
        Self { client }
    }
}

fn addon_lines(addons: &[AddonOrder]) -> Vec<serde_json::Value> {
    addons
        .iter()
        .map(|a| json!({ "addon_code": a.addon_code, "quantity": a.quantity }))
        .collect()
}

fn to_provider_subscription(sub: ZohoSubscription) -> ProviderSubscription {
    // "non_renewing" is the provider's cancel-at-term-end state.
    let auto_renew = Some(sub.status != "non_renewing");
    ProviderSubscription {
        subscription_id: sub.subscription_id,
        status: sub.status,
        plan_code: sub.plan.map(|p| p.plan_code),
        amount_cents: sub.amount.map(|a| (a * 100.0).round() as i64),
        currency: sub.currency_code,
        customer_id: sub.customer.as_ref().map(|c| c.customer_id.clone()),
        customer_email: sub.customer.and_then(|c| c.email),
        current_term_start: sub
            .current_term_starts_at
            .as_deref()
            .and_then(parse_time_str),
        current_term_end: sub.current_term_ends_at.as_deref().and_then(parse_time_str),
        next_billing_at: sub.next_billing_at.as_deref().and_then(parse_time_str),
        auto_renew,
        addons: sub
            .addons
            .unwrap_or_default()
            .into_iter()
            .map(|a| ProviderAddon {
                addon_code: a.addon_code,
                quantity: a.quantity.unwrap_or(1),
                addon_instance_id: a.addon_instance_id,
                name: a.name,
            })
            .collect(),
    }
}

#[async_trait]
impl BillingProviderPort for ZohoBillingAdapter {
    async fn create_hosted_checkout(
        &self,
        customer: &CheckoutCustomer,
        plan_code: &str,
        addons: &[AddonOrder],
        urls: &CheckoutUrls,
    ) -> AppResult<HostedPage> {
        let mut body = json!({
            "plan": { "plan_code": plan_code },
            "redirect_url": urls.success_url,
            "cancel_url": urls.cancel_url,
        });
        if !addons.is_empty() {
            body["addons"] = json!(addon_lines(addons));
        }
        // An existing provider customer is reused; otherwise the hosted page
        // creates one keyed to the user's email.
        match &customer.provider_customer_id {
            Some(customer_id) => body["customer_id"] = json!(customer_id),
            None => {
                body["customer"] = json!({
                    "email": customer.email,
                    "reference_id": customer.user_id.to_string(),
                })
            }
        }

        let page = self.client.create_subscription_hosted_page(&body).await?;
        Ok(HostedPage {
            url: page.url,
            page_id: page.hostedpage_id,
        })
    }

    async fn create_addon_checkout(
        &self,
        provider_subscription_id: &str,
        addons: &[AddonOrder],
        urls: &CheckoutUrls,
    ) -> AppResult<HostedPage> {
        let body = json!({
            "subscription_id": provider_subscription_id,
            "addons": addon_lines(addons),
            "redirect_url": urls.success_url,
            "cancel_url": urls.cancel_url,
        });
        let page = self.client.create_addon_hosted_page(&body).await?;
        Ok(HostedPage {
            url: page.url,
            page_id: page.hostedpage_id,
        })
    }

    async fn update_subscription(
        &self,
        provider_subscription_id: &str,
        change: &SubscriptionChange,
    ) -> AppResult<ProviderSubscription> {
        let mut body = json!({ "end_of_term": change.end_of_term });
        if let Some(plan_code) = &change.plan_code {
            body["plan"] = json!({ "plan_code": plan_code });
        }
        if !change.addons.is_empty() {
            body["addons"] = json!(addon_lines(&change.addons));
        }
        let sub = self
            .client
            .update_subscription(provider_subscription_id, &body)
            .await?;
        Ok(to_provider_subscription(sub))
    }

    async fn cancel_subscription(
        &self,
        provider_subscription_id: &str,
        at_term_end: bool,
    ) -> AppResult<()> {
        self.client
            .cancel_subscription(provider_subscription_id, at_term_end)
            .await
    }

    async fn fetch_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> AppResult<Option<ProviderSubscription>> {
        match self.client.get_subscription(provider_subscription_id).await {
            Ok(sub) => Ok(Some(to_provider_subscription(sub))),
            Err(AppError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_customer(&self, customer_id: &str) -> AppResult<Option<ProviderCustomer>> {
        match self.client.get_customer(customer_id).await {
            Ok(customer) => Ok(Some(ProviderCustomer {
                customer_id: customer.customer_id,
                email: customer.email,
                display_name: customer.display_name,
            })),
            Err(AppError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
