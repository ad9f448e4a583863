use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::app_error::{AppError, AppResult};
use crate::application::ports::billing_provider::{
    AddonOrder, BillingProviderPort, CheckoutCustomer, CheckoutUrls, HostedPage,
    SubscriptionChange,
};
use crate::application::use_cases::catalog::PlanCatalogRepo;
use crate::application::use_cases::reconciliation::{
    CreateSubscriptionEventInput, EntitlementStore, PendingCheckoutInput, SubscriptionEventLogRepo,
    UserDirectoryRepo,
};
use crate::domain::entities::subscription::SubscriptionStatus;

/// A started plan checkout: the hosted page to redirect to, plus the local
/// `pending` row the activation webhook will later resolve against.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutStarted {
    pub url: String,
    pub subscription_id: Uuid,
}

/// Consumer-facing billing commands. All provider calls happen before any
/// local write, so a provider failure leaves no partial state; terminal
/// lifecycle changes always arrive later via webhook.
#[derive(Clone)]
pub struct CheckoutUseCases {
    catalog_repo: Arc<dyn PlanCatalogRepo>,
    user_repo: Arc<dyn UserDirectoryRepo>,
    store: Arc<dyn EntitlementStore>,
    event_log: Arc<dyn SubscriptionEventLogRepo>,
    provider: Arc<dyn BillingProviderPort>,
    urls: CheckoutUrls,
}

impl CheckoutUseCases {
    pub fn new(
        catalog_repo: Arc<dyn PlanCatalogRepo>,
        user_repo: Arc<dyn UserDirectoryRepo>,
        store: Arc<dyn EntitlementStore>,
        event_log: Arc<dyn SubscriptionEventLogRepo>,
        provider: Arc<dyn BillingProviderPort>,
        urls: CheckoutUrls,
    ) -> Self {
        Self {
            catalog_repo,
            user_repo,
            store,
            event_log,
            provider,
            urls,
        }
    }

    async fn checkout_customer(&self, user_id: Uuid) -> AppResult<CheckoutCustomer> {
        let user = self
            .user_repo
            .get_by_id(user_id)
            .await?
            .ok_or(AppError::NotFound)?;

        // Reuse the provider customer a prior subscription recorded, so the
        // provider doesn't mint a duplicate customer on repurchase.
        let provider_customer_id = self
            .store
            .list_subscriptions_for_user(user_id)
            .await?
            .into_iter()
            .rev()
            .find_map(|s| s.provider_customer_id);

        Ok(CheckoutCustomer {
            user_id: user.id,
            email: user.email,
            provider_customer_id,
        })
    }

    /// Start a hosted checkout for a plan, optionally with add-on lines.
    pub async fn start_plan_checkout(
        &self,
        user_id: Uuid,
        plan_code: &str,
        addons: &[AddonOrder],
    ) -> AppResult<CheckoutStarted> {
        let customer = self.checkout_customer(user_id).await?;

        let plan = self
            .catalog_repo
            .get_plan_by_code(plan_code)
            .await?
            .ok_or_else(|| AppError::UnknownCatalogCode(plan_code.to_string()))?;

        for order in addons {
            if order.quantity < 1 {
                return Err(AppError::InvalidInput(format!(
                    "Add-on quantity must be at least 1 (got {} for {})",
                    order.quantity, order.addon_code
                )));
            }
            if self
                .catalog_repo
                .get_addon_by_code(&order.addon_code)
                .await?
                .is_none()
            {
                return Err(AppError::UnknownCatalogCode(order.addon_code.clone()));
            }
        }

        let page = self
            .provider
            .create_hosted_checkout(&customer, &plan.code, addons, &self.urls)
            .await?;

        let pending = self
            .store
            .upsert_pending_subscription(&PendingCheckoutInput {
                user_id,
                plan_id: plan.id,
                amount_cents: Some(plan.price_cents as i64),
                currency: plan.currency.clone(),
                notes: format!("checkout started for plan {}", plan.code),
            })
            .await?;

        if let Err(e) = self
            .event_log
            .create(&CreateSubscriptionEventInput {
                subscription_id: pending.id,
                event_type: "checkout_started".to_string(),
                previous_status: None,
                new_status: Some(SubscriptionStatus::Pending),
                provider_event_id: None,
                metadata: serde_json::json!({
                    "plan_code": plan.code,
                    "addons": addons,
                    "hosted_page_id": page.page_id,
                }),
            })
            .await
        {
            tracing::warn!(error = %e, "Failed to write checkout audit event");
        }

        tracing::info!(
            user_id = %user_id,
            plan_code = %plan.code,
            subscription_id = %pending.id,
            "Plan checkout started"
        );

        Ok(CheckoutStarted {
            url: page.url,
            subscription_id: pending.id,
        })
    }

    /// Start a hosted checkout for a standalone add-on purchase on the
    /// user's active subscription.
    pub async fn start_addon_checkout(
        &self,
        user_id: Uuid,
        addon_code: &str,
        quantity: i64,
    ) -> AppResult<HostedPage> {
        if quantity < 1 {
            return Err(AppError::InvalidInput(format!(
                "Add-on quantity must be at least 1 (got {})",
                quantity
            )));
        }

        let addon = self
            .catalog_repo
            .get_addon_by_code(addon_code)
            .await?
            .ok_or_else(|| AppError::UnknownCatalogCode(addon_code.to_string()))?;

        let subscription = self
            .store
            .get_active_subscription(user_id)
            .await?
            .ok_or_else(|| {
                AppError::InvalidInput("No active subscription to attach the add-on to".into())
            })?;

        let provider_subscription_id = subscription
            .provider_subscription_id
            .as_deref()
            .ok_or_else(|| {
                AppError::InvalidInput(
                    "Subscription has no provider id yet; retry after checkout completes".into(),
                )
            })?;

        let orders = [AddonOrder {
            addon_code: addon.code.clone(),
            quantity,
        }];
        let page = self
            .provider
            .create_addon_checkout(provider_subscription_id, &orders, &self.urls)
            .await?;

        if let Err(e) = self
            .event_log
            .create(&CreateSubscriptionEventInput {
                subscription_id: subscription.id,
                event_type: "addon_checkout_started".to_string(),
                previous_status: Some(subscription.status),
                new_status: Some(subscription.status),
                provider_event_id: None,
                metadata: serde_json::json!({
                    "addon_code": addon.code,
                    "quantity": quantity,
                    "hosted_page_id": page.page_id,
                }),
            })
            .await
        {
            tracing::warn!(error = %e, "Failed to write add-on checkout audit event");
        }

        Ok(page)
    }

    /// Request a plan change on the active subscription. With `at_term_end`
    /// the provider schedules the change for the end of the current term
    /// instead of charging immediately (the downgrade path). Local state is
    /// not touched here; it converges when the provider's webhook arrives.
    pub async fn change_plan(
        &self,
        user_id: Uuid,
        new_plan_code: &str,
        at_term_end: bool,
    ) -> AppResult<()> {
        let plan = self
            .catalog_repo
            .get_plan_by_code(new_plan_code)
            .await?
            .ok_or_else(|| AppError::UnknownCatalogCode(new_plan_code.to_string()))?;

        let subscription = self
            .store
            .get_active_subscription(user_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let provider_subscription_id = subscription
            .provider_subscription_id
            .as_deref()
            .ok_or_else(|| {
                AppError::InvalidInput("Subscription has no provider id to change".into())
            })?;

        self.provider
            .update_subscription(
                provider_subscription_id,
                &SubscriptionChange {
                    plan_code: Some(plan.code.clone()),
                    addons: Vec::new(),
                    end_of_term: at_term_end,
                },
            )
            .await?;

        if let Err(e) = self
            .event_log
            .create(&CreateSubscriptionEventInput {
                subscription_id: subscription.id,
                event_type: "plan_change_requested".to_string(),
                previous_status: Some(subscription.status),
                new_status: Some(subscription.status),
                provider_event_id: None,
                metadata: serde_json::json!({
                    "to_plan": plan.code,
                    "at_term_end": at_term_end,
                }),
            })
            .await
        {
            tracing::warn!(error = %e, "Failed to write plan change audit event");
        }

        tracing::info!(
            user_id = %user_id,
            to_plan = %plan.code,
            at_term_end,
            "Plan change requested at provider"
        );

        Ok(())
    }

    /// Schedule cancellation at the end of the current term. The terminal
    /// `cancelled` state lands when the provider's webhook arrives.
    pub async fn cancel_at_term_end(&self, user_id: Uuid) -> AppResult<()> {
        let subscription = self
            .store
            .get_active_subscription(user_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let provider_subscription_id = subscription
            .provider_subscription_id
            .as_deref()
            .ok_or_else(|| {
                AppError::InvalidInput("Subscription has no provider id to cancel".into())
            })?;

        self.provider
            .cancel_subscription(provider_subscription_id, true)
            .await?;

        self.store.set_auto_renew(subscription.id, false).await?;

        if let Err(e) = self
            .event_log
            .create(&CreateSubscriptionEventInput {
                subscription_id: subscription.id,
                event_type: "cancel_scheduled".to_string(),
                previous_status: Some(subscription.status),
                new_status: Some(subscription.status),
                provider_event_id: None,
                metadata: serde_json::json!({ "at_term_end": true }),
            })
            .await
        {
            tracing::warn!(error = %e, "Failed to write cancellation audit event");
        }

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            "Cancellation scheduled at term end"
        );

        Ok(())
    }
}
