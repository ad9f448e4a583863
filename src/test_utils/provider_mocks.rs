//! Mock billing provider for tests.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::application::app_error::{AppError, AppResult};
use crate::application::ports::billing_provider::{
    AddonOrder, BillingProviderPort, CheckoutCustomer, CheckoutUrls, HostedPage, ProviderCustomer,
    ProviderSubscription, SubscriptionChange,
};

/// Records calls and serves canned provider state.
#[derive(Default)]
pub struct MockBillingProvider {
    subscription: Mutex<Option<ProviderSubscription>>,
    customer: Mutex<Option<ProviderCustomer>>,
    pub calls: Mutex<Vec<String>>,
    fail_next: Mutex<bool>,
}

impl MockBillingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_subscription(&self, subscription: ProviderSubscription) {
        *self.subscription.lock().unwrap() = Some(subscription);
    }

    pub fn set_customer(&self, customer: ProviderCustomer) {
        *self.customer.lock().unwrap() = Some(customer);
    }

    /// Make the next call fail with a retryable provider error.
    pub fn fail_next_call(&self) {
        *self.fail_next.lock().unwrap() = true;
    }

    pub fn calls_snapshot(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) -> AppResult<()> {
        self.calls.lock().unwrap().push(call.into());
        if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
            return Err(AppError::ProviderApi("simulated provider outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BillingProviderPort for MockBillingProvider {
    async fn create_hosted_checkout(
        &self,
        customer: &CheckoutCustomer,
        plan_code: &str,
        addons: &[AddonOrder],
        _urls: &CheckoutUrls,
    ) -> AppResult<HostedPage> {
        self.record(format!(
            "create_hosted_checkout:{}:{}:{}",
            customer.email,
            plan_code,
            addons.len()
        ))?;
        Ok(HostedPage {
            url: format!("https://billing.example.com/hostedpage/{}", plan_code),
            page_id: Some("hp_test_1".to_string()),
        })
    }

    async fn create_addon_checkout(
        &self,
        provider_subscription_id: &str,
        addons: &[AddonOrder],
        _urls: &CheckoutUrls,
    ) -> AppResult<HostedPage> {
        self.record(format!(
            "create_addon_checkout:{}:{}",
            provider_subscription_id,
            addons
                .iter()
                .map(|a| format!("{}x{}", a.addon_code, a.quantity))
                .collect::<Vec<_>>()
                .join(",")
        ))?;
        Ok(HostedPage {
            url: format!(
                "https://billing.example.com/hostedpage/addon/{}",
                provider_subscription_id
            ),
            page_id: Some("hp_test_2".to_string()),
        })
    }

    async fn update_subscription(
        &self,
        provider_subscription_id: &str,
        change: &SubscriptionChange,
    ) -> AppResult<ProviderSubscription> {
        self.record(format!(
            "update_subscription:{}:end_of_term={}",
            provider_subscription_id, change.end_of_term
        ))?;
        self.subscription
            .lock()
            .unwrap()
            .clone()
            .ok_or(AppError::NotFound)
    }

    async fn cancel_subscription(
        &self,
        provider_subscription_id: &str,
        at_term_end: bool,
    ) -> AppResult<()> {
        self.record(format!(
            "cancel_subscription:{}:at_term_end={}",
            provider_subscription_id, at_term_end
        ))
    }

    async fn fetch_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> AppResult<Option<ProviderSubscription>> {
        self.record(format!("fetch_subscription:{}", provider_subscription_id))?;
        Ok(self
            .subscription
            .lock()
            .unwrap()
            .clone()
            .filter(|s| s.subscription_id == provider_subscription_id))
    }

    async fn fetch_customer(&self, customer_id: &str) -> AppResult<Option<ProviderCustomer>> {
        self.record(format!("fetch_customer:{}", customer_id))?;
        Ok(self
            .customer
            .lock()
            .unwrap()
            .clone()
            .filter(|c| c.customer_id == customer_id))
    }
}
