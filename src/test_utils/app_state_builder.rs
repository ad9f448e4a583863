//! Builder assembling an [`AppState`] backed entirely by in-memory mocks,
//! for route-level tests.

use std::sync::Arc;

use axum::http::HeaderValue;
use secrecy::SecretString;
use time::Duration;
use url::Url;

use crate::{
    adapters::http::app_state::AppState,
    application::ports::billing_provider::CheckoutUrls,
    application::ports::clock::FixedClock,
    application::use_cases::{
        catalog::CatalogUseCases,
        checkout::CheckoutUseCases,
        entitlements::EntitlementsUseCases,
        reconciliation::{ReconciliationUseCases, UserRef},
    },
    domain::entities::{addon::AddonDefinition, plan::Plan},
    infra::config::AppConfig,
    test_utils::{
        billing_mocks::{
            InMemoryEntitlementStore, InMemoryPlanCatalogRepo, InMemorySubscriptionEventLogRepo,
            InMemoryUserDirectoryRepo,
        },
        factories::test_datetime,
        provider_mocks::MockBillingProvider,
        session_mocks::MockSessionNotifier,
    },
};

pub struct TestAppStateBuilder {
    plans: Vec<Plan>,
    addons: Vec<AddonDefinition>,
    users: Vec<UserRef>,
    webhook_secret: Option<String>,
    store: Arc<InMemoryEntitlementStore>,
    provider: Arc<MockBillingProvider>,
    sessions: Arc<MockSessionNotifier>,
    event_log: Arc<InMemorySubscriptionEventLogRepo>,
}

impl Default for TestAppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAppStateBuilder {
    pub fn new() -> Self {
        Self {
            plans: Vec::new(),
            addons: Vec::new(),
            users: Vec::new(),
            webhook_secret: None,
            store: Arc::new(InMemoryEntitlementStore::new()),
            provider: Arc::new(MockBillingProvider::new()),
            sessions: Arc::new(MockSessionNotifier::new()),
            event_log: Arc::new(InMemorySubscriptionEventLogRepo::new()),
        }
    }

    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plans.push(plan);
        self
    }

    pub fn with_addon(mut self, addon: AddonDefinition) -> Self {
        self.addons.push(addon);
        self
    }

    pub fn with_user(mut self, user: UserRef) -> Self {
        self.users.push(user);
        self
    }

    pub fn with_webhook_secret(mut self, secret: &str) -> Self {
        self.webhook_secret = Some(secret.to_string());
        self
    }

    /// Shared handle onto the in-memory store, for seeding and assertions.
    pub fn store(&self) -> Arc<InMemoryEntitlementStore> {
        self.store.clone()
    }

    pub fn provider(&self) -> Arc<MockBillingProvider> {
        self.provider.clone()
    }

    pub fn sessions(&self) -> Arc<MockSessionNotifier> {
        self.sessions.clone()
    }

    pub fn event_log(&self) -> Arc<InMemorySubscriptionEventLogRepo> {
        self.event_log.clone()
    }

    fn test_config(webhook_secret: Option<String>) -> AppConfig {
        AppConfig {
            jwt_secret: SecretString::new("test-jwt-secret-which-is-long-enough".into()),
            access_token_ttl: Duration::hours(1),
            app_origin: Url::parse("http://localhost:3000/").unwrap(),
            cors_origin: HeaderValue::from_static("http://localhost:3000"),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            database_url: "postgres://unused".to_string(),
            redis_url: "redis://unused".to_string(),
            zoho_api_base: "https://billing.invalid/api/v1".to_string(),
            zoho_accounts_base: "https://accounts.invalid".to_string(),
            zoho_client_id: "test_client".to_string(),
            zoho_client_secret: SecretString::new("test_secret".into()),
            zoho_refresh_token: SecretString::new("test_refresh".into()),
            webhook_secret,
            checkout_success_url: "http://localhost:3000/billing/success".to_string(),
            checkout_cancel_url: "http://localhost:3000/billing/cancelled".to_string(),
        }
    }

    pub fn build(self) -> AppState {
        let catalog_repo = Arc::new(InMemoryPlanCatalogRepo::new(self.plans, self.addons));
        let user_repo = Arc::new(InMemoryUserDirectoryRepo::with_users(self.users));
        let clock = Arc::new(FixedClock(test_datetime()));

        let catalog_use_cases = CatalogUseCases::new(catalog_repo.clone());

        let reconciliation_use_cases = ReconciliationUseCases::new(
            catalog_repo.clone(),
            user_repo.clone(),
            self.store.clone(),
            self.event_log.clone(),
            self.provider.clone(),
            self.sessions.clone(),
            clock.clone(),
        );

        let entitlements_use_cases = EntitlementsUseCases::new(
            self.store.clone(),
            catalog_repo.clone(),
            self.event_log.clone(),
            clock,
        );

        let checkout_use_cases = CheckoutUseCases::new(
            catalog_repo,
            user_repo,
            self.store.clone(),
            self.event_log.clone(),
            self.provider.clone(),
            CheckoutUrls {
                success_url: "http://localhost:3000/billing/success".to_string(),
                cancel_url: "http://localhost:3000/billing/cancelled".to_string(),
            },
        );

        AppState {
            config: Arc::new(Self::test_config(self.webhook_secret)),
            catalog_use_cases: Arc::new(catalog_use_cases),
            entitlements_use_cases: Arc::new(entitlements_use_cases),
            checkout_use_cases: Arc::new(checkout_use_cases),
            reconciliation_use_cases: Arc::new(reconciliation_use_cases),
        }
    }
}
