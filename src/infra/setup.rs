use std::fs::File;
use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    adapters::{http::app_state::AppState, persistence::PostgresPersistence},
    application::ports::billing_provider::CheckoutUrls,
    application::ports::clock::SystemClock,
    application::use_cases::{
        catalog::{CatalogUseCases, PlanCatalogRepo},
        checkout::CheckoutUseCases,
        entitlements::EntitlementsUseCases,
        reconciliation::{
            EntitlementStore, ReconciliationUseCases, SubscriptionEventLogRepo, UserDirectoryRepo,
        },
    },
    infra::{
        config::AppConfig, db::init_db, session_refresh::RedisSessionNotifier,
        zoho_billing_adapter::ZohoBillingAdapter, zoho_client::ZohoBillingClient,
    },
};

pub async fn init_app_state() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env();

    let pool = init_db(&config.database_url).await?;
    let postgres_arc = Arc::new(PostgresPersistence::new(pool));

    let catalog_repo = postgres_arc.clone() as Arc<dyn PlanCatalogRepo>;
    let user_repo = postgres_arc.clone() as Arc<dyn UserDirectoryRepo>;
    let store = postgres_arc.clone() as Arc<dyn EntitlementStore>;
    let event_log = postgres_arc.clone() as Arc<dyn SubscriptionEventLogRepo>;

    let zoho_client = Arc::new(ZohoBillingClient::new(
        config.zoho_api_base.clone(),
        config.zoho_accounts_base.clone(),
        config.zoho_client_id.clone(),
        config.zoho_client_secret.clone(),
        config.zoho_refresh_token.clone(),
    ));
    let provider = Arc::new(ZohoBillingAdapter::new(zoho_client));

    let sessions = Arc::new(RedisSessionNotifier::new(&config.redis_url).await?);
    let clock = Arc::new(SystemClock);

    let catalog_use_cases = CatalogUseCases::new(catalog_repo.clone());

    let reconciliation_use_cases = ReconciliationUseCases::new(
        catalog_repo.clone(),
        user_repo.clone(),
        store.clone(),
        event_log.clone(),
        provider.clone(),
        sessions,
        clock.clone(),
    );

    let entitlements_use_cases = EntitlementsUseCases::new(
        store.clone(),
        catalog_repo.clone(),
        event_log.clone(),
        clock,
    );

    let checkout_use_cases = CheckoutUseCases::new(
        catalog_repo,
        user_repo,
        store,
        event_log,
        provider,
        CheckoutUrls {
            success_url: config.checkout_success_url.clone(),
            cancel_url: config.checkout_cancel_url.clone(),
        },
    );

    Ok(AppState {
        config: Arc::new(config),
        catalog_use_cases: Arc::new(catalog_use_cases),
        entitlements_use_cases: Arc::new(entitlements_use_cases),
        checkout_use_cases: Arc::new(checkout_use_cases),
        reconciliation_use_cases: Arc::new(reconciliation_use_cases),
    })
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "entitlements_api=debug,tower_http=debug".into());

    // Console (pretty logs)
    let console_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .pretty();

    // File (structured JSON logs)
    let file = File::create("app.log").expect("cannot create log file");
    let json_layer = fmt::layer()
        .json()
        .with_writer(file)
        .with_current_span(true)
        .with_span_list(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .try_init()
        .ok();
}
