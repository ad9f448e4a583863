use std::sync::Arc;

use crate::{
    application::use_cases::{
        catalog::CatalogUseCases, checkout::CheckoutUseCases, entitlements::EntitlementsUseCases,
        reconciliation::ReconciliationUseCases,
    },
    infra::config::AppConfig,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub catalog_use_cases: Arc<CatalogUseCases>,
    pub entitlements_use_cases: Arc<EntitlementsUseCases>,
    pub checkout_use_cases: Arc<CheckoutUseCases>,
    pub reconciliation_use_cases: Arc<ReconciliationUseCases>,
}
