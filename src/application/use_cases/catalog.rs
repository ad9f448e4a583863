use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::app_error::AppResult;
use crate::domain::entities::addon::AddonDefinition;
use crate::domain::entities::plan::Plan;

// ============================================================================
// Repository Trait
// ============================================================================

/// Read-only access to the plan / add-on catalog. The catalog is reference
/// data mirrored from the billing provider; this engine never writes it.
#[async_trait]
pub trait PlanCatalogRepo: Send + Sync {
    async fn get_plan_by_id(&self, id: Uuid) -> AppResult<Option<Plan>>;
    async fn get_plan_by_code(&self, code: &str) -> AppResult<Option<Plan>>;
    async fn list_public_plans(&self) -> AppResult<Vec<Plan>>;
    async fn get_addon_by_id(&self, id: Uuid) -> AppResult<Option<AddonDefinition>>;
    async fn get_addon_by_code(&self, code: &str) -> AppResult<Option<AddonDefinition>>;
    async fn list_addons(&self) -> AppResult<Vec<AddonDefinition>>;
}

// ============================================================================
// Use Cases
// ============================================================================

#[derive(Clone)]
pub struct CatalogUseCases {
    catalog_repo: Arc<dyn PlanCatalogRepo>,
}

impl CatalogUseCases {
    pub fn new(catalog_repo: Arc<dyn PlanCatalogRepo>) -> Self {
        Self { catalog_repo }
    }

    pub async fn list_public_plans(&self) -> AppResult<Vec<Plan>> {
        self.catalog_repo.list_public_plans().await
    }

    pub async fn list_addons(&self) -> AppResult<Vec<AddonDefinition>> {
        self.catalog_repo.list_addons().await
    }
}
