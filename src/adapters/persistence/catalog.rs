use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    application::app_error::{AppError, AppResult},
    application::use_cases::catalog::PlanCatalogRepo,
    domain::entities::addon::AddonDefinition,
    domain::entities::plan::Plan,
};

fn row_to_plan(row: &sqlx::postgres::PgRow) -> Plan {
    Plan {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        description: row.get("description"),
        price_cents: row.get("price_cents"),
        currency: row.get("currency"),
        word_limit: row.get("word_limit"),
        storage_limit_mb: row.get("storage_limit_mb"),
        message_limit: row.get("message_limit"),
        is_public: row.get("is_public"),
        display_order: row.get("display_order"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_addon(row: &sqlx::postgres::PgRow) -> AddonDefinition {
    AddonDefinition {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        description: row.get("description"),
        price_cents: row.get("price_cents"),
        currency: row.get("currency"),
        is_recurring: row.get("is_recurring"),
        non_expiring: row.get("non_expiring"),
        unit_message_limit: row.get("unit_message_limit"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const PLAN_COLS: &str = r#"
    id, code, name, description, price_cents, currency,
    word_limit, storage_limit_mb, message_limit, is_public, display_order,
    created_at, updated_at
"#;

const ADDON_COLS: &str = r#"
    id, code, name, description, price_cents, currency,
    is_recurring, non_expiring, unit_message_limit, created_at, updated_at
"#;

#[async_trait]
impl PlanCatalogRepo for PostgresPersistence {
    async fn get_plan_by_id(&self, id: Uuid) -> AppResult<Option<Plan>> {
        let row = sqlx::query(&format!("SELECT {} FROM plans WHERE id = $1", PLAN_COLS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_plan))
    }

    async fn get_plan_by_code(&self, code: &str) -> AppResult<Option<Plan>> {
        let row = sqlx::query(&format!("SELECT {} FROM plans WHERE code = $1", PLAN_COLS))
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_plan))
    }

    async fn list_public_plans(&self) -> AppResult<Vec<Plan>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM plans WHERE is_public = true ORDER BY display_order ASC",
            PLAN_COLS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_plan).collect())
    }

    async fn get_addon_by_id(&self, id: Uuid) -> AppResult<Option<AddonDefinition>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM addon_definitions WHERE id = $1",
            ADDON_COLS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_addon))
    }

    async fn get_addon_by_code(&self, code: &str) -> AppResult<Option<AddonDefinition>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM addon_definitions WHERE code = $1",
            ADDON_COLS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_addon))
    }

    async fn list_addons(&self) -> AppResult<Vec<AddonDefinition>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM addon_definitions ORDER BY code ASC",
            ADDON_COLS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_addon).collect())
    }
}
