use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    application::app_error::{AppError, AppResult},
    application::use_cases::reconciliation::{
        CreateSubscriptionEventInput, SubscriptionEventLogRepo, SubscriptionEventProfile,
    },
};

fn row_to_profile(row: sqlx::postgres::PgRow) -> SubscriptionEventProfile {
    SubscriptionEventProfile {
        id: row.get("id"),
        subscription_id: row.get("subscription_id"),
        event_type: row.get("event_type"),
        previous_status: row.get("previous_status"),
        new_status: row.get("new_status"),
        provider_event_id: row.get("provider_event_id"),
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, subscription_id, event_type, previous_status, new_status,
    provider_event_id, metadata, created_at
"#;

#[async_trait]
impl SubscriptionEventLogRepo for PostgresPersistence {
    async fn create(&self, input: &CreateSubscriptionEventInput) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscription_events
                (id, subscription_id, event_type, previous_status, new_status, provider_event_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.subscription_id)
        .bind(&input.event_type)
        .bind(input.previous_status)
        .bind(input.new_status)
        .bind(&input.provider_event_id)
        .bind(&input.metadata)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn list_by_subscription(
        &self,
        subscription_id: Uuid,
    ) -> AppResult<Vec<SubscriptionEventProfile>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM subscription_events WHERE subscription_id = $1 ORDER BY created_at DESC",
            SELECT_COLS
        ))
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.into_iter().map(row_to_profile).collect())
    }
}
