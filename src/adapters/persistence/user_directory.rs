use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    application::app_error::{AppError, AppResult},
    application::use_cases::reconciliation::{UserDirectoryRepo, UserRef},
};

fn row_to_user(row: &sqlx::postgres::PgRow) -> UserRef {
    UserRef {
        id: row.get("id"),
        email: row.get("email"),
    }
}

// The users table belongs to the surrounding system; this engine only ever
// reads identities from it.
const USER_COLS: &str = "id, email";

#[async_trait]
impl UserDirectoryRepo for PostgresPersistence {
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<UserRef>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = $1", USER_COLS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_user))
    }

    async fn get_by_email(&self, email: &str) -> AppResult<Option<UserRef>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE LOWER(email) = LOWER($1)",
            USER_COLS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_user))
    }
}
