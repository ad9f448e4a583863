//! Redis-backed session refresh signal.
//!
//! Each user has an entitlement version counter; the auth layer compares the
//! counter against the version baked into a session token and re-issues the
//! token when they diverge. A pub/sub message lets connected gateways react
//! without polling.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::application::app_error::{AppError, AppResult};
use crate::application::ports::session_notifier::SessionNotifierPort;

const VERSION_KEY_PREFIX: &str = "entitlements:version:";
const CHANGED_CHANNEL: &str = "entitlements:changed";

pub struct RedisSessionNotifier {
    conn: ConnectionManager,
}

impl RedisSessionNotifier {
    pub async fn new(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SessionNotifierPort for RedisSessionNotifier {
    async fn entitlements_changed(&self, user_id: Uuid) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let key = format!("{}{}", VERSION_KEY_PREFIX, user_id);

        let _: i64 = conn
            .incr(&key, 1)
            .await
            .map_err(|e| AppError::Internal(format!("Redis INCR failed: {}", e)))?;
        let _: () = conn
            .publish(CHANGED_CHANNEL, user_id.to_string())
            .await
            .map_err(|e| AppError::Internal(format!("Redis PUBLISH failed: {}", e)))?;

        tracing::debug!(user_id = %user_id, "Entitlement version bumped");
        Ok(())
    }
}
