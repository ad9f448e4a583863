use async_trait::async_trait;
use uuid::Uuid;

use crate::application::app_error::AppResult;

/// Signal consumed by the authentication layer: a user's entitlements
/// changed and cached session claims must be re-issued.
#[async_trait]
pub trait SessionNotifierPort: Send + Sync {
    async fn entitlements_changed(&self, user_id: Uuid) -> AppResult<()>;
}
