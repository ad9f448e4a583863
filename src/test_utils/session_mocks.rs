//! Mock session-refresh notifier.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::application::app_error::AppResult;
use crate::application::ports::session_notifier::SessionNotifierPort;

#[derive(Default)]
pub struct MockSessionNotifier {
    notifications: Mutex<HashMap<Uuid, u32>>,
}

impl MockSessionNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Times a user's entitlements-changed signal fired.
    pub fn notified(&self, user_id: Uuid) -> u32 {
        *self
            .notifications
            .lock()
            .unwrap()
            .get(&user_id)
            .unwrap_or(&0)
    }
}

#[async_trait]
impl SessionNotifierPort for MockSessionNotifier {
    async fn entitlements_changed(&self, user_id: Uuid) -> AppResult<()> {
        *self.notifications.lock().unwrap().entry(user_id).or_insert(0) += 1;
        Ok(())
    }
}
