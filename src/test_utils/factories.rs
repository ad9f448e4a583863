//! Test data factories for creating valid test fixtures.
//!
//! Each factory function creates a complete, valid object with sensible
//! defaults. Use the closure parameter to override specific fields as needed.

use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::application::use_cases::reconciliation::UserRef;
use crate::domain::entities::addon::{AddonDefinition, AddonInstance, AddonInstanceStatus};
use crate::domain::entities::plan::Plan;
use crate::domain::entities::subscription::{Subscription, SubscriptionStatus};

/// Fixed reference instant so tests are deterministic.
pub fn test_datetime() -> NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(2026, 8, 5)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

pub fn test_datetime_offset_days(days: i64) -> NaiveDateTime {
    test_datetime() + chrono::Duration::days(days)
}

pub fn create_test_plan(overrides: impl FnOnce(&mut Plan)) -> Plan {
    let mut plan = Plan {
        id: Uuid::new_v4(),
        code: "P1".to_string(),
        name: "Starter".to_string(),
        description: Some("Starter plan".to_string()),
        price_cents: 1900,
        currency: "EUR".to_string(),
        word_limit: 50_000,
        storage_limit_mb: 1_024,
        message_limit: 500,
        is_public: true,
        display_order: 0,
        created_at: Some(test_datetime()),
        updated_at: Some(test_datetime()),
    };
    overrides(&mut plan);
    plan
}

pub fn create_test_addon_definition(
    overrides: impl FnOnce(&mut AddonDefinition),
) -> AddonDefinition {
    let mut definition = AddonDefinition {
        id: Uuid::new_v4(),
        code: "STORAGE10".to_string(),
        name: "Storage 10GB".to_string(),
        description: None,
        price_cents: 300,
        currency: "EUR".to_string(),
        is_recurring: true,
        non_expiring: false,
        unit_message_limit: None,
        created_at: Some(test_datetime()),
        updated_at: Some(test_datetime()),
    };
    overrides(&mut definition);
    definition
}

pub fn create_test_subscription(
    user_id: Uuid,
    plan_id: Uuid,
    overrides: impl FnOnce(&mut Subscription),
) -> Subscription {
    let mut subscription = Subscription {
        id: Uuid::new_v4(),
        user_id,
        plan_id,
        status: SubscriptionStatus::Active,
        provider_subscription_id: Some(format!("sub_{}", Uuid::new_v4().simple())),
        provider_customer_id: Some(format!("cus_{}", Uuid::new_v4().simple())),
        amount_cents: Some(1900),
        currency: "EUR".to_string(),
        current_term_start: Some(test_datetime()),
        current_term_end: Some(test_datetime_offset_days(30)),
        auto_renew: true,
        notes: None,
        activated_at: Some(test_datetime()),
        cancelled_at: None,
        created_at: Some(test_datetime()),
        updated_at: Some(test_datetime()),
    };
    overrides(&mut subscription);
    subscription
}

pub fn create_test_addon_instance(
    user_id: Uuid,
    addon_id: Uuid,
    subscription_id: Uuid,
    overrides: impl FnOnce(&mut AddonInstance),
) -> AddonInstance {
    let mut instance = AddonInstance {
        id: Uuid::new_v4(),
        user_id,
        addon_id,
        subscription_id,
        status: AddonInstanceStatus::Active,
        is_active: true,
        purchased_at: test_datetime(),
        expires_at: Some(test_datetime_offset_days(30)),
        provider_instance_id: Some(format!("ai_{}", Uuid::new_v4().simple())),
        initial_count: None,
        remaining_count: None,
        created_at: Some(test_datetime()),
        updated_at: Some(test_datetime()),
    };
    overrides(&mut instance);
    instance
}

pub fn create_test_user(overrides: impl FnOnce(&mut UserRef)) -> UserRef {
    let mut user = UserRef {
        id: Uuid::new_v4(),
        email: format!("user-{}@example.com", Uuid::new_v4().simple()),
    };
    overrides(&mut user);
    user
}
