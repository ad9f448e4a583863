use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::app_error::AppResult;
use crate::application::ports::clock::Clock;
use crate::application::use_cases::catalog::PlanCatalogRepo;
use crate::application::use_cases::reconciliation::{
    EntitlementStore, SubscriptionEventLogRepo, SubscriptionEventProfile,
};
use crate::domain::entities::addon::AddonInstance;
use crate::domain::entities::subscription::SubscriptionStatus;

// ============================================================================
// Snapshot Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct PlanSnapshot {
    pub code: String,
    pub name: String,
    pub word_limit: i64,
    pub storage_limit_mb: i64,
    pub message_limit: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionSnapshot {
    pub id: Uuid,
    pub status: SubscriptionStatus,
    pub current_term_end: Option<NaiveDateTime>,
    pub auto_renew: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddonSnapshot {
    pub code: String,
    pub name: String,
    /// Count of live, unexpired units.
    pub quantity: i64,
    pub non_expiring: bool,
    /// Latest expiry among live units; `None` for non-expiring consumables.
    pub expires_at: Option<NaiveDateTime>,
    /// Remaining message credits summed over metered units.
    pub remaining_messages: Option<i64>,
}

/// The authoritative (plan, add-ons, quantities, expiries) view for a user,
/// derived from local state. This is what feature gates and session tokens
/// are built from.
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementSnapshot {
    pub plan: Option<PlanSnapshot>,
    pub subscription: Option<SubscriptionSnapshot>,
    pub addons: Vec<AddonSnapshot>,
}

// ============================================================================
// Session Token Claims
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonClaim {
    pub code: String,
    pub quantity: i64,
}

/// Entitlement info embedded in session tokens (always present).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementClaims {
    pub status: String,
    pub plan_code: Option<String>,
    pub plan_name: Option<String>,
    pub current_term_end: Option<i64>,
    pub auto_renew: Option<bool>,
    pub addons: Vec<AddonClaim>,
}

impl EntitlementClaims {
    pub fn none() -> Self {
        Self {
            status: "none".to_string(),
            plan_code: None,
            plan_name: None,
            current_term_end: None,
            auto_renew: None,
            addons: Vec::new(),
        }
    }

    pub fn from_snapshot(snapshot: &EntitlementSnapshot) -> Self {
        let Some(subscription) = &snapshot.subscription else {
            return Self::none();
        };
        Self {
            status: subscription.status.as_str().to_string(),
            plan_code: snapshot.plan.as_ref().map(|p| p.code.clone()),
            plan_name: snapshot.plan.as_ref().map(|p| p.name.clone()),
            current_term_end: subscription
                .current_term_end
                .map(|t| t.and_utc().timestamp()),
            auto_renew: Some(subscription.auto_renew),
            addons: snapshot
                .addons
                .iter()
                .map(|a| AddonClaim {
                    code: a.code.clone(),
                    quantity: a.quantity,
                })
                .collect(),
        }
    }
}

// ============================================================================
// Use Cases
// ============================================================================

#[derive(Clone)]
pub struct EntitlementsUseCases {
    store: Arc<dyn EntitlementStore>,
    catalog_repo: Arc<dyn PlanCatalogRepo>,
    event_log: Arc<dyn SubscriptionEventLogRepo>,
    clock: Arc<dyn Clock>,
}

impl EntitlementsUseCases {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        catalog_repo: Arc<dyn PlanCatalogRepo>,
        event_log: Arc<dyn SubscriptionEventLogRepo>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            catalog_repo,
            event_log,
            clock,
        }
    }

    /// Whether a live row still grants entitlement at `now`. Calendar expiry
    /// is evaluated at read time; rows are only transitioned by the
    /// reconciler.
    fn is_unexpired(instance: &AddonInstance, now: NaiveDateTime) -> bool {
        instance.expires_at.is_none_or(|e| e > now)
    }

    pub async fn snapshot_for_user(&self, user_id: Uuid) -> AppResult<EntitlementSnapshot> {
        let now = self.clock.now();

        let subscription = self.store.get_active_subscription(user_id).await?;
        let plan = match &subscription {
            Some(sub) => self.catalog_repo.get_plan_by_id(sub.plan_id).await?,
            None => None,
        };

        let rows = self.store.list_live_addon_instances_for_user(user_id).await?;
        let mut grouped: HashMap<Uuid, Vec<AddonInstance>> = HashMap::new();
        for row in rows {
            if Self::is_unexpired(&row, now) {
                grouped.entry(row.addon_id).or_default().push(row);
            }
        }

        let mut addons = Vec::new();
        for (addon_id, units) in grouped {
            let Some(definition) = self.catalog_repo.get_addon_by_id(addon_id).await? else {
                tracing::warn!(%addon_id, "Add-on instance references unknown definition");
                continue;
            };
            let remaining_messages = definition.is_metered().then(|| {
                units
                    .iter()
                    .map(|u| i64::from(u.remaining_count.unwrap_or(0).max(0)))
                    .sum()
            });
            addons.push(AddonSnapshot {
                code: definition.code,
                name: definition.name,
                quantity: units.len() as i64,
                non_expiring: definition.non_expiring,
                expires_at: units.iter().filter_map(|u| u.expires_at).max(),
                remaining_messages,
            });
        }
        addons.sort_by(|a, b| a.code.cmp(&b.code));

        Ok(EntitlementSnapshot {
            plan: plan.map(|p| PlanSnapshot {
                code: p.code,
                name: p.name,
                word_limit: p.word_limit,
                storage_limit_mb: p.storage_limit_mb,
                message_limit: p.message_limit,
            }),
            subscription: subscription.map(|s| SubscriptionSnapshot {
                id: s.id,
                status: s.status,
                current_term_end: s.current_term_end,
                auto_renew: s.auto_renew,
            }),
            addons,
        })
    }

    /// Boolean feature gate: does the user hold at least one live, unexpired
    /// unit of the add-on?
    pub async fn is_addon_active(&self, user_id: Uuid, addon_code: &str) -> AppResult<bool> {
        let Some(definition) = self.catalog_repo.get_addon_by_code(addon_code).await? else {
            tracing::warn!(addon_code, "Feature gate queried for unknown add-on code");
            return Ok(false);
        };
        let now = self.clock.now();
        let rows = self.store.list_live_addon_instances_for_user(user_id).await?;
        Ok(rows
            .iter()
            .any(|r| r.addon_id == definition.id && Self::is_unexpired(r, now)))
    }

    pub async fn claims_for_user(&self, user_id: Uuid) -> AppResult<EntitlementClaims> {
        let snapshot = self.snapshot_for_user(user_id).await?;
        Ok(EntitlementClaims::from_snapshot(&snapshot))
    }

    /// Audit trail across all of the user's subscription rows, newest first.
    pub async fn subscription_history(
        &self,
        user_id: Uuid,
    ) -> AppResult<Vec<SubscriptionEventProfile>> {
        let subscriptions = self.store.list_subscriptions_for_user(user_id).await?;
        let mut events = Vec::new();
        for subscription in subscriptions {
            events.extend(self.event_log.list_by_subscription(subscription.id).await?);
        }
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(events)
    }
}
