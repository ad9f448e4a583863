//! Subscription state resolver.
//!
//! Pure decision logic: given a classified subscription event and the user's
//! existing subscription rows, pick the transition to apply. The store
//! executes the returned transition inside its transaction, so these
//! functions run against freshly locked rows.
//!
//! Identity is the provider subscription id, never delivery order: replaying
//! an event finds the row it already produced and resolves to the same
//! transition, which is what makes duplicate deliveries safe.

use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::domain::entities::provider_event::SubscriptionEventData;
use crate::domain::entities::subscription::{Subscription, SubscriptionStatus};

/// Field updates applied when a row is created, activated, or renewed from
/// event data.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationUpdate {
    /// Plan resolved from the event's plan code, when it resolved.
    pub plan_id: Option<Uuid>,
    pub provider_subscription_id: String,
    pub provider_customer_id: Option<String>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub current_term_start: Option<NaiveDateTime>,
    pub current_term_end: Option<NaiveDateTime>,
    pub auto_renew: Option<bool>,
    pub notes: String,
}

/// A brand-new `active` row built from event data (webhook arrived for a
/// provider subscription we have no record of).
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubscription {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub update: ActivationUpdate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionTransition {
    /// Create a new active row; optionally supersede a prior active row in
    /// the same unit of work.
    Create {
        new: NewSubscription,
        supersede_id: Option<Uuid>,
    },
    /// Activate the user's pending row in place.
    Activate {
        subscription_id: Uuid,
        update: ActivationUpdate,
    },
    /// Renewal / replay: refresh the already-active row in place.
    Renew {
        subscription_id: Uuid,
        update: ActivationUpdate,
    },
    /// Activate the pending row, then mark the old active row `upgraded`.
    /// Activate-then-supersede ordering keeps the user entitled throughout.
    Upgrade {
        activate_id: Uuid,
        update: ActivationUpdate,
        supersede_id: Uuid,
    },
    /// Cancel the target row and cascade to its add-on instances.
    Cancel { subscription_id: Uuid, notes: String },
    /// Refresh term dates / auto-renew on a live row.
    Update {
        subscription_id: Uuid,
        update: ActivationUpdate,
    },
    /// Mark the user's pending checkout failed.
    MarkFailed { subscription_id: Uuid, notes: String },
    /// Nothing to do; reason is logged and audited.
    Noop { reason: String },
}

fn activation_update(event: &SubscriptionEventData, plan_id: Option<Uuid>, notes: String) -> ActivationUpdate {
    ActivationUpdate {
        plan_id,
        provider_subscription_id: event.provider_subscription_id.clone(),
        provider_customer_id: event.provider_customer_id.clone(),
        amount_cents: event.amount_cents,
        currency: event.currency.clone(),
        current_term_start: event.current_term_start,
        current_term_end: event.current_term_end.or(event.next_billing_at),
        auto_renew: event.auto_renew,
        notes,
    }
}

fn find_by_provider_id<'a>(
    existing: &'a [Subscription],
    provider_subscription_id: &str,
) -> Option<&'a Subscription> {
    existing
        .iter()
        .find(|s| s.provider_subscription_id.as_deref() == Some(provider_subscription_id))
}

/// Resolve a `SubscriptionActive`-class event.
pub fn resolve_activation(
    user_id: Uuid,
    plan_id: Option<Uuid>,
    event: &SubscriptionEventData,
    existing: &[Subscription],
) -> SubscriptionTransition {
    // Same provider subscription id: renewal, or a replayed delivery.
    if let Some(known) = find_by_provider_id(existing, &event.provider_subscription_id) {
        return match known.status {
            SubscriptionStatus::Active => SubscriptionTransition::Renew {
                subscription_id: known.id,
                update: activation_update(event, plan_id, "renewal".to_string()),
            },
            SubscriptionStatus::Pending => SubscriptionTransition::Activate {
                subscription_id: known.id,
                update: activation_update(event, plan_id, "checkout completed".to_string()),
            },
            _ => SubscriptionTransition::Noop {
                reason: format!(
                    "activation replay for superseded subscription {} ({})",
                    known.id,
                    known.status.as_str()
                ),
            },
        };
    }

    let pending = existing
        .iter()
        .find(|s| s.status == SubscriptionStatus::Pending);
    let other_active = existing
        .iter()
        .find(|s| s.status == SubscriptionStatus::Active);

    match (pending, other_active) {
        (Some(pending), Some(active)) => {
            let notes = if pending.plan_id != active.plan_id {
                format!("upgrade superseding subscription {}", active.id)
            } else {
                format!("repurchase superseding subscription {}", active.id)
            };
            SubscriptionTransition::Upgrade {
                activate_id: pending.id,
                update: activation_update(event, plan_id, notes),
                supersede_id: active.id,
            }
        }
        (Some(pending), None) => SubscriptionTransition::Activate {
            subscription_id: pending.id,
            update: activation_update(event, plan_id, "checkout completed".to_string()),
        },
        (None, active) => {
            let Some(plan_id) = plan_id else {
                return SubscriptionTransition::Noop {
                    reason: "activation for unknown subscription without resolvable plan".to_string(),
                };
            };
            // Provider-initiated plan change or re-signup: a new provider
            // subscription replaces the current one.
            let supersede_id = active.map(|a| a.id);
            let notes = match active {
                Some(a) => format!("provider-side replacement of subscription {}", a.id),
                None => "created from provider event".to_string(),
            };
            SubscriptionTransition::Create {
                new: NewSubscription {
                    user_id,
                    plan_id,
                    update: activation_update(event, Some(plan_id), notes),
                },
                supersede_id,
            }
        }
    }
}

/// Resolve a `SubscriptionCancelled` event.
pub fn resolve_cancellation(
    event: &SubscriptionEventData,
    existing: &[Subscription],
) -> SubscriptionTransition {
    match find_by_provider_id(existing, &event.provider_subscription_id) {
        Some(sub) if sub.is_live() => SubscriptionTransition::Cancel {
            subscription_id: sub.id,
            notes: "cancelled by provider event".to_string(),
        },
        Some(sub) => SubscriptionTransition::Noop {
            reason: format!(
                "cancellation replay for subscription {} already {}",
                sub.id,
                sub.status.as_str()
            ),
        },
        None => SubscriptionTransition::Noop {
            reason: format!(
                "cancellation for unknown provider subscription {}",
                event.provider_subscription_id
            ),
        },
    }
}

/// Resolve a `SubscriptionUpdated` event (term refresh, auto-renew toggle,
/// scheduled downgrade notice).
pub fn resolve_update(
    plan_id: Option<Uuid>,
    event: &SubscriptionEventData,
    existing: &[Subscription],
) -> SubscriptionTransition {
    match find_by_provider_id(existing, &event.provider_subscription_id) {
        Some(sub) if sub.is_live() => SubscriptionTransition::Update {
            subscription_id: sub.id,
            update: activation_update(event, plan_id, "provider update".to_string()),
        },
        Some(sub) => SubscriptionTransition::Noop {
            reason: format!(
                "update for subscription {} already {}",
                sub.id,
                sub.status.as_str()
            ),
        },
        None => SubscriptionTransition::Noop {
            reason: format!(
                "update for unknown provider subscription {}",
                event.provider_subscription_id
            ),
        },
    }
}

/// Resolve a `PaymentFailed` event: an in-flight checkout that will never
/// complete is marked failed. Dunning on an active subscription is left to
/// the provider; we only audit it.
pub fn resolve_payment_failure(existing: &[Subscription]) -> SubscriptionTransition {
    match existing
        .iter()
        .find(|s| s.status == SubscriptionStatus::Pending)
    {
        Some(pending) => SubscriptionTransition::MarkFailed {
            subscription_id: pending.id,
            notes: "payment declined".to_string(),
        },
        None => SubscriptionTransition::Noop {
            reason: "payment failure with no pending checkout".to_string(),
        },
    }
}
