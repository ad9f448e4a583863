//! Add-on quantity reconciler.
//!
//! The provider's add-on list is authoritative: for every add-on code an
//! event reports, the count of live local rows must converge to the reported
//! quantity. Quantity is extensional (one row per unit), so convergence is a
//! row diff: deactivate surplus, refresh survivors, create shortfall.
//!
//! The diff is computed against rows the store has already locked, and the
//! whole batch is applied in that same transaction. Re-running the diff with
//! the same target quantity produces refresh-only ops, which is what makes
//! duplicate deliveries safe.

use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::domain::entities::addon::{AddonDefinition, AddonInstance};
use crate::domain::expiry;

/// One (addon_code, desired_quantity) target taken from an event.
#[derive(Debug, Clone, PartialEq)]
pub struct AddonTarget {
    pub addon_code: String,
    pub quantity: i64,
    pub provider_instance_id: Option<String>,
}

/// Collapse event add-on entries into per-code targets. The provider has
/// been seen repeating a code across entries; quantities are summed and the
/// last instance id wins.
pub fn targets_from_event(
    addons: &[crate::domain::entities::provider_event::EventAddon],
) -> Vec<AddonTarget> {
    let mut targets: Vec<AddonTarget> = Vec::new();
    for addon in addons {
        match targets
            .iter_mut()
            .find(|t| t.addon_code == addon.addon_code)
        {
            Some(existing) => {
                existing.quantity += addon.quantity;
                if addon.provider_instance_id.is_some() {
                    existing.provider_instance_id = addon.provider_instance_id.clone();
                }
            }
            None => targets.push(AddonTarget {
                addon_code: addon.addon_code.clone(),
                quantity: addon.quantity,
                provider_instance_id: addon.provider_instance_id.clone(),
            }),
        }
    }
    targets
}

/// A row to insert for one new unit.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAddonInstance {
    pub user_id: Uuid,
    pub addon_id: Uuid,
    pub subscription_id: Uuid,
    pub purchased_at: NaiveDateTime,
    pub expires_at: Option<NaiveDateTime>,
    pub provider_instance_id: Option<String>,
    pub initial_count: Option<i32>,
    pub remaining_count: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AddonOp {
    /// Surplus row: status -> cancelled.
    Deactivate { instance_id: Uuid },
    /// Surviving row: re-point status/purchase-time/expiry/instance-id at the
    /// new event, and re-link to the subscription that now owns the unit (an
    /// upgrade moves surviving units to the superseding subscription, so its
    /// eventual cancellation cascade catches them). Consumption counters are
    /// left untouched.
    Refresh {
        instance_id: Uuid,
        subscription_id: Uuid,
        purchased_at: NaiveDateTime,
        expires_at: Option<NaiveDateTime>,
        provider_instance_id: Option<String>,
    },
    Create(NewAddonInstance),
}

/// Diff one (user, add-on) pair toward the provider-reported quantity.
///
/// `existing_live` must be the live rows for the pair ordered by purchase
/// time ascending; the oldest rows are the ones deactivated when shrinking.
/// A reported quantity below one is clamped to one: the provider only lists
/// an add-on while at least one unit is owned.
pub fn diff_addon_quantity(
    user_id: Uuid,
    subscription_id: Uuid,
    definition: &AddonDefinition,
    existing_live: &[AddonInstance],
    target: &AddonTarget,
    subscription_term_end: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> Vec<AddonOp> {
    let desired = target.quantity.max(1) as usize;
    let current = existing_live.len();
    let expires_at = expiry::effective_expiry(definition, subscription_term_end);

    let mut ops = Vec::new();

    let survivors: &[AddonInstance] = if current > desired {
        let (surplus, survivors) = existing_live.split_at(current - desired);
        for row in surplus {
            ops.push(AddonOp::Deactivate {
                instance_id: row.id,
            });
        }
        survivors
    } else {
        existing_live
    };

    for row in survivors {
        ops.push(AddonOp::Refresh {
            instance_id: row.id,
            subscription_id,
            purchased_at: now,
            expires_at,
            provider_instance_id: target.provider_instance_id.clone(),
        });
    }

    for _ in current..desired {
        ops.push(AddonOp::Create(NewAddonInstance {
            user_id,
            addon_id: definition.id,
            subscription_id,
            purchased_at: now,
            expires_at,
            provider_instance_id: target.provider_instance_id.clone(),
            initial_count: definition.unit_message_limit,
            remaining_count: definition.unit_message_limit,
        }));
    }

    ops
}
