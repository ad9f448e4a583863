//! Expiry policy for add-on instances.

use chrono::NaiveDateTime;

use crate::domain::entities::addon::AddonDefinition;

/// Effective expiry for one unit of an add-on.
///
/// Default policy: the unit expires with the owning subscription's current
/// term. Non-expiring consumables (message-credit packs) return `None` and
/// are only ever deactivated explicitly, by cancellation or exhaustion of
/// their `remaining_count`.
pub fn effective_expiry(
    definition: &AddonDefinition,
    subscription_term_end: Option<NaiveDateTime>,
) -> Option<NaiveDateTime> {
    if definition.non_expiring {
        return None;
    }
    subscription_term_end
}
