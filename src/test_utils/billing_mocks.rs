//! In-memory mock implementations for billing-related repository traits.
//!
//! The store mock mirrors the Postgres adapter's semantics: one mutex plays
//! the role of the row locks, and the same pure resolver/reconciler
//! functions are applied against the held state.

use async_trait::async_trait;
use std::sync::Mutex;
use uuid::Uuid;

use crate::application::app_error::AppResult;
use crate::application::use_cases::catalog::PlanCatalogRepo;
use crate::application::use_cases::reconciliation::{
    CreateSubscriptionEventInput, EntitlementStore, PendingCheckoutInput, ReconcileAction,
    ReconcileCommand, ReconcileOutcome, SubscriptionEventLogRepo, SubscriptionEventProfile,
    TransitionKind, UserDirectoryRepo, UserRef,
};
use crate::domain::entities::addon::{AddonDefinition, AddonInstance, AddonInstanceStatus};
use crate::domain::entities::plan::Plan;
use crate::domain::entities::provider_event::SubscriptionEventKind;
use crate::domain::entities::subscription::{Subscription, SubscriptionStatus};
use crate::domain::reconciler::{self, AddonOp};
use crate::domain::resolver::{self, ActivationUpdate, SubscriptionTransition};

// ============================================================================
// InMemoryPlanCatalogRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryPlanCatalogRepo {
    plans: Vec<Plan>,
    addons: Vec<AddonDefinition>,
}

impl InMemoryPlanCatalogRepo {
    pub fn new(plans: Vec<Plan>, addons: Vec<AddonDefinition>) -> Self {
        Self { plans, addons }
    }
}

#[async_trait]
impl PlanCatalogRepo for InMemoryPlanCatalogRepo {
    async fn get_plan_by_id(&self, id: Uuid) -> AppResult<Option<Plan>> {
        Ok(self.plans.iter().find(|p| p.id == id).cloned())
    }

    async fn get_plan_by_code(&self, code: &str) -> AppResult<Option<Plan>> {
        Ok(self.plans.iter().find(|p| p.code == code).cloned())
    }

    async fn list_public_plans(&self) -> AppResult<Vec<Plan>> {
        Ok(self.plans.iter().filter(|p| p.is_public).cloned().collect())
    }

    async fn get_addon_by_id(&self, id: Uuid) -> AppResult<Option<AddonDefinition>> {
        Ok(self.addons.iter().find(|a| a.id == id).cloned())
    }

    async fn get_addon_by_code(&self, code: &str) -> AppResult<Option<AddonDefinition>> {
        Ok(self.addons.iter().find(|a| a.code == code).cloned())
    }

    async fn list_addons(&self) -> AppResult<Vec<AddonDefinition>> {
        Ok(self.addons.clone())
    }
}

// ============================================================================
// InMemoryUserDirectoryRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryUserDirectoryRepo {
    pub users: Mutex<Vec<UserRef>>,
}

impl InMemoryUserDirectoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: Vec<UserRef>) -> Self {
        Self {
            users: Mutex::new(users),
        }
    }
}

#[async_trait]
impl UserDirectoryRepo for InMemoryUserDirectoryRepo {
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<UserRef>> {
        Ok(self.users.lock().unwrap().iter().find(|u| u.id == id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> AppResult<Option<UserRef>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }
}

// ============================================================================
// InMemorySubscriptionEventLogRepo
// ============================================================================

#[derive(Default)]
pub struct InMemorySubscriptionEventLogRepo {
    pub events: Mutex<Vec<SubscriptionEventProfile>>,
}

impl InMemorySubscriptionEventLogRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events_snapshot(&self) -> Vec<SubscriptionEventProfile> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubscriptionEventLogRepo for InMemorySubscriptionEventLogRepo {
    async fn create(&self, input: &CreateSubscriptionEventInput) -> AppResult<()> {
        self.events.lock().unwrap().push(SubscriptionEventProfile {
            id: Uuid::new_v4(),
            subscription_id: input.subscription_id,
            event_type: input.event_type.clone(),
            previous_status: input.previous_status,
            new_status: input.new_status,
            provider_event_id: input.provider_event_id.clone(),
            metadata: input.metadata.clone(),
            created_at: None,
        });
        Ok(())
    }

    async fn list_by_subscription(
        &self,
        subscription_id: Uuid,
    ) -> AppResult<Vec<SubscriptionEventProfile>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.subscription_id == subscription_id)
            .cloned()
            .collect())
    }
}

// ============================================================================
// InMemoryEntitlementStore
// ============================================================================

#[derive(Default)]
struct StoreState {
    subscriptions: Vec<Subscription>,
    addon_instances: Vec<AddonInstance>,
}

/// In-memory [`EntitlementStore`]. The single mutex serializes passes the
/// way row locks do in Postgres.
#[derive(Default)]
pub struct InMemoryEntitlementStore {
    state: Mutex<StoreState>,
}

impl InMemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriptions_snapshot(&self) -> Vec<Subscription> {
        self.state.lock().unwrap().subscriptions.clone()
    }

    pub fn addon_instances_snapshot(&self) -> Vec<AddonInstance> {
        self.state.lock().unwrap().addon_instances.clone()
    }

    pub fn seed_subscription(&self, subscription: Subscription) {
        self.state.lock().unwrap().subscriptions.push(subscription);
    }

    pub fn seed_addon_instance(&self, instance: AddonInstance) {
        self.state.lock().unwrap().addon_instances.push(instance);
    }
}

fn apply_activation_fields(
    row: &mut Subscription,
    update: &ActivationUpdate,
    now: chrono::NaiveDateTime,
) {
    if let Some(plan_id) = update.plan_id {
        row.plan_id = plan_id;
    }
    row.provider_subscription_id = Some(update.provider_subscription_id.clone());
    if update.provider_customer_id.is_some() {
        row.provider_customer_id = update.provider_customer_id.clone();
    }
    if update.amount_cents.is_some() {
        row.amount_cents = update.amount_cents;
    }
    if let Some(currency) = &update.currency {
        row.currency = currency.clone();
    }
    if update.current_term_start.is_some() {
        row.current_term_start = update.current_term_start;
    }
    if update.current_term_end.is_some() {
        row.current_term_end = update.current_term_end;
    }
    if let Some(auto_renew) = update.auto_renew {
        row.auto_renew = auto_renew;
    }
    row.notes = Some(update.notes.clone());
    row.updated_at = Some(now);
}

struct TransitionResult {
    kind: TransitionKind,
    subscription_id: Option<Uuid>,
    previous_status: Option<SubscriptionStatus>,
    new_status: Option<SubscriptionStatus>,
    cascaded: u32,
    noop_reason: Option<String>,
}

fn apply_transition(
    state: &mut StoreState,
    transition: SubscriptionTransition,
    now: chrono::NaiveDateTime,
) -> TransitionResult {
    match transition {
        SubscriptionTransition::Create { new, supersede_id } => {
            let id = Uuid::new_v4();
            let mut row = Subscription {
                id,
                user_id: new.user_id,
                plan_id: new.plan_id,
                status: SubscriptionStatus::Active,
                provider_subscription_id: None,
                provider_customer_id: None,
                amount_cents: None,
                currency: "EUR".to_string(),
                current_term_start: None,
                current_term_end: None,
                auto_renew: true,
                notes: None,
                activated_at: Some(now),
                cancelled_at: None,
                created_at: Some(now),
                updated_at: Some(now),
            };
            apply_activation_fields(&mut row, &new.update, now);
            state.subscriptions.push(row);

            if let Some(old_id) = supersede_id
                && let Some(old) = state.subscriptions.iter_mut().find(|s| s.id == old_id)
            {
                old.status = SubscriptionStatus::Upgraded;
                old.notes = Some(format!("superseded by subscription {}", id));
                old.updated_at = Some(now);
            }

            TransitionResult {
                kind: TransitionKind::Created,
                subscription_id: Some(id),
                previous_status: None,
                new_status: Some(SubscriptionStatus::Active),
                cascaded: 0,
                noop_reason: None,
            }
        }
        SubscriptionTransition::Activate {
            subscription_id,
            update,
        } => {
            let row = state
                .subscriptions
                .iter_mut()
                .find(|s| s.id == subscription_id)
                .expect("resolver returned id of a loaded row");
            let previous = row.status;
            row.status = SubscriptionStatus::Active;
            row.activated_at = Some(now);
            apply_activation_fields(row, &update, now);
            TransitionResult {
                kind: TransitionKind::Activated,
                subscription_id: Some(subscription_id),
                previous_status: Some(previous),
                new_status: Some(SubscriptionStatus::Active),
                cascaded: 0,
                noop_reason: None,
            }
        }
        SubscriptionTransition::Renew {
            subscription_id,
            update,
        } => {
            let row = state
                .subscriptions
                .iter_mut()
                .find(|s| s.id == subscription_id)
                .expect("resolver returned id of a loaded row");
            apply_activation_fields(row, &update, now);
            TransitionResult {
                kind: TransitionKind::Renewed,
                subscription_id: Some(subscription_id),
                previous_status: Some(SubscriptionStatus::Active),
                new_status: Some(SubscriptionStatus::Active),
                cascaded: 0,
                noop_reason: None,
            }
        }
        SubscriptionTransition::Upgrade {
            activate_id,
            update,
            supersede_id,
        } => {
            // Activate first, then supersede: at no point is the user
            // without an active row.
            let previous;
            {
                let row = state
                    .subscriptions
                    .iter_mut()
                    .find(|s| s.id == activate_id)
                    .expect("resolver returned id of a loaded row");
                previous = row.status;
                row.status = SubscriptionStatus::Active;
                row.activated_at = Some(now);
                apply_activation_fields(row, &update, now);
            }
            if let Some(old) = state.subscriptions.iter_mut().find(|s| s.id == supersede_id) {
                old.status = SubscriptionStatus::Upgraded;
                old.notes = Some(format!("superseded by subscription {}", activate_id));
                old.updated_at = Some(now);
            }
            TransitionResult {
                kind: TransitionKind::Upgraded,
                subscription_id: Some(activate_id),
                previous_status: Some(previous),
                new_status: Some(SubscriptionStatus::Active),
                cascaded: 0,
                noop_reason: None,
            }
        }
        SubscriptionTransition::Cancel {
            subscription_id,
            notes,
        } => {
            let previous;
            {
                let row = state
                    .subscriptions
                    .iter_mut()
                    .find(|s| s.id == subscription_id)
                    .expect("resolver returned id of a loaded row");
                previous = row.status;
                row.status = SubscriptionStatus::Cancelled;
                row.auto_renew = false;
                row.cancelled_at = Some(now);
                row.notes = Some(notes);
                row.updated_at = Some(now);
            }
            let mut cascaded = 0;
            for instance in state
                .addon_instances
                .iter_mut()
                .filter(|a| a.subscription_id == subscription_id && a.status.is_live())
            {
                instance.status = AddonInstanceStatus::Cancelled;
                instance.is_active = false;
                instance.updated_at = Some(now);
                cascaded += 1;
            }
            TransitionResult {
                kind: TransitionKind::Cancelled,
                subscription_id: Some(subscription_id),
                previous_status: Some(previous),
                new_status: Some(SubscriptionStatus::Cancelled),
                cascaded,
                noop_reason: None,
            }
        }
        SubscriptionTransition::Update {
            subscription_id,
            update,
        } => {
            let row = state
                .subscriptions
                .iter_mut()
                .find(|s| s.id == subscription_id)
                .expect("resolver returned id of a loaded row");
            let previous = row.status;
            apply_activation_fields(row, &update, now);
            TransitionResult {
                kind: TransitionKind::Updated,
                subscription_id: Some(subscription_id),
                previous_status: Some(previous),
                new_status: Some(row.status),
                cascaded: 0,
                noop_reason: None,
            }
        }
        SubscriptionTransition::MarkFailed {
            subscription_id,
            notes,
        } => {
            let row = state
                .subscriptions
                .iter_mut()
                .find(|s| s.id == subscription_id)
                .expect("resolver returned id of a loaded row");
            let previous = row.status;
            row.status = SubscriptionStatus::Failed;
            row.notes = Some(notes);
            row.updated_at = Some(now);
            TransitionResult {
                kind: TransitionKind::CheckoutFailed,
                subscription_id: Some(subscription_id),
                previous_status: Some(previous),
                new_status: Some(SubscriptionStatus::Failed),
                cascaded: 0,
                noop_reason: None,
            }
        }
        SubscriptionTransition::Noop { reason } => TransitionResult {
            kind: TransitionKind::Noop,
            subscription_id: None,
            previous_status: None,
            new_status: None,
            cascaded: 0,
            noop_reason: Some(reason),
        },
    }
}

#[async_trait]
impl EntitlementStore for InMemoryEntitlementStore {
    async fn apply_reconciliation(&self, cmd: &ReconcileCommand) -> AppResult<ReconcileOutcome> {
        let mut state = self.state.lock().unwrap();
        let existing: Vec<Subscription> = state
            .subscriptions
            .iter()
            .filter(|s| s.user_id == cmd.user_id)
            .cloned()
            .collect();

        let (result, addons) = match &cmd.action {
            ReconcileAction::PaymentFailure => {
                let transition = resolver::resolve_payment_failure(&existing);
                (apply_transition(&mut state, transition, cmd.now), None)
            }
            ReconcileAction::Subscription {
                event,
                plan_id,
                addons,
            } => {
                let transition = match event.kind {
                    SubscriptionEventKind::Activated => {
                        resolver::resolve_activation(cmd.user_id, *plan_id, event, &existing)
                    }
                    SubscriptionEventKind::Cancelled => {
                        resolver::resolve_cancellation(event, &existing)
                    }
                    SubscriptionEventKind::Updated => {
                        resolver::resolve_update(*plan_id, event, &existing)
                    }
                };
                let result = apply_transition(&mut state, transition, cmd.now);
                let reconcile_addons = matches!(
                    result.kind,
                    TransitionKind::Created
                        | TransitionKind::Activated
                        | TransitionKind::Renewed
                        | TransitionKind::Upgraded
                        | TransitionKind::Updated
                );
                (result, reconcile_addons.then_some(addons))
            }
        };

        let mut created = 0u32;
        let mut refreshed = 0u32;
        let mut deactivated = result.cascaded;

        if let (Some(targets), Some(subscription_id)) = (addons, result.subscription_id) {
            let term_end = state
                .subscriptions
                .iter()
                .find(|s| s.id == subscription_id)
                .and_then(|s| s.current_term_end);

            for resolved in targets {
                let mut live: Vec<AddonInstance> = state
                    .addon_instances
                    .iter()
                    .filter(|a| {
                        a.user_id == cmd.user_id
                            && a.addon_id == resolved.definition.id
                            && a.status.is_live()
                    })
                    .cloned()
                    .collect();
                live.sort_by(|a, b| {
                    (a.purchased_at, a.created_at, a.id).cmp(&(b.purchased_at, b.created_at, b.id))
                });

                let ops = reconciler::diff_addon_quantity(
                    cmd.user_id,
                    subscription_id,
                    &resolved.definition,
                    &live,
                    &resolved.target,
                    term_end,
                    cmd.now,
                );

                for op in ops {
                    match op {
                        AddonOp::Deactivate { instance_id } => {
                            if let Some(row) = state
                                .addon_instances
                                .iter_mut()
                                .find(|a| a.id == instance_id)
                            {
                                row.status = AddonInstanceStatus::Cancelled;
                                row.is_active = false;
                                row.updated_at = Some(cmd.now);
                                deactivated += 1;
                            }
                        }
                        AddonOp::Refresh {
                            instance_id,
                            subscription_id,
                            purchased_at,
                            expires_at,
                            provider_instance_id,
                        } => {
                            if let Some(row) = state
                                .addon_instances
                                .iter_mut()
                                .find(|a| a.id == instance_id)
                            {
                                row.status = AddonInstanceStatus::Active;
                                row.is_active = true;
                                row.subscription_id = subscription_id;
                                row.purchased_at = purchased_at;
                                row.expires_at = expires_at;
                                if provider_instance_id.is_some() {
                                    row.provider_instance_id = provider_instance_id;
                                }
                                row.updated_at = Some(cmd.now);
                                refreshed += 1;
                            }
                        }
                        AddonOp::Create(new) => {
                            state.addon_instances.push(AddonInstance {
                                id: Uuid::new_v4(),
                                user_id: new.user_id,
                                addon_id: new.addon_id,
                                subscription_id: new.subscription_id,
                                status: AddonInstanceStatus::Active,
                                is_active: true,
                                purchased_at: new.purchased_at,
                                expires_at: new.expires_at,
                                provider_instance_id: new.provider_instance_id,
                                initial_count: new.initial_count,
                                remaining_count: new.remaining_count,
                                created_at: Some(cmd.now),
                                updated_at: Some(cmd.now),
                            });
                            created += 1;
                        }
                    }
                }
            }
        }

        Ok(ReconcileOutcome {
            user_id: cmd.user_id,
            transition: result.kind,
            subscription_id: result.subscription_id,
            previous_status: result.previous_status,
            new_status: result.new_status,
            addons_created: created,
            addons_refreshed: refreshed,
            addons_deactivated: deactivated,
            noop_reason: result.noop_reason,
        })
    }

    async fn list_subscriptions_for_user(&self, user_id: Uuid) -> AppResult<Vec<Subscription>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_active_subscription(&self, user_id: Uuid) -> AppResult<Option<Subscription>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .find(|s| s.user_id == user_id && s.status == SubscriptionStatus::Active)
            .cloned())
    }

    async fn upsert_pending_subscription(
        &self,
        input: &PendingCheckoutInput,
    ) -> AppResult<Subscription> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .subscriptions
            .iter_mut()
            .find(|s| s.user_id == input.user_id && s.status == SubscriptionStatus::Pending)
        {
            existing.plan_id = input.plan_id;
            existing.amount_cents = input.amount_cents;
            existing.currency = input.currency.clone();
            existing.notes = Some(input.notes.clone());
            return Ok(existing.clone());
        }

        let row = Subscription {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            plan_id: input.plan_id,
            status: SubscriptionStatus::Pending,
            provider_subscription_id: None,
            provider_customer_id: None,
            amount_cents: input.amount_cents,
            currency: input.currency.clone(),
            current_term_start: None,
            current_term_end: None,
            auto_renew: true,
            notes: Some(input.notes.clone()),
            activated_at: None,
            cancelled_at: None,
            created_at: None,
            updated_at: None,
        };
        state.subscriptions.push(row.clone());
        Ok(row)
    }

    async fn set_auto_renew(&self, subscription_id: Uuid, auto_renew: bool) -> AppResult<()> {
        if let Some(row) = self
            .state
            .lock()
            .unwrap()
            .subscriptions
            .iter_mut()
            .find(|s| s.id == subscription_id)
        {
            row.auto_renew = auto_renew;
        }
        Ok(())
    }

    async fn list_live_addon_instances_for_user(
        &self,
        user_id: Uuid,
    ) -> AppResult<Vec<AddonInstance>> {
        let mut rows: Vec<AddonInstance> = self
            .state
            .lock()
            .unwrap()
            .addon_instances
            .iter()
            .filter(|a| a.user_id == user_id && a.status.is_live())
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (a.purchased_at, a.created_at, a.id).cmp(&(b.purchased_at, b.created_at, b.id))
        });
        Ok(rows)
    }

    async fn find_user_by_provider_customer_id(
        &self,
        customer_id: &str,
    ) -> AppResult<Option<Uuid>> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<&Subscription> = state
            .subscriptions
            .iter()
            .filter(|s| s.provider_customer_id.as_deref() == Some(customer_id))
            .collect();
        rows.sort_by_key(|s| std::cmp::Reverse(s.updated_at));
        Ok(rows.first().map(|s| s.user_id))
    }
}
