use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::app_error::AppResult;
use crate::application::ports::billing_provider::{BillingProviderPort, ProviderSubscription};
use crate::application::ports::clock::Clock;
use crate::application::ports::session_notifier::SessionNotifierPort;
use crate::application::use_cases::catalog::PlanCatalogRepo;
use crate::domain::classifier::{self, AddonCatalogIndex};
use crate::domain::entities::addon::{AddonDefinition, AddonInstance};
use crate::domain::entities::provider_event::{
    EventKind, PaymentEventData, PaymentEventKind, ProviderEvent, SubscriptionEventData,
    SubscriptionEventKind,
};
use crate::domain::entities::subscription::{Subscription, SubscriptionStatus};
use crate::domain::reconciler::{self, AddonTarget};

// ============================================================================
// Command & Outcome Types
// ============================================================================

/// An add-on target whose catalog definition resolved. Unknown codes are
/// dropped (with an error log) before the command is built, so the store
/// only ever sees reconcilable targets.
#[derive(Debug, Clone)]
pub struct ResolvedAddonTarget {
    pub definition: AddonDefinition,
    pub target: AddonTarget,
}

#[derive(Debug, Clone)]
pub enum ReconcileAction {
    Subscription {
        event: SubscriptionEventData,
        /// Plan resolved from the event's plan code, when it resolved.
        plan_id: Option<Uuid>,
        addons: Vec<ResolvedAddonTarget>,
    },
    /// A declined payment: the user's in-flight checkout (if any) failed.
    PaymentFailure,
}

/// One reconciliation pass. Everything the store needs is resolved up front;
/// the store itself performs no provider I/O and opens exactly one
/// transaction.
#[derive(Debug, Clone)]
pub struct ReconcileCommand {
    pub user_id: Uuid,
    pub action: ReconcileAction,
    pub provider_event_id: Option<String>,
    pub now: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Created,
    Activated,
    Renewed,
    Upgraded,
    Cancelled,
    Updated,
    CheckoutFailed,
    Noop,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Created => "created",
            TransitionKind::Activated => "activated",
            TransitionKind::Renewed => "renewed",
            TransitionKind::Upgraded => "upgraded",
            TransitionKind::Cancelled => "cancelled",
            TransitionKind::Updated => "updated",
            TransitionKind::CheckoutFailed => "checkout_failed",
            TransitionKind::Noop => "noop",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub user_id: Uuid,
    pub transition: TransitionKind,
    pub subscription_id: Option<Uuid>,
    pub previous_status: Option<SubscriptionStatus>,
    pub new_status: Option<SubscriptionStatus>,
    pub addons_created: u32,
    pub addons_refreshed: u32,
    pub addons_deactivated: u32,
    pub noop_reason: Option<String>,
}

impl ReconcileOutcome {
    /// Whether the pass changed anything a session token could be caching.
    pub fn entitlements_changed(&self) -> bool {
        let subscription_changed = matches!(
            self.transition,
            TransitionKind::Created
                | TransitionKind::Activated
                | TransitionKind::Renewed
                | TransitionKind::Upgraded
                | TransitionKind::Cancelled
                | TransitionKind::Updated
        );
        subscription_changed
            || self.addons_created > 0
            || self.addons_refreshed > 0
            || self.addons_deactivated > 0
    }
}

/// Fields for the `pending` row created when a checkout is initiated.
#[derive(Debug, Clone)]
pub struct PendingCheckoutInput {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub amount_cents: Option<i64>,
    pub currency: String,
    pub notes: String,
}

// ============================================================================
// Repository Traits
// ============================================================================

/// Persistence boundary for subscriptions and add-on instances.
///
/// `apply_reconciliation` is the unit of work: implementations must execute
/// the resolver transition and every add-on diff of one command inside a
/// single transaction, locking the user's rows so concurrent passes for the
/// same user serialize. Partial application must never be durably committed.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    async fn apply_reconciliation(&self, cmd: &ReconcileCommand) -> AppResult<ReconcileOutcome>;

    async fn list_subscriptions_for_user(&self, user_id: Uuid) -> AppResult<Vec<Subscription>>;

    async fn get_active_subscription(&self, user_id: Uuid) -> AppResult<Option<Subscription>>;

    /// Create the user's `pending` checkout row, or re-point the existing
    /// one at a new plan (a user retrying a stalled checkout keeps a single
    /// pending row).
    async fn upsert_pending_subscription(
        &self,
        input: &PendingCheckoutInput,
    ) -> AppResult<Subscription>;

    async fn set_auto_renew(&self, subscription_id: Uuid, auto_renew: bool) -> AppResult<()>;

    /// Live (active/pending) add-on rows for a user, oldest purchase first.
    async fn list_live_addon_instances_for_user(
        &self,
        user_id: Uuid,
    ) -> AppResult<Vec<AddonInstance>>;

    /// Resolve a provider customer id through the subscription rows that
    /// recorded it. The customer mapping lives on subscriptions, never on
    /// the user record itself.
    async fn find_user_by_provider_customer_id(
        &self,
        customer_id: &str,
    ) -> AppResult<Option<Uuid>>;
}

/// The engine's read-only view of the surrounding system's users.
#[derive(Debug, Clone)]
pub struct UserRef {
    pub id: Uuid,
    pub email: String,
}

#[async_trait]
pub trait UserDirectoryRepo: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<UserRef>>;
    async fn get_by_email(&self, email: &str) -> AppResult<Option<UserRef>>;
}

#[derive(Debug, Clone)]
pub struct CreateSubscriptionEventInput {
    pub subscription_id: Uuid,
    pub event_type: String,
    pub previous_status: Option<SubscriptionStatus>,
    pub new_status: Option<SubscriptionStatus>,
    pub provider_event_id: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionEventProfile {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: String,
    pub previous_status: Option<SubscriptionStatus>,
    pub new_status: Option<SubscriptionStatus>,
    pub provider_event_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: Option<NaiveDateTime>,
}

/// Append-only audit trail of resolver transitions.
#[async_trait]
pub trait SubscriptionEventLogRepo: Send + Sync {
    async fn create(&self, input: &CreateSubscriptionEventInput) -> AppResult<()>;
    async fn list_by_subscription(
        &self,
        subscription_id: Uuid,
    ) -> AppResult<Vec<SubscriptionEventProfile>>;
}

// ============================================================================
// Use Cases
// ============================================================================

/// Result of handling one webhook delivery. Both variants are acknowledged
/// to the provider; only errors bubble up (and only retryable ones turn into
/// a retry-triggering response).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProcessedEvent {
    Reconciled {
        kind: EventKind,
        outcome: ReconcileOutcome,
    },
    Acknowledged {
        kind: EventKind,
        reason: String,
    },
}

#[derive(Clone)]
pub struct ReconciliationUseCases {
    catalog_repo: Arc<dyn PlanCatalogRepo>,
    user_repo: Arc<dyn UserDirectoryRepo>,
    store: Arc<dyn EntitlementStore>,
    event_log: Arc<dyn SubscriptionEventLogRepo>,
    provider: Arc<dyn BillingProviderPort>,
    sessions: Arc<dyn SessionNotifierPort>,
    clock: Arc<dyn Clock>,
}

impl ReconciliationUseCases {
    pub fn new(
        catalog_repo: Arc<dyn PlanCatalogRepo>,
        user_repo: Arc<dyn UserDirectoryRepo>,
        store: Arc<dyn EntitlementStore>,
        event_log: Arc<dyn SubscriptionEventLogRepo>,
        provider: Arc<dyn BillingProviderPort>,
        sessions: Arc<dyn SessionNotifierPort>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog_repo,
            user_repo,
            store,
            event_log,
            provider,
            sessions,
            clock,
        }
    }

    /// Entry point for one webhook delivery.
    pub async fn process_event(&self, payload: &serde_json::Value) -> AppResult<ProcessedEvent> {
        let addon_defs = self.catalog_repo.list_addons().await?;
        let index = AddonCatalogIndex::new(&addon_defs);
        let event = classifier::classify(payload, &index);
        let kind = event.kind();
        let provider_event_id = payload["event_id"]
            .as_str()
            .or_else(|| payload["id"].as_str())
            .map(str::to_string);

        match event {
            ProviderEvent::Unclassified(un) => {
                tracing::info!(
                    event_type = ?un.event_type,
                    "Unclassifiable provider event, acknowledging without reconciliation"
                );
                Ok(ProcessedEvent::Acknowledged {
                    kind,
                    reason: "unclassifiable event".to_string(),
                })
            }
            ProviderEvent::Subscription(data) => {
                self.process_subscription_event(data, &addon_defs, provider_event_id)
                    .await
            }
            ProviderEvent::Payment(data) => match data.kind {
                PaymentEventKind::Failed => {
                    self.process_payment_failure(data, provider_event_id).await
                }
                PaymentEventKind::Succeeded => {
                    self.process_payment_success(data, &addon_defs, provider_event_id)
                        .await
                }
            },
        }
    }

    async fn process_subscription_event(
        &self,
        event: SubscriptionEventData,
        addon_defs: &[AddonDefinition],
        provider_event_id: Option<String>,
    ) -> AppResult<ProcessedEvent> {
        let kind = match event.kind {
            SubscriptionEventKind::Activated => EventKind::SubscriptionActive,
            SubscriptionEventKind::Cancelled => EventKind::SubscriptionCancelled,
            SubscriptionEventKind::Updated => EventKind::SubscriptionUpdated,
        };

        let Some(user) = self
            .resolve_user(
                event.provider_customer_id.as_deref(),
                event.customer_email.as_deref(),
            )
            .await?
        else {
            tracing::error!(
                provider_subscription_id = %event.provider_subscription_id,
                customer_id = ?event.provider_customer_id,
                email = ?event.customer_email,
                "No local user matches the event, skipping reconciliation"
            );
            return Ok(ProcessedEvent::Acknowledged {
                kind,
                reason: "user not resolvable".to_string(),
            });
        };

        let plan_id = match event.plan_code.as_deref() {
            Some(code) => {
                let plan = self.catalog_repo.get_plan_by_code(code).await?;
                if plan.is_none() {
                    tracing::error!(
                        plan_code = code,
                        "Plan code not in local catalog, continuing without plan"
                    );
                }
                plan.map(|p| p.id)
            }
            None => None,
        };

        let addons = self.resolve_addon_targets(&event.addons, addon_defs);

        let cmd = ReconcileCommand {
            user_id: user.id,
            action: ReconcileAction::Subscription {
                event,
                plan_id,
                addons,
            },
            provider_event_id,
            now: self.clock.now(),
        };

        let outcome = self.store.apply_reconciliation(&cmd).await?;
        self.finish(kind, cmd.provider_event_id.as_deref(), outcome)
            .await
    }

    async fn process_payment_failure(
        &self,
        data: PaymentEventData,
        provider_event_id: Option<String>,
    ) -> AppResult<ProcessedEvent> {
        let kind = EventKind::PaymentFailed;
        let Some(user) = self
            .resolve_user(
                data.provider_customer_id.as_deref(),
                data.customer_email.as_deref(),
            )
            .await?
        else {
            tracing::error!(
                customer_id = ?data.provider_customer_id,
                "Payment failure for unknown user, acknowledging"
            );
            return Ok(ProcessedEvent::Acknowledged {
                kind,
                reason: "user not resolvable".to_string(),
            });
        };

        let cmd = ReconcileCommand {
            user_id: user.id,
            action: ReconcileAction::PaymentFailure,
            provider_event_id,
            now: self.clock.now(),
        };

        let outcome = self.store.apply_reconciliation(&cmd).await?;
        self.finish(kind, cmd.provider_event_id.as_deref(), outcome)
            .await
    }

    /// A payment success is only actionable when its line items look like an
    /// add-on purchase. The invoice quantities are not authoritative (the
    /// price heuristic is ambiguous), so the provider's subscription detail
    /// is fetched *before* the transaction and reconciled like a
    /// subscription event.
    async fn process_payment_success(
        &self,
        data: PaymentEventData,
        addon_defs: &[AddonDefinition],
        provider_event_id: Option<String>,
    ) -> AppResult<ProcessedEvent> {
        let kind = EventKind::PaymentSuccess;

        if data.detected_addons.is_empty() {
            tracing::debug!("Payment success without add-on lines, nothing to reconcile");
            return Ok(ProcessedEvent::Acknowledged {
                kind,
                reason: "payment recorded".to_string(),
            });
        }

        let Some(subscription_id) = data.subscription_ids().first().map(|s| s.to_string()) else {
            tracing::warn!(
                detected = data.detected_addons.len(),
                "Add-on purchase detected but the invoice references no subscription"
            );
            return Ok(ProcessedEvent::Acknowledged {
                kind,
                reason: "add-on purchase without subscription reference".to_string(),
            });
        };

        // Pre-transaction enrichment; failures here are retryable.
        let Some(provider_sub) = self.provider.fetch_subscription(&subscription_id).await? else {
            tracing::warn!(
                provider_subscription_id = %subscription_id,
                "Provider does not know the subscription referenced by the invoice"
            );
            return Ok(ProcessedEvent::Acknowledged {
                kind,
                reason: "subscription unknown at provider".to_string(),
            });
        };

        let mut event = subscription_event_from_provider(provider_sub);
        if event.provider_customer_id.is_none() {
            event.provider_customer_id = data.provider_customer_id.clone();
        }
        if event.customer_email.is_none() {
            event.customer_email = data.customer_email.clone();
        }

        self.process_subscription_event(event, addon_defs, provider_event_id)
            .await
    }

    /// Resolve the local user an event belongs to: by the customer id a
    /// prior reconciliation recorded on a subscription row, then by email,
    /// and as a last resort by asking the provider for the customer record
    /// (always before the reconciliation transaction opens).
    async fn resolve_user(
        &self,
        provider_customer_id: Option<&str>,
        email: Option<&str>,
    ) -> AppResult<Option<UserRef>> {
        if let Some(customer_id) = provider_customer_id
            && let Some(user_id) = self
                .store
                .find_user_by_provider_customer_id(customer_id)
                .await?
            && let Some(user) = self.user_repo.get_by_id(user_id).await?
        {
            return Ok(Some(user));
        }

        if let Some(email) = email
            && let Some(user) = self.user_repo.get_by_email(email).await?
        {
            return Ok(Some(user));
        }

        if let Some(customer_id) = provider_customer_id
            && email.is_none()
            && let Some(customer) = self.provider.fetch_customer(customer_id).await?
            && let Some(customer_email) = customer.email
            && let Some(user) = self.user_repo.get_by_email(&customer_email).await?
        {
            return Ok(Some(user));
        }

        Ok(None)
    }

    fn resolve_addon_targets(
        &self,
        addons: &[crate::domain::entities::provider_event::EventAddon],
        addon_defs: &[AddonDefinition],
    ) -> Vec<ResolvedAddonTarget> {
        reconciler::targets_from_event(addons)
            .into_iter()
            .filter_map(|target| {
                match addon_defs.iter().find(|d| d.code == target.addon_code) {
                    Some(def) => Some(ResolvedAddonTarget {
                        definition: def.clone(),
                        target,
                    }),
                    None => {
                        tracing::error!(
                            addon_code = %target.addon_code,
                            "Add-on code not in local catalog, skipping this add-on"
                        );
                        None
                    }
                }
            })
            .collect()
    }

    async fn finish(
        &self,
        kind: EventKind,
        provider_event_id: Option<&str>,
        outcome: ReconcileOutcome,
    ) -> AppResult<ProcessedEvent> {
        if let Some(subscription_id) = outcome.subscription_id {
            // Audit logging is non-critical; reconciliation already
            // committed.
            let input = CreateSubscriptionEventInput {
                subscription_id,
                event_type: outcome.transition.as_str().to_string(),
                previous_status: outcome.previous_status,
                new_status: outcome.new_status,
                provider_event_id: provider_event_id.map(str::to_string),
                metadata: serde_json::json!({
                    "event_kind": kind.as_str(),
                    "addons_created": outcome.addons_created,
                    "addons_refreshed": outcome.addons_refreshed,
                    "addons_deactivated": outcome.addons_deactivated,
                    "noop_reason": outcome.noop_reason,
                }),
            };
            if let Err(e) = self.event_log.create(&input).await {
                tracing::warn!(error = %e, "Failed to write subscription audit event");
            }
        }

        if outcome.entitlements_changed() {
            if let Err(e) = self.sessions.entitlements_changed(outcome.user_id).await {
                tracing::warn!(error = %e, user_id = %outcome.user_id, "Failed to signal session refresh");
            }
        }

        tracing::info!(
            event_kind = kind.as_str(),
            transition = outcome.transition.as_str(),
            user_id = %outcome.user_id,
            addons_created = outcome.addons_created,
            addons_refreshed = outcome.addons_refreshed,
            addons_deactivated = outcome.addons_deactivated,
            "Reconciliation pass finished"
        );

        Ok(ProcessedEvent::Reconciled { kind, outcome })
    }
}

/// Build a classifier-shaped event from the provider's REST view of a
/// subscription, used when a payment event needs enrichment.
pub fn subscription_event_from_provider(sub: ProviderSubscription) -> SubscriptionEventData {
    let kind = match sub.status.as_str() {
        "live" | "active" | "trial" => SubscriptionEventKind::Activated,
        "cancelled" | "canceled" => SubscriptionEventKind::Cancelled,
        _ => SubscriptionEventKind::Updated,
    };

    SubscriptionEventData {
        kind,
        provider_subscription_id: sub.subscription_id,
        status: Some(sub.status),
        plan_code: sub.plan_code,
        amount_cents: sub.amount_cents,
        currency: sub.currency,
        provider_customer_id: sub.customer_id,
        customer_email: sub.customer_email,
        current_term_start: sub.current_term_start,
        current_term_end: sub.current_term_end,
        next_billing_at: sub.next_billing_at,
        auto_renew: sub.auto_renew,
        addons: sub
            .addons
            .into_iter()
            .map(|a| crate::domain::entities::provider_event::EventAddon {
                addon_code: a.addon_code,
                quantity: a.quantity,
                provider_instance_id: a.addon_instance_id,
                name: a.name,
            })
            .collect(),
    }
}
