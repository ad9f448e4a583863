//! Postgres implementation of the entitlement store.
//!
//! `apply_reconciliation` is the single unit of work: it opens one
//! transaction, takes `FOR UPDATE` locks on the user's subscription and
//! add-on rows, computes the resolver/reconciler decisions against the
//! locked snapshot, applies every write, and commits. Two concurrent passes
//! for the same user serialize on the row locks; a failure rolls the whole
//! pass back, so redelivery is always safe.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    application::app_error::{AppError, AppResult},
    application::use_cases::reconciliation::{
        EntitlementStore, PendingCheckoutInput, ReconcileAction, ReconcileCommand,
        ReconcileOutcome, ResolvedAddonTarget, TransitionKind,
    },
    domain::entities::addon::AddonInstance,
    domain::entities::provider_event::SubscriptionEventKind,
    domain::entities::subscription::{Subscription, SubscriptionStatus},
    domain::reconciler::{self, AddonOp},
    domain::resolver::{self, ActivationUpdate, SubscriptionTransition},
};

fn row_to_subscription(row: &sqlx::postgres::PgRow) -> Subscription {
    Subscription {
        id: row.get("id"),
        user_id: row.get("user_id"),
        plan_id: row.get("plan_id"),
        status: row.get("status"),
        provider_subscription_id: row.get("provider_subscription_id"),
        provider_customer_id: row.get("provider_customer_id"),
        amount_cents: row.get("amount_cents"),
        currency: row.get("currency"),
        current_term_start: row.get("current_term_start"),
        current_term_end: row.get("current_term_end"),
        auto_renew: row.get("auto_renew"),
        notes: row.get("notes"),
        activated_at: row.get("activated_at"),
        cancelled_at: row.get("cancelled_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_addon_instance(row: &sqlx::postgres::PgRow) -> AddonInstance {
    AddonInstance {
        id: row.get("id"),
        user_id: row.get("user_id"),
        addon_id: row.get("addon_id"),
        subscription_id: row.get("subscription_id"),
        status: row.get("status"),
        is_active: row.get("is_active"),
        purchased_at: row.get("purchased_at"),
        expires_at: row.get("expires_at"),
        provider_instance_id: row.get("provider_instance_id"),
        initial_count: row.get("initial_count"),
        remaining_count: row.get("remaining_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SUBSCRIPTION_COLS: &str = r#"
    id, user_id, plan_id, status, provider_subscription_id, provider_customer_id,
    amount_cents, currency, current_term_start, current_term_end, auto_renew,
    notes, activated_at, cancelled_at, created_at, updated_at
"#;

const ADDON_INSTANCE_COLS: &str = r#"
    id, user_id, addon_id, subscription_id, status, is_active,
    purchased_at, expires_at, provider_instance_id, initial_count, remaining_count,
    created_at, updated_at
"#;

struct TransitionRow {
    kind: TransitionKind,
    subscription_id: Option<Uuid>,
    previous_status: Option<SubscriptionStatus>,
    new_status: Option<SubscriptionStatus>,
    cascaded: u32,
    noop_reason: Option<String>,
}

/// Last line of defense against a resolver bug writing an illegal
/// transition into durable state; the transaction rolls back.
fn ensure_legal_transition(
    from: Option<SubscriptionStatus>,
    to: SubscriptionStatus,
) -> AppResult<()> {
    match from {
        Some(from) if !from.can_transition_to(to) => Err(AppError::Internal(format!(
            "illegal subscription transition {} -> {}",
            from.as_str(),
            to.as_str()
        ))),
        _ => Ok(()),
    }
}

async fn update_from_activation(
    tx: &mut Transaction<'_, Postgres>,
    subscription_id: Uuid,
    status: Option<SubscriptionStatus>,
    set_activated_at: bool,
    update: &ActivationUpdate,
    now: NaiveDateTime,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE subscriptions SET
            status = COALESCE($2, status),
            plan_id = COALESCE($3, plan_id),
            provider_subscription_id = $4,
            provider_customer_id = COALESCE($5, provider_customer_id),
            amount_cents = COALESCE($6, amount_cents),
            currency = COALESCE($7, currency),
            current_term_start = COALESCE($8, current_term_start),
            current_term_end = COALESCE($9, current_term_end),
            auto_renew = COALESCE($10, auto_renew),
            notes = $11,
            activated_at = CASE WHEN $12 THEN $13 ELSE activated_at END,
            updated_at = $13
        WHERE id = $1
        "#,
    )
    .bind(subscription_id)
    .bind(status)
    .bind(update.plan_id)
    .bind(&update.provider_subscription_id)
    .bind(&update.provider_customer_id)
    .bind(update.amount_cents)
    .bind(&update.currency)
    .bind(update.current_term_start)
    .bind(update.current_term_end)
    .bind(update.auto_renew)
    .bind(&update.notes)
    .bind(set_activated_at)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(AppError::from)?;
    Ok(())
}

async fn supersede(
    tx: &mut Transaction<'_, Postgres>,
    old_id: Uuid,
    new_id: Uuid,
    now: NaiveDateTime,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE subscriptions SET
            status = 'upgraded',
            notes = $2,
            updated_at = $3
        WHERE id = $1
        "#,
    )
    .bind(old_id)
    .bind(format!("superseded by subscription {}", new_id))
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(AppError::from)?;
    Ok(())
}

async fn cascade_addon_cancellation(
    tx: &mut Transaction<'_, Postgres>,
    subscription_id: Uuid,
    now: NaiveDateTime,
) -> AppResult<u32> {
    let result = sqlx::query(
        r#"
        UPDATE addon_instances SET
            status = 'cancelled',
            is_active = false,
            updated_at = $2
        WHERE subscription_id = $1 AND status IN ('active', 'pending')
        "#,
    )
    .bind(subscription_id)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(AppError::from)?;
    Ok(result.rows_affected() as u32)
}

async fn apply_transition(
    tx: &mut Transaction<'_, Postgres>,
    existing: &[Subscription],
    transition: SubscriptionTransition,
    now: NaiveDateTime,
) -> AppResult<TransitionRow> {
    let status_of = |id: Uuid| existing.iter().find(|s| s.id == id).map(|s| s.status);
    match transition {
        SubscriptionTransition::Create { new, supersede_id } => {
            let id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO subscriptions
                    (id, user_id, plan_id, status, provider_subscription_id, provider_customer_id,
                     amount_cents, currency, current_term_start, current_term_end, auto_renew,
                     notes, activated_at, created_at, updated_at)
                VALUES ($1, $2, $3, 'active', $4, $5, $6, COALESCE($7, 'EUR'), $8, $9,
                        COALESCE($10, true), $11, $12, $12, $12)
                "#,
            )
            .bind(id)
            .bind(new.user_id)
            .bind(new.plan_id)
            .bind(&new.update.provider_subscription_id)
            .bind(&new.update.provider_customer_id)
            .bind(new.update.amount_cents)
            .bind(&new.update.currency)
            .bind(new.update.current_term_start)
            .bind(new.update.current_term_end)
            .bind(new.update.auto_renew)
            .bind(&new.update.notes)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(AppError::from)?;

            if let Some(old_id) = supersede_id {
                supersede(tx, old_id, id, now).await?;
            }

            Ok(TransitionRow {
                kind: TransitionKind::Created,
                subscription_id: Some(id),
                previous_status: None,
                new_status: Some(SubscriptionStatus::Active),
                cascaded: 0,
                noop_reason: None,
            })
        }
        SubscriptionTransition::Activate {
            subscription_id,
            update,
        } => {
            ensure_legal_transition(status_of(subscription_id), SubscriptionStatus::Active)?;
            update_from_activation(
                tx,
                subscription_id,
                Some(SubscriptionStatus::Active),
                true,
                &update,
                now,
            )
            .await?;
            Ok(TransitionRow {
                kind: TransitionKind::Activated,
                subscription_id: Some(subscription_id),
                previous_status: status_of(subscription_id),
                new_status: Some(SubscriptionStatus::Active),
                cascaded: 0,
                noop_reason: None,
            })
        }
        SubscriptionTransition::Renew {
            subscription_id,
            update,
        } => {
            update_from_activation(tx, subscription_id, None, false, &update, now).await?;
            Ok(TransitionRow {
                kind: TransitionKind::Renewed,
                subscription_id: Some(subscription_id),
                previous_status: Some(SubscriptionStatus::Active),
                new_status: Some(SubscriptionStatus::Active),
                cascaded: 0,
                noop_reason: None,
            })
        }
        SubscriptionTransition::Upgrade {
            activate_id,
            update,
            supersede_id,
        } => {
            ensure_legal_transition(status_of(activate_id), SubscriptionStatus::Active)?;
            ensure_legal_transition(status_of(supersede_id), SubscriptionStatus::Upgraded)?;
            // Activate first, then supersede: the committed state always
            // holds exactly one active row, and no intermediate state with
            // zero active rows is ever visible.
            update_from_activation(
                tx,
                activate_id,
                Some(SubscriptionStatus::Active),
                true,
                &update,
                now,
            )
            .await?;
            supersede(tx, supersede_id, activate_id, now).await?;
            Ok(TransitionRow {
                kind: TransitionKind::Upgraded,
                subscription_id: Some(activate_id),
                previous_status: status_of(activate_id),
                new_status: Some(SubscriptionStatus::Active),
                cascaded: 0,
                noop_reason: None,
            })
        }
        SubscriptionTransition::Cancel {
            subscription_id,
            notes,
        } => {
            sqlx::query(
                r#"
                UPDATE subscriptions SET
                    status = 'cancelled',
                    auto_renew = false,
                    cancelled_at = $2,
                    notes = $3,
                    updated_at = $2
                WHERE id = $1
                "#,
            )
            .bind(subscription_id)
            .bind(now)
            .bind(&notes)
            .execute(&mut **tx)
            .await
            .map_err(AppError::from)?;

            let cascaded = cascade_addon_cancellation(tx, subscription_id, now).await?;

            Ok(TransitionRow {
                kind: TransitionKind::Cancelled,
                subscription_id: Some(subscription_id),
                previous_status: status_of(subscription_id),
                new_status: Some(SubscriptionStatus::Cancelled),
                cascaded,
                noop_reason: None,
            })
        }
        SubscriptionTransition::Update {
            subscription_id,
            update,
        } => {
            update_from_activation(tx, subscription_id, None, false, &update, now).await?;
            Ok(TransitionRow {
                kind: TransitionKind::Updated,
                subscription_id: Some(subscription_id),
                previous_status: status_of(subscription_id),
                new_status: status_of(subscription_id),
                cascaded: 0,
                noop_reason: None,
            })
        }
        SubscriptionTransition::MarkFailed {
            subscription_id,
            notes,
        } => {
            sqlx::query(
                r#"
                UPDATE subscriptions SET
                    status = 'failed',
                    notes = $2,
                    updated_at = $3
                WHERE id = $1
                "#,
            )
            .bind(subscription_id)
            .bind(&notes)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(AppError::from)?;
            Ok(TransitionRow {
                kind: TransitionKind::CheckoutFailed,
                subscription_id: Some(subscription_id),
                previous_status: status_of(subscription_id),
                new_status: Some(SubscriptionStatus::Failed),
                cascaded: 0,
                noop_reason: None,
            })
        }
        SubscriptionTransition::Noop { reason } => Ok(TransitionRow {
            kind: TransitionKind::Noop,
            subscription_id: None,
            previous_status: None,
            new_status: None,
            cascaded: 0,
            noop_reason: Some(reason),
        }),
    }
}

async fn apply_addon_targets(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    subscription_id: Uuid,
    targets: &[ResolvedAddonTarget],
    locked_instances: &[AddonInstance],
    term_end: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> AppResult<(u32, u32, u32)> {
    let mut created = 0u32;
    let mut refreshed = 0u32;
    let mut deactivated = 0u32;

    for resolved in targets {
        let mut live: Vec<AddonInstance> = locked_instances
            .iter()
            .filter(|a| a.addon_id == resolved.definition.id && a.status.is_live())
            .cloned()
            .collect();
        live.sort_by(|a, b| {
            (a.purchased_at, a.created_at, a.id).cmp(&(b.purchased_at, b.created_at, b.id))
        });

        let ops = reconciler::diff_addon_quantity(
            user_id,
            subscription_id,
            &resolved.definition,
            &live,
            &resolved.target,
            term_end,
            now,
        );

        for op in ops {
            match op {
                AddonOp::Deactivate { instance_id } => {
                    sqlx::query(
                        r#"
                        UPDATE addon_instances SET
                            status = 'cancelled',
                            is_active = false,
                            updated_at = $2
                        WHERE id = $1
                        "#,
                    )
                    .bind(instance_id)
                    .bind(now)
                    .execute(&mut **tx)
                    .await
                    .map_err(AppError::from)?;
                    deactivated += 1;
                }
                AddonOp::Refresh {
                    instance_id,
                    subscription_id,
                    purchased_at,
                    expires_at,
                    provider_instance_id,
                } => {
                    sqlx::query(
                        r#"
                        UPDATE addon_instances SET
                            status = 'active',
                            is_active = true,
                            subscription_id = $2,
                            purchased_at = $3,
                            expires_at = $4,
                            provider_instance_id = COALESCE($5, provider_instance_id),
                            updated_at = $6
                        WHERE id = $1
                        "#,
                    )
                    .bind(instance_id)
                    .bind(subscription_id)
                    .bind(purchased_at)
                    .bind(expires_at)
                    .bind(&provider_instance_id)
                    .bind(now)
                    .execute(&mut **tx)
                    .await
                    .map_err(AppError::from)?;
                    refreshed += 1;
                }
                AddonOp::Create(new) => {
                    sqlx::query(
                        r#"
                        INSERT INTO addon_instances
                            (id, user_id, addon_id, subscription_id, status, is_active,
                             purchased_at, expires_at, provider_instance_id,
                             initial_count, remaining_count, created_at, updated_at)
                        VALUES ($1, $2, $3, $4, 'active', true, $5, $6, $7, $8, $9, $10, $10)
                        "#,
                    )
                    .bind(Uuid::new_v4())
                    .bind(new.user_id)
                    .bind(new.addon_id)
                    .bind(new.subscription_id)
                    .bind(new.purchased_at)
                    .bind(new.expires_at)
                    .bind(&new.provider_instance_id)
                    .bind(new.initial_count)
                    .bind(new.remaining_count)
                    .bind(now)
                    .execute(&mut **tx)
                    .await
                    .map_err(AppError::from)?;
                    created += 1;
                }
            }
        }
    }

    Ok((created, refreshed, deactivated))
}

#[async_trait]
impl EntitlementStore for PostgresPersistence {
    async fn apply_reconciliation(&self, cmd: &ReconcileCommand) -> AppResult<ReconcileOutcome> {
        let mut tx = self.pool.begin().await.map_err(AppError::from)?;

        // Lock the user's rows for the duration of the pass. The addon rows
        // are locked up front even when the transition turns out to be a
        // noop, so concurrent passes can't interleave between resolver and
        // reconciler.
        let sub_rows = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 ORDER BY created_at ASC FOR UPDATE",
            SUBSCRIPTION_COLS
        ))
        .bind(cmd.user_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(AppError::from)?;
        let existing: Vec<Subscription> = sub_rows.iter().map(row_to_subscription).collect();

        let addon_rows = sqlx::query(&format!(
            "SELECT {} FROM addon_instances WHERE user_id = $1 ORDER BY purchased_at ASC, created_at ASC FOR UPDATE",
            ADDON_INSTANCE_COLS
        ))
        .bind(cmd.user_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(AppError::from)?;
        let locked_instances: Vec<AddonInstance> =
            addon_rows.iter().map(row_to_addon_instance).collect();

        let (result, targets) = match &cmd.action {
            ReconcileAction::PaymentFailure => {
                let transition = resolver::resolve_payment_failure(&existing);
                (
                    apply_transition(&mut tx, &existing, transition, cmd.now).await?,
                    None,
                )
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
                let result = apply_transition(&mut tx, &existing, transition, cmd.now).await?;
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

        if let (Some(targets), Some(subscription_id)) = (targets, result.subscription_id) {
            let term_end: Option<NaiveDateTime> = sqlx::query_scalar(
                "SELECT current_term_end FROM subscriptions WHERE id = $1",
            )
            .bind(subscription_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(AppError::from)?;

            let (c, r, d) = apply_addon_targets(
                &mut tx,
                cmd.user_id,
                subscription_id,
                targets,
                &locked_instances,
                term_end,
                cmd.now,
            )
            .await?;
            created = c;
            refreshed = r;
            deactivated += d;
        }

        tx.commit().await.map_err(AppError::from)?;

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
        let rows = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 ORDER BY created_at ASC",
            SUBSCRIPTION_COLS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_subscription).collect())
    }

    async fn get_active_subscription(&self, user_id: Uuid) -> AppResult<Option<Subscription>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 AND status = 'active'",
            SUBSCRIPTION_COLS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_subscription))
    }

    async fn upsert_pending_subscription(
        &self,
        input: &PendingCheckoutInput,
    ) -> AppResult<Subscription> {
        // A user keeps at most one pending row; a retried checkout
        // re-points it instead of stacking a second one.
        let mut tx = self.pool.begin().await.map_err(AppError::from)?;

        let existing = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 AND status = 'pending' FOR UPDATE",
            SUBSCRIPTION_COLS
        ))
        .bind(input.user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(AppError::from)?;

        let row = match existing {
            Some(row) => {
                let id: Uuid = row.get("id");
                let updated = sqlx::query(&format!(
                    r#"
                    UPDATE subscriptions SET
                        plan_id = $2,
                        amount_cents = $3,
                        currency = $4,
                        notes = $5,
                        updated_at = CURRENT_TIMESTAMP
                    WHERE id = $1
                    RETURNING {}
                    "#,
                    SUBSCRIPTION_COLS
                ))
                .bind(id)
                .bind(input.plan_id)
                .bind(input.amount_cents)
                .bind(&input.currency)
                .bind(&input.notes)
                .fetch_one(&mut *tx)
                .await
                .map_err(AppError::from)?;
                updated
            }
            None => sqlx::query(&format!(
                r#"
                INSERT INTO subscriptions
                    (id, user_id, plan_id, status, amount_cents, currency, auto_renew, notes)
                VALUES ($1, $2, $3, 'pending', $4, $5, true, $6)
                RETURNING {}
                "#,
                SUBSCRIPTION_COLS
            ))
            .bind(Uuid::new_v4())
            .bind(input.user_id)
            .bind(input.plan_id)
            .bind(input.amount_cents)
            .bind(&input.currency)
            .bind(&input.notes)
            .fetch_one(&mut *tx)
            .await
            .map_err(AppError::from)?,
        };

        tx.commit().await.map_err(AppError::from)?;
        Ok(row_to_subscription(&row))
    }

    async fn set_auto_renew(&self, subscription_id: Uuid, auto_renew: bool) -> AppResult<()> {
        sqlx::query(
            "UPDATE subscriptions SET auto_renew = $2, updated_at = CURRENT_TIMESTAMP WHERE id = $1",
        )
        .bind(subscription_id)
        .bind(auto_renew)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn list_live_addon_instances_for_user(
        &self,
        user_id: Uuid,
    ) -> AppResult<Vec<AddonInstance>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM addon_instances
            WHERE user_id = $1 AND status IN ('active', 'pending')
            ORDER BY purchased_at ASC, created_at ASC
            "#,
            ADDON_INSTANCE_COLS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_addon_instance).collect())
    }

    async fn find_user_by_provider_customer_id(
        &self,
        customer_id: &str,
    ) -> AppResult<Option<Uuid>> {
        let user_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT user_id FROM subscriptions
            WHERE provider_customer_id = $1
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(user_id)
    }
}
