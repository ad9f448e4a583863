//! Consumer-facing billing endpoints: entitlement queries, session token
//! re-issue, and checkout/cancel commands.

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;

use crate::{
    adapters::http::{app_state::AppState, middleware::AuthUser},
    application::app_error::AppResult,
    application::jwt,
    application::ports::billing_provider::AddonOrder,
};

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct AddonOrderBody {
    addon_code: String,
    #[serde(default = "default_quantity")]
    quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
struct StartCheckoutBody {
    plan_code: String,
    #[serde(default)]
    addons: Vec<AddonOrderBody>,
}

#[derive(Debug, Deserialize)]
struct StartAddonCheckoutBody {
    addon_code: String,
    #[serde(default = "default_quantity")]
    quantity: i64,
}

#[derive(Debug, Deserialize)]
struct ChangePlanBody {
    plan_code: String,
    #[serde(default)]
    at_term_end: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /billing/plans
/// Public plan catalog for the pricing page; no authentication.
async fn list_plans(State(app_state): State<AppState>) -> AppResult<impl IntoResponse> {
    let plans = app_state.catalog_use_cases.list_public_plans().await?;
    Ok(Json(plans))
}

/// GET /billing/addons
/// Public add-on catalog.
async fn list_addons(State(app_state): State<AppState>) -> AppResult<impl IntoResponse> {
    let addons = app_state.catalog_use_cases.list_addons().await?;
    Ok(Json(addons))
}

/// GET /billing/entitlements
async fn get_entitlements(
    State(app_state): State<AppState>,
    user: AuthUser,
) -> AppResult<impl IntoResponse> {
    let snapshot = app_state
        .entitlements_use_cases
        .snapshot_for_user(user.0)
        .await?;
    Ok(Json(snapshot))
}

/// GET /billing/entitlements/addons/{code}
/// Boolean feature gate for a single add-on type.
async fn is_addon_active(
    State(app_state): State<AppState>,
    user: AuthUser,
    Path(code): Path<String>,
) -> AppResult<impl IntoResponse> {
    let active = app_state
        .entitlements_use_cases
        .is_addon_active(user.0, &code)
        .await?;
    Ok(Json(serde_json::json!({ "addon_code": code, "active": active })))
}

/// GET /billing/session
/// Re-issue a session token with fresh entitlement claims.
async fn refresh_session(
    State(app_state): State<AppState>,
    user: AuthUser,
) -> AppResult<impl IntoResponse> {
    let claims = app_state
        .entitlements_use_cases
        .claims_for_user(user.0)
        .await?;
    let token = jwt::issue(
        user.0,
        claims,
        &app_state.config.jwt_secret,
        app_state.config.access_token_ttl,
    )?;
    Ok(Json(serde_json::json!({ "token": token })))
}

/// POST /billing/checkout
async fn start_checkout(
    State(app_state): State<AppState>,
    user: AuthUser,
    Json(body): Json<StartCheckoutBody>,
) -> AppResult<impl IntoResponse> {
    let addons: Vec<AddonOrder> = body
        .addons
        .into_iter()
        .map(|a| AddonOrder {
            addon_code: a.addon_code,
            quantity: a.quantity,
        })
        .collect();
    let started = app_state
        .checkout_use_cases
        .start_plan_checkout(user.0, &body.plan_code, &addons)
        .await?;
    Ok(Json(started))
}

/// POST /billing/checkout/addon
async fn start_addon_checkout(
    State(app_state): State<AppState>,
    user: AuthUser,
    Json(body): Json<StartAddonCheckoutBody>,
) -> AppResult<impl IntoResponse> {
    let page = app_state
        .checkout_use_cases
        .start_addon_checkout(user.0, &body.addon_code, body.quantity)
        .await?;
    Ok(Json(page))
}

/// GET /billing/history
/// Audit trail of the user's subscription transitions.
async fn subscription_history(
    State(app_state): State<AppState>,
    user: AuthUser,
) -> AppResult<impl IntoResponse> {
    let events = app_state
        .entitlements_use_cases
        .subscription_history(user.0)
        .await?;
    Ok(Json(events))
}

/// POST /billing/change-plan
async fn change_plan(
    State(app_state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ChangePlanBody>,
) -> AppResult<impl IntoResponse> {
    app_state
        .checkout_use_cases
        .change_plan(user.0, &body.plan_code, body.at_term_end)
        .await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// POST /billing/cancel
/// Schedule cancellation at the end of the current term.
async fn cancel_at_term_end(
    State(app_state): State<AppState>,
    user: AuthUser,
) -> AppResult<impl IntoResponse> {
    app_state
        .checkout_use_cases
        .cancel_at_term_end(user.0)
        .await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

// ============================================================================
// Router
// ============================================================================

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/plans", get(list_plans))
        .route("/addons", get(list_addons))
        .route("/entitlements", get(get_entitlements))
        .route("/entitlements/addons/{code}", get(is_addon_active))
        .route("/session", get(refresh_session))
        .route("/history", get(subscription_history))
        .route("/checkout", post(start_checkout))
        .route("/checkout/addon", post(start_addon_checkout))
        .route("/change-plan", post(change_plan))
        .route("/cancel", post(cancel_at_term_end))
}

// ============================================================================
// Tests
// ============================================================================
