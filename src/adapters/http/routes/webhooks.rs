//! Provider webhook intake.
//!
//! The provider redelivers on any non-2xx response, so the handler
//! distinguishes retryable failures (returned as 500 to trigger redelivery)
//! from expected conditions (acknowledged with 200 so the provider stops
//! retrying; the condition is logged instead).

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use tracing::error;

use crate::{
    adapters::http::app_state::AppState,
    application::app_error::{AppError, AppResult},
    infra::zoho_client::ZohoBillingClient,
};

const SIGNATURE_HEADER: &str = "x-billing-signature";

/// POST /billing/webhooks/provider
async fn handle_provider_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> AppResult<impl IntoResponse> {
    if let Some(secret) = &app_state.config.webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::InvalidInput("Missing webhook signature".into()))?;
        ZohoBillingClient::verify_webhook_signature(&body, signature, secret)?;
    }

    let payload: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| AppError::InvalidInput(format!("Invalid webhook payload: {}", e)))?;

    match app_state.reconciliation_use_cases.process_event(&payload).await {
        Ok(processed) => Ok((StatusCode::OK, Json(processed)).into_response()),
        Err(e) if e.is_retryable() => {
            error!(
                error = %e,
                retryable = true,
                "Webhook processing failed, returning 500 for provider redelivery"
            );
            Err(e)
        }
        Err(e) => {
            // Expected condition; a redelivery would hit it again, so the
            // event is acknowledged and the condition logged.
            error!(error = %e, retryable = false, "Webhook skipped");
            Ok(StatusCode::OK.into_response())
        }
    }
}

pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/webhooks/provider", post(handle_provider_webhook))
}
