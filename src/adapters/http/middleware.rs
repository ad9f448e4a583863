use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::{
    adapters::http::app_state::AppState,
    application::{app_error::AppError, jwt},
};

/// Authenticated user extracted from the bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AppError::InvalidCredentials)?;

        let claims = jwt::verify(token, &state.config.jwt_secret)?;
        let user_id =
            Uuid::parse_str(&claims.sub).map_err(|_| AppError::InvalidCredentials)?;
        Ok(AuthUser(user_id))
    }
}
