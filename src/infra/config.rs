use std::net::SocketAddr;

use axum::http::HeaderValue;
use env_helpers::{get_env, get_env_default};
use secrecy::SecretString;
use time::Duration;
use url::Url;

pub struct AppConfig {
    pub jwt_secret: SecretString,
    pub access_token_ttl: Duration,
    pub app_origin: Url,
    pub cors_origin: HeaderValue,
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub redis_url: String,
    /// Zoho Billing REST base (e.g. "https://www.zohoapis.eu/billing/v1").
    pub zoho_api_base: String,
    /// Zoho accounts base used for OAuth token refresh.
    pub zoho_accounts_base: String,
    pub zoho_client_id: String,
    pub zoho_client_secret: SecretString,
    pub zoho_refresh_token: SecretString,
    /// Shared secret for webhook signature verification. Unset means the
    /// webhook endpoint accepts unsigned deliveries (local dev only).
    pub webhook_secret: Option<String>,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let jwt_secret: SecretString = SecretString::new(get_env::<String>("JWT_SECRET").into());
        let access_token_ttl_secs: i64 = get_env_default("ACCESS_TOKEN_TTL_SECS", 86_400);

        let app_origin: Url = get_env("APP_ORIGIN");
        let cors_origin: HeaderValue =
            get_env_default("CORS_ORIGIN", String::from("http://localhost:3000"))
                .parse()
                .expect("CORS_ORIGIN must be a valid header value");

        let bind_addr: SocketAddr = get_env_default("BIND_ADDR", "127.0.0.1:3001".parse().unwrap());
        let database_url: String = get_env("DATABASE_URL");
        let redis_url: String = get_env_default("REDIS_URL", "redis://127.0.0.1:6379".to_string());

        let zoho_api_base: String = get_env_default(
            "ZOHO_API_BASE",
            "https://www.zohoapis.eu/billing/v1".to_string(),
        );
        let zoho_accounts_base: String = get_env_default(
            "ZOHO_ACCOUNTS_BASE",
            "https://accounts.zoho.eu".to_string(),
        );
        let zoho_client_id: String = get_env("ZOHO_CLIENT_ID");
        let zoho_client_secret: SecretString =
            SecretString::new(get_env::<String>("ZOHO_CLIENT_SECRET").into());
        let zoho_refresh_token: SecretString =
            SecretString::new(get_env::<String>("ZOHO_REFRESH_TOKEN").into());

        let webhook_secret: Option<String> = std::env::var("BILLING_WEBHOOK_SECRET").ok();

        let checkout_success_url: String = get_env_default(
            "CHECKOUT_SUCCESS_URL",
            format!("{}billing/success", app_origin),
        );
        let checkout_cancel_url: String = get_env_default(
            "CHECKOUT_CANCEL_URL",
            format!("{}billing/cancelled", app_origin),
        );

        Self {
            jwt_secret,
            access_token_ttl: Duration::seconds(access_token_ttl_secs),
            app_origin,
            cors_origin,
            bind_addr,
            database_url,
            redis_url,
            zoho_api_base,
            zoho_accounts_base,
            zoho_client_id,
            zoho_client_secret,
            zoho_refresh_token,
            webhook_secret,
            checkout_success_url,
            checkout_cancel_url,
        }
    }
}
