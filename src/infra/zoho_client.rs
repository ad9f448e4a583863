//! Zoho Billing REST client.
//!
//! Handles OAuth access-token refresh (cached until expiry) and the raw REST
//! calls the provider adapter is built on. Timeouts and non-2xx responses
//! surface as retryable `ProviderApi` errors; 401 means our refresh token or
//! client credentials are bad and is not retryable by redelivery alone.

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::application::app_error::{AppError, AppResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
/// Refresh slightly before the provider-reported expiry to avoid racing it.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

pub struct ZohoBillingClient {
    client: Client,
    api_base: String,
    accounts_base: String,
    client_id: String,
    client_secret: SecretString,
    refresh_token: SecretString,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub struct ZohoPlanRef {
    pub plan_code: String,
}

#[derive(Debug, Deserialize)]
pub struct ZohoCustomerRef {
    pub customer_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ZohoAddon {
    pub addon_code: String,
    pub quantity: Option<i64>,
    pub addon_instance_id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ZohoSubscription {
    pub subscription_id: String,
    pub status: String,
    pub plan: Option<ZohoPlanRef>,
    pub amount: Option<f64>,
    pub currency_code: Option<String>,
    pub customer: Option<ZohoCustomerRef>,
    pub current_term_starts_at: Option<String>,
    pub current_term_ends_at: Option<String>,
    pub next_billing_at: Option<String>,
    pub addons: Option<Vec<ZohoAddon>>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionEnvelope {
    subscription: ZohoSubscription,
}

#[derive(Debug, Deserialize)]
struct CustomerEnvelope {
    customer: ZohoCustomerRef,
}

#[derive(Debug, Deserialize)]
pub struct ZohoHostedPage {
    pub hostedpage_id: Option<String>,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct HostedPageEnvelope {
    hostedpage: ZohoHostedPage,
}

impl ZohoBillingClient {
    pub fn new(
        api_base: String,
        accounts_base: String,
        client_id: String,
        client_secret: SecretString,
        refresh_token: SecretString,
    ) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static config");
        Self {
            client,
            api_base,
            accounts_base,
            client_id,
            client_secret,
            refresh_token,
            token: Mutex::new(None),
        }
    }

    /// Current access token, refreshed through the OAuth refresh-token grant
    /// when the cached one is missing or about to expire.
    async fn access_token(&self) -> AppResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.access_token.clone());
        }

        let response = self
            .client
            .post(format!("{}/oauth/v2/token", self.accounts_base))
            .query(&[
                ("refresh_token", self.refresh_token.expose_secret()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| AppError::ProviderApi(format!("token refresh failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, body, "Zoho token refresh rejected");
            return Err(AppError::ProviderAuth);
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::ProviderApi(format!("token response parse failed: {}", e)))?;

        let expires_at = Instant::now()
            + Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at,
        });
        Ok(access_token)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> AppResult<T> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            // Token may have been revoked mid-flight; drop the cache so the
            // next call re-authenticates.
            self.token.lock().await.take();
            return Err(AppError::ProviderAuth);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ProviderApi(format!(
                "Zoho returned {}: {}",
                status, body
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AppError::ProviderApi(format!("Zoho response parse failed: {}", e)))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Zoho-oauthtoken {}", token))
            .send()
            .await
            .map_err(|e| AppError::ProviderApi(format!("Zoho request failed: {}", e)))?;
        self.handle_response(response).await
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> AppResult<T> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Zoho-oauthtoken {}", token))
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::ProviderApi(format!("Zoho request failed: {}", e)))?;
        self.handle_response(response).await
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub async fn get_subscription(&self, subscription_id: &str) -> AppResult<ZohoSubscription> {
        let envelope: SubscriptionEnvelope = self
            .get(&format!("/subscriptions/{}", subscription_id))
            .await?;
        Ok(envelope.subscription)
    }

    pub async fn update_subscription(
        &self,
        subscription_id: &str,
        body: &serde_json::Value,
    ) -> AppResult<ZohoSubscription> {
        let envelope: SubscriptionEnvelope = self
            .post(&format!("/subscriptions/{}", subscription_id), body)
            .await?;
        Ok(envelope.subscription)
    }

    pub async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_term_end: bool,
    ) -> AppResult<()> {
        let _: serde_json::Value = self
            .post(
                &format!(
                    "/subscriptions/{}/cancel?cancel_at_end={}",
                    subscription_id, at_term_end
                ),
                &json!({}),
            )
            .await?;
        Ok(())
    }

    // ========================================================================
    // Customers
    // ========================================================================

    pub async fn get_customer(&self, customer_id: &str) -> AppResult<ZohoCustomerRef> {
        let envelope: CustomerEnvelope = self.get(&format!("/customers/{}", customer_id)).await?;
        Ok(envelope.customer)
    }

    // ========================================================================
    // Hosted Pages
    // ========================================================================

    pub async fn create_subscription_hosted_page(
        &self,
        body: &serde_json::Value,
    ) -> AppResult<ZohoHostedPage> {
        let envelope: HostedPageEnvelope =
            self.post("/hostedpages/newsubscription", body).await?;
        Ok(envelope.hostedpage)
    }

    pub async fn create_addon_hosted_page(
        &self,
        body: &serde_json::Value,
    ) -> AppResult<ZohoHostedPage> {
        let envelope: HostedPageEnvelope = self.post("/hostedpages/buyonetimeaddon", body).await?;
        Ok(envelope.hostedpage)
    }

    // ========================================================================
    // Webhook Verification
    // ========================================================================

    /// Verify the webhook's HMAC-SHA256 signature (hex of the raw body keyed
    /// with the shared secret).
    pub fn verify_webhook_signature(
        payload: &str,
        signature_header: &str,
        webhook_secret: &str,
    ) -> AppResult<()> {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let mut mac = Hmac::<Sha256>::new_from_slice(webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal("HMAC error".into()))?;
        mac.update(payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        if constant_time_compare(signature_header.trim(), &expected) {
            Ok(())
        } else {
            Err(AppError::InvalidInput("Invalid webhook signature".into()))
        }
    }
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
