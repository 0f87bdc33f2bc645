use crate::ebay::{EbayClient, status_and_body};
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Client-credentials scope for taxonomy and aspect lookups.
pub const TAXONOMY_SCOPES: &[&str] = &["https://api.ebay.com/oauth/api_scope"];

/// Seller scopes for inventory, offers, policies and orders.
pub const USER_SCOPES: &[&str] = &[
    "https://api.ebay.com/oauth/api_scope/sell.inventory",
    "https://api.ebay.com/oauth/api_scope/sell.account",
    "https://api.ebay.com/oauth/api_scope/sell.fulfillment",
];

const APP_TOKEN_SKEW: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum EbayAuthError {
    #[error("missing ebay app credentials in env")]
    MissingCredentials,
    #[error("oauth request failed: {0}")]
    Request(String),
    #[error("oauth returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Result of an OAuth grant. Refresh grants may rotate the refresh token.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default = "TokenGrant::default_expires_in")]
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenGrant {
    fn default_expires_in() -> u64 {
        7200
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CachedAppToken {
    token: String,
    expires_at: Instant,
}

impl EbayClient {
    /// Application token for `scopes`, cached in memory until shortly before expiry.
    pub async fn app_token(&self, scopes: &[&str]) -> Result<String, EbayAuthError> {
        let key = scopes.join(" ");
        let mut cache = self.app_tokens.lock().await;
        if let Some(cached) = cache.get(&key)
            && Instant::now() < cached.expires_at
        {
            return Ok(cached.token.clone());
        }

        let grant = self
            .request_token(&[("grant_type", "client_credentials"), ("scope", &key)])
            .await?;
        let lifetime = Duration::from_secs(grant.expires_in).saturating_sub(APP_TOKEN_SKEW);
        debug!(
            target = "relister.ebay",
            scopes = %key,
            expires_in = grant.expires_in,
            "app_token_issued"
        );
        cache.insert(
            key,
            CachedAppToken {
                token: grant.access_token.clone(),
                expires_at: Instant::now() + lifetime,
            },
        );
        Ok(grant.access_token)
    }

    pub async fn refresh_user_token(
        &self,
        refresh_token: &str,
        scopes: &[&str],
    ) -> Result<TokenGrant, EbayAuthError> {
        let scope = scopes.join(" ");
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", &scope),
        ])
        .await
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenGrant, EbayAuthError> {
        if !self.config.has_credentials() {
            return Err(EbayAuthError::MissingCredentials);
        }
        let response = self
            .http
            .post(self.config.oauth_token_url())
            .basic_auth(&self.config.app_id, Some(&self.config.cert_id))
            .form(params)
            .send()
            .await
            .map_err(|err| EbayAuthError::Request(err.to_string()))?;

        if !response.status().is_success() {
            let (status, body) = status_and_body(response).await;
            return Err(EbayAuthError::Status { status, body });
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|err| EbayAuthError::Request(err.to_string()))
    }
}
