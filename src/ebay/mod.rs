//! eBay Sell and Commerce REST client.
//!
//! One [`EbayClient`] owns the HTTP client, the environment config and the
//! in-memory application-token cache. Endpoint groups live in sibling modules
//! as `impl EbayClient` blocks, each with its own error enum.

pub mod auth;
pub mod config;
pub mod inventory;
pub mod listing;
pub mod offers;
pub mod retrieval;
pub mod taxonomy;
pub mod token;

use crate::http::{HttpSettings, build_client};
use crate::text::take_chars;
use reqwest::{Client, Response};
use std::collections::HashMap;
use tokio::sync::Mutex;

pub use auth::{EbayAuthError, TAXONOMY_SCOPES, TokenGrant, USER_SCOPES};
pub use config::{EbayConfig, LocationSettings};
pub use listing::{ListingPolicies, PackageWeightAndSizePayload};
pub use token::{AccessToken, RefreshingTokenProvider, TokenError, TokenProvider, TokenStore};

const ERROR_BODY_LIMIT: usize = 300;

pub struct EbayClient {
    http: Client,
    config: EbayConfig,
    app_tokens: Mutex<HashMap<String, auth::CachedAppToken>>,
}

impl EbayClient {
    pub fn new(config: EbayConfig, http: &HttpSettings) -> Self {
        Self {
            http: build_client(http),
            config,
            app_tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EbayConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        self.config.url(path)
    }
}

/// Status code plus a bounded slice of the response body for error messages.
pub(crate) async fn status_and_body(response: Response) -> (u16, String) {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    (status, take_chars(body.trim(), ERROR_BODY_LIMIT))
}
