//! Seller token persistence and refresh.
//!
//! Tokens live in one JSON file keyed by account. A token is served while it
//! has more than five minutes left; otherwise one refresh round-trip runs
//! before the caller continues. Refreshes are serialized so two callers never
//! race a refresh for the same account.

use crate::ebay::{EbayClient, USER_SCOPES};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const DEFAULT_ACCOUNT: &str = "default";
const REFRESH_MARGIN_MINUTES: i64 = 5;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("no token stored for account `{0}`")]
    UnknownAccount(String),
    #[error("token for account `{0}` is expired and has no refresh token")]
    NoRefreshToken(String),
    #[error("token refresh failed: {0}")]
    Refresh(String),
    #[error("token store io: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl AccessToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty()
            && now < self.expires_at - Duration::minutes(REFRESH_MARGIN_MINUTES)
    }
}

/// `tokens.json` under the data directory.
pub struct TokenStore {
    path: PathBuf,
    tokens: Mutex<HashMap<String, AccessToken>>,
}

impl TokenStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, TokenError> {
        let path = path.as_ref().to_path_buf();
        let tokens = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|err| TokenError::Io(format!("{}: {err}", path.display())))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(TokenError::Io(err.to_string())),
        };
        Ok(Self {
            path,
            tokens: Mutex::new(tokens),
        })
    }

    /// Registers a refresh token for `account` unless one is already stored.
    pub async fn seed_refresh_token(&self, account: &str, refresh_token: &str) -> Result<(), TokenError> {
        let mut tokens = self.tokens.lock().await;
        if tokens
            .get(account)
            .is_some_and(|token| token.refresh_token.is_some())
        {
            return Ok(());
        }
        tokens.insert(
            account.to_string(),
            AccessToken {
                access_token: String::new(),
                expires_at: DateTime::<Utc>::default(),
                refresh_token: Some(refresh_token.to_string()),
            },
        );
        persist(&self.path, &tokens).await
    }

    pub async fn get(&self, account: &str) -> Option<AccessToken> {
        self.tokens.lock().await.get(account).cloned()
    }

    pub async fn put(&self, account: &str, token: AccessToken) -> Result<(), TokenError> {
        let mut tokens = self.tokens.lock().await;
        tokens.insert(account.to_string(), token);
        persist(&self.path, &tokens).await
    }
}

async fn persist(path: &Path, tokens: &HashMap<String, AccessToken>) -> Result<(), TokenError> {
    let bytes = serde_json::to_vec_pretty(tokens).map_err(|err| TokenError::Io(err.to_string()))?;
    crate::store::write_atomic(path, &bytes)
        .await
        .map_err(|err| TokenError::Io(err.to_string()))
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A bearer token valid for at least the refresh margin.
    async fn valid_token(&self, account: &str) -> Result<String, TokenError>;
}

pub struct RefreshingTokenProvider {
    store: TokenStore,
    ebay: Arc<EbayClient>,
    refresh_lock: Mutex<()>,
}

impl RefreshingTokenProvider {
    pub fn new(store: TokenStore, ebay: Arc<EbayClient>) -> Self {
        Self {
            store,
            ebay,
            refresh_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl TokenProvider for RefreshingTokenProvider {
    async fn valid_token(&self, account: &str) -> Result<String, TokenError> {
        let _guard = self.refresh_lock.lock().await;
        let current = self
            .store
            .get(account)
            .await
            .ok_or_else(|| TokenError::UnknownAccount(account.to_string()))?;
        let now = Utc::now();
        if current.is_fresh(now) {
            return Ok(current.access_token);
        }

        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or_else(|| TokenError::NoRefreshToken(account.to_string()))?;
        let grant = self
            .ebay
            .refresh_user_token(&refresh_token, USER_SCOPES)
            .await
            .map_err(|err| {
                warn!(target = "relister.ebay", account = %account, error = %err, "token_refresh_failed");
                TokenError::Refresh(err.to_string())
            })?;

        let refreshed = AccessToken {
            access_token: grant.access_token,
            expires_at: now + Duration::seconds(grant.expires_in as i64),
            refresh_token: grant.refresh_token.or(Some(refresh_token)),
        };
        self.store.put(account, refreshed.clone()).await?;
        info!(
            target = "relister.ebay",
            account = %account,
            expires_at = %refreshed.expires_at,
            "token_refreshed"
        );
        Ok(refreshed.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpSettings;
    use crate::test_support::ebay_config;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn freshness_margin() {
        let now = Utc::now();
        let token = |minutes: i64| AccessToken {
            access_token: "t".into(),
            expires_at: now + Duration::minutes(minutes),
            refresh_token: None,
        };
        assert!(token(30).is_fresh(now));
        assert!(!token(4).is_fresh(now));
        assert!(!token(-1).is_fresh(now));
    }

    #[tokio::test]
    async fn refreshes_once_then_serves_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/identity/v1/oauth2/token"))
            .and(body_string_contains("refresh_token=seed-refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh-access",
                "expires_in": 7200
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tokens.json");
        let store = TokenStore::open(&file).await.unwrap();
        store.seed_refresh_token(DEFAULT_ACCOUNT, "seed-refresh").await.unwrap();

        let ebay = Arc::new(EbayClient::new(ebay_config(&server.uri()), &HttpSettings::default()));
        let provider = RefreshingTokenProvider::new(store, ebay);
        assert_eq!(provider.valid_token(DEFAULT_ACCOUNT).await.unwrap(), "fresh-access");
        assert_eq!(provider.valid_token(DEFAULT_ACCOUNT).await.unwrap(), "fresh-access");

        let reopened = TokenStore::open(&file).await.unwrap();
        let persisted = reopened.get(DEFAULT_ACCOUNT).await.unwrap();
        assert_eq!(persisted.access_token, "fresh-access");
        assert_eq!(persisted.refresh_token.as_deref(), Some("seed-refresh"));
    }

    #[tokio::test]
    async fn seeding_keeps_an_existing_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::open(dir.path().join("tokens.json")).await.unwrap();
        store.seed_refresh_token("acct", "first").await.unwrap();
        store.seed_refresh_token("acct", "second").await.unwrap();
        let token = store.get("acct").await.unwrap();
        assert_eq!(token.refresh_token.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn refresh_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::open(dir.path().join("tokens.json")).await.unwrap();
        store.seed_refresh_token(DEFAULT_ACCOUNT, "revoked").await.unwrap();
        let ebay = Arc::new(EbayClient::new(ebay_config(&server.uri()), &HttpSettings::default()));
        let provider = RefreshingTokenProvider::new(store, ebay);
        let err = provider.valid_token(DEFAULT_ACCOUNT).await.unwrap_err();
        assert!(matches!(err, TokenError::Refresh(msg) if msg.contains("400")));
    }

    #[tokio::test]
    async fn unknown_account_and_missing_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::open(dir.path().join("tokens.json")).await.unwrap();
        store
            .put(
                "stale",
                AccessToken {
                    access_token: "old".into(),
                    expires_at: Utc::now() - Duration::hours(1),
                    refresh_token: None,
                },
            )
            .await
            .unwrap();
        let ebay = Arc::new(EbayClient::new(ebay_config("http://127.0.0.1:9"), &HttpSettings::default()));
        let provider = RefreshingTokenProvider::new(store, ebay);
        assert!(matches!(
            provider.valid_token("nobody").await,
            Err(TokenError::UnknownAccount(_))
        ));
        assert!(matches!(
            provider.valid_token("stale").await,
            Err(TokenError::NoRefreshToken(_))
        ));
    }
}
