use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc, time::Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

const KEY_HEADER: &str = "X-Lister-Key";
const DEFAULT_RATE_PER_SEC: f64 = 5.0;
const DEFAULT_CAPACITY: f64 = 10.0;

#[derive(Clone)]
pub struct AuthState {
    records: Arc<HashMap<String, OrgRecord>>,
    limiter: Arc<TokenBuckets>,
}

/// Who made the request; inserted as a request extension after authentication.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub org_id: String,
    pub api_key_id: String,
}

#[derive(Clone)]
struct OrgRecord {
    org_id: String,
    api_key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        let raw = env::var("LISTER_API_KEYS").unwrap_or_default();
        let rate_per_sec = env::var("RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value > 0.0)
            .unwrap_or(DEFAULT_RATE_PER_SEC);
        let capacity = env::var("RATE_LIMIT_CAPACITY")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value >= 1.0)
            .unwrap_or(DEFAULT_CAPACITY);
        Self::new(&raw, rate_per_sec, capacity)
    }

    pub fn new(keys: &str, rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            records: Arc::new(parse_keys(keys)),
            limiter: Arc::new(TokenBuckets::new(rate_per_sec, capacity)),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.records.get(presented).map(|record| AuthContext {
            org_id: record.org_id.clone(),
            api_key_id: record.api_key_id.clone(),
        })
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "missing_api_key",
            "Provide X-Lister-Key or a Bearer token",
        ));
    };

    let Some(context) = state.authenticate(&presented) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid_api_key",
            "Key not recognized",
        ));
    };

    match state.limiter.consume(&context.org_id).await {
        Ok(permit) => {
            request.extensions_mut().insert(context);
            let mut response = next.run(request).await;
            permit.apply_headers(response.headers_mut());
            Ok(response)
        }
        Err(exceeded) => {
            warn!(target = "relister.api", org_id = %context.org_id, "rate_limited");
            let mut response =
                error_response(StatusCode::TOO_MANY_REQUESTS, "rate_limited", "Too many requests");
            exceeded.apply_headers(response.headers_mut());
            Ok(response)
        }
    }
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get(KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (status, Json(payload)).into_response()
}

/// Parses `org:key,org:key`. Malformed entries are skipped.
fn parse_keys(raw: &str) -> HashMap<String, OrgRecord> {
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, ':');
        let org_id = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let key = parts.next().map(str::trim).filter(|s| !s.is_empty());
        match (org_id, key) {
            (Some(org), Some(secret)) => {
                entries.insert(
                    secret.to_string(),
                    OrgRecord {
                        org_id: org.to_string(),
                        api_key_id: format!("key-{:02}", idx + 1),
                    },
                );
            }
            _ => warn!(
                target = "relister.api",
                entry_index = idx + 1,
                "ignored malformed LISTER_API_KEYS entry"
            ),
        }
    }

    if entries.is_empty() {
        warn!(
            target = "relister.api",
            "LISTER_API_KEYS produced no keys; every protected route will answer 401"
        );
    } else {
        info!(
            target = "relister.api",
            key_count = entries.len(),
            "loaded API keys"
        );
    }
    entries
}

struct TokenBuckets {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, BucketState>>,
}

impl TokenBuckets {
    fn new(rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            rate_per_sec,
            capacity,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    async fn consume(&self, key: &str) -> Result<RatePermit, RateExceeded> {
        let mut guard = self.buckets.lock().await;
        let now = Instant::now();
        let state = guard.entry(key.to_string()).or_insert_with(|| BucketState {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            state.last_refill = now;
        }

        let snapshot = BucketSnapshot {
            capacity: self.capacity,
            rate: self.rate_per_sec,
            tokens: state.tokens,
        };
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(RatePermit(BucketSnapshot {
                tokens: state.tokens,
                ..snapshot
            }))
        } else {
            let deficit = 1.0 - state.tokens;
            Err(RateExceeded {
                retry_after: (deficit / self.rate_per_sec).max(0.0),
                bucket: snapshot,
            })
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Clone, Copy)]
struct BucketSnapshot {
    capacity: f64,
    rate: f64,
    tokens: f64,
}

impl BucketSnapshot {
    fn apply_limit_headers(&self, headers: &mut http::HeaderMap, remaining: u64) {
        let reset = ((self.capacity - self.tokens) / self.rate).ceil().max(0.0) as u64;
        headers.insert("X-RateLimit-Limit", HeaderValue::from(self.capacity as u64));
        headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));
        headers.insert("X-RateLimit-Reset", HeaderValue::from(reset));
    }
}

#[derive(Debug)]
struct RatePermit(BucketSnapshot);

impl RatePermit {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        let remaining = self.0.tokens.max(0.0).floor() as u64;
        self.0.apply_limit_headers(headers, remaining);
    }
}

#[derive(Debug)]
struct RateExceeded {
    retry_after: f64,
    bucket: BucketSnapshot,
}

impl RateExceeded {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        let retry = (self.retry_after.ceil().max(1.0)) as u64;
        headers.insert(http::header::RETRY_AFTER, HeaderValue::from(retry));
        self.bucket.apply_limit_headers(headers, 0);
    }
}
