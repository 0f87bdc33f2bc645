mod catalog;
mod ebay;
mod embeddings;
mod http;
mod jobs;
mod llm;
mod measurements;
mod metrics;
mod models;
mod pipeline;
mod pricing;
mod publisher;
mod sanitize;
mod security;
mod source;
mod store;
mod text;

#[cfg(test)]
mod test_support;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use catalog::resolver::DEFAULT_LOW_CONFIDENCE;
use catalog::{CategoryCache, CategoryResolution, CategoryResolver, RequirementsResolver, VectorIndex};
use ebay::token::DEFAULT_ACCOUNT;
use ebay::{EbayClient, EbayConfig, RefreshingTokenProvider, TokenProvider, TokenStore};
use embeddings::{EmbeddingConfig, TeiClient};
use eyre::WrapErr;
use llm::{LlmClient, LlmConfig};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, ListingReport, ProductRecord, RecordBatch};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind, RequirementsPreview};
use pricing::{PriceQuote, PricingSettings};
use publisher::ListingPublisher;
use sanitize::SanitizedProduct;
use security::{AuthState, require_api_auth};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
};
use store::{JsonFileStore, ListingStore, RedisStore};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing the prometheus recorder")?;
    let state = build_state(prometheus).await?;

    if let Some(inbox) = source::InboxConfig::from_env() {
        source::spawn(inbox, state.queue.clone());
    }

    let app = router(state, AuthState::from_env());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "relister.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    queue: jobs::JobQueue,
    ebay: Arc<EbayClient>,
    tokens: Arc<dyn TokenProvider>,
    prometheus: PrometheusHandle,
}

/// Wires every service from the environment. Category taxonomy problems are
/// fatal here; a missing vector index only degrades category resolution.
async fn build_state(prometheus: PrometheusHandle) -> eyre::Result<AppState> {
    let http = http::HttpSettings::from_env();
    let data_dir = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".into()));

    let ebay = Arc::new(EbayClient::new(EbayConfig::from_env(), &http));
    if !ebay.config().has_credentials() {
        warn!(
            target = "relister.api",
            "EBAY_APP_ID / EBAY_CERT_ID are not set; eBay calls will fail"
        );
    }
    if !ebay.config().policies.is_complete() {
        warn!(
            target = "relister.api",
            "listing policy ids are incomplete; every offer will fail"
        );
    }

    let token_store = TokenStore::open(data_dir.join("tokens.json"))
        .await
        .wrap_err("opening the token store")?;
    if let Ok(refresh) = std::env::var("EBAY_REFRESH_TOKEN")
        && !refresh.trim().is_empty()
    {
        token_store
            .seed_refresh_token(DEFAULT_ACCOUNT, refresh.trim())
            .await
            .wrap_err("seeding the refresh token")?;
    }
    let tokens: Arc<dyn TokenProvider> =
        Arc::new(RefreshingTokenProvider::new(token_store, ebay.clone()));

    let ttl_days = std::env::var("CATEGORY_CACHE_TTL_DAYS")
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(catalog::cache::DEFAULT_TTL_DAYS);
    let cache = Arc::new(CategoryCache::new(data_dir.join("categories.json"), ttl_days));
    let cache_status = cache
        .initialize(&ebay)
        .await
        .wrap_err("loading the category taxonomy")?;
    info!(target = "relister.catalog", status = ?cache_status, "category_cache_ready");

    let embedder = Arc::new(TeiClient::new(&EmbeddingConfig::from_env(), &http));
    let index = Arc::new(VectorIndex::new(data_dir.join("category_index.json"), embedder));
    match index.build(&cache, false).await {
        Ok(_) if index.is_empty() => warn!(
            target = "relister.catalog",
            "vector_index_empty_using_keywords"
        ),
        Ok(status) => info!(target = "relister.catalog", status = ?status, entries = index.len(), "vector_index_ready"),
        Err(err) => warn!(
            target = "relister.catalog",
            error = %err,
            "vector_index_unavailable_using_keywords"
        ),
    }

    let llm = Arc::new(LlmClient::new(LlmConfig::from_env(), &http));
    let low_confidence = std::env::var("CATEGORY_LOW_CONFIDENCE")
        .ok()
        .and_then(|v| v.trim().parse::<f32>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(DEFAULT_LOW_CONFIDENCE);
    let resolver = Arc::new(CategoryResolver::new(
        cache.clone(),
        index,
        llm.clone(),
        low_confidence,
    ));
    let requirements = Arc::new(RequirementsResolver::new(ebay.clone(), cache, llm));

    let pricing = match std::env::var("PRICING_CONFIG_PATH") {
        Ok(path) if !path.trim().is_empty() => PricingSettings::load(std::path::Path::new(path.trim()))
            .wrap_err("loading the pricing config")?,
        _ => PricingSettings::default(),
    };

    let store: Arc<dyn ListingStore> = match std::env::var("REDIS_URL") {
        Ok(url) if !url.trim().is_empty() => {
            info!(target = "relister.store", "listing history in redis");
            Arc::new(RedisStore::open(url.trim()).wrap_err("opening redis")?)
        }
        _ => Arc::new(
            JsonFileStore::open(data_dir.join("listings.json"))
                .await
                .wrap_err("opening the listings store")?,
        ),
    };

    let publisher = Arc::new(ListingPublisher::new(ebay.clone(), tokens.clone(), DEFAULT_ACCOUNT));
    let pipeline = Pipeline::new(Arc::new(pricing), resolver, requirements, publisher, store);
    let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone());

    Ok(AppState {
        pipeline,
        queue,
        ebay,
        tokens,
        prometheus,
    })
}

fn router(state: AppState, auth: AuthState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/listings", post(create_listings))
        .nest(
            "/stages",
            Router::new()
                .route("/sanitize", post(stage_sanitize))
                .route("/price", post(stage_price))
                .route("/resolve_category", post(stage_resolve_category))
                .route("/requirements", post(stage_requirements)),
        )
        .nest(
            "/jobs",
            Router::new()
                .route("/listings", post(enqueue_listings))
                .route("/{id}", get(get_job_status)),
        )
        .route("/inventory", get(inventory))
        .route("/orders", get(orders))
        .route_layer(middleware::from_fn_with_state(auth, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "relister-api",
    }))
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus.render(),
    )
        .into_response()
}

fn validated(batch: RecordBatch) -> Result<Vec<ProductRecord>, AppError> {
    let records = batch.into_records();
    if records.is_empty() {
        return Err(PipelineError::invalid_input("validate", "no product records supplied").into());
    }
    for record in &records {
        Pipeline::validate(record)?;
    }
    Ok(records)
}

/// Publishes every record in order and answers once the whole batch is done.
async fn create_listings(
    State(state): State<AppState>,
    Json(batch): Json<RecordBatch>,
) -> Result<Json<Vec<ListingReport>>, AppError> {
    crate::metrics::inc_requests("/listings");
    let records = validated(batch)?;
    Ok(Json(state.pipeline.run_batch(&records).await))
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
    records: usize,
}

async fn enqueue_listings(
    State(state): State<AppState>,
    axum::Extension(context): axum::Extension<security::AuthContext>,
    Json(batch): Json<RecordBatch>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    crate::metrics::inc_requests("/jobs/listings");
    let records = validated(batch)?;
    let count = records.len();
    let id = state
        .queue
        .enqueue(records, format!("api:{}", context.org_id))
        .await
        .map_err(|err| PipelineError::internal("enqueue", err.to_string()))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: id.to_string(),
            records: count,
        }),
    ))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(PipelineError::invalid_input("jobs", "invalid_job_id").into());
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or_else(|| PipelineError::not_found("jobs", "not_found").into())
}

async fn stage_sanitize(
    State(state): State<AppState>,
    Json(record): Json<ProductRecord>,
) -> Json<SanitizedProduct> {
    crate::metrics::inc_requests("/stages/sanitize");
    Json(state.pipeline.stage_sanitize(&record))
}

async fn stage_price(
    State(state): State<AppState>,
    Json(record): Json<ProductRecord>,
) -> Json<PriceQuote> {
    crate::metrics::inc_requests("/stages/price");
    Json(state.pipeline.stage_price(&record))
}

async fn stage_resolve_category(
    State(state): State<AppState>,
    Json(record): Json<ProductRecord>,
) -> Result<Json<CategoryResolution>, AppError> {
    crate::metrics::inc_requests("/stages/resolve_category");
    Pipeline::validate(&record)?;
    Ok(Json(state.pipeline.stage_resolve_category(&record).await))
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RequirementsRequest {
    category_id: String,
    product: ProductRecord,
    #[serde(default = "default_true")]
    include_recommended: bool,
}

async fn stage_requirements(
    State(state): State<AppState>,
    Json(req): Json<RequirementsRequest>,
) -> Result<Json<RequirementsPreview>, AppError> {
    crate::metrics::inc_requests("/stages/requirements");
    if req.category_id.trim().is_empty() {
        return Err(PipelineError::invalid_input("requirements", "category_id must not be empty").into());
    }
    let preview = state
        .pipeline
        .stage_requirements(&req.product, req.category_id.trim(), req.include_recommended)
        .await?;
    Ok(Json(preview))
}

async fn user_token(state: &AppState, stage: &'static str) -> Result<String, AppError> {
    state
        .tokens
        .valid_token(DEFAULT_ACCOUNT)
        .await
        .map_err(|err| PipelineError::internal(stage, err.to_string()).into())
}

async fn inventory(State(state): State<AppState>) -> Result<Json<ebay::retrieval::InventoryReport>, AppError> {
    crate::metrics::inc_requests("/inventory");
    let token = user_token(&state, "inventory").await?;
    let report = state
        .ebay
        .fetch_inventory(&token)
        .await
        .map_err(|err| PipelineError::internal("inventory", err.to_string()))?;
    Ok(Json(report))
}

async fn orders(State(state): State<AppState>) -> Result<Json<Vec<ebay::retrieval::OrderSummary>>, AppError> {
    crate::metrics::inc_requests("/orders");
    let token = user_token(&state, "orders").await?;
    let orders = state
        .ebay
        .fetch_orders(&token)
        .await
        .map_err(|err| PipelineError::internal("orders", err.to_string()))?;
    Ok(Json(orders))
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::NotFound => StatusCode::NOT_FOUND,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{PipelineHarness, StaticTokens, pipeline_harness, sample_record};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    const KEY: &str = "secret-key";

    async fn app() -> (Router, PipelineHarness) {
        let h = pipeline_harness("http://127.0.0.1:9", Vec::new(), StaticTokens::valid("t")).await;
        let (queue, _worker) = jobs::JobQueue::with_capacity(h.pipeline.clone(), 4);
        let state = AppState {
            pipeline: h.pipeline.clone(),
            queue,
            ebay: h.ebay.clone(),
            tokens: Arc::new(StaticTokens::valid("t")),
            prometheus: PrometheusBuilder::new().build_recorder().handle(),
        };
        let auth = AuthState::new(&format!("acme:{KEY}"), 100.0, 100.0);
        (router(state, auth), h)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .header("X-Lister-Key", KEY)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_key() {
        let (app, _h) = app().await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["service"], "relister-api");
    }

    #[tokio::test]
    async fn protected_routes_require_a_key() {
        let (app, _h) = app().await;
        let response = app
            .oneshot(
                Request::post("/stages/price")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"id": "A", "title": "t"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "missing_api_key");
    }

    #[tokio::test]
    async fn sanitize_stage_strips_contact_details() {
        let (app, _h) = app().await;
        let record = json!({
            "id": "A",
            "title": "Steel Bottle call 555-123-4567 www.bottles-direct.com",
        });
        let response = app.oneshot(post_json("/stages/sanitize", record)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("X-RateLimit-Remaining"));
        let body = json_body(response).await;
        let title = body["title"].as_str().unwrap();
        assert!(!title.contains("555-123-4567"));
        assert!(!title.contains("bottles-direct"));
        assert!(!body["violations"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn price_stage_returns_quote() {
        let (app, _h) = app().await;
        let record = serde_json::to_value(sample_record()).unwrap();
        let response = app.oneshot(post_json("/stages/price", record)).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["total"], 15.0);
        assert_eq!(body["price"], 33.99);
    }

    #[tokio::test]
    async fn blank_title_is_rejected() {
        let (app, _h) = app().await;
        let response = app
            .oneshot(post_json("/listings", json!([{"id": "A", "title": ""}])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "validate");
    }

    #[tokio::test]
    async fn synchronous_batch_reports_per_record() {
        let (app, _h) = app().await;
        let response = app
            .oneshot(post_json("/listings", json!({"id": "A", "title": "Steel Bottle"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body[0]["sku"], "A");
        assert_eq!(body[0]["result"]["status"], "failed");
        assert_eq!(body[0]["result"]["stage"], "pricing");
    }

    #[tokio::test]
    async fn job_lifecycle() {
        let (app, _h) = app().await;
        let response = app
            .clone()
            .oneshot(post_json("/jobs/listings", json!([{"id": "A", "title": "Steel Bottle"}])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let job_id = json_body(response).await["job_id"].as_str().unwrap().to_string();

        let mut state = Value::Null;
        for _ in 0..200 {
            let response = app
                .clone()
                .oneshot(
                    Request::get(format!("/jobs/{job_id}"))
                        .header("X-Lister-Key", KEY)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            state = body["state"].clone();
            if state == "completed" {
                assert_eq!(body["results"][0]["sku"], "A");
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(state, "completed");

        let missing = app
            .clone()
            .oneshot(
                Request::get(format!("/jobs/{}", uuid::Uuid::new_v4()))
                    .header("X-Lister-Key", KEY)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let invalid = app
            .oneshot(
                Request::get("/jobs/not-a-uuid")
                    .header("X-Lister-Key", KEY)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }
}
