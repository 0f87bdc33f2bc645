//! Shared fixtures for unit tests: a small category tree, fake model
//! collaborators and eBay settings pointed at a mock server.

use crate::catalog::cache::{CategoryCache, DEFAULT_TTL_DAYS};
use crate::catalog::resolver::DEFAULT_LOW_CONFIDENCE;
use crate::catalog::tree::{Category, CategoryTree};
use crate::catalog::{CategoryResolver, RequirementsResolver, VectorIndex};
use crate::ebay::{EbayClient, EbayConfig, ListingPolicies, LocationSettings, TokenError, TokenProvider};
use crate::embeddings::{EmbeddingError, Embedder};
use crate::http::HttpSettings;
use crate::llm::{LlmError, LlmMessage, LlmProvider, LlmResponse};
use crate::models::{MarketplaceId, ProductRecord, SourceMarketplace};
use crate::jobs::{JobInfo, JobQueue, JobState};
use crate::pipeline::Pipeline;
use crate::pricing::PricingSettings;
use crate::publisher::ListingPublisher;
use crate::sanitize::{SanitizedProduct, sanitize_product};
use crate::store::JsonFileStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

pub fn location_settings() -> LocationSettings {
    LocationSettings {
        name: "Main warehouse".into(),
        address_line1: "100 Congress Ave".into(),
        address_line2: None,
        city: "Austin".into(),
        state_or_province: "TX".into(),
        postal_code: "78701".into(),
        country: "US".into(),
    }
}

pub fn ebay_config(api_root: &str) -> EbayConfig {
    EbayConfig {
        api_root: api_root.trim_end_matches('/').to_string(),
        app_id: "app-id".into(),
        cert_id: "cert-id".into(),
        marketplace: MarketplaceId::EbayUs,
        merchant_location_key: "default-warehouse".into(),
        location: Some(location_settings()),
        policies: ListingPolicies {
            fulfillment_policy_id: "f".into(),
            payment_policy_id: "p".into(),
            return_policy_id: "r".into(),
        },
        quantity: 1,
        pagination_delay: Duration::ZERO,
    }
}

fn tree_from(rows: &[(&str, &str, Option<&str>)]) -> CategoryTree {
    let parents: Vec<&str> = rows.iter().filter_map(|(_, _, parent)| *parent).collect();
    let mut levels: HashMap<&str, u32> = HashMap::new();
    for (id, _, parent) in rows {
        let level = parent.and_then(|p| levels.get(p).copied()).unwrap_or(0) + 1;
        levels.insert(id, level);
    }
    let mut tree = CategoryTree::empty();
    tree.version = "130".into();
    tree.fetched_at = Utc::now();
    for (id, name, parent) in rows {
        tree.categories.insert(
            id.to_string(),
            Category {
                id: id.to_string(),
                name: name.to_string(),
                parent_id: parent.map(str::to_string),
                level: levels[id],
                leaf: !parents.contains(id),
            },
        );
    }
    tree
}

/// Rows must list parents before children.
pub fn sample_tree() -> CategoryTree {
    tree_from(&[
        ("1", "Home & Garden", None),
        ("20635", "Kitchen, Dining & Bar", Some("1")),
        ("20625", "Water Bottles", Some("20635")),
        ("26395", "Health & Beauty", None),
        ("11863", "Skin Care", Some("26395")),
        ("21205", "Moisturizers", Some("11863")),
        ("67391", "Face Masks", Some("11863")),
        ("1281", "Pet Supplies", None),
        ("20742", "Dog Supplies", Some("1281")),
        ("20744", "Dog Shampoos", Some("20742")),
        ("177791", "Dog Water Bottles", Some("20742")),
        ("20737", "Cat Supplies", Some("1281")),
        ("20738", "Cat Grooming Lotions", Some("20737")),
        ("99", "Everything Else", None),
        ("88433", "Other", Some("99")),
        ("293", "Consumer Electronics", None),
        ("15052", "Portable Audio & Headphones", Some("293")),
        ("112529", "Headphones", Some("15052")),
        ("45100", "Gift Cards", None),
    ])
}

fn cache_with(tree: CategoryTree) -> CategoryCache {
    let cache = CategoryCache::new(
        std::env::temp_dir().join("relister-test-unused-categories.json"),
        DEFAULT_TTL_DAYS,
    );
    cache.replace(tree);
    cache
}

pub fn sample_cache() -> CategoryCache {
    cache_with(sample_tree())
}

/// Only pet categories, so every vector candidate sits under the wrong root for human products.
pub fn pet_only_cache() -> CategoryCache {
    cache_with(tree_from(&[
        ("1281", "Pet Supplies", None),
        ("20742", "Dog Supplies", Some("1281")),
        ("20744", "Dog Shampoos", Some("20742")),
        ("177791", "Dog Water Bottles", Some("20742")),
        ("20737", "Cat Supplies", Some("1281")),
        ("20738", "Cat Grooming Lotions", Some("20737")),
    ]))
}

const FAKE_DIMENSION: usize = 2048;

/// Hashed bag-of-words embedder. Shared words give positive similarity.
pub struct FakeEmbedder {
    model: String,
    fail: AtomicBool,
}

impl Default for FakeEmbedder {
    fn default() -> Self {
        Self::with_model("fake-bag-of-words")
    }
}

impl FakeEmbedder {
    pub fn with_model(model: &str) -> Self {
        Self {
            model: model.to_string(),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail_next_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut out = vec![0.0; FAKE_DIMENSION];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for byte in token.bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x0100_0000_01b3);
            }
            out[(hash % FAKE_DIMENSION as u64) as usize] += 1.0;
        }
        out
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Status(503));
        }
        Ok(texts.iter().map(|text| Self::vector(text)).collect())
    }
}

/// Replays canned replies in order and records every prompt it was sent.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<Vec<LlmMessage>>>,
}

impl ScriptedLlm {
    pub fn new(replies: impl IntoIterator<Item = Result<String, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<Vec<LlmMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn chat(&self, messages: &[LlmMessage]) -> Result<LlmResponse, LlmError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(LlmResponse::text(text)),
            Some(Err(err)) => Err(LlmError::Http(err)),
            None => Err(LlmError::InvalidResponse("no scripted reply left".into())),
        }
    }
}

/// Token provider that always answers the same way.
pub struct StaticTokens(Option<String>);

impl StaticTokens {
    pub fn valid(token: &str) -> Self {
        Self(Some(token.to_string()))
    }

    pub fn failing() -> Self {
        Self(None)
    }
}

#[async_trait]
impl TokenProvider for StaticTokens {
    async fn valid_token(&self, account: &str) -> Result<String, TokenError> {
        self.0
            .clone()
            .ok_or_else(|| TokenError::NoRefreshToken(account.to_string()))
    }
}

pub fn sanitized(title: &str, bullets: &[&str], specs: &[(&str, &str)]) -> SanitizedProduct {
    let record = ProductRecord {
        id: "TEST-SKU".into(),
        title: title.into(),
        description: String::new(),
        bullet_points: bullets.iter().map(|b| b.to_string()).collect(),
        specifications: specs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        images: Vec::new(),
        price: String::new(),
        delivery_fee: String::new(),
        source: SourceMarketplace::Amazon,
        price_multiplier: None,
    };
    sanitize_product(&record)
}

pub fn sample_record() -> ProductRecord {
    ProductRecord {
        id: "B0HYDRO32".into(),
        title: "HydroPeak Insulated Water Bottles 32oz Stainless Steel".into(),
        description: "Double wall vacuum bottle. Visit www.hydropeak-deals.com for more!".into(),
        bullet_points: vec![
            "Keeps water cold for 24 hours".into(),
            "Leakproof bottle lid".into(),
        ],
        specifications: BTreeMap::from([
            ("Brand".to_string(), "HydroPeak".to_string()),
            ("Item Weight".to_string(), "1.2 Pounds".to_string()),
            ("Capacity".to_string(), "32 oz".to_string()),
        ]),
        images: vec![
            "https://images.example.com/I/bottle-main.jpg".into(),
            "https://images.example.com/I/bottle-main.jpg".into(),
            "https://images.example.com/images/G/01/play-icon-overlay.png".into(),
            "https://images.example.com/I/bottle-side.jpg".into(),
        ],
        price: "$12.00".into(),
        delivery_fee: "$3.00".into(),
        source: SourceMarketplace::Amazon,
        price_multiplier: None,
    }
}

/// A full pipeline over the sample taxonomy, talking to `api_root` for every eBay call.
pub struct PipelineHarness {
    pub pipeline: Pipeline,
    pub store: Arc<JsonFileStore>,
    pub llm: Arc<ScriptedLlm>,
    pub ebay: Arc<EbayClient>,
    pub dir: tempfile::TempDir,
}

pub async fn pipeline_harness(
    api_root: &str,
    replies: Vec<Result<String, String>>,
    tokens: StaticTokens,
) -> PipelineHarness {
    let dir = tempfile::tempdir().unwrap();
    let ebay = Arc::new(EbayClient::new(ebay_config(api_root), &HttpSettings::default()));
    let cache = Arc::new(sample_cache());
    let index = Arc::new(VectorIndex::new(
        dir.path().join("category_index.json"),
        Arc::new(FakeEmbedder::default()),
    ));
    index.build(&cache, false).await.unwrap();
    let llm = Arc::new(ScriptedLlm::new(replies));
    let resolver = Arc::new(CategoryResolver::new(
        cache.clone(),
        index,
        llm.clone(),
        DEFAULT_LOW_CONFIDENCE,
    ));
    let requirements = Arc::new(RequirementsResolver::new(ebay.clone(), cache, llm.clone()));
    let publisher = Arc::new(ListingPublisher::new(ebay.clone(), Arc::new(tokens), "default"));
    let store = Arc::new(
        JsonFileStore::open(dir.path().join("listings.json"))
            .await
            .unwrap(),
    );
    PipelineHarness {
        pipeline: Pipeline::new(
            Arc::new(PricingSettings::default()),
            resolver,
            requirements,
            publisher,
            store.clone(),
        ),
        store,
        llm,
        ebay,
        dir,
    }
}

pub async fn wait_for_completion(queue: &JobQueue, id: Uuid) -> JobInfo {
    for _ in 0..200 {
        if let Some(info) = queue.get(id).await
            && matches!(info.state, JobState::Completed { .. })
        {
            return info;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not complete");
}
