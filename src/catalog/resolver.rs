//! Picks one leaf category per product.
//!
//! The vector index proposes a few candidates and a single LLM call chooses
//! among them while also rewriting the title and extracting a brand. The
//! returned category is always one of those candidates, a keyword-search
//! leaf from the cache, or the generic fallback category. Nothing the model
//! invents on its own is trusted.

use crate::catalog::cache::CategoryCache;
use crate::catalog::index::{CategoryCandidate, VectorIndex};
use crate::catalog::tree::{Category, CategoryTree};
use crate::llm::{LlmMessage, LlmProvider, parse_json_object};
use crate::sanitize::{SanitizedProduct, sanitize_title};
use crate::text::{ASPECT_VALUE_LIMIT, take_chars};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use serde_with::skip_serializing_none;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const CANDIDATE_COUNT: usize = 3;
pub const GENERIC_CATEGORY_ID: &str = "88433";
const GENERIC_CATEGORY_NAME: &str = "Other";
pub const DEFAULT_LOW_CONFIDENCE: f32 = 0.35;
const QUERY_BULLETS: usize = 5;
const QUERY_DESCRIPTION_CHARS: usize = 300;
const FALLBACK_TITLE_TOKENS: usize = 5;
pub const UNBRANDED: &str = "Unbranded";

const BRAND_STOPLIST: &[&str] = &[
    "custom",
    "handmade",
    "vintage",
    "generic",
    "unknown",
    "unbranded",
    "no brand",
    "does not apply",
    "n/a",
    "na",
    "none",
    "brand",
    "other",
    "various",
    "assorted",
    "new",
    "oem",
];

const SYSTEM_PROMPT: &str = r#"You categorize marketplace listings and write their titles.
You receive a product and a short list of candidate leaf categories, each with its id, name, full taxonomy path and similarity score.
1. Choose exactly one candidate. Decide by the ROOT category (the first segment of the path): it must match the product's real domain and audience. The highest similarity score is NOT proof of the right domain; word overlap can put a baby product next to pet supplies. Only ids from the list are valid.
2. Rewrite the title for search: brand first, then product type, then the key features. At most 80 characters. No promotional fluff, no contact details, no other marketplace names.
3. Extract the brand. Use null when the brand is unknown or generic (custom, handmade, vintage, generic, unknown, unbranded).
Respond with JSON only: {"categoryId": "...", "optimizedTitle": "...", "brand": "..." or null, "reasoning": "one sentence"}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// The model chose one of the offered candidates.
    Vector,
    /// The model answered with an id that was not offered; the best candidate was used.
    VectorTopOne,
    /// Index or model unavailable; keyword search over cached names.
    Keyword,
    Generic,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CategoryResolution {
    pub optimized_title: String,
    pub brand: String,
    pub category_id: String,
    pub category_name: String,
    pub category_path: Option<String>,
    /// Vector similarity of the chosen candidate; 0 for fallbacks.
    pub confidence: f32,
    pub reasoning: String,
    pub source: ResolutionSource,
    pub needs_review: bool,
    pub candidates: Vec<CategoryCandidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CategoryPick {
    #[serde(deserialize_with = "id_from_string_or_number")]
    category_id: String,
    optimized_title: String,
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    reasoning: String,
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "categoryId must be a string or number, got {other}"
        ))),
    }
}

fn parse_pick(raw: &str) -> Result<CategoryPick, String> {
    let pick: CategoryPick = parse_json_object(raw).map_err(|err| err.to_string())?;
    if pick.category_id.is_empty() {
        return Err("empty categoryId".into());
    }
    if pick.optimized_title.trim().is_empty() {
        return Err("empty optimizedTitle".into());
    }
    Ok(pick)
}

pub struct CategoryResolver {
    cache: Arc<CategoryCache>,
    index: Arc<VectorIndex>,
    llm: Arc<dyn LlmProvider>,
    low_confidence: f32,
}

impl CategoryResolver {
    pub fn new(
        cache: Arc<CategoryCache>,
        index: Arc<VectorIndex>,
        llm: Arc<dyn LlmProvider>,
        low_confidence: f32,
    ) -> Self {
        Self {
            cache,
            index,
            llm,
            low_confidence,
        }
    }

    /// Never fails: every error path degrades to a keyword or generic category.
    pub async fn resolve(&self, product: &SanitizedProduct) -> CategoryResolution {
        let tree = self.cache.snapshot();
        let detail = query_detail(product);

        let candidates = match self
            .index
            .search(&product.title, &detail, CANDIDATE_COUNT)
            .await
        {
            Ok(candidates) if !candidates.is_empty() => candidates,
            Ok(_) => {
                warn!(target = "relister.catalog", "vector_search_empty_using_keywords");
                return self.heuristic(product, &tree, "vector index returned no candidates");
            }
            Err(err) => {
                warn!(target = "relister.catalog", error = %err, "vector_search_failed_using_keywords");
                return self.heuristic(product, &tree, &format!("vector index unavailable: {err}"));
            }
        };

        let messages = build_messages(product, &detail, &candidates, &tree);
        let pick = match self.llm.chat(&messages).await {
            Ok(response) => match parse_pick(&response.text) {
                Ok(pick) => pick,
                Err(err) => {
                    warn!(target = "relister.llm", error = %err, "category_pick_unparseable_using_keywords");
                    return self.heuristic(product, &tree, &format!("model output rejected: {err}"));
                }
            },
            Err(err) => {
                warn!(target = "relister.llm", error = %err, "category_llm_failed_using_keywords");
                return self.heuristic(product, &tree, &format!("model unavailable: {err}"));
            }
        };

        let (chosen, source) = match candidates
            .iter()
            .find(|candidate| candidate.category_id == pick.category_id)
        {
            Some(candidate) => (candidate.clone(), ResolutionSource::Vector),
            None => {
                warn!(
                    target = "relister.catalog",
                    returned = %pick.category_id,
                    fallback = %candidates[0].category_id,
                    "category_id_not_offered_using_top_candidate"
                );
                (candidates[0].clone(), ResolutionSource::VectorTopOne)
            }
        };

        let optimized_title = finalize_title(&pick.optimized_title, &product.title);
        let brand = pick
            .brand
            .as_deref()
            .and_then(clean_brand)
            .or_else(|| brand_from_specifications(product))
            .unwrap_or_else(|| UNBRANDED.to_string());
        let needs_review = chosen.score < self.low_confidence || source != ResolutionSource::Vector;
        if needs_review {
            warn!(
                target = "relister.catalog",
                category_id = %chosen.category_id,
                confidence = chosen.score,
                "category_low_confidence_needs_review"
            );
        }
        info!(
            target = "relister.catalog",
            category_id = %chosen.category_id,
            confidence = chosen.score,
            source = ?source,
            "category_resolved"
        );

        CategoryResolution {
            optimized_title,
            brand,
            category_id: chosen.category_id.clone(),
            category_name: chosen.name.clone(),
            category_path: Some(chosen.path.clone()),
            confidence: chosen.score,
            reasoning: pick.reasoning,
            source,
            needs_review,
            candidates,
        }
    }

    fn heuristic(&self, product: &SanitizedProduct, tree: &CategoryTree, why: &str) -> CategoryResolution {
        let brand = brand_from_specifications(product).unwrap_or_else(|| UNBRANDED.to_string());
        let optimized_title = finalize_title(&product.title, &product.title);

        if let Some(category) = keyword_fallback(tree, &product.title) {
            return CategoryResolution {
                optimized_title,
                brand,
                category_id: category.id.clone(),
                category_name: category.name.clone(),
                category_path: tree.path(&category.id),
                confidence: 0.0,
                reasoning: format!("keyword fallback ({why})"),
                source: ResolutionSource::Keyword,
                needs_review: true,
                candidates: Vec::new(),
            };
        }

        warn!(target = "relister.catalog", "category_generic_fallback");
        let generic_name = tree
            .get(GENERIC_CATEGORY_ID)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| GENERIC_CATEGORY_NAME.to_string());
        CategoryResolution {
            optimized_title,
            brand,
            category_id: GENERIC_CATEGORY_ID.to_string(),
            category_name: generic_name,
            category_path: tree.path(GENERIC_CATEGORY_ID),
            confidence: 0.0,
            reasoning: format!("generic fallback ({why})"),
            source: ResolutionSource::Generic,
            needs_review: true,
            candidates: Vec::new(),
        }
    }
}

/// Bullets and a description excerpt appended to the title for the vector query.
fn query_detail(product: &SanitizedProduct) -> String {
    let mut parts: Vec<String> = product
        .bullet_points
        .iter()
        .take(QUERY_BULLETS)
        .cloned()
        .collect();
    let excerpt = take_chars(&product.description, QUERY_DESCRIPTION_CHARS);
    if !excerpt.trim().is_empty() {
        parts.push(excerpt);
    }
    parts.join(" ")
}

fn build_messages(
    product: &SanitizedProduct,
    detail: &str,
    candidates: &[CategoryCandidate],
    tree: &CategoryTree,
) -> Vec<LlmMessage> {
    let listed: Vec<Value> = candidates
        .iter()
        .map(|c| {
            let root = tree
                .root_name(&c.category_id)
                .unwrap_or_else(|| c.path.split(" > ").next().unwrap_or(&c.name).to_string());
            json!({
                "categoryId": c.category_id,
                "name": c.name,
                "path": c.path,
                "root": root,
                "similarity": (c.score * 1000.0).round() / 1000.0,
            })
        })
        .collect();
    let payload = json!({
        "product": {
            "title": product.title,
            "details": detail,
            "specifications": product.specifications,
        },
        "candidates": listed,
    });
    vec![
        LlmMessage::system(SYSTEM_PROMPT),
        LlmMessage::user(payload.to_string()),
    ]
}

fn finalize_title(candidate: &str, original: &str) -> String {
    let result = sanitize_title(candidate);
    if !result.is_clean() {
        warn!(
            target = "relister.catalog",
            violations = result.violations.len(),
            "optimized_title_sanitized"
        );
    }
    let cleaned = result.cleaned;
    if cleaned.is_empty() {
        sanitize_title(original).cleaned
    } else {
        cleaned
    }
}

/// Rejects stoplisted brands and brands with any token of two characters or fewer.
pub fn clean_brand(raw: &str) -> Option<String> {
    let brand = raw.trim().trim_matches(|c: char| c == '"' || c == '\'').trim();
    if brand.is_empty() || brand.split_whitespace().any(|token| token.chars().count() <= 2) {
        return None;
    }
    let lowered = brand.to_lowercase();
    if BRAND_STOPLIST.contains(&lowered.as_str()) {
        return None;
    }
    Some(take_chars(brand, ASPECT_VALUE_LIMIT))
}

/// First usable `brand` or `manufacturer` specification value.
pub fn brand_from_specifications(product: &SanitizedProduct) -> Option<String> {
    ["brand", "manufacturer"].iter().find_map(|wanted| {
        product
            .specifications
            .iter()
            .find(|(key, _)| key.trim().eq_ignore_ascii_case(wanted))
            .and_then(|(_, value)| clean_brand(value))
    })
}

fn fallback_tokens(title: &str) -> Vec<String> {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .take(FALLBACK_TITLE_TOKENS)
        .map(str::to_string)
        .collect()
}

/// Leaf whose name matches the most of the first title tokens, preferring
/// levels 2 and 3. Ties go to the shorter name.
fn keyword_fallback<'a>(tree: &'a CategoryTree, title: &str) -> Option<&'a Category> {
    let mut matches: HashMap<&str, (usize, &Category)> = HashMap::new();
    for token in &fallback_tokens(title) {
        for category in tree.search(token, true) {
            matches
                .entry(category.id.as_str())
                .or_insert((0, category))
                .0 += 1;
        }
    }

    let best = |preferred: bool| {
        matches
            .values()
            .filter(|(_, c)| !preferred || (2..=3).contains(&c.level))
            .max_by(|(hits_a, a), (hits_b, b)| {
                hits_a
                    .cmp(hits_b)
                    .then_with(|| b.name.len().cmp(&a.name.len()))
                    .then_with(|| b.level.cmp(&a.level))
                    .then_with(|| b.name.cmp(&a.name))
            })
            .map(|(_, c)| *c)
    };
    best(true).or_else(|| best(false))
}
