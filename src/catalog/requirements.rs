use crate::catalog::CatalogError;
use crate::catalog::cache::CategoryCache;
use crate::ebay::taxonomy::{Aspect, AspectsResponse};
use crate::ebay::{EbayClient, TAXONOMY_SCOPES};
use crate::llm::{LlmMessage, LlmProvider, parse_json_object};
use crate::sanitize::SanitizedProduct;
use crate::text::{ASPECT_VALUE_LIMIT, take_chars, truncate_at_phrase};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const PROMPT_ALLOWED_VALUES: usize = 30;
const MAX_VALUES_PER_ASPECT: usize = 30;
const PROMPT_DESCRIPTION_CHARS: usize = 1500;
const NOT_APPLICABLE: &str = "Does Not Apply";
const DEFAULT_PREFERENCES: [&str; 4] = ["Does Not Apply", "Unbranded", "Not Applicable", "Other"];

const SYSTEM_PROMPT: &str = r#"You fill structured item specifics for a marketplace listing.
Rules:
- Every REQUIRED aspect must get a value. Use the best reasonable value the product supports.
- Fill a RECOMMENDED aspect only when the product text clearly states it. Otherwise leave it out.
- For SELECTION_ONLY aspects copy one of the allowed values exactly, including case.
- FREE_TEXT aspects take a short value taken from the product text.
- Use an array only for aspects marked multi.
Respond with one JSON object mapping aspect name to a string or an array of strings. No commentary."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AspectMode {
    SelectionOnly,
    FreeText,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AspectInfo {
    pub name: String,
    pub required: bool,
    pub mode: AspectMode,
    pub multi: bool,
    pub allowed_values: Vec<String>,
}

impl AspectInfo {
    fn from_aspect(aspect: Aspect) -> Self {
        let constraint = aspect.aspect_constraint.unwrap_or_default();
        Self {
            name: aspect.localized_aspect_name,
            required: constraint.aspect_required.unwrap_or(false),
            mode: match constraint.aspect_mode.as_deref() {
                Some("SELECTION_ONLY") => AspectMode::SelectionOnly,
                _ => AspectMode::FreeText,
            },
            multi: constraint.item_to_aspect_cardinality.as_deref() == Some("MULTI"),
            allowed_values: aspect
                .aspect_values
                .into_iter()
                .map(|v| v.localized_value)
                .collect(),
        }
    }

    /// Exact match first, then a case-insensitive match mapped to the canonical spelling.
    fn canonical_value(&self, candidate: &str) -> Option<String> {
        self.allowed_values
            .iter()
            .find(|allowed| allowed.as_str() == candidate)
            .or_else(|| {
                self.allowed_values
                    .iter()
                    .find(|allowed| allowed.eq_ignore_ascii_case(candidate))
            })
            .cloned()
    }

    fn is_brand(&self) -> bool {
        self.name.eq_ignore_ascii_case("brand")
    }
}

/// Aspects of one leaf category, bucketed the way the listing form treats them.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CategoryRequirements {
    pub category_id: String,
    pub required: Vec<AspectInfo>,
    pub recommended: Vec<AspectInfo>,
    pub optional: Vec<AspectInfo>,
}

impl CategoryRequirements {
    pub fn from_aspects(category_id: &str, response: AspectsResponse) -> Self {
        let mut out = Self {
            category_id: category_id.to_string(),
            ..Self::default()
        };
        for aspect in response.aspects {
            let recommended = aspect
                .aspect_constraint
                .as_ref()
                .and_then(|c| c.aspect_usage.as_deref())
                == Some("RECOMMENDED");
            let info = AspectInfo::from_aspect(aspect);
            if info.required {
                out.required.push(info);
            } else if recommended {
                out.recommended.push(info);
            } else {
                out.optional.push(info);
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.recommended.is_empty() && self.optional.is_empty()
    }
}

pub struct RequirementsResolver {
    ebay: Arc<EbayClient>,
    cache: Arc<CategoryCache>,
    llm: Arc<dyn LlmProvider>,
}

impl RequirementsResolver {
    pub fn new(ebay: Arc<EbayClient>, cache: Arc<CategoryCache>, llm: Arc<dyn LlmProvider>) -> Self {
        Self { ebay, cache, llm }
    }

    /// A category without aspects yields empty buckets, not an error.
    pub async fn get_requirements(&self, category_id: &str) -> Result<CategoryRequirements, CatalogError> {
        let token = self
            .ebay
            .app_token(TAXONOMY_SCOPES)
            .await
            .map_err(|err| CatalogError::Remote(err.to_string()))?;
        let tree = self.cache.snapshot();
        let response = self
            .ebay
            .item_aspects(&token, &tree.tree_id, category_id)
            .await
            .map_err(|err| CatalogError::Remote(err.to_string()))?;
        let requirements = CategoryRequirements::from_aspects(category_id, response);
        debug!(
            target = "relister.catalog",
            category_id = %category_id,
            required = requirements.required.len(),
            recommended = requirements.recommended.len(),
            optional = requirements.optional.len(),
            "category_requirements_loaded"
        );
        if requirements.is_empty() {
            info!(target = "relister.catalog", category_id = %category_id, "category_has_no_aspects");
        }
        Ok(requirements)
    }

    /// Aspect values ready for the inventory item.
    ///
    /// Model output is only a suggestion: unknown aspect names are ignored,
    /// selection-only values outside the allowed list are dropped, and every
    /// value is cut to the platform's 65-character limit. Required aspects
    /// always end up with a value, even when the model is unreachable.
    pub async fn fill(
        &self,
        product: &SanitizedProduct,
        requirements: &CategoryRequirements,
        include_recommended: bool,
        brand: &str,
    ) -> BTreeMap<String, Vec<String>> {
        let mut targets: Vec<&AspectInfo> = requirements.required.iter().collect();
        if include_recommended {
            targets.extend(requirements.recommended.iter());
        }
        if targets.is_empty() {
            return BTreeMap::new();
        }

        let suggested = match self.llm.chat(&build_messages(product, &targets)).await {
            Ok(response) => match parse_json_object::<BTreeMap<String, Value>>(&response.text) {
                Ok(values) => values,
                Err(err) => {
                    warn!(target = "relister.llm", error = %err, "aspect_fill_unparseable_using_defaults");
                    BTreeMap::new()
                }
            },
            Err(err) => {
                warn!(target = "relister.llm", error = %err, "aspect_fill_failed_using_defaults");
                BTreeMap::new()
            }
        };

        let mut filled = BTreeMap::new();
        let mut defaulted = 0usize;
        for aspect in targets {
            let raw = suggested
                .iter()
                .find(|(key, _)| key.trim().eq_ignore_ascii_case(&aspect.name))
                .map(|(_, value)| flatten_value(value))
                .unwrap_or_default();
            let mut values = if aspect.is_brand() && !brand.trim().is_empty() {
                normalize_values(aspect, vec![brand.to_string()])
            } else {
                Vec::new()
            };
            if values.is_empty() {
                values = normalize_values(aspect, raw);
            }
            if values.is_empty() && aspect.required {
                values = vec![default_value(aspect, brand)];
                defaulted += 1;
            }
            if !values.is_empty() {
                filled.insert(aspect.name.clone(), values);
            }
        }
        info!(
            target = "relister.catalog",
            category_id = %requirements.category_id,
            filled = filled.len(),
            defaulted,
            "aspects_filled"
        );
        filled
    }
}

fn build_messages(product: &SanitizedProduct, targets: &[&AspectInfo]) -> Vec<LlmMessage> {
    let aspects: Vec<Value> = targets
        .iter()
        .map(|aspect| {
            let mut entry = json!({
                "name": aspect.name,
                "usage": if aspect.required { "REQUIRED" } else { "RECOMMENDED" },
                "mode": aspect.mode,
                "multi": aspect.multi,
            });
            if !aspect.allowed_values.is_empty() {
                entry["allowedValues"] = json!(
                    aspect
                        .allowed_values
                        .iter()
                        .take(PROMPT_ALLOWED_VALUES)
                        .collect::<Vec<_>>()
                );
            }
            entry
        })
        .collect();
    let payload = json!({
        "product": {
            "title": product.title,
            "description": take_chars(&product.description, PROMPT_DESCRIPTION_CHARS),
            "bulletPoints": product.bullet_points,
            "specifications": product.specifications,
        },
        "aspects": aspects,
    });
    vec![
        LlmMessage::system(SYSTEM_PROMPT),
        LlmMessage::user(payload.to_string()),
    ]
}

fn flatten_value(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Number(n) => vec![n.to_string()],
        Value::Bool(b) => vec![if *b { "Yes" } else { "No" }.to_string()],
        Value::Array(items) => items.iter().flat_map(flatten_value).collect(),
        _ => Vec::new(),
    }
}

fn normalize_values(aspect: &AspectInfo, raw: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in raw {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let value = match aspect.mode {
            AspectMode::SelectionOnly if !aspect.allowed_values.is_empty() => {
                match aspect.canonical_value(value) {
                    Some(canonical) => canonical,
                    None => {
                        debug!(
                            target = "relister.catalog",
                            aspect = %aspect.name,
                            value = %value,
                            "aspect_value_not_allowed"
                        );
                        continue;
                    }
                }
            }
            _ => value.to_string(),
        };
        let value = truncate_at_phrase(&value, ASPECT_VALUE_LIMIT);
        if value.is_empty() || out.iter().any(|seen| seen.eq_ignore_ascii_case(&value)) {
            continue;
        }
        out.push(value);
    }
    out.truncate(if aspect.multi { MAX_VALUES_PER_ASPECT } else { 1 });
    out
}

fn default_value(aspect: &AspectInfo, brand: &str) -> String {
    if aspect.is_brand()
        && let Some(value) = normalize_values(aspect, vec![brand.to_string()]).into_iter().next()
    {
        return value;
    }
    if aspect.mode == AspectMode::FreeText || aspect.allowed_values.is_empty() {
        return NOT_APPLICABLE.to_string();
    }
    DEFAULT_PREFERENCES
        .iter()
        .find_map(|preferred| aspect.canonical_value(preferred))
        .or_else(|| aspect.allowed_values.first().cloned())
        .map(|value| truncate_at_phrase(&value, ASPECT_VALUE_LIMIT))
        .unwrap_or_else(|| NOT_APPLICABLE.to_string())
}
