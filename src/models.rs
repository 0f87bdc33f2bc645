use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Marketplace a product record was scraped from. Selects the pricing tier table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceMarketplace {
    #[default]
    Amazon,
    Walmart,
    Aliexpress,
    #[serde(other)]
    Other,
}

impl SourceMarketplace {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMarketplace::Amazon => "amazon",
            SourceMarketplace::Walmart => "walmart",
            SourceMarketplace::Aliexpress => "aliexpress",
            SourceMarketplace::Other => "other",
        }
    }
}

/// One scraped source-marketplace product, handed to the pipeline as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    /// Stable source identifier, reused as the destination SKU.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub bullet_points: Vec<String>,
    #[serde(default)]
    pub specifications: BTreeMap<String, String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub delivery_fee: String,
    #[serde(default)]
    pub source: SourceMarketplace,
    #[serde(default)]
    pub price_multiplier: Option<f64>,
}

/// Request or inbox payload: a single record or an array of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RecordBatch {
    Many(Vec<ProductRecord>),
    One(Box<ProductRecord>),
}

impl RecordBatch {
    pub fn into_records(self) -> Vec<ProductRecord> {
        match self {
            RecordBatch::Many(records) => records,
            RecordBatch::One(record) => vec![*record],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Pricing,
    Requirements,
    Inventory,
    Location,
    Offer,
    Publish,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Pricing => "pricing",
            FailureStage::Requirements => "requirements",
            FailureStage::Inventory => "inventory",
            FailureStage::Location => "location",
            FailureStage::Offer => "offer",
            FailureStage::Publish => "publish",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ListingResult {
    Success {
        category_id: String,
        category_name: String,
        offer_id: String,
        listing_id: String,
        price: f64,
    },
    Failed {
        stage: FailureStage,
        error: String,
    },
}

impl ListingResult {
    pub fn failed(stage: FailureStage, error: impl Into<String>) -> Self {
        Self::Failed {
            stage,
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ListingResult::Success { .. })
    }
}

/// Why a record stopped, and where.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{} failed: {message}", .stage.as_str())]
pub struct StageFailure {
    pub stage: FailureStage,
    pub message: String,
}

impl StageFailure {
    pub fn new(stage: FailureStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

impl From<StageFailure> for ListingResult {
    fn from(failure: StageFailure) -> Self {
        ListingResult::failed(failure.stage, failure.message)
    }
}

/// Pipeline output for one record: the result plus the per-stage transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingReport {
    pub sku: String,
    pub result: ListingResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    pub needs_review: bool,
    pub violations: usize,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(clippy::enum_variant_names)]
pub enum MarketplaceId {
    #[default]
    EbayUs,
    EbayUk,
    EbayDe,
}

impl MarketplaceId {
    pub fn ebay_code(&self) -> &'static str {
        match self {
            MarketplaceId::EbayUs => "EBAY_US",
            MarketplaceId::EbayUk => "EBAY_GB",
            MarketplaceId::EbayDe => "EBAY_DE",
        }
    }

    pub fn currency(&self) -> &'static str {
        match self {
            MarketplaceId::EbayUs => "USD",
            MarketplaceId::EbayUk => "GBP",
            MarketplaceId::EbayDe => "EUR",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_uppercase().as_str() {
            "EBAY_US" => Some(MarketplaceId::EbayUs),
            "EBAY_GB" | "EBAY_UK" => Some(MarketplaceId::EbayUk),
            "EBAY_DE" => Some(MarketplaceId::EbayDe),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn product_record_reads_camel_case_with_defaults() {
        let record: ProductRecord = serde_json::from_value(json!({
            "id": "B0001",
            "title": "Steel Water Bottle",
            "bulletPoints": ["Keeps cold 24h"],
            "deliveryFee": "$3.00",
            "source": "walmart",
            "priceMultiplier": 1.8
        }))
        .expect("record");
        assert_eq!(record.bullet_points.len(), 1);
        assert_eq!(record.source, SourceMarketplace::Walmart);
        assert_eq!(record.price_multiplier, Some(1.8));
        assert!(record.images.is_empty());
        assert!(record.price.is_empty());
    }

    #[test]
    fn batch_accepts_one_or_many() {
        let one: RecordBatch = serde_json::from_value(json!({"id": "A", "title": "t"})).unwrap();
        assert_eq!(one.into_records().len(), 1);
        let many: RecordBatch =
            serde_json::from_value(json!([{"id": "A", "title": "t"}, {"id": "B", "title": "u"}])).unwrap();
        assert_eq!(many.into_records()[1].id, "B");
    }

    #[test]
    fn unknown_source_maps_to_other() {
        let record: ProductRecord = serde_json::from_value(json!({
            "id": "x",
            "title": "t",
            "source": "target"
        }))
        .expect("record");
        assert_eq!(record.source, SourceMarketplace::Other);
    }

    #[test]
    fn listing_result_is_tagged_by_status() {
        let failed = ListingResult::failed(FailureStage::Offer, "HTTP 400");
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["stage"], "offer");
        assert!(!failed.is_success());
    }

    #[test]
    fn marketplace_codes() {
        assert_eq!(MarketplaceId::parse("ebay_uk"), Some(MarketplaceId::EbayUk));
        assert_eq!(MarketplaceId::EbayUk.ebay_code(), "EBAY_GB");
        assert_eq!(MarketplaceId::EbayDe.currency(), "EUR");
        assert_eq!(MarketplaceId::parse("etsy"), None);
    }
}
