//! Inventory item, merchant location, offer upsert and publish for one SKU.
//!
//! Each step fetches a user token first; the token provider refreshes it when
//! it is close to expiry. Any failure stops the SKU at that step.

use crate::ebay::inventory::{
    InventoryAvailability, InventoryItemRequest, InventoryLocationRequest, InventoryProduct,
    LocationStatus, ShipToLocationAvailability,
};
use crate::ebay::offers::{OfferRequest, Price, PricingSummary, UpsertedOffer};
use crate::ebay::{EbayClient, PackageWeightAndSizePayload, TokenProvider};
use crate::models::{FailureStage, StageFailure};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::info;

pub const MAX_IMAGES: usize = 12;

/// URL fragments of page furniture that scrapers pick up next to product photos.
const IMAGE_ARTIFACT_MARKERS: &[&str] = &[
    "/images/g/",
    "sprite",
    "play-icon",
    "play_button",
    "play-button",
    "video-overlay",
    "360-icon",
    "360_icon",
    "spin360",
    "transparent-pixel",
    "transparent_pixel",
    "grey-pixel",
    "pixel.gif",
    "1x1",
    "_ss40_",
    "_sr38,50_",
    "_us40_",
    "_ac_us40_",
];

/// Everything the marketplace needs for one SKU, already sanitized and priced.
#[derive(Debug, Clone, Serialize)]
pub struct ListingDraft {
    pub sku: String,
    pub title: String,
    pub description_html: String,
    pub brand: Option<String>,
    pub category_id: String,
    pub aspects: BTreeMap<String, Vec<String>>,
    pub image_urls: Vec<String>,
    pub package: PackageWeightAndSizePayload,
    pub price: f64,
}

/// Drops UI artifacts and non-http(s) URLs, removes duplicates, caps at twelve.
pub fn filter_images(urls: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.iter()
        .map(|url| url.trim())
        .filter(|url| url.starts_with("https://") || url.starts_with("http://"))
        .filter(|url| {
            let lowered = url.to_lowercase();
            !IMAGE_ARTIFACT_MARKERS
                .iter()
                .any(|marker| lowered.contains(marker))
        })
        .filter(|url| seen.insert(url.to_string()))
        .take(MAX_IMAGES)
        .map(str::to_string)
        .collect()
}

pub struct ListingPublisher {
    ebay: Arc<EbayClient>,
    tokens: Arc<dyn TokenProvider>,
    account: String,
}

impl ListingPublisher {
    pub fn new(ebay: Arc<EbayClient>, tokens: Arc<dyn TokenProvider>, account: impl Into<String>) -> Self {
        Self {
            ebay,
            tokens,
            account: account.into(),
        }
    }

    async fn token(&self, stage: FailureStage) -> Result<String, StageFailure> {
        self.tokens
            .valid_token(&self.account)
            .await
            .map_err(|err| StageFailure::new(stage, format!("access token unavailable: {err}")))
    }

    pub fn inventory_request(&self, draft: &ListingDraft) -> InventoryItemRequest {
        InventoryItemRequest {
            availability: InventoryAvailability {
                ship_to_location_availability: ShipToLocationAvailability {
                    quantity: self.ebay.config().quantity,
                },
            },
            condition: "NEW",
            product: InventoryProduct {
                title: draft.title.clone(),
                description: draft.description_html.clone(),
                brand: draft.brand.clone(),
                aspects: draft.aspects.clone(),
                image_urls: draft.image_urls.clone(),
            },
            package_weight_and_size: draft.package.clone(),
        }
    }

    pub fn offer_request(&self, draft: &ListingDraft) -> OfferRequest {
        let config = self.ebay.config();
        OfferRequest {
            sku: draft.sku.clone(),
            marketplace_id: config.marketplace.ebay_code().to_string(),
            format: "FIXED_PRICE",
            category_id: draft.category_id.clone(),
            listing_description: draft.description_html.clone(),
            pricing_summary: PricingSummary {
                price: Price::from_amount(draft.price, config.marketplace.currency()),
            },
            available_quantity: config.quantity,
            merchant_location_key: config.merchant_location_key.clone(),
            listing_policies: config.policies.clone(),
        }
    }

    pub async fn put_inventory_item(&self, draft: &ListingDraft) -> Result<(), StageFailure> {
        let token = self.token(FailureStage::Inventory).await?;
        self.ebay
            .upsert_inventory_item(&token, &draft.sku, &self.inventory_request(draft))
            .await
            .map_err(|err| StageFailure::new(FailureStage::Inventory, err.to_string()))?;
        info!(
            target = "relister.ebay",
            sku = %draft.sku,
            images = draft.image_urls.len(),
            aspects = draft.aspects.len(),
            "inventory_item_upserted"
        );
        Ok(())
    }

    /// Creates the merchant location when absent; never recreates an existing one.
    pub async fn ensure_location(&self) -> Result<LocationStatus, StageFailure> {
        let token = self.token(FailureStage::Location).await?;
        let config = self.ebay.config();
        let key = &config.merchant_location_key;
        match &config.location {
            Some(settings) => self
                .ebay
                .ensure_location(&token, key, &InventoryLocationRequest::warehouse(settings))
                .await
                .map_err(|err| StageFailure::new(FailureStage::Location, err.to_string())),
            None => {
                let exists = self
                    .ebay
                    .location_exists(&token, key)
                    .await
                    .map_err(|err| StageFailure::new(FailureStage::Location, err.to_string()))?;
                if exists {
                    Ok(LocationStatus::Existing)
                } else {
                    Err(StageFailure::new(
                        FailureStage::Location,
                        format!("merchant location `{key}` does not exist and no address is configured"),
                    ))
                }
            }
        }
    }

    pub async fn upsert_offer(&self, draft: &ListingDraft) -> Result<UpsertedOffer, StageFailure> {
        if !self.ebay.config().policies.is_complete() {
            return Err(StageFailure::new(
                FailureStage::Offer,
                "fulfillment, payment and return policy ids must all be configured",
            ));
        }
        let token = self.token(FailureStage::Offer).await?;
        let offer = self
            .ebay
            .upsert_offer(&token, &self.offer_request(draft))
            .await
            .map_err(|err| StageFailure::new(FailureStage::Offer, err.to_string()))?;
        info!(
            target = "relister.ebay",
            sku = %draft.sku,
            offer_id = %offer.offer_id,
            reused = offer.reused,
            "offer_upserted"
        );
        Ok(offer)
    }

    pub async fn publish_offer(&self, sku: &str, offer_id: &str) -> Result<String, StageFailure> {
        let token = self.token(FailureStage::Publish).await?;
        let listing_id = self
            .ebay
            .publish_offer(&token, offer_id)
            .await
            .map_err(|err| StageFailure::new(FailureStage::Publish, err.to_string()))?;
        info!(
            target = "relister.ebay",
            sku = %sku,
            offer_id = %offer_id,
            listing_id = %listing_id,
            "offer_published"
        );
        Ok(listing_id)
    }
}
