use crate::ebay::listing::ListingPolicies;
use crate::ebay::{EbayClient, status_and_body};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use urlencoding::encode;

#[derive(Debug, Error)]
pub enum EbayOfferError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("entity already exists")]
    EntityExists,
    #[error("no offer found for sku `{0}`")]
    NotFound(String),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PricingSummary {
    pub price: Price,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Price {
    pub value: String,
    pub currency: String,
}

impl Price {
    pub fn from_amount(amount: f64, currency: &str) -> Self {
        Self {
            value: format!("{amount:.2}"),
            currency: currency.to_string(),
        }
    }
}

/// Offer body for both create (POST) and update (PUT).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferRequest {
    pub sku: String,
    pub marketplace_id: String,
    pub format: &'static str,
    pub category_id: String,
    pub listing_description: String,
    pub pricing_summary: PricingSummary,
    pub available_quantity: i32,
    pub merchant_location_key: String,
    pub listing_policies: ListingPolicies,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OfferSummary {
    #[serde(default)]
    pub offer_id: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub marketplace_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub listing: Option<OfferListing>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OfferListing {
    #[serde(default)]
    pub listing_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OfferSearchResponse {
    #[serde(default)]
    offers: Vec<OfferSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOfferResponse {
    offer_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    listing_id: Option<String>,
}

/// Which call produced the offer id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertedOffer {
    pub offer_id: String,
    pub reused: bool,
}

impl EbayClient {
    /// Offers for `sku`; a 404 means none exist.
    pub async fn find_offers(
        &self,
        access_token: &str,
        sku: &str,
    ) -> Result<Vec<OfferSummary>, EbayOfferError> {
        let response = self
            .http
            .get(self.url("/sell/inventory/v1/offer"))
            .bearer_auth(access_token)
            .query(&[("sku", sku)])
            .send()
            .await
            .map_err(|err| EbayOfferError::Request(err.to_string()))?;
        if response.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            let (status, body) = status_and_body(response).await;
            return Err(EbayOfferError::Status { status, body });
        }
        let payload: OfferSearchResponse = response
            .json()
            .await
            .map_err(|err| EbayOfferError::Request(err.to_string()))?;
        Ok(payload.offers)
    }

    pub async fn create_offer(
        &self,
        access_token: &str,
        request: &OfferRequest,
    ) -> Result<String, EbayOfferError> {
        let response = self
            .http
            .post(self.url("/sell/inventory/v1/offer"))
            .bearer_auth(access_token)
            .header("Content-Language", "en-US")
            .json(request)
            .send()
            .await
            .map_err(|err| EbayOfferError::Request(err.to_string()))?;
        if !response.status().is_success() {
            let (status, body) = status_and_body(response).await;
            if status == 409 || body.to_lowercase().contains("already exists") {
                return Err(EbayOfferError::EntityExists);
            }
            return Err(EbayOfferError::Status { status, body });
        }
        let payload: CreateOfferResponse = response
            .json()
            .await
            .map_err(|err| EbayOfferError::Request(err.to_string()))?;
        Ok(payload.offer_id)
    }

    pub async fn update_offer(
        &self,
        access_token: &str,
        offer_id: &str,
        request: &OfferRequest,
    ) -> Result<(), EbayOfferError> {
        let url = self.url(&format!("/sell/inventory/v1/offer/{}", encode(offer_id)));
        let response = self
            .http
            .put(url)
            .bearer_auth(access_token)
            .header("Content-Language", "en-US")
            .json(request)
            .send()
            .await
            .map_err(|err| EbayOfferError::Request(err.to_string()))?;
        if !response.status().is_success() {
            let (status, body) = status_and_body(response).await;
            return Err(EbayOfferError::Status { status, body });
        }
        Ok(())
    }

    /// Updates the SKU's existing offer in place, or creates one.
    ///
    /// A create that collides with an offer created concurrently is reconciled
    /// by one re-lookup and an update of the offer that won.
    pub async fn upsert_offer(
        &self,
        access_token: &str,
        request: &OfferRequest,
    ) -> Result<UpsertedOffer, EbayOfferError> {
        if let Some(offer_id) = self.existing_offer_id(access_token, request).await? {
            self.update_offer(access_token, &offer_id, request).await?;
            return Ok(UpsertedOffer {
                offer_id,
                reused: true,
            });
        }

        match self.create_offer(access_token, request).await {
            Ok(offer_id) => Ok(UpsertedOffer {
                offer_id,
                reused: false,
            }),
            Err(EbayOfferError::EntityExists) => {
                warn!(
                    target = "relister.ebay",
                    sku = %request.sku,
                    "offer_exists_reconciling"
                );
                let offer_id = self
                    .existing_offer_id(access_token, request)
                    .await?
                    .ok_or_else(|| EbayOfferError::NotFound(request.sku.clone()))?;
                self.update_offer(access_token, &offer_id, request).await?;
                Ok(UpsertedOffer {
                    offer_id,
                    reused: true,
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn existing_offer_id(
        &self,
        access_token: &str,
        request: &OfferRequest,
    ) -> Result<Option<String>, EbayOfferError> {
        let offers = self.find_offers(access_token, &request.sku).await?;
        Ok(offers
            .iter()
            .find(|offer| offer.marketplace_id.as_deref() == Some(request.marketplace_id.as_str()))
            .or_else(|| offers.first())
            .and_then(|offer| offer.offer_id.clone()))
    }

    /// Publishes the offer and returns the live listing id.
    pub async fn publish_offer(
        &self,
        access_token: &str,
        offer_id: &str,
    ) -> Result<String, EbayOfferError> {
        let url = self.url(&format!("/sell/inventory/v1/offer/{}/publish", encode(offer_id)));
        let response = self
            .http
            .post(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| EbayOfferError::Request(err.to_string()))?;
        if !response.status().is_success() {
            let (status, body) = status_and_body(response).await;
            return Err(EbayOfferError::Status { status, body });
        }
        let payload: PublishResponse = response
            .json()
            .await
            .map_err(|err| EbayOfferError::Request(err.to_string()))?;
        payload
            .listing_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| EbayOfferError::Request("publish response missing listingId".into()))
    }
}
