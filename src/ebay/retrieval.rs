//! Paginated read side: seller inventory (with offers) and orders.

use crate::ebay::offers::OfferSummary;
use crate::ebay::{EbayClient, status_and_body};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

const PAGE_LIMIT: usize = 100;
const MAX_PAGES: usize = 100;

#[derive(Debug, Error)]
pub enum EbayRetrievalError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InventoryPage {
    #[serde(default)]
    total: Option<usize>,
    #[serde(default)]
    inventory_items: Vec<InventoryItemRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InventoryItemRecord {
    sku: String,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    product: Option<ProductRecordView>,
    #[serde(default)]
    availability: Option<AvailabilityView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductRecordView {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    image_urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailabilityView {
    #[serde(default)]
    ship_to_location_availability: Option<QuantityView>,
}

#[derive(Debug, Clone, Deserialize)]
struct QuantityView {
    #[serde(default)]
    quantity: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InventoryListing {
    pub sku: String,
    pub title: Option<String>,
    pub condition: Option<String>,
    pub quantity: i64,
    pub image_urls: Vec<String>,
    pub offers: Vec<OfferSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InventoryReport {
    pub items: Vec<InventoryListing>,
    /// `false` when the offers cross-reference was skipped after a failure.
    pub offers_merged: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderPage {
    #[serde(default)]
    total: Option<usize>,
    #[serde(default)]
    orders: Vec<OrderRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderRecord {
    order_id: String,
    #[serde(default)]
    creation_date: Option<String>,
    #[serde(default)]
    order_fulfillment_status: Option<String>,
    #[serde(default)]
    order_payment_status: Option<String>,
    #[serde(default)]
    pricing_summary: Option<OrderPricing>,
    #[serde(default)]
    buyer: Option<BuyerView>,
    #[serde(default)]
    line_items: Vec<LineItemView>,
}

#[derive(Debug, Clone, Deserialize)]
struct OrderPricing {
    #[serde(default)]
    total: Option<Amount>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Amount {
    pub value: String,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
struct BuyerView {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LineItemView {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrderSummary {
    pub order_id: String,
    pub created_at: Option<String>,
    pub fulfillment_status: Option<String>,
    pub payment_status: Option<String>,
    pub total: Option<Amount>,
    pub buyer: Option<String>,
    pub line_items: Vec<LineItemView>,
}

impl From<OrderRecord> for OrderSummary {
    fn from(record: OrderRecord) -> Self {
        Self {
            order_id: record.order_id,
            created_at: record.creation_date,
            fulfillment_status: record.order_fulfillment_status,
            payment_status: record.order_payment_status,
            total: record.pricing_summary.and_then(|p| p.total),
            buyer: record.buyer.and_then(|b| b.username),
            line_items: record.line_items,
        }
    }
}

trait Page {
    type Item;
    fn total(&self) -> Option<usize>;
    fn into_items(self) -> Vec<Self::Item>;
}

impl Page for InventoryPage {
    type Item = InventoryItemRecord;
    fn total(&self) -> Option<usize> {
        self.total
    }
    fn into_items(self) -> Vec<Self::Item> {
        self.inventory_items
    }
}

impl Page for OrderPage {
    type Item = OrderRecord;
    fn total(&self) -> Option<usize> {
        self.total
    }
    fn into_items(self) -> Vec<Self::Item> {
        self.orders
    }
}

impl EbayClient {
    /// Every inventory item, each merged with its offers when the offers lookup works.
    pub async fn fetch_inventory(
        &self,
        access_token: &str,
    ) -> Result<InventoryReport, EbayRetrievalError> {
        let records: Vec<InventoryItemRecord> = self
            .paginate::<InventoryPage>(access_token, "/sell/inventory/v1/inventory_item")
            .await?;

        let mut offers_merged = true;
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            let offers = if offers_merged {
                tokio::time::sleep(self.config.pagination_delay).await;
                match self.find_offers(access_token, &record.sku).await {
                    Ok(offers) => offers,
                    Err(err) => {
                        warn!(
                            target = "relister.ebay",
                            sku = %record.sku,
                            error = %err,
                            "offers_unavailable_skipping_cross_reference"
                        );
                        offers_merged = false;
                        Vec::new()
                    }
                }
            } else {
                Vec::new()
            };
            items.push(InventoryListing {
                sku: record.sku,
                title: record.product.as_ref().and_then(|p| p.title.clone()),
                condition: record.condition,
                quantity: record
                    .availability
                    .and_then(|a| a.ship_to_location_availability)
                    .map(|q| q.quantity)
                    .unwrap_or_default(),
                image_urls: record.product.map(|p| p.image_urls).unwrap_or_default(),
                offers,
            });
        }

        info!(
            target = "relister.ebay",
            items = items.len(),
            offers_merged,
            "inventory_fetched"
        );
        Ok(InventoryReport {
            items,
            offers_merged,
        })
    }

    pub async fn fetch_orders(
        &self,
        access_token: &str,
    ) -> Result<Vec<OrderSummary>, EbayRetrievalError> {
        let records: Vec<OrderRecord> = self
            .paginate::<OrderPage>(access_token, "/sell/fulfillment/v1/order")
            .await?;
        info!(target = "relister.ebay", orders = records.len(), "orders_fetched");
        Ok(records.into_iter().map(OrderSummary::from).collect())
    }

    /// Offset pagination with a fixed delay between pages and a page cap.
    async fn paginate<P>(
        &self,
        access_token: &str,
        path: &str,
    ) -> Result<Vec<P::Item>, EbayRetrievalError>
    where
        P: Page + DeserializeOwned,
    {
        let mut collected = Vec::new();
        for page_index in 0..MAX_PAGES {
            if page_index > 0 {
                tokio::time::sleep(self.config.pagination_delay).await;
            }
            let offset = page_index * PAGE_LIMIT;
            let response = self
                .http
                .get(self.url(path))
                .bearer_auth(access_token)
                .query(&[("limit", PAGE_LIMIT), ("offset", offset)])
                .send()
                .await
                .map_err(|err| EbayRetrievalError::Request(err.to_string()))?;
            if !response.status().is_success() {
                let (status, body) = status_and_body(response).await;
                return Err(EbayRetrievalError::Status { status, body });
            }
            let page: P = response
                .json()
                .await
                .map_err(|err| EbayRetrievalError::Request(err.to_string()))?;
            let total = page.total();
            let items = page.into_items();
            let received = items.len();
            collected.extend(items);

            let exhausted = received < PAGE_LIMIT
                || total.is_some_and(|total| collected.len() >= total);
            if exhausted {
                return Ok(collected);
            }
        }
        warn!(
            target = "relister.ebay",
            path = %path,
            pages = MAX_PAGES,
            "pagination_page_cap_reached"
        );
        Ok(collected)
    }
}
