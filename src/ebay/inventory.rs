use crate::ebay::config::LocationSettings;
use crate::ebay::listing::PackageWeightAndSizePayload;
use crate::ebay::{EbayClient, status_and_body};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;
use urlencoding::encode;

#[derive(Debug, Error)]
pub enum EbayInventoryError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItemRequest {
    pub availability: InventoryAvailability,
    pub condition: &'static str,
    pub product: InventoryProduct,
    pub package_weight_and_size: PackageWeightAndSizePayload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryAvailability {
    pub ship_to_location_availability: ShipToLocationAvailability,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipToLocationAvailability {
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryProduct {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub aspects: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryLocationRequest {
    pub merchant_location_status: &'static str,
    pub location_types: Vec<&'static str>,
    pub name: String,
    pub location: LocationDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationDetails {
    pub address: LocationAddress,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationAddress {
    pub address_line1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_line2: Option<String>,
    pub city: String,
    pub state_or_province: String,
    pub postal_code: String,
    pub country: String,
}

impl InventoryLocationRequest {
    pub fn warehouse(settings: &LocationSettings) -> Self {
        Self {
            merchant_location_status: "ENABLED",
            location_types: vec!["WAREHOUSE"],
            name: settings.name.clone(),
            location: LocationDetails {
                address: LocationAddress {
                    address_line1: settings.address_line1.clone(),
                    address_line2: settings.address_line2.clone(),
                    city: settings.city.clone(),
                    state_or_province: settings.state_or_province.clone(),
                    postal_code: settings.postal_code.clone(),
                    country: settings.country.clone(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationStatus {
    Existing,
    Created,
}

impl EbayClient {
    pub async fn upsert_inventory_item(
        &self,
        access_token: &str,
        sku: &str,
        payload: &InventoryItemRequest,
    ) -> Result<(), EbayInventoryError> {
        let url = self.url(&format!("/sell/inventory/v1/inventory_item/{}", encode(sku)));
        let response = self
            .http
            .put(url)
            .bearer_auth(access_token)
            .header("Content-Language", "en-US")
            .json(payload)
            .send()
            .await
            .map_err(|err| EbayInventoryError::Request(err.to_string()))?;

        if !response.status().is_success() {
            let (status, body) = status_and_body(response).await;
            return Err(EbayInventoryError::Status { status, body });
        }
        Ok(())
    }

    /// `true` when the location exists; 404 and 204 both read as absent.
    pub async fn location_exists(
        &self,
        access_token: &str,
        merchant_location_key: &str,
    ) -> Result<bool, EbayInventoryError> {
        let url = self.url(&format!(
            "/sell/inventory/v1/location/{}",
            encode(merchant_location_key)
        ));
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| EbayInventoryError::Request(err.to_string()))?;

        match response.status().as_u16() {
            204 | 404 => Ok(false),
            code if (200..300).contains(&code) => Ok(true),
            _ => {
                let (status, body) = status_and_body(response).await;
                Err(EbayInventoryError::Status { status, body })
            }
        }
    }

    pub async fn create_location(
        &self,
        access_token: &str,
        merchant_location_key: &str,
        payload: &InventoryLocationRequest,
    ) -> Result<(), EbayInventoryError> {
        let url = self.url(&format!(
            "/sell/inventory/v1/location/{}",
            encode(merchant_location_key)
        ));
        let response = self
            .http
            .post(url)
            .bearer_auth(access_token)
            .json(payload)
            .send()
            .await
            .map_err(|err| EbayInventoryError::Request(err.to_string()))?;
        if !response.status().is_success() {
            let (status, body) = status_and_body(response).await;
            return Err(EbayInventoryError::Status { status, body });
        }
        Ok(())
    }

    /// Creates the merchant location only when the lookup says it is absent.
    pub async fn ensure_location(
        &self,
        access_token: &str,
        merchant_location_key: &str,
        payload: &InventoryLocationRequest,
    ) -> Result<LocationStatus, EbayInventoryError> {
        if self.location_exists(access_token, merchant_location_key).await? {
            return Ok(LocationStatus::Existing);
        }
        self.create_location(access_token, merchant_location_key, payload)
            .await?;
        info!(
            target = "relister.ebay",
            location = %merchant_location_key,
            "merchant_location_created"
        );
        Ok(LocationStatus::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebay::listing::WeightPayload;
    use crate::http::HttpSettings;
    use crate::test_support::{ebay_config, location_settings};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn item() -> InventoryItemRequest {
        InventoryItemRequest {
            availability: InventoryAvailability {
                ship_to_location_availability: ShipToLocationAvailability { quantity: 1 },
            },
            condition: "NEW",
            product: InventoryProduct {
                title: "Steel Bottle".into(),
                description: "<p>Cold</p>".into(),
                brand: Some("HydroPeak".into()),
                aspects: BTreeMap::from([("Brand".to_string(), vec!["HydroPeak".to_string()])]),
                image_urls: vec!["https://img.example/a.jpg".into()],
            },
            package_weight_and_size: PackageWeightAndSizePayload {
                weight: WeightPayload {
                    value: 1.0,
                    unit: "POUND",
                },
                dimensions: None,
            },
        }
    }

    #[tokio::test]
    async fn inventory_put_encodes_sku() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/sell/inventory/v1/inventory_item/SKU%201"))
            .and(header("authorization", "Bearer user-token"))
            .and(body_partial_json(json!({
                "condition": "NEW",
                "availability": {"shipToLocationAvailability": {"quantity": 1}},
                "packageWeightAndSize": {"weight": {"value": 1.0, "unit": "POUND"}}
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = EbayClient::new(ebay_config(&server.uri()), &HttpSettings::default());
        client
            .upsert_inventory_item("user-token", "SKU 1", &item())
            .await
            .expect("upsert");
    }

    #[tokio::test]
    async fn inventory_error_keeps_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(400).set_body_string("{\"errors\":[{\"errorId\":25002}]}"))
            .mount(&server)
            .await;

        let client = EbayClient::new(ebay_config(&server.uri()), &HttpSettings::default());
        let err = client
            .upsert_inventory_item("t", "SKU1", &item())
            .await
            .unwrap_err();
        assert!(matches!(err, EbayInventoryError::Status { status: 400, ref body } if body.contains("25002")));
    }

    #[tokio::test]
    async fn existing_location_is_not_recreated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sell/inventory/v1/location/default-warehouse"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"merchantLocationKey": "default-warehouse"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let client = EbayClient::new(ebay_config(&server.uri()), &HttpSettings::default());
        let request = InventoryLocationRequest::warehouse(&location_settings());
        let status = client
            .ensure_location("t", "default-warehouse", &request)
            .await
            .unwrap();
        assert_eq!(status, LocationStatus::Existing);
    }

    #[tokio::test]
    async fn missing_location_is_created() {
        for lookup_status in [404u16, 204] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/sell/inventory/v1/location/default-warehouse"))
                .respond_with(ResponseTemplate::new(lookup_status))
                .mount(&server)
                .await;
            Mock::given(method("POST"))
                .and(path("/sell/inventory/v1/location/default-warehouse"))
                .and(body_partial_json(json!({
                    "locationTypes": ["WAREHOUSE"],
                    "location": {"address": {"city": "Austin", "country": "US"}}
                })))
                .respond_with(ResponseTemplate::new(204))
                .expect(1)
                .mount(&server)
                .await;

            let client = EbayClient::new(ebay_config(&server.uri()), &HttpSettings::default());
            let request = InventoryLocationRequest::warehouse(&location_settings());
            let status = client
                .ensure_location("t", "default-warehouse", &request)
                .await
                .unwrap();
            assert_eq!(status, LocationStatus::Created);
        }
    }

    #[tokio::test]
    async fn location_lookup_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let client = EbayClient::new(ebay_config(&server.uri()), &HttpSettings::default());
        let request = InventoryLocationRequest::warehouse(&location_settings());
        assert!(client
            .ensure_location("t", "default-warehouse", &request)
            .await
            .is_err());
    }
}
