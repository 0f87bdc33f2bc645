use crate::ebay::{EbayClient, status_and_body};
use serde::Deserialize;
use thiserror::Error;
use urlencoding::encode;

#[derive(Debug, Error)]
pub enum EbayTaxonomyError {
    #[error("taxonomy request failed: {0}")]
    Request(String),
    #[error("taxonomy returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTreeRef {
    pub category_tree_id: String,
    #[serde(default)]
    pub category_tree_version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTreeResponse {
    pub category_tree_id: String,
    #[serde(default)]
    pub category_tree_version: String,
    pub root_category_node: CategoryTreeNode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTreeNode {
    pub category: CategoryRef,
    #[serde(default)]
    pub category_tree_node_level: u32,
    #[serde(default)]
    pub leaf_category_tree_node: bool,
    #[serde(default)]
    pub child_category_tree_nodes: Vec<CategoryTreeNode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRef {
    pub category_id: String,
    pub category_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AspectsResponse {
    #[serde(default)]
    pub aspects: Vec<Aspect>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aspect {
    pub localized_aspect_name: String,
    #[serde(default)]
    pub aspect_values: Vec<AspectValue>,
    #[serde(default)]
    pub aspect_constraint: Option<AspectConstraint>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AspectValue {
    pub localized_value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AspectConstraint {
    #[serde(default)]
    pub aspect_mode: Option<String>,
    #[serde(default)]
    pub aspect_required: Option<bool>,
    #[serde(default)]
    pub aspect_usage: Option<String>,
    #[serde(default)]
    pub item_to_aspect_cardinality: Option<String>,
}

impl EbayClient {
    pub async fn default_category_tree(
        &self,
        app_token: &str,
    ) -> Result<CategoryTreeRef, EbayTaxonomyError> {
        let response = self
            .http
            .get(self.url("/commerce/taxonomy/v1/get_default_category_tree_id"))
            .query(&[("marketplace_id", self.config.marketplace.ebay_code())])
            .bearer_auth(app_token)
            .send()
            .await
            .map_err(|err| EbayTaxonomyError::Request(err.to_string()))?;
        if !response.status().is_success() {
            let (status, body) = status_and_body(response).await;
            return Err(EbayTaxonomyError::Status { status, body });
        }
        response
            .json::<CategoryTreeRef>()
            .await
            .map_err(|err| EbayTaxonomyError::Request(err.to_string()))
    }

    /// Full category tree. The US tree is tens of megabytes of JSON.
    pub async fn category_tree(
        &self,
        app_token: &str,
        tree_id: &str,
    ) -> Result<CategoryTreeResponse, EbayTaxonomyError> {
        let url = self.url(&format!("/commerce/taxonomy/v1/category_tree/{}", encode(tree_id)));
        let response = self
            .http
            .get(url)
            .bearer_auth(app_token)
            .send()
            .await
            .map_err(|err| EbayTaxonomyError::Request(err.to_string()))?;
        if !response.status().is_success() {
            let (status, body) = status_and_body(response).await;
            return Err(EbayTaxonomyError::Status { status, body });
        }
        response
            .json::<CategoryTreeResponse>()
            .await
            .map_err(|err| EbayTaxonomyError::Request(err.to_string()))
    }

    /// Aspect definitions for a leaf category; 204 means the category defines none.
    pub async fn item_aspects(
        &self,
        app_token: &str,
        tree_id: &str,
        category_id: &str,
    ) -> Result<AspectsResponse, EbayTaxonomyError> {
        let url = self.url(&format!(
            "/commerce/taxonomy/v1/category_tree/{}/get_item_aspects_for_category",
            encode(tree_id)
        ));
        let response = self
            .http
            .get(url)
            .query(&[("category_id", category_id)])
            .bearer_auth(app_token)
            .send()
            .await
            .map_err(|err| EbayTaxonomyError::Request(err.to_string()))?;
        if response.status().as_u16() == 204 {
            return Ok(AspectsResponse::default());
        }
        if !response.status().is_success() {
            let (status, body) = status_and_body(response).await;
            return Err(EbayTaxonomyError::Status { status, body });
        }
        response
            .json::<AspectsResponse>()
            .await
            .map_err(|err| EbayTaxonomyError::Request(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpSettings;
    use crate::test_support::ebay_config;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn default_tree_uses_marketplace() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/commerce/taxonomy/v1/get_default_category_tree_id"))
            .and(query_param("marketplace_id", "EBAY_US"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "categoryTreeId": "0",
                "categoryTreeVersion": "130"
            })))
            .mount(&server)
            .await;
        let client = EbayClient::new(ebay_config(&server.uri()), &HttpSettings::default());
        let tree = client.default_category_tree("app").await.unwrap();
        assert_eq!(tree.category_tree_id, "0");
        assert_eq!(tree.category_tree_version, "130");
    }

    #[tokio::test]
    async fn aspects_parse_and_empty_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/commerce/taxonomy/v1/category_tree/0/get_item_aspects_for_category"))
            .and(query_param("category_id", "20625"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "aspects": [{
                    "localizedAspectName": "Color",
                    "aspectValues": [{"localizedValue": "Blue"}],
                    "aspectConstraint": {
                        "aspectMode": "SELECTION_ONLY",
                        "aspectRequired": false,
                        "aspectUsage": "RECOMMENDED",
                        "itemToAspectCardinality": "MULTI"
                    }
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("category_id", "99"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = EbayClient::new(ebay_config(&server.uri()), &HttpSettings::default());
        let aspects = client.item_aspects("app", "0", "20625").await.unwrap();
        assert_eq!(aspects.aspects.len(), 1);
        let constraint = aspects.aspects[0].aspect_constraint.clone().unwrap();
        assert_eq!(constraint.aspect_usage.as_deref(), Some("RECOMMENDED"));

        let empty = client.item_aspects("app", "0", "99").await.unwrap();
        assert!(empty.aspects.is_empty());
    }
}
