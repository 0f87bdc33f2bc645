use crate::ebay::listing::ListingPolicies;
use crate::models::MarketplaceId;
use std::env;
use std::time::Duration;

pub const DEFAULT_LOCATION_KEY: &str = "default-warehouse";
const DEFAULT_PAGINATION_DELAY_MS: u64 = 175;

#[derive(Debug, Clone)]
pub struct EbayConfig {
    pub api_root: String,
    pub app_id: String,
    pub cert_id: String,
    pub marketplace: MarketplaceId,
    pub merchant_location_key: String,
    pub location: Option<LocationSettings>,
    pub policies: ListingPolicies,
    pub quantity: i32,
    pub pagination_delay: Duration,
}

/// Warehouse address used when the merchant location has to be created.
#[derive(Debug, Clone)]
pub struct LocationSettings {
    pub name: String,
    pub address_line1: String,
    pub address_line2: Option<String>,
    pub city: String,
    pub state_or_province: String,
    pub postal_code: String,
    pub country: String,
}

impl EbayConfig {
    pub fn from_env() -> Self {
        let api_root = env::var("EBAY_API_ROOT").ok().filter(|v| !v.trim().is_empty());
        let api_root = api_root.unwrap_or_else(|| {
            let prod = env::var("EBAY_ENV")
                .map(|v| v.eq_ignore_ascii_case("PROD") || v.eq_ignore_ascii_case("PRODUCTION"))
                .unwrap_or(false);
            if prod {
                "https://api.ebay.com".to_string()
            } else {
                "https://api.sandbox.ebay.com".to_string()
            }
        });
        let marketplace = env::var("EBAY_MARKETPLACE")
            .ok()
            .and_then(|v| MarketplaceId::parse(&v))
            .unwrap_or_default();

        Self {
            api_root: api_root.trim_end_matches('/').to_string(),
            app_id: env_string("EBAY_APP_ID"),
            cert_id: env_string("EBAY_CERT_ID"),
            marketplace,
            merchant_location_key: env::var("EBAY_MERCHANT_LOCATION_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LOCATION_KEY.to_string()),
            location: LocationSettings::from_env(),
            policies: ListingPolicies {
                fulfillment_policy_id: env_string("EBAY_FULFILLMENT_POLICY_ID"),
                payment_policy_id: env_string("EBAY_PAYMENT_POLICY_ID"),
                return_policy_id: env_string("EBAY_RETURN_POLICY_ID"),
            },
            quantity: env::var("LISTING_QUANTITY")
                .ok()
                .and_then(|v| v.trim().parse::<i32>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(1),
            pagination_delay: Duration::from_millis(
                env::var("PAGINATION_DELAY_MS")
                    .ok()
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .unwrap_or(DEFAULT_PAGINATION_DELAY_MS),
            ),
        }
    }

    pub fn oauth_token_url(&self) -> String {
        format!("{}/identity/v1/oauth2/token", self.api_root)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_root, path)
    }

    pub fn has_credentials(&self) -> bool {
        !self.app_id.is_empty() && !self.cert_id.is_empty()
    }
}

impl LocationSettings {
    fn from_env() -> Option<Self> {
        let required = |key: &str| env::var(key).ok().filter(|v| !v.trim().is_empty());
        Some(Self {
            name: required("EBAY_LOCATION_NAME").unwrap_or_else(|| "Warehouse".into()),
            address_line1: required("EBAY_LOCATION_ADDRESS_LINE1")?,
            address_line2: required("EBAY_LOCATION_ADDRESS_LINE2"),
            city: required("EBAY_LOCATION_CITY")?,
            state_or_province: required("EBAY_LOCATION_STATE")?,
            postal_code: required("EBAY_LOCATION_POSTAL_CODE")?,
            country: required("EBAY_LOCATION_COUNTRY").unwrap_or_else(|| "US".into()),
        })
    }
}

fn env_string(key: &str) -> String {
    env::var(key).map(|v| v.trim().to_string()).unwrap_or_default()
}
