use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListingPolicies {
    pub fulfillment_policy_id: String,
    pub payment_policy_id: String,
    pub return_policy_id: String,
}

impl ListingPolicies {
    pub fn is_complete(&self) -> bool {
        !self.fulfillment_policy_id.is_empty()
            && !self.payment_policy_id.is_empty()
            && !self.return_policy_id.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackageWeightAndSizePayload {
    pub weight: WeightPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<DimensionsPayload>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WeightPayload {
    pub value: f64,
    pub unit: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DimensionsPayload {
    pub height: f64,
    pub length: f64,
    pub width: f64,
    pub unit: &'static str,
}
