//! Fixed output schema

use serde::Serialize;
use serde_json::{Map, Value};

/// Every field of the output record, in output order.
pub const FIELDS: [&str; 42] = [
    "BROKER_NAME",
    "CC",
    "CGST",
    "CHASIS_NUMBER",
    "CITY_NAME",
    "COVER",
    "CUSTOMER_EMAIL",
    "CUSTOMER_NAME",
    "CV_TYPE",
    "ENGINE_NUMBER",
    "FINANCIER_NAME",
    "FUEL_TYPE",
    "GST",
    "GVW",
    "IDV_SUM_INSURED",
    "IGST",
    "INSURANCE_COMPANY_NAME",
    "COMPLETE_LOCATION_ADDRESS",
    "MOB_NO",
    "NCB",
    "NET_PREMIUM",
    "NOMINEE_NAME",
    "NOMINEE_RELATIONSHIP",
    "OD_EXPIRE_DATE",
    "OD_PREMIUM",
    "PINCODE",
    "POLICY_ISSUE_DATE",
    "POLICY_NO",
    "PRODUCT_CODE",
    "REGISTRATION_DATE",
    "REGISTRATION_NUMBER",
    "RISK_END_DATE",
    "RISK_START_DATE",
    "SGST",
    "STATE_NAME",
    "TOTAL_PREMIUM",
    "TP_ONLY_PREMIUM",
    "VEHICLE_MAKE",
    "VEHICLE_MODEL",
    "VEHICLE_SUB_TYPE",
    "VEHICLE_VARIANT",
    "YEAR_OF_MANUFACTURE",
];

pub const INSURANCE_COMPANY_NAME: &str = "INSURANCE_COMPANY_NAME";
pub const POLICY_NO: &str = "POLICY_NO";

/// Whether `name` is one of the fixed schema fields.
pub fn is_fixed_field(name: &str) -> bool {
    FIELDS.contains(&name)
}

/// A normalized extraction result.
///
/// Always contains every name in [`FIELDS`], in schema order, followed by any
/// extra fields the backend returned. Only [`crate::normalize`] builds one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StructuredRecord(Map<String, Value>);

impl StructuredRecord {
    pub(crate) fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// String value of `field`, or `""` when absent or not a string.
    pub fn get_str(&self, field: &str) -> &str {
        self.0.get(field).and_then(Value::as_str).unwrap_or("")
    }

    pub fn policy_number(&self) -> &str {
        self.get_str(POLICY_NO)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Pretty-printed UTF-8 JSON, non-ASCII characters kept verbatim.
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.0)
    }

    /// Download file name: `extracted_<POLICY_NO>.json`.
    ///
    /// Characters outside `[A-Za-z0-9._-]` become `_`; an empty policy number
    /// yields `extracted_data.json`.
    pub fn file_name(&self) -> String {
        let policy = self.policy_number();
        let stem: String = if policy.is_empty() {
            "data".to_string()
        } else {
            policy
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                        c
                    } else {
                        '_'
                    }
                })
                .collect()
        };
        format!("extracted_{stem}.json")
    }
}
