//! Response normalization
//!
//! Guarantees the fixed schema is fully populated and lightly sanitizes string
//! values. Non-string values are passed through as the backend sent them.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::insurer::{BUILTIN, InsurerProfile};
use crate::schema::{FIELDS, INSURANCE_COMPANY_NAME, StructuredRecord, is_fixed_field};

/// Values the model uses to mean "not found".
const PLACEHOLDERS: &[&str] = &["none", "null", "n/a", "na"];

/// Normalize a raw backend object for a built-in document type.
///
/// Unknown document types get the schema and string cleaning but no
/// company-name rule.
pub fn normalize(raw: Map<String, Value>, document_type: &str) -> StructuredRecord {
    normalize_with(raw, BUILTIN.get(document_type))
}

/// Normalize a raw backend object against an already resolved profile.
pub fn normalize_with(raw: Map<String, Value>, profile: Option<&InsurerProfile>) -> StructuredRecord {
    let mut known: HashMap<String, Value> = HashMap::new();
    let mut extras = Vec::new();
    for (key, value) in raw {
        if is_fixed_field(&key) {
            known.insert(key, value);
        } else {
            extras.push((key, value));
        }
    }

    let mut out = Map::new();
    for field in FIELDS {
        let value = known
            .remove(field)
            .map(clean_value)
            .unwrap_or_else(|| Value::String(String::new()));
        out.insert(field.to_string(), value);
    }
    for (key, value) in extras {
        out.insert(key, clean_value(value));
    }

    if let Some(profile) = profile {
        let company = out
            .get(INSURANCE_COMPANY_NAME)
            .and_then(Value::as_str)
            .unwrap_or("");
        if !profile.matches_company(company) {
            debug!(
                insurer = %profile.id,
                extracted = company,
                "replacing company name with canonical name"
            );
            out.insert(
                INSURANCE_COMPANY_NAME.to_string(),
                Value::String(profile.canonical_name.clone()),
            );
        }
    }

    StructuredRecord::from_map(out)
}

fn clean_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(clean_string(&s)),
        other => other,
    }
}

/// Collapse whitespace runs, trim, and blank out placeholder tokens.
fn clean_string(s: &str) -> String {
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if PLACEHOLDERS
        .iter()
        .any(|p| collapsed.eq_ignore_ascii_case(p))
    {
        String::new()
    } else {
        collapsed
    }
}
