//! Generation prompt rendering

use serde_json::{Map, Value};

use crate::insurer::InsurerProfile;
use crate::schema::FIELDS;

/// Empty record in schema order, rendered as the required output shape.
fn schema_template() -> String {
    let map: Map<String, Value> = FIELDS
        .iter()
        .map(|f| (f.to_string(), Value::String(String::new())))
        .collect();
    serde_json::to_string_pretty(&map).unwrap_or_default()
}

/// Render the single prompt sent to the backend for one document.
pub fn build_prompt(document_text: &str, profile: &InsurerProfile) -> String {
    format!(
        "You extract structured data from insurance policy documents issued by {insurer}.\n\
         \n\
         {rules}\n\
         General rules:\n\
         - Copy values exactly as printed; keep date formats, commas and decimals.\n\
         - Use an empty string for any field that is not in the document.\n\
         - Never invent values that are not in the document.\n\
         \n\
         Return ONLY one JSON object with exactly these keys, no markdown and no commentary:\n\
         {schema}\n\
         \n\
         DOCUMENT TEXT:\n\
         {document_text}\n",
        insurer = profile.display_name,
        rules = profile.rules.trim_end(),
        schema = schema_template(),
    )
}
