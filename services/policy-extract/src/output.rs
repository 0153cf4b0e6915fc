//! Writing extracted records to disk

use std::path::{Path, PathBuf};

use extraction::StructuredRecord;

use crate::error::Result;

/// Write the record as pretty JSON to `dir/<record.file_name()>`.
///
/// Creates `dir` if needed and returns the written path.
pub fn write_record(record: &StructuredRecord, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(record.file_name());
    let mut json = record.to_pretty_json()?;
    json.push('\n');
    std::fs::write(&path, json)?;
    Ok(path)
}

/// Short human-readable digest of the key fields.
pub fn summary(record: &StructuredRecord) -> String {
    let vehicle = [
        record.get_str("VEHICLE_MAKE"),
        record.get_str("VEHICLE_MODEL"),
    ]
    .into_iter()
    .filter(|s| !s.is_empty())
    .collect::<Vec<_>>()
    .join(" ");

    let rows = [
        ("Policy number", record.policy_number().to_string()),
        ("Customer", record.get_str("CUSTOMER_NAME").to_string()),
        ("Total premium", record.get_str("TOTAL_PREMIUM").to_string()),
        ("Vehicle", vehicle),
    ];

    rows.iter()
        .map(|(label, value)| {
            let value = if value.is_empty() { "N/A" } else { value.as_str() };
            format!("{label:<14} {value}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
