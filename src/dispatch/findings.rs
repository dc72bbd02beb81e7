//! Security Hub (ASFF) finding batches

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error_handling::{RelayError, RelayResult};
use crate::logging::preview;

/// BatchImportFindings accepts at most this many findings per call
pub const MAX_FINDINGS_PER_IMPORT: usize = 100;

pub const REQUIRED_ASFF_FIELDS: [&str; 12] = [
    "SchemaVersion",
    "Id",
    "ProductArn",
    "GeneratorId",
    "AwsAccountId",
    "Types",
    "CreatedAt",
    "UpdatedAt",
    "Severity",
    "Title",
    "Description",
    "Resources",
];

/// Field length limits as JSON pointers
pub const FIELD_LIMITS: [(&str, usize); 3] = [
    ("/Title", 256),
    ("/Description", 1024),
    ("/Remediation/Recommendation/Text", 512),
];

/// A field shortened to fit Security Hub's limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Truncation {
    pub field: String,
    pub original_len: usize,
    pub limit: usize,
}

/// Shorten over-long fields in place. Counts characters, not bytes.
pub fn truncate_finding(finding: &mut Value) -> Vec<Truncation> {
    let mut truncations = Vec::new();
    for (pointer, limit) in FIELD_LIMITS {
        let Some(Value::String(text)) = finding.pointer_mut(pointer) else {
            continue;
        };
        let original_len = text.chars().count();
        if original_len <= limit {
            continue;
        }
        let cut = text.char_indices().nth(limit).map(|(idx, _)| idx);
        if let Some(cut) = cut {
            text.truncate(cut);
        }
        truncations.push(Truncation {
            field: pointer.trim_start_matches('/').replace('/', "."),
            original_len,
            limit,
        });
    }

    if !truncations.is_empty() {
        let id = finding.get("Id").and_then(Value::as_str).unwrap_or("<no id>");
        for t in &truncations {
            warn!(
                finding_id = id,
                field = %t.field,
                original_len = t.original_len,
                limit = t.limit,
                "truncated finding field to Security Hub limit"
            );
        }
    }
    truncations
}

pub fn validate_finding(finding: &Value) -> RelayResult<()> {
    let obj = finding
        .as_object()
        .ok_or_else(|| RelayError::validation("ASFF finding must be a JSON object"))?;

    let missing: Vec<&str> = REQUIRED_ASFF_FIELDS
        .iter()
        .copied()
        .filter(|field| match obj.get(*field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(Value::Array(items)) => items.is_empty(),
            _ => false,
        })
        .collect();

    if let Some(first) = missing.first() {
        warn!(
            missing = ?missing,
            payload = %preview(&finding.to_string(), 2048),
            "finding is missing required ASFF fields"
        );
        return Err(RelayError::validation_field(
            format!("ASFF finding is missing required fields: {}", missing.join(", ")),
            *first,
        ));
    }

    if !obj["Severity"].is_object() {
        return Err(RelayError::validation_field("ASFF Severity must be an object", "Severity"));
    }
    Ok(())
}

pub fn finding_id(finding: &Value) -> Option<&str> {
    finding.get("Id").and_then(Value::as_str)
}
