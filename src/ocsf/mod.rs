//! OCSF mapping
//!
//! `map_event` runs the two pure steps (extract values, render the template
//! skeleton) and validates the result into an [`OcsfRecord`].

pub mod extract;
pub mod registry;
pub mod render;
pub mod template;
pub mod validate;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error_handling::RelayResult;
use crate::normalizer::NormalizedEvent;

pub use extract::{extract_values, ExtractedValues, PathExpr};
pub use registry::{TemplateRegistry, TemplateTable};
pub use render::render;
pub use template::{CompiledTemplate, ExtractorSpec, MappingTemplate, Transform};
pub use validate::validate_record;

/// A rendered record that passed OCSF envelope validation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct OcsfRecord(Value);

impl OcsfRecord {
    pub fn new(value: Value, expected_class_uid: Option<u64>) -> RelayResult<Self> {
        validate_record(&value, expected_class_uid)?;
        Ok(Self(value))
    }

    pub fn class_uid(&self) -> u64 {
        self.0["class_uid"].as_u64().unwrap_or_default()
    }

    pub fn activity_id(&self) -> u64 {
        self.0["activity_id"].as_u64().unwrap_or_default()
    }

    pub fn severity_id(&self) -> u64 {
        self.0["severity_id"].as_u64().unwrap_or_default()
    }

    /// Event time in epoch milliseconds
    pub fn time_ms(&self) -> i64 {
        self.0["time"].as_i64().unwrap_or_default()
    }

    /// Dotted path lookup, e.g. `cloud.account.uid`
    pub fn get(&self, path: &str) -> Option<&Value> {
        PathExpr::parse(path).ok()?.evaluate(&self.0)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Map one normalized event through `template`
pub fn map_event(template: &CompiledTemplate, event: &NormalizedEvent) -> RelayResult<OcsfRecord> {
    map_value(template, &event.to_value())
}

/// Map an already-serialized event
pub fn map_value(template: &CompiledTemplate, event: &Value) -> RelayResult<OcsfRecord> {
    let values = extract_values(template, event)?;
    debug!(
        template = template.name(),
        extracted = values.len(),
        "rendering OCSF record"
    );
    let rendered = render(&template.skeleton, &values);
    OcsfRecord::new(rendered, template.expected_class_uid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::{EventNormalizer, ProviderMessage};
    use serde_json::json;

    const ALERT_TEMPLATE: &str = r#"
name: defender_alert
input_schema: azure_defender_alert
output_schema: ocsf/1.1.0/detection_finding
extractors:
  title: event_data.properties.alertDisplayName
  time:
    path: event_data.properties.timeGeneratedUtc || processing_metadata.processed_timestamp
    transform: epoch_ms
  severity:
    path: event_data.properties.severity
    transform: severity_id
    default: 0
  account: event_data.properties.subscriptionId
template: |
  {
    "class_uid": 2004,
    "category_uid": 2,
    "category_name": "Findings",
    "activity_id": 1,
    "type_uid": 200401,
    "severity_id": "{{severity}}",
    "time": "{{time}}",
    "finding_info": {"title": "{{title}}", "uid": "alert-{{title}}"},
    "cloud": {"provider": "Azure", "account": {"uid": "{{account}}"}}
  }
"#;

    fn compiled() -> CompiledTemplate {
        MappingTemplate::from_yaml_str(ALERT_TEMPLATE).unwrap().compile().unwrap()
    }

    #[test]
    fn test_map_event_end_to_end() {
        let body = br#"{"properties": {"alertDisplayName": "Brute force", "severity": "High",
            "timeGeneratedUtc": "2024-03-01T10:00:00Z", "subscriptionId": "sub-1"}}"#;
        let event =
            EventNormalizer::new("1.0.0", "test").normalize(&ProviderMessage::Raw(body.to_vec()));

        let record = map_event(&compiled(), &event).unwrap();
        assert_eq!(record.class_uid(), 2004);
        assert_eq!(record.severity_id(), 4);
        assert_eq!(record.time_ms(), 1709287200000);
        assert_eq!(record.get("cloud.account.uid"), Some(&json!("sub-1")));
        assert_eq!(record.get("finding_info.uid"), Some(&json!("alert-Brute force")));
    }

    #[test]
    fn test_missing_time_fails_validation() {
        let event = json!({"event_data": {"properties": {"alertDisplayName": "x"}}});
        let err = map_value(&compiled(), &event).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_FAILURE");
    }
}
