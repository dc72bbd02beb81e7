//! Mapping template documents
//!
//! A template names its input and output schema, declares a set of
//! extractors (paths into the normalized event) and carries a JSON `template`
//! whose string values may reference extractors as `{{name}}`.
//!
//! ```yaml
//! name: gcp_scc_finding
//! input_schema: gcp_scc_notification
//! output_schema: ocsf/1.1.0/detection_finding
//! extractors:
//!   title: event_data.finding.category
//!   severity:
//!     path: event_data.finding.severity
//!     transform: severity_id
//!     default: 0
//! template: |
//!   {"class_uid": 2004, "severity_id": "{{severity}}", "finding_info": {"title": "{{title}}"}}
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error_handling::{ErrorContext, RelayError, RelayResult};
use crate::ocsf::extract::PathExpr;
use crate::ocsf::render::placeholders_in;
use crate::ocsf::validate::expected_class_uid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingTemplate {
    pub name: String,
    pub input_schema: String,
    pub output_schema: String,
    #[serde(default)]
    pub extractors: BTreeMap<String, ExtractorSpec>,
    pub template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractorSpec {
    Path(String),
    Rule(ExtractorRule),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorRule {
    pub path: String,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub transform: Option<Transform>,
    /// Missing value fails the record instead of leaving the field absent
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Lower,
    Upper,
    String,
    Int,
    EpochMs,
    SeverityId,
}

fn invalid_document(kind: &str, e: &dyn std::fmt::Display) -> RelayError {
    RelayError::template(kind, format!("invalid template document: {}", e))
}

impl MappingTemplate {
    pub fn from_yaml_str(text: &str) -> RelayResult<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| invalid_document("<yaml>", &e))
    }

    pub fn from_json_str(text: &str) -> RelayResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| invalid_document("<json>", &e))
    }

    /// Load by extension: `.json` as JSON, anything else as YAML
    pub fn from_file(path: &Path) -> RelayResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_config_context(|| format!("cannot read template {}", path.display()))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }

    /// Validate and pre-parse the template for repeated use
    pub fn compile(self) -> RelayResult<CompiledTemplate> {
        if self.name.trim().is_empty() {
            return Err(RelayError::template("<unnamed>", "template name is empty"));
        }

        let skeleton: Value = serde_json::from_str(&self.template).map_err(|e| {
            RelayError::template(&self.name, format!("template is not valid JSON: {}", e))
        })?;
        if !skeleton.is_object() {
            return Err(RelayError::template(&self.name, "template must be a JSON object"));
        }

        let mut extractors = Vec::with_capacity(self.extractors.len());
        for (field, spec) in &self.extractors {
            let rule = spec.to_rule();
            let expr = PathExpr::parse(&rule.path).map_err(|e| {
                RelayError::template(&self.name, format!("extractor '{}': {}", field, e))
            })?;
            extractors.push(CompiledExtractor {
                name: field.clone(),
                expr,
                default: rule.default,
                transform: rule.transform,
                required: rule.required,
            });
        }

        let referenced = placeholders_in(&skeleton);
        let declared: BTreeSet<&str> = self.extractors.keys().map(String::as_str).collect();
        let undeclared: Vec<&str> = referenced
            .iter()
            .map(String::as_str)
            .filter(|p| !declared.contains(p))
            .collect();
        if !undeclared.is_empty() {
            return Err(RelayError::template(
                &self.name,
                format!("placeholders without extractor: {}", undeclared.join(", ")),
            ));
        }

        let expected_class_uid = expected_class_uid(&self.output_schema);

        Ok(CompiledTemplate {
            spec: self,
            skeleton,
            extractors,
            expected_class_uid,
        })
    }
}

impl ExtractorSpec {
    pub fn to_rule(&self) -> ExtractorRule {
        match self {
            ExtractorSpec::Path(path) => ExtractorRule {
                path: path.clone(),
                default: None,
                transform: None,
                required: false,
            },
            ExtractorSpec::Rule(rule) => rule.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledExtractor {
    pub name: String,
    pub expr: PathExpr,
    pub default: Option<Value>,
    pub transform: Option<Transform>,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    pub spec: MappingTemplate,
    pub skeleton: Value,
    pub extractors: Vec<CompiledExtractor>,
    /// Class implied by `output_schema`, when it names a known OCSF class
    pub expected_class_uid: Option<u64>,
}

impl CompiledTemplate {
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTH_TEMPLATE: &str = r#"
name: entra_sign_in
input_schema: azure_sign_in
output_schema: ocsf/1.1.0/authentication
extractors:
  user: event_data.properties.userPrincipalName
  time:
    path: event_data.time
    transform: epoch_ms
    required: true
template: |
  {"class_uid": 3002, "category_name": "Identity & Access Management", "activity_id": 1,
   "severity_id": 1, "time": "{{time}}", "user": {"name": "{{user}}"}}
"#;

    #[test]
    fn test_compile_yaml_template() {
        let compiled = MappingTemplate::from_yaml_str(AUTH_TEMPLATE)
            .unwrap()
            .compile()
            .unwrap();
        assert_eq!(compiled.name(), "entra_sign_in");
        assert_eq!(compiled.extractors.len(), 2);
        assert_eq!(compiled.expected_class_uid, Some(3002));
        let time = compiled.extractors.iter().find(|e| e.name == "time").unwrap();
        assert!(time.required);
        assert_eq!(time.transform, Some(Transform::EpochMs));
    }

    #[test]
    fn test_template_must_be_json() {
        let doc = MappingTemplate {
            name: "broken".into(),
            input_schema: "x".into(),
            output_schema: "y".into(),
            extractors: BTreeMap::new(),
            template: "{\"class_uid\": 3002,".into(),
        };
        let err = doc.compile().unwrap_err();
        assert_eq!(err.error_code(), "TEMPLATE_ERROR");
    }

    #[test]
    fn test_unreadable_template_file_is_a_configuration_error() {
        let path = Path::new("/nonexistent/relay/alert.yaml");
        let err = MappingTemplate::from_file(path).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(err.to_string().contains("/nonexistent/relay/alert.yaml"));
    }

    #[test]
    fn test_undeclared_placeholder_rejected() {
        let doc = MappingTemplate {
            name: "dangling".into(),
            input_schema: "x".into(),
            output_schema: "y".into(),
            extractors: BTreeMap::new(),
            template: r#"{"message": "{{missing}}"}"#.into(),
        };
        let err = doc.compile().unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
