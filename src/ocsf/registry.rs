//! Template table and registry
//!
//! The table maps a provider event-type string to a template name:
//!
//! ```yaml
//! event_type_paths:
//!   - event_data.properties.alertType
//!   - event_data.finding.category
//! mappings:
//!   CredentialAccess: gcp_scc_finding
//!   VM_SuspectBruteForce: azure_defender_alert
//! default_template: azure_defender_alert
//! ```
//!
//! The event type is the first of `event_type_paths` resolving to a string.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error_handling::{ErrorContext, RelayError, RelayResult};
use crate::ocsf::extract::PathExpr;
use crate::ocsf::template::{CompiledTemplate, MappingTemplate};

/// File stem of the table document inside a template directory
pub const TABLE_FILE_STEM: &str = "mappings";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateTable {
    #[serde(default)]
    pub event_type_paths: Vec<String>,
    #[serde(default)]
    pub mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub default_template: Option<String>,
}

fn invalid_table(e: &dyn std::fmt::Display) -> RelayError {
    RelayError::template(TABLE_FILE_STEM, format!("invalid template table: {}", e))
}

impl TemplateTable {
    pub fn from_yaml_str(text: &str) -> RelayResult<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| invalid_table(&e))
    }

    pub fn from_json_str(text: &str) -> RelayResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| invalid_table(&e))
    }
}

#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, CompiledTemplate>,
    event_type_paths: Vec<PathExpr>,
    mappings: BTreeMap<String, String>,
    default_template: Option<String>,
}

impl TemplateRegistry {
    pub fn new(table: TemplateTable, templates: Vec<CompiledTemplate>) -> RelayResult<Self> {
        let mut by_name = BTreeMap::new();
        for template in templates {
            let name = template.name().to_string();
            if by_name.insert(name.clone(), template).is_some() {
                return Err(RelayError::template(name, "template defined more than once"));
            }
        }

        let event_type_paths = table
            .event_type_paths
            .iter()
            .map(|p| {
                PathExpr::parse(p).map_err(|e| {
                    RelayError::template(TABLE_FILE_STEM, format!("event_type_paths: {}", e))
                })
            })
            .collect::<RelayResult<Vec<_>>>()?;

        let referenced = table.mappings.values().chain(table.default_template.iter());
        for name in referenced {
            if !by_name.contains_key(name) {
                return Err(RelayError::template(
                    name.as_str(),
                    "referenced by the template table but not loaded",
                ));
            }
        }

        Ok(Self {
            templates: by_name,
            event_type_paths,
            mappings: table.mappings,
            default_template: table.default_template,
        })
    }

    /// Load every `.yaml`, `.yml` and `.json` file in `dir`. `mappings.*` is
    /// the table; all other files are templates.
    pub fn load_dir(dir: &Path) -> RelayResult<Self> {
        let entries = std::fs::read_dir(dir)
            .with_config_context(|| format!("cannot read template directory {}", dir.display()))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.with_config_context(|| format!("cannot list {}", dir.display()))?;
            let path = entry.path();
            let is_document = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml") | Some("json")
            );
            if path.is_file() && is_document {
                paths.push(path);
            }
        }
        paths.sort();

        let mut table = None;
        let mut templates = Vec::new();
        for path in paths {
            let is_table = path.file_stem().and_then(|s| s.to_str()) == Some(TABLE_FILE_STEM);
            if is_table {
                let text = std::fs::read_to_string(&path)
                    .with_config_context(|| {
                        format!("cannot read template table {}", path.display())
                    })?;
                table = Some(match path.extension().and_then(|e| e.to_str()) {
                    Some("json") => TemplateTable::from_json_str(&text)?,
                    _ => TemplateTable::from_yaml_str(&text)?,
                });
            } else {
                debug!(path = %path.display(), "loading mapping template");
                templates.push(MappingTemplate::from_file(&path)?.compile()?);
            }
        }

        let registry = Self::new(table.unwrap_or_default(), templates)?;
        info!(
            dir = %dir.display(),
            templates = registry.templates.len(),
            mappings = registry.mappings.len(),
            "template registry loaded"
        );
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&CompiledTemplate> {
        self.templates.get(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Event type of a serialized normalized event
    pub fn event_type<'a>(&self, event: &'a Value) -> Option<&'a str> {
        self.event_type_paths
            .iter()
            .find_map(|expr| expr.evaluate(event).and_then(Value::as_str))
    }

    /// Template for the event's type, falling back to the default template
    pub fn select(&self, event: &Value) -> RelayResult<&CompiledTemplate> {
        let event_type = self.event_type(event);
        let name = event_type
            .and_then(|t| self.mappings.get(t))
            .or(self.default_template.as_ref())
            .ok_or_else(|| {
                RelayError::template(
                    event_type.unwrap_or("<none>"),
                    "no template mapped for event type and no default_template",
                )
            })?;

        self.templates
            .get(name)
            .ok_or_else(|| RelayError::template(name.as_str(), "template not loaded"))
    }
}
