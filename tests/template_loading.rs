mod common;

use std::fs;

use serde_json::json;
use tempfile::TempDir;

use common::{defender_alert, scc_notification, shipped_templates};
use siem_cloud_relay::normalizer::ProviderMessage;
use siem_cloud_relay::ocsf::{map_event, TemplateRegistry};
use siem_cloud_relay::EventNormalizer;

#[test]
fn test_shipped_templates_load_and_select() {
    let registry = TemplateRegistry::load_dir(&shipped_templates()).unwrap();
    assert_eq!(registry.len(), 3);

    let normalizer = EventNormalizer::new("0.3.0", "azure-defender");
    let alert = normalizer.normalize(&ProviderMessage::Raw(defender_alert(1).to_string().into()));
    let template = registry.select(&alert.to_value()).unwrap();
    assert_eq!(template.name(), "azure_defender_alert");

    let record = map_event(template, &alert).unwrap();
    assert_eq!(record.class_uid(), 2004);
    assert_eq!(record.severity_id(), 3);
    assert_eq!(record.get("finding_info.uid"), Some(&json!("alert-1")));
    assert_eq!(record.get("metadata.product.version"), Some(&json!("0.3.0")));

    let scc = normalizer.normalize(&ProviderMessage::Raw(scc_notification().to_string().into()));
    let template = registry.select(&scc.to_value()).unwrap();
    assert_eq!(template.name(), "gcp_scc_finding");
    let record = map_event(template, &scc).unwrap();
    assert_eq!(record.severity_id(), 4);
    assert_eq!(record.get("cloud.provider"), Some(&json!("GCP")));
}

#[test]
fn test_json_documents_in_custom_directory() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("mappings.json"),
        json!({
            "event_type_paths": ["event_data.kind"],
            "mappings": {"signin": "entra_sign_in"}
        })
        .to_string(),
    )
    .unwrap();
    fs::write(
        dir.path().join("entra_sign_in.json"),
        json!({
            "name": "entra_sign_in",
            "input_schema": "entra_sign_in_log",
            "output_schema": "ocsf/1.1.0/authentication",
            "extractors": {
                "user": "event_data.user",
                "time": {"path": "event_data.time", "transform": "epoch_ms", "required": true}
            },
            "template": "{\"class_uid\": 3002, \"category_uid\": 3, \"category_name\": \"Identity & Access Management\", \"activity_id\": 1, \"type_uid\": 300201, \"severity_id\": 1, \"time\": \"{{time}}\", \"user\": {\"name\": \"{{user}}\"}}"
        })
        .to_string(),
    )
    .unwrap();
    fs::write(dir.path().join("README.txt"), "ignored").unwrap();

    let registry = TemplateRegistry::load_dir(dir.path()).unwrap();
    assert_eq!(registry.len(), 1);

    let event = EventNormalizer::new("1", "entra").normalize(&ProviderMessage::Raw(
        br#"{"kind": "signin", "user": "ada@example.com", "time": 1709287200}"#.to_vec(),
    ));
    let record = map_event(registry.select(&event.to_value()).unwrap(), &event).unwrap();
    assert_eq!(record.class_uid(), 3002);
    assert_eq!(record.time_ms(), 1709287200000);
    assert_eq!(record.get("user.name"), Some(&json!("ada@example.com")));

    let unmapped = EventNormalizer::new("1", "entra")
        .normalize(&ProviderMessage::Raw(br#"{"kind": "other"}"#.to_vec()));
    assert_eq!(registry.select(&unmapped.to_value()).unwrap_err().error_code(), "TEMPLATE_ERROR");
}

#[test]
fn test_table_referencing_missing_template_fails_to_load() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("mappings.yaml"), "mappings:\n  x: nowhere\n").unwrap();
    let err = TemplateRegistry::load_dir(dir.path()).unwrap_err();
    assert!(err.to_string().contains("nowhere"));
}

#[test]
fn test_missing_directory_is_a_configuration_error() {
    let dir = std::path::Path::new("/nonexistent/relay/templates");
    let err = TemplateRegistry::load_dir(dir).unwrap_err();
    assert_eq!(err.error_code(), "CONFIG_ERROR");
}
