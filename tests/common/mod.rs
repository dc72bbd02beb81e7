//! Common test utilities for integration tests

#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use siem_cloud_relay::collaborators::{InMemoryFindingSink, InMemoryObjectStore, InMemoryQueue};
use siem_cloud_relay::ocsf::TemplateRegistry;
use siem_cloud_relay::{RelayConfig, RelayContext, SqsEvent, SqsRecord};

/// The templates shipped with the crate
pub fn shipped_templates() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("templates")
}

pub fn test_config() -> RelayConfig {
    RelayConfig {
        queue_url: Some("https://sqs.us-east-1.amazonaws.com/123456789012/relay".into()),
        security_lake_bucket: Some("aws-security-data-lake-us-east-1-test".into()),
        security_lake_prefix: "ext/azure-defender".into(),
        source_account_id: "123456789012".into(),
        template_dir: shipped_templates(),
        max_rows_per_file: 1000,
        ..RelayConfig::default()
    }
}

pub struct Harness {
    pub ctx: RelayContext,
    pub queue: Arc<InMemoryQueue>,
    pub objects: Arc<InMemoryObjectStore>,
    pub findings: Arc<InMemoryFindingSink>,
}

pub fn harness_with(
    config: RelayConfig,
    objects: InMemoryObjectStore,
    findings: InMemoryFindingSink,
) -> Harness {
    let queue = Arc::new(InMemoryQueue::new());
    let objects = Arc::new(objects);
    let findings = Arc::new(findings);
    let templates =
        TemplateRegistry::load_dir(&config.template_dir).expect("shipped templates load");
    let ctx = RelayContext::new(config)
        .with_templates(templates)
        .with_queue(queue.clone())
        .with_object_store(objects.clone())
        .with_finding_sink(findings.clone());
    Harness { ctx, queue, objects, findings }
}

pub fn harness() -> Harness {
    harness_with(test_config(), InMemoryObjectStore::new(), InMemoryFindingSink::new())
}

pub fn sqs_event(bodies: &[String]) -> SqsEvent {
    SqsEvent {
        records: bodies
            .iter()
            .enumerate()
            .map(|(i, body)| SqsRecord::new(format!("msg-{}", i + 1), body.clone()))
            .collect(),
    }
}

/// Defender for Cloud continuous-export alert
pub fn defender_alert(n: usize) -> Value {
    json!({
        "id": format!("/subscriptions/sub-1/providers/Microsoft.Security/locations/eastus/alerts/alert-{}", n),
        "name": format!("alert-{}", n),
        "type": "Microsoft.Security/Locations/alerts",
        "properties": {
            "systemAlertId": format!("alert-{}", n),
            "alertType": "VM_SuspectBruteForce",
            "alertDisplayName": "Suspicious authentication activity",
            "description": "Multiple failed sign-ins from one source",
            "severity": "Medium",
            "status": "Active",
            "timeGeneratedUtc": "2024-03-01T10:00:00Z",
            "compromisedEntity": "vm-web-01",
            "resourceIdentifiers": [{
                "azureResourceId": "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm-web-01",
                "azureResourceSubscriptionId": "sub-1"
            }],
            "remediationSteps": ["Reset the account password"]
        }
    })
}

/// Security Command Center notification
pub fn scc_notification() -> Value {
    json!({
        "notificationConfigName": "organizations/1/notificationConfigs/relay",
        "finding": {
            "name": "organizations/1/sources/2/findings/abc",
            "category": "Persistence: IAM Anomalous Grant",
            "state": "ACTIVE",
            "severity": "HIGH",
            "findingClass": "THREAT",
            "eventTime": "2024-03-02T08:30:00Z",
            "resourceName": "//cloudresourcemanager.googleapis.com/projects/123"
        },
        "resource": {"name": "//cloudresourcemanager.googleapis.com/projects/123", "projectDisplayName": "prod-project"}
    })
}

pub fn asff_finding(id: &str) -> Value {
    json!({
        "SchemaVersion": "2018-10-08",
        "Id": id,
        "ProductArn": "arn:aws:securityhub:us-east-1:123456789012:product/123456789012/default",
        "GeneratorId": "azure-defender",
        "AwsAccountId": "123456789012",
        "Types": ["TTPs/Credential Access"],
        "CreatedAt": "2024-03-01T10:00:00Z",
        "UpdatedAt": "2024-03-01T10:00:00Z",
        "Severity": {"Label": "MEDIUM"},
        "Title": "Suspicious authentication activity",
        "Description": "Multiple failed sign-ins from one source",
        "Resources": [{"Type": "Other", "Id": "vm-web-01"}]
    })
}

/// Warnings and errors written on this thread while the guard is held
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let logs = Self::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
