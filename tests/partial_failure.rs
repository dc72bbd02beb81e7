mod common;

use common::{asff_finding, defender_alert, harness, sqs_event};
use siem_cloud_relay::handler::{process_batch, FindingResult, RecordStage};
use siem_cloud_relay::pipelines::{security_hub, security_lake, SecurityHubProcessor};

#[tokio::test]
async fn test_third_of_five_findings_fails_validation() {
    let h = harness();
    let mut bodies: Vec<String> = (1..=5)
        .map(|i| asff_finding(&format!("finding-{}", i)).to_string())
        .collect();
    let mut broken = asff_finding("finding-3");
    broken.as_object_mut().unwrap().remove("AwsAccountId");
    bodies[2] = broken.to_string();

    let response = security_hub::handle(&h.ctx, &sqs_event(&bodies)).await;

    let failed: Vec<&str> = response
        .batch_item_failures
        .iter()
        .map(|f| f.item_identifier.as_str())
        .collect();
    assert_eq!(failed, vec!["msg-3"]);

    let imported = h.findings.imported().await;
    let ids: Vec<&str> = imported.iter().filter_map(|f| f["Id"].as_str()).collect();
    assert_eq!(ids, vec!["finding-1", "finding-2", "finding-4", "finding-5"]);
}

#[tokio::test]
async fn test_failure_carries_stage_and_reason() {
    let h = harness();
    let bodies = vec![
        asff_finding("ok").to_string(),
        "{\"Id\": \"x\", \"Title\": ".to_string(),
        asff_finding("rejected-later").to_string(),
    ];
    let processor = SecurityHubProcessor::new(&h.ctx);
    let report = process_batch(&processor, &sqs_event(&bodies)).await;

    assert_eq!(report.succeeded(), 2);
    match &report.results[1] {
        FindingResult::Failed { item_identifier, stage, reason } => {
            assert_eq!(item_identifier, "msg-2");
            assert_eq!(*stage, RecordStage::Received);
            assert_eq!(reason.code, "REPAIR_FAILURE");
        }
        other => panic!("expected a failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unmappable_alert_fails_only_its_record() {
    let h = harness();
    let mut bodies: Vec<String> = (1..=5).map(|i| defender_alert(i).to_string()).collect();
    let mut untitled = defender_alert(3);
    untitled["properties"].as_object_mut().unwrap().remove("alertDisplayName");
    bodies[2] = untitled.to_string();

    let response = security_lake::handle(&h.ctx, &sqs_event(&bodies)).await;
    assert_eq!(response.batch_item_failures.len(), 1);
    assert_eq!(response.batch_item_failures[0].item_identifier, "msg-3");
    assert_eq!(h.objects.objects().await.len(), 1);
}

#[tokio::test]
async fn test_unrepresentable_alert_time_fails_only_its_record() {
    let h = harness();
    let mut bad_time = defender_alert(2);
    bad_time["properties"]["timeGeneratedUtc"] = serde_json::json!("-1e30");
    let bodies = vec![
        defender_alert(1).to_string(),
        bad_time.to_string(),
        defender_alert(3).to_string(),
    ];

    let processor = security_lake::SecurityLakeProcessor::new(&h.ctx);
    let report = process_batch(&processor, &sqs_event(&bodies)).await;
    assert_eq!(report.succeeded(), 2);
    match &report.results[1] {
        FindingResult::Failed { item_identifier, stage, reason } => {
            assert_eq!(item_identifier, "msg-2");
            assert_eq!(*stage, RecordStage::Parsed);
            assert_eq!(reason.code, "VALIDATION_FAILURE");
            assert_eq!(reason.field.as_deref(), Some("time"));
        }
        other => panic!("expected a failure, got {:?}", other),
    }
    assert_eq!(report.response().batch_item_failures.len(), 1);
}
