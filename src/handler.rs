//! Partial-failure batch handling for queue-triggered invocations
//!
//! Each record moves `Received → Parsed → Validated → Submitted` and ends
//! as a [`FindingResult`]. A failing record never aborts the batch: it is
//! reported in `batchItemFailures` so only that message is redelivered.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::error_handling::{ErrorSummary, RelayError, RelayResult};
use crate::logging::preview;

/// Queue trigger payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SqsEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<SqsRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SqsRecord {
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(rename = "messageAttributes", default)]
    pub message_attributes: Map<String, Value>,
    #[serde(rename = "eventSourceARN", default, skip_serializing_if = "Option::is_none")]
    pub event_source_arn: Option<String>,
}

impl SqsRecord {
    pub fn new<I: Into<String>, B: Into<String>>(message_id: I, body: B) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemFailure {
    #[serde(rename = "itemIdentifier")]
    pub item_identifier: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqsBatchResponse {
    #[serde(rename = "batchItemFailures")]
    pub batch_item_failures: Vec<BatchItemFailure>,
}

/// Last stage a record completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStage {
    Received,
    Parsed,
    Validated,
    Submitted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FindingResult {
    Success {
        item_identifier: String,
    },
    Failed {
        item_identifier: String,
        stage: RecordStage,
        reason: ErrorSummary,
    },
}

impl FindingResult {
    pub fn item_identifier(&self) -> &str {
        match self {
            Self::Success { item_identifier } | Self::Failed { item_identifier, .. } => {
                item_identifier
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Prepared item tagged with the message it came from
#[derive(Debug, Clone)]
pub struct Submission<T> {
    pub item_identifier: String,
    pub item: T,
}

/// A message the sink refused
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub item_identifier: String,
    pub reason: ErrorSummary,
}

impl Rejection {
    pub fn new<S: Into<String>>(item_identifier: S, reason: &RelayError) -> Self {
        Self {
            item_identifier: item_identifier.into(),
            reason: reason.to_summary(),
        }
    }
}

/// One queue-triggered flow: per-record parse and validate, per-batch submit
#[async_trait]
pub trait RecordProcessor: Send + Sync {
    type Parsed: Send;
    type Prepared: Send;

    fn name(&self) -> &'static str;

    fn parse(&self, record: &SqsRecord) -> RelayResult<Self::Parsed>;

    /// Turn a parsed record into zero or more items for the sink
    fn validate(&self, parsed: Self::Parsed) -> RelayResult<Vec<Self::Prepared>>;

    /// Submit every prepared item of the batch. `Err` fails all of them;
    /// `Ok` lists the messages the sink rejected.
    async fn submit(&self, items: Vec<Submission<Self::Prepared>>) -> RelayResult<Vec<Rejection>>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// In trigger order
    pub results: Vec<FindingResult>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FindingResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn response(&self) -> SqsBatchResponse {
        let mut seen = HashSet::new();
        SqsBatchResponse {
            batch_item_failures: self
                .failures()
                .map(FindingResult::item_identifier)
                .filter(|id| seen.insert(*id))
                .map(|id| BatchItemFailure {
                    item_identifier: id.to_string(),
                })
                .collect(),
        }
    }
}

enum Outcome {
    Pending,
    Done(FindingResult),
}

fn fail(
    record: &SqsRecord,
    stage: RecordStage,
    err: &RelayError,
    processor: &str,
) -> FindingResult {
    error!(
        processor,
        message_id = %record.message_id,
        stage = ?stage,
        code = err.error_code(),
        retryable = err.is_transient(),
        body = %preview(&record.body, 2048),
        "record failed: {}",
        err
    );
    FindingResult::Failed {
        item_identifier: record.message_id.clone(),
        stage,
        reason: err.to_summary(),
    }
}

/// Run every record through `processor`. Never fails; failures are reported per record.
pub async fn process_batch<P: RecordProcessor>(processor: &P, event: &SqsEvent) -> BatchReport {
    let name = processor.name();
    let mut outcomes = Vec::with_capacity(event.records.len());
    let mut submissions = Vec::new();

    for record in &event.records {
        let outcome = match processor.parse(record) {
            Err(e) => Outcome::Done(fail(record, RecordStage::Received, &e, name)),
            Ok(parsed) => match processor.validate(parsed) {
                Err(e) => Outcome::Done(fail(record, RecordStage::Parsed, &e, name)),
                Ok(items) if items.is_empty() => {
                    warn!(
                        processor = name,
                        message_id = %record.message_id,
                        "record produced nothing to submit"
                    );
                    Outcome::Done(FindingResult::Success {
                        item_identifier: record.message_id.clone(),
                    })
                }
                Ok(items) => {
                    submissions.extend(items.into_iter().map(|item| Submission {
                        item_identifier: record.message_id.clone(),
                        item,
                    }));
                    Outcome::Pending
                }
            },
        };
        outcomes.push(outcome);
    }

    let mut rejected: HashMap<String, ErrorSummary> = HashMap::new();
    let mut submit_error: Option<RelayError> = None;
    if !submissions.is_empty() {
        match processor.submit(submissions).await {
            Ok(rejections) => {
                for rejection in rejections {
                    rejected.entry(rejection.item_identifier).or_insert(rejection.reason);
                }
            }
            Err(e) => submit_error = Some(e),
        }
    }

    let results: Vec<FindingResult> = event
        .records
        .iter()
        .zip(outcomes)
        .map(|(record, outcome)| match outcome {
            Outcome::Done(result) => result,
            Outcome::Pending => {
                if let Some(e) = &submit_error {
                    fail(record, RecordStage::Validated, e, name)
                } else if let Some(reason) = rejected.get(&record.message_id) {
                    error!(
                        processor = name,
                        message_id = %record.message_id,
                        code = %reason.code,
                        body = %preview(&record.body, 2048),
                        "sink rejected record: {}",
                        reason.message
                    );
                    FindingResult::Failed {
                        item_identifier: record.message_id.clone(),
                        stage: RecordStage::Submitted,
                        reason: reason.clone(),
                    }
                } else {
                    FindingResult::Success {
                        item_identifier: record.message_id.clone(),
                    }
                }
            }
        })
        .collect();

    let report = BatchReport { results };
    info!(
        processor = name,
        records = event.records.len(),
        succeeded = report.succeeded(),
        failed = report.results.len() - report.succeeded(),
        "batch processed"
    );
    report
}

/// `process_batch` reduced to the trigger response
pub async fn handle<P: RecordProcessor>(processor: &P, event: &SqsEvent) -> SqsBatchResponse {
    process_batch(processor, event).await.response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Parses bodies as JSON, requires a `name`, rejects names listed in `reject`
    struct NameProcessor {
        reject: Vec<&'static str>,
        sink_down: bool,
    }

    #[async_trait]
    impl RecordProcessor for NameProcessor {
        type Parsed = Value;
        type Prepared = String;

        fn name(&self) -> &'static str {
            "names"
        }

        fn parse(&self, record: &SqsRecord) -> RelayResult<Value> {
            Ok(serde_json::from_str(&record.body)?)
        }

        fn validate(&self, parsed: Value) -> RelayResult<Vec<String>> {
            parsed["name"]
                .as_str()
                .map(|n| vec![n.to_string()])
                .ok_or_else(|| RelayError::validation_field("name is required", "name"))
        }

        async fn submit(&self, items: Vec<Submission<String>>) -> RelayResult<Vec<Rejection>> {
            if self.sink_down {
                return Err(RelayError::transport("sink unavailable"));
            }
            Ok(items
                .into_iter()
                .filter(|s| self.reject.iter().any(|r| *r == s.item))
                .map(|s| Rejection::new(s.item_identifier, &RelayError::transport("rejected")))
                .collect())
        }
    }

    fn event(bodies: &[&str]) -> SqsEvent {
        SqsEvent {
            records: bodies
                .iter()
                .enumerate()
                .map(|(i, body)| SqsRecord::new(format!("msg-{}", i + 1), *body))
                .collect(),
        }
    }

    #[test]
    fn test_trigger_payload_shape() {
        let event: SqsEvent = serde_json::from_value(json!({
            "Records": [{"messageId": "m1", "body": "{}", "attributes": {"ApproximateReceiveCount": "1"}}]
        }))
        .unwrap();
        assert_eq!(event.records[0].message_id, "m1");

        let response = SqsBatchResponse {
            batch_item_failures: vec![BatchItemFailure { item_identifier: "m1".into() }],
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"batchItemFailures": [{"itemIdentifier": "m1"}]})
        );
    }

    #[tokio::test]
    async fn test_stage_of_each_failure() {
        let processor = NameProcessor { reject: vec!["carol"], sink_down: false };
        let report = process_batch(
            &processor,
            &event(&[
                r#"{"name": "alice"}"#,
                "not json",
                r#"{"other": 1}"#,
                r#"{"name": "carol"}"#,
            ]),
        )
        .await;

        let stages: Vec<Option<RecordStage>> = report
            .results
            .iter()
            .map(|r| match r {
                FindingResult::Success { .. } => None,
                FindingResult::Failed { stage, .. } => Some(*stage),
            })
            .collect();
        assert_eq!(
            stages,
            vec![
                None,
                Some(RecordStage::Received),
                Some(RecordStage::Parsed),
                Some(RecordStage::Submitted)
            ]
        );
        assert_eq!(report.response().batch_item_failures.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_submit_fails_every_submitted_record() {
        let processor = NameProcessor { reject: vec![], sink_down: true };
        let bodies = [r#"{"name": "a"}"#, "{}", r#"{"name": "b"}"#];
        let response = handle(&processor, &event(&bodies)).await;
        let ids: Vec<&str> = response
            .batch_item_failures
            .iter()
            .map(|f| f.item_identifier.as_str())
            .collect();
        assert_eq!(ids, vec!["msg-1", "msg-2", "msg-3"]);
    }

    #[tokio::test]
    async fn test_empty_trigger() {
        let processor = NameProcessor { reject: vec![], sink_down: false };
        let report = process_batch(&processor, &SqsEvent::default()).await;
        assert!(report.results.is_empty());
        assert!(report.response().batch_item_failures.is_empty());
    }
}
