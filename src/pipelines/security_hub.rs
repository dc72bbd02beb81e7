//! SQS to Security Hub: ASFF findings through BatchImportFindings

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::context::RelayContext;
use crate::dispatch::findings::{
    finding_id, truncate_finding, validate_finding, Truncation, MAX_FINDINGS_PER_IMPORT,
};
use crate::error_handling::{RelayError, RelayResult};
use crate::handler::{
    self, RecordProcessor, Rejection, SqsBatchResponse, SqsEvent, SqsRecord, Submission,
};
use crate::normalizer::NormalizedEvent;
use crate::repair;

/// A finding ready for import, with the fields that had to be shortened
#[derive(Debug, Clone)]
pub struct PreparedFinding {
    pub finding: Value,
    pub truncations: Vec<Truncation>,
}

pub struct SecurityHubProcessor<'a> {
    ctx: &'a RelayContext,
}

impl<'a> SecurityHubProcessor<'a> {
    pub fn new(ctx: &'a RelayContext) -> Self {
        Self { ctx }
    }
}

/// Findings carried by a queue body: a forwarded envelope's `event_data`,
/// a `{"Findings": [...]}` request, an array, or a single finding
pub fn findings_in(body: Value) -> Vec<Value> {
    let body = if NormalizedEvent::is_envelope(&body) {
        body.get("event_data").cloned().unwrap_or(Value::Null)
    } else {
        body
    };

    match body {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("Findings") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                obj.insert("Findings".to_string(), other);
                vec![Value::Object(obj)]
            }
            None => vec![Value::Object(obj)],
        },
        other => vec![other],
    }
}

#[async_trait]
impl<'a> RecordProcessor for SecurityHubProcessor<'a> {
    type Parsed = Vec<Value>;
    type Prepared = PreparedFinding;

    fn name(&self) -> &'static str {
        "security_hub"
    }

    fn parse(&self, record: &SqsRecord) -> RelayResult<Vec<Value>> {
        let value = repair::repair(&record.body)
            .map_err(|e| RelayError::repair("queue body is not JSON after repair", e))?;
        Ok(findings_in(value))
    }

    fn validate(&self, findings: Vec<Value>) -> RelayResult<Vec<PreparedFinding>> {
        findings
            .into_iter()
            .map(|mut finding| {
                validate_finding(&finding)?;
                let truncations = truncate_finding(&mut finding);
                Ok(PreparedFinding { finding, truncations })
            })
            .collect()
    }

    async fn submit(&self, items: Vec<Submission<PreparedFinding>>) -> RelayResult<Vec<Rejection>> {
        let sink = self.ctx.finding_sink()?;
        let mut rejections = Vec::new();

        for (chunk_index, chunk) in items.chunks(MAX_FINDINGS_PER_IMPORT).enumerate() {
            let mut owners: HashMap<&str, Vec<&str>> = HashMap::new();
            for s in chunk {
                if let Some(id) = finding_id(&s.item.finding) {
                    owners.entry(id).or_default().push(&s.item_identifier);
                }
            }
            let findings: Vec<Value> = chunk.iter().map(|s| s.item.finding.clone()).collect();
            let truncated = chunk.iter().filter(|s| !s.item.truncations.is_empty()).count();

            match sink.batch_import_findings(&findings).await {
                Ok(output) => {
                    info!(
                        chunk = chunk_index + 1,
                        findings = findings.len(),
                        truncated,
                        failed = output.failed_count,
                        "imported findings"
                    );
                    for failed in output.failed_findings {
                        let reason = RelayError::transport(format!(
                            "Security Hub rejected finding {}: {} {}",
                            failed.id, failed.error_code, failed.error_message
                        ));
                        match owners.get(failed.id.as_str()) {
                            Some(messages) => rejections
                                .extend(messages.iter().map(|m| Rejection::new(*m, &reason))),
                            None => warn!(
                                finding_id = %failed.id,
                                "rejected finding does not match any submitted Id"
                            ),
                        }
                    }
                }
                Err(e) => {
                    e.log(&format!("BatchImportFindings failed for chunk {}", chunk_index + 1));
                    rejections.extend(
                        chunk
                            .iter()
                            .map(|s| Rejection::new(s.item_identifier.as_str(), &e)),
                    );
                }
            }
        }
        Ok(rejections)
    }
}

pub async fn handle(ctx: &RelayContext, event: &SqsEvent) -> SqsBatchResponse {
    handler::handle(&SecurityHubProcessor::new(ctx), event).await
}
