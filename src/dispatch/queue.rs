//! Onward queue batching
//!
//! Entries get ids `prefix_index`, numbered across the whole dispatch so an
//! id never repeats between batches of the same call. Batches hold at most
//! ten entries and stay under the queue's payload cap.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::collaborators::MessageQueue;

pub const MAX_BATCH_ENTRIES: usize = 10;
/// SQS limit for a single message and for a whole batch
pub const MAX_BATCH_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "MessageBody")]
    pub message_body: String,
}

impl BatchEntry {
    pub fn size(&self) -> usize {
        self.message_body.len()
    }
}

/// Queue body for one item: strings verbatim, everything else as JSON text
pub fn message_body(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn create_batch_entries(prefix: &str, items: &[Value]) -> Vec<BatchEntry> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| BatchEntry {
            id: format!("{}_{}", prefix, index),
            message_body: message_body(item),
        })
        .collect()
}

/// Entries the queue would refuse outright, split from the sendable batches
#[derive(Debug, Default)]
pub struct BatchPlan {
    pub batches: Vec<Vec<BatchEntry>>,
    pub oversized: Vec<BatchEntry>,
}

pub fn plan_batches(entries: Vec<BatchEntry>) -> BatchPlan {
    let mut plan = BatchPlan::default();
    let mut current: Vec<BatchEntry> = Vec::new();
    let mut current_bytes = 0;

    for entry in entries {
        if entry.size() > MAX_BATCH_BYTES {
            plan.oversized.push(entry);
            continue;
        }
        if current.len() == MAX_BATCH_ENTRIES || current_bytes + entry.size() > MAX_BATCH_BYTES {
            plan.batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += entry.size();
        current.push(entry);
    }
    if !current.is_empty() {
        plan.batches.push(current);
    }
    plan
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub sent: Vec<String>,
    pub failed: Vec<FailedEntry>,
}

impl DispatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Send `entries` in planned batches. Never fails as a whole: a failed call
/// marks every entry of that batch failed and the remaining batches still go out.
pub async fn send_entries(
    queue: &dyn MessageQueue,
    queue_url: &str,
    entries: Vec<BatchEntry>,
) -> DispatchReport {
    let plan = plan_batches(entries);
    let mut report = DispatchReport::default();

    for entry in plan.oversized {
        warn!(
            id = %entry.id,
            bytes = entry.size(),
            "message exceeds the queue payload cap, not sent"
        );
        report.failed.push(FailedEntry {
            id: entry.id,
            reason: format!("message body exceeds {} bytes", MAX_BATCH_BYTES),
        });
    }

    for (batch_index, batch) in plan.batches.iter().enumerate() {
        debug!("Sending batch {} with {} entries", batch_index + 1, batch.len());
        match queue.send_batch(queue_url, batch).await {
            Ok(output) => {
                report.sent.extend(output.successful);
                for failure in output.failed {
                    warn!(
                        id = %failure.id,
                        code = %failure.code,
                        "queue rejected entry: {}",
                        failure.message
                    );
                    report.failed.push(FailedEntry {
                        id: failure.id,
                        reason: format!("{}: {}", failure.code, failure.message),
                    });
                }
            }
            Err(e) => {
                error!("Failed to send batch {}: {}", batch_index + 1, e);
                report.failed.extend(batch.iter().map(|entry| FailedEntry {
                    id: entry.id.clone(),
                    reason: e.to_string(),
                }));
            }
        }
    }

    info!(
        sent = report.sent.len(),
        failed = report.failed.len(),
        "queue dispatch finished"
    );
    report
}
