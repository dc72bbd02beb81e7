//! External collaborators
//!
//! The relay talks to the credential store, the onward queue, the Security
//! Lake bucket and Security Hub only through these traits. Production wires
//! SDK clients behind them; the in-memory versions back tests and local
//! replays and record every call.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::dispatch::queue::BatchEntry;
use crate::error_handling::{RelayError, RelayResult};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Secret payload, which must be a JSON object
    async fn get_secret(&self, name: &str) -> RelayResult<Map<String, Value>>;
}

/// Per-entry failure reported by the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntryFailure {
    pub id: String,
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub sender_fault: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendBatchOutput {
    /// Ids of accepted entries
    pub successful: Vec<String>,
    pub failed: Vec<BatchEntryFailure>,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Send at most ten entries in one call
    async fn send_batch(
        &self,
        queue_url: &str,
        entries: &[BatchEntry],
    ) -> RelayResult<SendBatchOutput>;
}

pub type ObjectMetadata = BTreeMap<String, String>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        metadata: ObjectMetadata,
    ) -> RelayResult<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedFinding {
    /// ASFF `Id` of the rejected finding
    pub id: String,
    pub error_code: String,
    pub error_message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchImportOutput {
    pub success_count: usize,
    pub failed_count: usize,
    pub failed_findings: Vec<FailedFinding>,
}

#[async_trait]
pub trait FindingSink: Send + Sync {
    /// Import at most one hundred findings in one call
    async fn batch_import_findings(&self, findings: &[Value]) -> RelayResult<BatchImportOutput>;
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    secrets: HashMap<String, Value>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret<S: Into<String>>(mut self, name: S, value: Value) -> Self {
        self.secrets.insert(name.into(), value);
        self
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_secret(&self, name: &str) -> RelayResult<Map<String, Value>> {
        match self.secrets.get(name) {
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(_) => Err(RelayError::configuration(format!(
                "secret '{}' is not a JSON object",
                name
            ))),
            None => Err(RelayError::transport(format!("secret '{}' not found", name))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentBatch {
    pub queue_url: String,
    pub entries: Vec<BatchEntry>,
}

/// Queue that accepts everything except the configured entry ids
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    sent: Mutex<Vec<SentBatch>>,
    reject_ids: HashSet<String>,
    unavailable: bool,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reject_ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Every call fails with a transport error
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub async fn sent_batches(&self) -> Vec<SentBatch> {
        self.sent.lock().await.clone()
    }

    /// Accepted entries across all batches, in send order
    pub async fn delivered(&self) -> Vec<BatchEntry> {
        self.sent
            .lock()
            .await
            .iter()
            .flat_map(|b| b.entries.iter())
            .filter(|e| !self.reject_ids.contains(&e.id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn send_batch(
        &self,
        queue_url: &str,
        entries: &[BatchEntry],
    ) -> RelayResult<SendBatchOutput> {
        if self.unavailable {
            return Err(RelayError::transport(format!("queue {} is unavailable", queue_url)));
        }

        let mut output = SendBatchOutput::default();
        for entry in entries {
            if self.reject_ids.contains(&entry.id) {
                output.failed.push(BatchEntryFailure {
                    id: entry.id.clone(),
                    code: "InternalError".to_string(),
                    message: "rejected by test queue".to_string(),
                    sender_fault: false,
                });
            } else {
                output.successful.push(entry.id.clone());
            }
        }

        self.sent.lock().await.push(SentBatch {
            queue_url: queue_url.to_string(),
            entries: entries.to_vec(),
        });
        Ok(output)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub body: Vec<u8>,
    pub metadata: ObjectMetadata,
}

#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<Vec<StoredObject>>,
    /// Remaining writes that fail before the store starts accepting
    failures_left: Mutex<usize>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `count` writes with a transport error
    pub fn failing_first(count: usize) -> Self {
        Self {
            objects: Mutex::new(Vec::new()),
            failures_left: Mutex::new(count),
        }
    }

    pub async fn objects(&self) -> Vec<StoredObject> {
        self.objects.lock().await.clone()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        metadata: ObjectMetadata,
    ) -> RelayResult<()> {
        {
            let mut failures_left = self.failures_left.lock().await;
            if *failures_left > 0 {
                *failures_left -= 1;
                return Err(RelayError::transport(format!("put s3://{}/{} failed", bucket, key)));
            }
        }

        self.objects.lock().await.push(StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            body,
            metadata,
        });
        Ok(())
    }
}

/// Finding sink that rejects findings by ASFF `Id`
#[derive(Debug, Default)]
pub struct InMemoryFindingSink {
    imported: Mutex<Vec<Vec<Value>>>,
    reject_ids: HashSet<String>,
    unavailable: bool,
}

impl InMemoryFindingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reject_ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Each import call's findings
    pub async fn import_calls(&self) -> Vec<Vec<Value>> {
        self.imported.lock().await.clone()
    }

    pub async fn imported(&self) -> Vec<Value> {
        self.imported.lock().await.iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl FindingSink for InMemoryFindingSink {
    async fn batch_import_findings(&self, findings: &[Value]) -> RelayResult<BatchImportOutput> {
        if self.unavailable {
            return Err(RelayError::transport("Security Hub is unavailable"));
        }

        let mut output = BatchImportOutput::default();
        for finding in findings {
            let id = finding.get("Id").and_then(Value::as_str).unwrap_or_default();
            if self.reject_ids.contains(id) {
                output.failed_findings.push(FailedFinding {
                    id: id.to_string(),
                    error_code: "InvalidInput".to_string(),
                    error_message: "rejected by test sink".to_string(),
                });
            } else {
                output.success_count += 1;
            }
        }
        output.failed_count = output.failed_findings.len();

        self.imported.lock().await.push(findings.to_vec());
        Ok(output)
    }
}
