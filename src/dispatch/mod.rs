//! Batch Dispatcher
//!
//! Packages records for the three outbound sinks: queue batches, Security
//! Lake Parquet objects and Security Hub finding batches.

pub mod findings;
pub mod parquet_objects;
pub mod queue;

pub use findings::{truncate_finding, validate_finding, Truncation, MAX_FINDINGS_PER_IMPORT};
pub use parquet_objects::{encode_rows, flatten, plan_objects, ObjectPlan, PartitionKey, Row};
pub use queue::{create_batch_entries, send_entries, BatchEntry, DispatchReport, FailedEntry};
