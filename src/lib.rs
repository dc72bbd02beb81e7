//! SIEM Cloud Relay Library
//!
//! Relays Azure Defender for Cloud, Google Security Command Center and Azure
//! NSG flow-log telemetry into AWS Security Lake, AWS Security Hub and onward
//! SQS queues.
//!
//! # Modules
//!
//! - `repair`: Heals the malformed JSON upstream providers emit
//! - `normalizer`: Event Hub / Pub/Sub / raw bodies to `NormalizedEvent`
//! - `ocsf`: Template-driven OCSF mapping and validation
//! - `flow_logs`: NSG flow-log tuple expansion
//! - `dispatch`: Queue batches, Parquet objects and ASFF finding batches
//! - `handler`: Per-record partial-failure handling for queue triggers
//! - `pipelines`: The forwarder, Security Lake and Security Hub flows
//! - `collaborators`: Async traits for the external SDK clients
//! - `context`: Per-process configuration, templates and clients
//! - `error_handling`, `config`, `logging`: Shared plumbing

pub mod collaborators;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error_handling;
pub mod flow_logs;
pub mod handler;
pub mod logging;
pub mod normalizer;
pub mod ocsf;
pub mod pipelines;
pub mod repair;

// Re-export the main types for convenience
pub use config::{LogFormat, RelayConfig};
pub use context::RelayContext;
pub use error_handling::{ErrorContext, ErrorSummary, RelayError, RelayResult};
pub use handler::{
    process_batch, BatchItemFailure, BatchReport, FindingResult, RecordProcessor, RecordStage,
    SqsBatchResponse, SqsEvent, SqsRecord,
};
pub use normalizer::{EventNormalizer, NormalizedEvent, ProviderMessage};
pub use ocsf::{map_event, OcsfRecord, TemplateRegistry};
pub use repair::{repair, repair_payload, RepairedPayload};
