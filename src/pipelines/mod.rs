//! Lambda entry flows
//!
//! - `event_forwarder`: provider messages to the onward queue
//! - `security_lake`: queue records to OCSF Parquet objects
//! - `security_hub`: queue records to ASFF findings

pub mod event_forwarder;
pub mod security_hub;
pub mod security_lake;

pub use event_forwarder::{forward_events, ForwardReport};
pub use security_hub::SecurityHubProcessor;
pub use security_lake::SecurityLakeProcessor;
