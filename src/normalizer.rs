//! Event Normalizer
//!
//! Turns provider-specific message shapes (Event Hub SDK/REST events, Pub/Sub
//! messages, raw queue or blob bodies) into a [`NormalizedEvent`]. This step
//! never fails: a body that cannot be parsed is still forwarded, wrapped as
//! `{"raw_data": ...}`.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::repair;

/// Ordered candidate key names for one logical field
#[derive(Debug, Clone, Copy)]
pub struct FieldKeys(pub &'static [&'static str]);

impl FieldKeys {
    /// First candidate present with a non-null value
    pub fn lookup<'a>(&self, obj: &'a Map<String, Value>) -> Option<&'a Value> {
        self.0
            .iter()
            .find_map(|key| obj.get(*key).filter(|v| !v.is_null()))
    }

    pub fn lookup_string(&self, obj: &Map<String, Value>) -> Option<String> {
        self.lookup(obj).and_then(value_to_string)
    }
}

/// Key candidates: PascalCase (SDK), camelCase (REST), snake_case (already normalized)
pub mod keys {
    use super::FieldKeys;

    pub const BODY: FieldKeys = FieldKeys(&["Body", "body"]);
    pub const SEQUENCE_NUMBER: FieldKeys =
        FieldKeys(&["SequenceNumber", "sequenceNumber", "sequence_number"]);
    pub const OFFSET: FieldKeys = FieldKeys(&["Offset", "offset"]);
    pub const ENQUEUED_TIME: FieldKeys = FieldKeys(&[
        "EnqueuedTimeUtc",
        "EnqueuedTime",
        "enqueuedTimeUtc",
        "enqueuedTime",
        "enqueued_time",
    ]);
    pub const PARTITION_ID: FieldKeys = FieldKeys(&["PartitionId", "partitionId", "partition_id"]);
    pub const PARTITION_KEY: FieldKeys =
        FieldKeys(&["PartitionKey", "partitionKey", "partition_key"]);
    pub const PROPERTIES: FieldKeys = FieldKeys(&[
        "Properties",
        "properties",
        "ApplicationProperties",
        "applicationProperties",
    ]);

    pub const PUBSUB_MESSAGE: FieldKeys = FieldKeys(&["Message", "message"]);
    pub const PUBSUB_DATA: FieldKeys = FieldKeys(&["Data", "data"]);
    pub const PUBSUB_MESSAGE_ID: FieldKeys = FieldKeys(&["MessageId", "messageId", "message_id"]);
    pub const PUBSUB_PUBLISH_TIME: FieldKeys =
        FieldKeys(&["PublishTime", "publishTime", "publish_time"]);
    pub const PUBSUB_ORDERING_KEY: FieldKeys =
        FieldKeys(&["OrderingKey", "orderingKey", "ordering_key"]);
    pub const PUBSUB_ATTRIBUTES: FieldKeys = FieldKeys(&["Attributes", "attributes"]);
    pub const PUBSUB_SUBSCRIPTION: FieldKeys = FieldKeys(&["Subscription", "subscription"]);
}

/// A message as received from a provider
#[derive(Debug, Clone)]
pub enum ProviderMessage {
    /// Event Hub event, SDK or REST representation
    EventHub(Value),
    /// Pub/Sub push envelope or bare message
    PubSub(Value),
    /// Raw queue body or blob contents
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub sequence_number: Option<i64>,
    pub offset: Option<String>,
    pub enqueued_time: Option<String>,
    pub partition_id: Option<String>,
    pub partition_key: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub processed_timestamp: DateTime<Utc>,
    pub processor_version: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Always a JSON object
    pub event_data: Value,
    pub event_metadata: EventMetadata,
    pub processing_metadata: ProcessingMetadata,
}

impl NormalizedEvent {
    /// Whether `value` already has the normalized envelope shape
    pub fn is_envelope(value: &Value) -> bool {
        value.get("event_data").map_or(false, Value::is_object)
            && value.get("processing_metadata").map_or(false, Value::is_object)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone)]
pub struct EventNormalizer {
    processor_version: String,
    source: String,
}

impl EventNormalizer {
    pub fn new<V: Into<String>, S: Into<String>>(processor_version: V, source: S) -> Self {
        Self {
            processor_version: processor_version.into(),
            source: source.into(),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.processor_version.clone(), config.source_name.clone())
    }

    pub fn normalize(&self, message: &ProviderMessage) -> NormalizedEvent {
        self.normalize_at(message, Utc::now())
    }

    pub fn normalize_at(&self, message: &ProviderMessage, now: DateTime<Utc>) -> NormalizedEvent {
        let (event_data, event_metadata) = match message {
            ProviderMessage::EventHub(value) => normalize_event_hub(value),
            ProviderMessage::PubSub(value) => normalize_pubsub(value),
            ProviderMessage::Raw(bytes) => (decode_bytes(bytes), EventMetadata::default()),
        };

        NormalizedEvent {
            event_data,
            event_metadata,
            processing_metadata: self.processing_metadata(now),
        }
    }

    /// Normalize an already-parsed queue body. A forwarded envelope is kept as is.
    pub fn from_parsed_body(&self, value: Value) -> NormalizedEvent {
        if NormalizedEvent::is_envelope(&value) {
            match serde_json::from_value::<NormalizedEvent>(value.clone()) {
                Ok(event) => return event,
                Err(e) => debug!(
                    error = %e,
                    "envelope-shaped body did not deserialize, normalizing as raw"
                ),
            }
        }

        NormalizedEvent {
            event_data: ensure_object(value),
            event_metadata: EventMetadata::default(),
            processing_metadata: self.processing_metadata(Utc::now()),
        }
    }

    fn processing_metadata(&self, now: DateTime<Utc>) -> ProcessingMetadata {
        ProcessingMetadata {
            processed_timestamp: now,
            processor_version: self.processor_version.clone(),
            source: self.source.clone(),
        }
    }
}

fn normalize_event_hub(value: &Value) -> (Value, EventMetadata) {
    let Some(obj) = value.as_object() else {
        return (ensure_object(value.clone()), EventMetadata::default());
    };

    let event_data = match keys::BODY.lookup(obj) {
        Some(body) => decode_body_value(body),
        None => wrap_raw(Value::Null),
    };

    let metadata = EventMetadata {
        sequence_number: keys::SEQUENCE_NUMBER.lookup(obj).and_then(value_to_i64),
        offset: keys::OFFSET.lookup_string(obj),
        enqueued_time: keys::ENQUEUED_TIME.lookup(obj).and_then(value_to_timestamp),
        partition_id: keys::PARTITION_ID.lookup_string(obj),
        partition_key: keys::PARTITION_KEY.lookup_string(obj),
        properties: keys::PROPERTIES
            .lookup(obj)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    };

    (event_data, metadata)
}

fn normalize_pubsub(value: &Value) -> (Value, EventMetadata) {
    let Some(envelope) = value.as_object() else {
        return (ensure_object(value.clone()), EventMetadata::default());
    };

    // push deliveries wrap the message; pull deliveries hand it over bare
    let message = keys::PUBSUB_MESSAGE
        .lookup(envelope)
        .and_then(Value::as_object)
        .unwrap_or(envelope);

    let event_data = match keys::PUBSUB_DATA.lookup(message) {
        Some(Value::String(encoded)) => match decode_base64(encoded) {
            Some(bytes) => decode_bytes(&bytes),
            None => {
                warn!("Pub/Sub data is not base64, treating as text");
                decode_text(encoded)
            }
        },
        Some(other) => decode_body_value(other),
        None => wrap_raw(Value::Null),
    };

    let mut properties = keys::PUBSUB_ATTRIBUTES
        .lookup(message)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if let Some(subscription) = keys::PUBSUB_SUBSCRIPTION.lookup(envelope) {
        properties.insert("subscription".to_string(), subscription.clone());
    }

    let metadata = EventMetadata {
        sequence_number: None,
        offset: keys::PUBSUB_MESSAGE_ID.lookup_string(message),
        enqueued_time: keys::PUBSUB_PUBLISH_TIME.lookup(message).and_then(value_to_timestamp),
        partition_id: None,
        partition_key: keys::PUBSUB_ORDERING_KEY
            .lookup_string(message)
            .filter(|k| !k.is_empty()),
        properties,
    };

    (event_data, metadata)
}

fn decode_base64(encoded: &str) -> Option<Vec<u8>> {
    STANDARD
        .decode(encoded.trim())
        .or_else(|_| URL_SAFE.decode(encoded.trim()))
        .ok()
}

/// Body already held as a JSON value (SDK message or REST payload)
fn decode_body_value(body: &Value) -> Value {
    match body {
        Value::String(text) => decode_text(text),
        Value::Object(_) => body.clone(),
        Value::Array(items) if !items.is_empty() && items.iter().all(is_byte) => {
            let bytes: Vec<u8> = items.iter().filter_map(|v| v.as_u64()).map(|n| n as u8).collect();
            decode_bytes(&bytes)
        }
        other => wrap_raw(other.clone()),
    }
}

/// Raw bytes: UTF-8 text goes through repair, anything else is base64 wrapped
fn is_byte(value: &Value) -> bool {
    value.as_u64().map_or(false, |n| n <= 255)
}

pub fn decode_bytes(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(text) => decode_text(text),
        Err(_) => {
            warn!(len = bytes.len(), "event body is not UTF-8, forwarding base64 encoded");
            wrap_raw(Value::String(STANDARD.encode(bytes)))
        }
    }
}

pub fn decode_text(text: &str) -> Value {
    match repair::repair(text) {
        Ok(value) => ensure_object(value),
        Err(e) => {
            warn!(error = %e, "event body is not JSON, forwarding as raw_data");
            wrap_raw(Value::String(text.to_string()))
        }
    }
}

fn ensure_object(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        wrap_raw(value)
    }
}

fn wrap_raw(value: Value) -> Value {
    let mut obj = Map::new();
    obj.insert("raw_data".to_string(), value);
    Value::Object(obj)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Epoch seconds or milliseconds to milliseconds; magnitudes below 1e11
/// are read as seconds. `None` when the scaled value does not fit.
pub fn epoch_millis(raw: i64) -> Option<i64> {
    if raw.unsigned_abs() < 100_000_000_000 {
        raw.checked_mul(1000)
    } else {
        Some(raw)
    }
}

/// Strings pass through; numbers are epoch seconds or milliseconds
fn value_to_timestamp(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => {
            let millis = epoch_millis(n.as_i64()?)?;
            Utc.timestamp_millis_opt(millis)
                .single()
                .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        }
        _ => None,
    }
}
