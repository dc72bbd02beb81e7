//! Azure NSG flow-log expansion
//!
//! A flow-log blob holds `records[].properties.flows[].flows[].flowTuples[]`,
//! each tuple a comma separated string. Every tuple becomes one flat event
//! so the regular template path can map it to OCSF Network Activity.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

/// Event type stamped on expanded tuples, used for template selection
pub const FLOW_EVENT_TYPE: &str = "azure_nsg_flow";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowState {
    Begin,
    Continuing,
    End,
    Deny,
}

/// Volume counters, only present in version 2 tuples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowCounters {
    pub packets_src: Option<u64>,
    pub bytes_src: Option<u64>,
    pub packets_dst: Option<u64>,
    pub bytes_dst: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowTuple {
    /// Epoch seconds
    pub timestamp: i64,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: Protocol,
    pub direction: Direction,
    pub decision: Decision,
    pub flow_state: Option<FlowState>,
    #[serde(flatten)]
    pub counters: FlowCounters,
}

impl FlowTuple {
    pub fn parse(raw: &str, version: u64) -> Result<Self, String> {
        let fields: Vec<&str> = raw.split(',').map(str::trim).collect();
        let expected = if version >= 2 { 13 } else { 8 };
        if fields.len() < expected {
            return Err(format!(
                "version {} tuple needs {} fields, found {}",
                version,
                expected,
                fields.len()
            ));
        }

        let timestamp = fields[0]
            .parse::<i64>()
            .map_err(|_| format!("bad timestamp '{}'", fields[0]))?;
        let port = |s: &str| s.parse::<u16>().map_err(|_| format!("bad port '{}'", s));

        let protocol = match fields[5] {
            "T" => Protocol::Tcp,
            "U" => Protocol::Udp,
            other => return Err(format!("bad protocol '{}'", other)),
        };
        let direction = match fields[6] {
            "I" => Direction::Inbound,
            "O" => Direction::Outbound,
            other => return Err(format!("bad direction '{}'", other)),
        };
        let decision = match fields[7] {
            "A" => Decision::Allow,
            "D" => Decision::Deny,
            other => return Err(format!("bad decision '{}'", other)),
        };

        let (flow_state, counters) = if version >= 2 {
            let state = match fields[8] {
                "B" => FlowState::Begin,
                "C" => FlowState::Continuing,
                "E" => FlowState::End,
                "D" => FlowState::Deny,
                other => return Err(format!("bad flow state '{}'", other)),
            };
            // counters are empty on begin tuples
            let counter = |s: &str| s.parse::<u64>().ok();
            let counters = FlowCounters {
                packets_src: counter(fields[9]),
                bytes_src: counter(fields[10]),
                packets_dst: counter(fields[11]),
                bytes_dst: counter(fields[12]),
            };
            (Some(state), counters)
        } else {
            (None, FlowCounters::default())
        };

        Ok(Self {
            timestamp,
            src_ip: fields[1].to_string(),
            dst_ip: fields[2].to_string(),
            src_port: port(fields[3])?,
            dst_port: port(fields[4])?,
            protocol,
            direction,
            decision,
            flow_state,
            counters,
        })
    }
}

/// Whether `event_data` looks like an NSG flow-log document
pub fn is_flow_log(event_data: &Value) -> bool {
    event_data
        .get("records")
        .and_then(Value::as_array)
        .and_then(|records| records.first())
        .and_then(|record| record.pointer("/properties/flows"))
        .map_or(false, Value::is_array)
}

/// Expand a flow-log document into one event per valid tuple
pub fn expand(event_data: &Value) -> Vec<Value> {
    let Some(records) = event_data.get("records").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut events = Vec::new();
    for record in records {
        let version = record
            .pointer("/properties/Version")
            .and_then(Value::as_u64)
            .unwrap_or(1);
        let record_time = record.get("time").cloned().unwrap_or(Value::Null);
        let resource_id = record.get("resourceId").cloned().unwrap_or(Value::Null);
        let mac = record.get("macAddress").cloned().unwrap_or(Value::Null);

        let rules = record
            .pointer("/properties/flows")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for rule in rules {
            let rule_name = rule.get("rule").cloned().unwrap_or(Value::Null);
            let groups = rule
                .get("flows")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();

            for group in groups {
                let tuples = group
                    .get("flowTuples")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();

                for raw in tuples.iter().filter_map(Value::as_str) {
                    match FlowTuple::parse(raw, version) {
                        Ok(tuple) => events.push(flow_event(
                            &tuple,
                            version,
                            &record_time,
                            &resource_id,
                            group.get("mac").unwrap_or(&mac),
                            &rule_name,
                        )),
                        Err(reason) => warn!(tuple = raw, %reason, "skipping malformed flow tuple"),
                    }
                }
            }
        }
    }
    events
}

fn flow_event(
    tuple: &FlowTuple,
    version: u64,
    record_time: &Value,
    resource_id: &Value,
    mac: &Value,
    rule: &Value,
) -> Value {
    let start_time = Utc
        .timestamp_opt(tuple.timestamp, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .map(Value::String)
        .unwrap_or(Value::Null);

    let mut event = json!({
        "event_type": FLOW_EVENT_TYPE,
        "flow_version": version,
        "time": record_time,
        "start_time": start_time,
        "resource_id": resource_id,
        "mac_address": mac,
        "rule": rule,
    });
    if let (Value::Object(target), Ok(Value::Object(fields))) =
        (&mut event, serde_json::to_value(tuple))
    {
        target.extend(fields);
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(version: u64, tuples: &[&str]) -> Value {
        json!({
            "records": [{
                "time": "2024-03-01T10:00:00.000Z",
                "macAddress": "000D3AF87856",
                "resourceId": "/SUBSCRIPTIONS/SUB-1/RESOURCEGROUPS/RG/PROVIDERS/MICROSOFT.NETWORK/NETWORKSECURITYGROUPS/NSG",
                "properties": {
                    "Version": version,
                    "flows": [{
                        "rule": "DefaultRule_DenyAllInBound",
                        "flows": [{"mac": "000D3AF87856", "flowTuples": tuples}]
                    }]
                }
            }]
        })
    }

    #[test]
    fn test_expand_version_1() {
        let doc = document(1, &["1709287200,10.0.0.4,13.67.143.118,44931,443,T,O,A"]);
        assert!(is_flow_log(&doc));
        let events = expand(&doc);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["src_ip"], "10.0.0.4");
        assert_eq!(events[0]["dst_port"], 443);
        assert_eq!(events[0]["protocol"], "tcp");
        assert_eq!(events[0]["direction"], "outbound");
        assert_eq!(events[0]["decision"], "allow");
        assert_eq!(events[0]["event_type"], FLOW_EVENT_TYPE);
        assert!(events[0]["flow_state"].is_null());
    }

    #[test]
    fn test_expand_version_2_with_counters() {
        let doc = document(
            2,
            &[
                "1709287200,10.0.0.4,13.67.143.118,44931,443,T,O,A,B,,,,",
                "1709287260,10.0.0.4,13.67.143.118,44931,443,T,O,A,E,12,3400,10,52000",
            ],
        );
        let events = expand(&doc);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["flow_state"], "begin");
        assert!(events[0]["bytes_src"].is_null());
        assert_eq!(events[1]["flow_state"], "end");
        assert_eq!(events[1]["bytes_dst"], 52000);
    }

    #[test]
    fn test_malformed_tuples_skipped() {
        let doc = document(
            1,
            &[
                "1709287200,10.0.0.4,13.67.143.118,44931,443,X,O,A",
                "not-a-tuple",
                "1709287200,10.0.0.5,13.67.143.118,44931,53,U,I,D",
            ],
        );
        let events = expand(&doc);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["protocol"], "udp");
        assert_eq!(events[0]["decision"], "deny");
    }

    #[test]
    fn test_regular_alert_is_not_flow_log() {
        assert!(!is_flow_log(&json!({"properties": {"alertType": "x"}})));
    }
}
