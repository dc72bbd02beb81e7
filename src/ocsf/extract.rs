//! Extractor evaluation
//!
//! Paths are dotted segments with optional `[index]` suffixes, evaluated
//! against the serialized normalized event: `event_data.entities[0].address`.
//! `a.b || c.d` tries alternatives left to right. A path that does not
//! resolve yields nothing; it is never an error on its own.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error_handling::{RelayError, RelayResult};
use crate::normalizer::epoch_millis;
use crate::ocsf::template::{CompiledTemplate, Transform};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// One or more alternative paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    alternatives: Vec<Vec<Segment>>,
}

impl PathExpr {
    pub fn parse(expr: &str) -> Result<Self, String> {
        let mut alternatives = Vec::new();
        for alt in expr.split("||") {
            let alt = alt.trim();
            if alt.is_empty() {
                return Err(format!("empty path in '{}'", expr));
            }
            alternatives.push(parse_path(alt)?);
        }
        Ok(Self { alternatives })
    }

    /// First alternative resolving to a non-null value
    pub fn evaluate<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.alternatives
            .iter()
            .find_map(|segments| resolve(root, segments).filter(|v| !v.is_null()))
    }
}

fn parse_path(path: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        let (key, mut rest) = match part.find('[') {
            Some(idx) => (&part[..idx], &part[idx..]),
            None => (part, ""),
        };
        if key.is_empty() && rest.is_empty() {
            return Err(format!("empty segment in '{}'", path));
        }
        if !key.is_empty() {
            segments.push(Segment::Key(key.to_string()));
        }
        while !rest.is_empty() {
            let close = rest
                .find(']')
                .ok_or_else(|| format!("unclosed index in '{}'", path))?;
            let index = rest[1..close]
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid index '{}' in '{}'", &rest[1..close], path))?;
            segments.push(Segment::Index(index));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(format!("unexpected '{}' in '{}'", rest, path));
            }
        }
    }
    Ok(segments)
}

fn resolve<'a>(root: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |current, segment| match segment {
        Segment::Key(key) => current.get(key.as_str()),
        Segment::Index(index) => current.get(*index),
    })
}

/// Values extracted for one event; absent extractors are not in the map
pub type ExtractedValues = BTreeMap<String, Value>;

pub fn extract_values(template: &CompiledTemplate, event: &Value) -> RelayResult<ExtractedValues> {
    let mut values = ExtractedValues::new();

    for extractor in &template.extractors {
        let found = extractor
            .expr
            .evaluate(event)
            .cloned()
            .and_then(|v| match extractor.transform {
                Some(transform) => apply_transform(transform, v),
                None => Some(v),
            })
            .or_else(|| extractor.default.clone());

        match found {
            Some(value) => {
                values.insert(extractor.name.clone(), value);
            }
            None if extractor.required => {
                return Err(RelayError::validation_field(
                    format!(
                        "template '{}' requires '{}' but the event has no value for it",
                        template.name(),
                        extractor.name
                    ),
                    extractor.name.clone(),
                ));
            }
            None => {}
        }
    }

    Ok(values)
}

pub fn apply_transform(transform: Transform, value: Value) -> Option<Value> {
    match transform {
        Transform::Lower => Some(match value {
            Value::String(s) => Value::String(s.to_lowercase()),
            other => other,
        }),
        Transform::Upper => Some(match value {
            Value::String(s) => Value::String(s.to_uppercase()),
            other => other,
        }),
        Transform::String => Some(match value {
            Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
        }),
        Transform::Int => to_i64(&value).map(Value::from),
        Transform::EpochMs => to_epoch_ms(&value).map(Value::from),
        Transform::SeverityId => Some(Value::from(severity_id(&value))),
    }
}

fn to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// RFC 3339 text, epoch seconds or epoch milliseconds to epoch milliseconds.
/// Numbers outside the representable date range yield nothing.
fn to_epoch_ms(value: &Value) -> Option<i64> {
    let millis = match value {
        Value::Number(_) => to_i64(value).and_then(epoch_millis),
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.timestamp_millis())
            .ok()
            .or_else(|| to_i64(value).and_then(epoch_millis)),
        _ => None,
    }?;
    DateTime::<Utc>::from_timestamp_millis(millis).map(|_| millis)
}

/// Provider severity words to OCSF `severity_id`
pub fn severity_id(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "" | "unknown" | "severity_unspecified" => 0,
            "informational" | "info" | "information" => 1,
            "low" => 2,
            "medium" | "moderate" => 3,
            "high" => 4,
            "critical" => 5,
            "fatal" => 6,
            _ => 99,
        },
        _ => 0,
    }
}
