//! Placeholder substitution into a parsed template skeleton.
//!
//! A string that is exactly `{{name}}` becomes the extracted value itself
//! (number, object, ...), and its key is dropped when nothing was extracted.
//! Placeholders embedded in longer text are interpolated as text.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::ocsf::extract::ExtractedValues;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("static regex"));

static WHOLE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}\s*$").expect("static regex")
});

pub fn placeholders_in(skeleton: &Value) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    collect_placeholders(skeleton, &mut found);
    found
}

fn collect_placeholders(node: &Value, found: &mut BTreeSet<String>) {
    match node {
        Value::String(s) => {
            for caps in PLACEHOLDER.captures_iter(s) {
                found.insert(caps[1].to_string());
            }
        }
        Value::Array(items) => items.iter().for_each(|i| collect_placeholders(i, found)),
        Value::Object(map) => {
            for (key, value) in map {
                for caps in PLACEHOLDER.captures_iter(key) {
                    found.insert(caps[1].to_string());
                }
                collect_placeholders(value, found);
            }
        }
        _ => {}
    }
}

/// Render the skeleton with `values`. Pure: the skeleton is not modified.
pub fn render(skeleton: &Value, values: &ExtractedValues) -> Value {
    render_node(skeleton, values).unwrap_or_else(|| Value::Object(Map::new()))
}

fn render_node(node: &Value, values: &ExtractedValues) -> Option<Value> {
    match node {
        Value::String(s) => render_string(s, values),
        Value::Array(items) => Some(Value::Array(
            items.iter().filter_map(|i| render_node(i, values)).collect(),
        )),
        Value::Object(map) => {
            let rendered: Map<String, Value> = map
                .iter()
                .filter_map(|(k, v)| {
                    render_node(v, values).map(|v| (interpolate(k, values), v))
                })
                .collect();
            // an object emptied by absent values is dropped with them
            if rendered.is_empty() && !map.is_empty() {
                None
            } else {
                Some(Value::Object(rendered))
            }
        }
        other => Some(other.clone()),
    }
}

fn render_string(s: &str, values: &ExtractedValues) -> Option<Value> {
    if let Some(caps) = WHOLE_PLACEHOLDER.captures(s) {
        return values.get(&caps[1]).cloned();
    }
    Some(Value::String(interpolate(s, values)))
}

fn interpolate(s: &str, values: &ExtractedValues) -> String {
    if !s.contains("{{") {
        return s.to_string();
    }
    PLACEHOLDER
        .replace_all(s, |caps: &Captures| match values.get(&caps[1]) {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(pairs: Value) -> ExtractedValues {
        pairs
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[test]
    fn test_whole_placeholder_keeps_type() {
        let skeleton = json!({"time": "{{time}}", "tags": "{{tags}}"});
        let out = render(&skeleton, &values(json!({"time": 1709287200000i64, "tags": ["a", "b"]})));
        assert_eq!(out, json!({"time": 1709287200000i64, "tags": ["a", "b"]}));
    }

    #[test]
    fn test_absent_values_are_dropped() {
        let skeleton = json!({
            "class_uid": 4001,
            "src_endpoint": {"ip": "{{src}}", "port": "{{sport}}"},
            "dst_endpoint": {"ip": "{{dst}}"}
        });
        let out = render(&skeleton, &values(json!({"dst": "10.0.0.9"})));
        assert_eq!(out, json!({"class_uid": 4001, "dst_endpoint": {"ip": "10.0.0.9"}}));
    }

    #[test]
    fn test_embedded_placeholders_interpolate_text() {
        let skeleton = json!({"message": "Alert {{name}} on {{host}} ({{count}})"});
        let out = render(&skeleton, &values(json!({"name": "Brute force", "count": 3})));
        assert_eq!(out, json!({"message": "Alert Brute force on  (3)"}));
    }

    #[test]
    fn test_placeholders_in() {
        let skeleton = json!({"a": "{{x}}", "b": ["{{ y }}", "lit"], "c": {"d": "pre {{z}}"}});
        let found: Vec<String> = placeholders_in(&skeleton).into_iter().collect();
        assert_eq!(found, vec!["x", "y", "z"]);
    }
}
