use serde_json::Value;

use crate::error_handling::{RelayError, RelayResult};

/// Envelope fields every mapped record must carry
pub const REQUIRED_FIELDS: [&str; 5] =
    ["class_uid", "category_name", "activity_id", "severity_id", "time"];

/// OCSF class names recognised in a template's `output_schema`
const KNOWN_CLASSES: &[(&str, u64)] = &[
    ("file_activity", 1001),
    ("process_activity", 1007),
    ("security_finding", 2001),
    ("vulnerability_finding", 2002),
    ("compliance_finding", 2003),
    ("detection_finding", 2004),
    ("account_change", 3001),
    ("authentication", 3002),
    ("authorize_session", 3003),
    ("network_activity", 4001),
    ("http_activity", 4002),
    ("dns_activity", 4003),
    ("api_activity", 6003),
];

pub fn category_for_class(class_uid: u64) -> Option<(u64, &'static str)> {
    let category = class_uid / 1000;
    let name = match category {
        1 => "System Activity",
        2 => "Findings",
        3 => "Identity & Access Management",
        4 => "Network Activity",
        5 => "Discovery",
        6 => "Application Activity",
        7 => "Remediation",
        _ => return None,
    };
    Some((category, name))
}

/// `ocsf/1.1.0/authentication` or `authentication` → 3002
pub fn expected_class_uid(output_schema: &str) -> Option<u64> {
    let class_name = output_schema
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(output_schema)
        .trim()
        .to_ascii_lowercase();
    KNOWN_CLASSES
        .iter()
        .find(|(name, _)| *name == class_name)
        .map(|(_, uid)| *uid)
}

pub fn validate_record(record: &Value, expected_class_uid: Option<u64>) -> RelayResult<()> {
    let obj = record
        .as_object()
        .ok_or_else(|| RelayError::validation("OCSF record must be a JSON object"))?;

    for field in REQUIRED_FIELDS {
        if obj.get(field).map_or(true, Value::is_null) {
            return Err(RelayError::validation_field(
                format!("OCSF record is missing required field '{}'", field),
                field,
            ));
        }
    }

    let class_uid = integer_field(record, "class_uid")?;
    let activity_id = integer_field(record, "activity_id")?;
    let severity_id = integer_field(record, "severity_id")?;
    integer_field(record, "time")?;

    if let Some(expected) = expected_class_uid {
        if class_uid != expected {
            return Err(RelayError::validation_field(
                format!("class_uid {} does not match the template's class {}", class_uid, expected),
                "class_uid",
            ));
        }
    }

    let (category_uid, category_name) = category_for_class(class_uid).ok_or_else(|| {
        RelayError::validation_field(
            format!("class_uid {} has no OCSF category", class_uid),
            "class_uid",
        )
    })?;

    let declared_name = obj.get("category_name").and_then(Value::as_str).unwrap_or_default();
    if !declared_name.eq_ignore_ascii_case(category_name) {
        return Err(RelayError::validation_field(
            format!(
                "category_name '{}' does not match class_uid {} (expected '{}')",
                declared_name, class_uid, category_name
            ),
            "category_name",
        ));
    }

    if let Some(declared_uid) = obj.get("category_uid") {
        if declared_uid.as_u64() != Some(category_uid) {
            return Err(RelayError::validation_field(
                format!("category_uid {} does not match class_uid {}", declared_uid, class_uid),
                "category_uid",
            ));
        }
    }

    if !(0..=6).contains(&severity_id) && severity_id != 99 {
        return Err(RelayError::validation_field(
            format!("severity_id {} is outside the OCSF range", severity_id),
            "severity_id",
        ));
    }

    if let Some(type_uid) = obj.get("type_uid") {
        let expected = class_uid * 100 + activity_id;
        if type_uid.as_u64() != Some(expected) {
            return Err(RelayError::validation_field(
                format!("type_uid {} should be {}", type_uid, expected),
                "type_uid",
            ));
        }
    }

    Ok(())
}

fn integer_field(record: &Value, field: &str) -> RelayResult<u64> {
    record.get(field).and_then(Value::as_u64).ok_or_else(|| {
        RelayError::validation_field(
            format!("OCSF field '{}' must be a non-negative integer", field),
            field,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn auth_record() -> Value {
        json!({
            "class_uid": 3002,
            "category_uid": 3,
            "category_name": "Identity & Access Management",
            "activity_id": 1,
            "type_uid": 300201,
            "severity_id": 1,
            "time": 1709287200000i64
        })
    }

    #[test]
    fn test_valid_authentication_record() {
        validate_record(&auth_record(), Some(3002)).unwrap();
    }

    #[test]
    fn test_missing_required_field() {
        let mut record = auth_record();
        record.as_object_mut().unwrap().remove("time");
        let err = validate_record(&record, None).unwrap_err();
        assert!(matches!(err, RelayError::Validation { field: Some(ref f), .. } if f == "time"));
    }

    #[test]
    fn test_class_mismatch() {
        let err = validate_record(&auth_record(), Some(4001)).unwrap_err();
        assert!(err.to_string().contains("class_uid"));
    }

    #[test]
    fn test_category_name_mismatch() {
        let mut record = auth_record();
        record["category_name"] = json!("Findings");
        assert!(validate_record(&record, None).is_err());
    }

    #[test]
    fn test_type_uid_mismatch() {
        let mut record = auth_record();
        record["type_uid"] = json!(300202);
        assert!(validate_record(&record, None).is_err());
    }

    #[test]
    fn test_expected_class_from_schema() {
        assert_eq!(expected_class_uid("ocsf/1.1.0/authentication"), Some(3002));
        assert_eq!(expected_class_uid("ocsf:network_activity"), Some(4001));
        assert_eq!(expected_class_uid("Detection_Finding"), Some(2004));
        assert_eq!(expected_class_uid("custom"), None);
    }
}
