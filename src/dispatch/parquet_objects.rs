//! Security Lake Parquet output
//!
//! OCSF records are flattened into one column per leaf, grouped by
//! `(account, event day)` and written as Parquet objects under
//! `<prefix>/accountid=<id>/eventday=YYYYMMDD/<uuid>.parquet`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use parquet::basic::{LogicalType, Repetition, Type as PhysicalType};
use parquet::data_type::{BoolType, ByteArray, ByteArrayType, DoubleType, Int64Type};
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::{Type, TypePtr};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error_handling::{RelayError, RelayResult};
use crate::ocsf::OcsfRecord;

/// One flattened record, column name to scalar value
pub type Row = BTreeMap<String, Value>;

impl From<ParquetError> for RelayError {
    fn from(e: ParquetError) -> Self {
        RelayError::encoding(format!("parquet: {}", e))
    }
}

/// Characters outside `[A-Za-z0-9_]` become `_`; leading and trailing `_` are trimmed
pub fn sanitize_key(key: &str) -> String {
    let replaced: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    replaced.trim_matches('_').to_string()
}

pub fn flatten(value: &Value) -> Row {
    let mut row = Row::new();
    flatten_into(value, "", &mut row);
    row
}

fn join_key(prefix: &str, key: &str) -> String {
    match (prefix.is_empty(), key.is_empty()) {
        (true, _) => key.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{}_{}", prefix, key),
    }
}

fn flatten_into(value: &Value, prefix: &str, row: &mut Row) {
    match value {
        Value::Null => {}
        Value::String(s) if s.is_empty() => {}
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(child, &join_key(prefix, &sanitize_key(key)), row);
            }
        }
        Value::Array(items) => {
            let present: Vec<&Value> = items
                .iter()
                .filter(|v| !v.is_null() && v.as_str() != Some(""))
                .collect();
            if present.is_empty() {
                return;
            }
            if present.iter().all(|v| v.is_string()) {
                let joined = present
                    .iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                insert_leaf(prefix, Value::String(joined), row);
            } else {
                for (index, item) in items.iter().enumerate() {
                    flatten_into(item, &join_key(prefix, &index.to_string()), row);
                }
            }
        }
        scalar => insert_leaf(prefix, scalar.clone(), row),
    }
}

/// Distinct source keys can sanitize or join to the same column name; later
/// ones get the first free `_<n>` suffix instead of replacing the earlier value
fn insert_leaf(key: &str, value: Value, row: &mut Row) {
    let key = if key.is_empty() { "value" } else { key };
    if !row.contains_key(key) {
        row.insert(key.to_string(), value);
        return;
    }
    let column = (1..)
        .map(|n| format!("{}_{}", key, n))
        .find(|candidate| !row.contains_key(candidate))
        .unwrap_or_else(|| key.to_string());
    warn!(column = key, renamed = %column, "flattened column name collision");
    row.insert(column, value);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Boolean,
    Int64,
    Double,
    Utf8,
}

/// Narrowest type holding every non-null value of the column
pub fn infer_kind<'a, I>(values: I) -> ColumnKind
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut all_bool = true;
    let mut all_int = true;
    let mut all_number = true;
    for value in values {
        all_bool &= value.is_boolean();
        all_int &= value.is_i64();
        all_number &= value.is_number();
    }
    match (all_bool, all_int, all_number) {
        (true, _, _) => ColumnKind::Boolean,
        (_, true, _) => ColumnKind::Int64,
        (_, _, true) => ColumnKind::Double,
        _ => ColumnKind::Utf8,
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn column_type(name: &str, kind: ColumnKind) -> RelayResult<TypePtr> {
    let builder = match kind {
        ColumnKind::Boolean => Type::primitive_type_builder(name, PhysicalType::BOOLEAN),
        ColumnKind::Int64 => Type::primitive_type_builder(name, PhysicalType::INT64),
        ColumnKind::Double => Type::primitive_type_builder(name, PhysicalType::DOUBLE),
        ColumnKind::Utf8 => Type::primitive_type_builder(name, PhysicalType::BYTE_ARRAY)
            .with_logical_type(Some(LogicalType::String)),
    };
    Ok(Arc::new(builder.with_repetition(Repetition::OPTIONAL).build()?))
}

/// Encode rows as a single row-group Parquet file
pub fn encode_rows(rows: &[Row]) -> RelayResult<Vec<u8>> {
    if rows.is_empty() {
        return Err(RelayError::internal("cannot write a Parquet file without rows"));
    }

    let columns: BTreeSet<&str> = rows.iter().flat_map(|r| r.keys().map(String::as_str)).collect();
    let kinds: Vec<(&str, ColumnKind)> = columns
        .iter()
        .map(|name| (*name, infer_kind(rows.iter().filter_map(|r| r.get(*name)))))
        .collect();

    let fields = kinds
        .iter()
        .map(|(name, kind)| column_type(name, *kind))
        .collect::<RelayResult<Vec<_>>>()?;
    let schema = Arc::new(Type::group_type_builder("schema").with_fields(fields).build()?);
    let properties = Arc::new(WriterProperties::builder().build());

    let mut buffer = Vec::new();
    let mut writer = SerializedFileWriter::new(&mut buffer, schema, properties)?;
    let mut row_group = writer.next_row_group()?;

    for (name, kind) in &kinds {
        let cells: Vec<Option<&Value>> = rows.iter().map(|r| r.get(*name)).collect();
        let def_levels: Vec<i16> = cells.iter().map(|c| i16::from(c.is_some())).collect();
        let present = cells.iter().flatten();

        let mut column = row_group
            .next_column()?
            .ok_or_else(|| RelayError::encoding(format!("no column writer for '{}'", name)))?;
        match kind {
            ColumnKind::Boolean => {
                let values: Vec<bool> = present.filter_map(|v| v.as_bool()).collect();
                column.typed::<BoolType>().write_batch(&values, Some(&def_levels), None)?;
            }
            ColumnKind::Int64 => {
                let values: Vec<i64> = present.filter_map(|v| v.as_i64()).collect();
                column.typed::<Int64Type>().write_batch(&values, Some(&def_levels), None)?;
            }
            ColumnKind::Double => {
                let values: Vec<f64> = present.filter_map(|v| v.as_f64()).collect();
                column.typed::<DoubleType>().write_batch(&values, Some(&def_levels), None)?;
            }
            ColumnKind::Utf8 => {
                let values: Vec<ByteArray> = present
                    .map(|v| ByteArray::from(text_of(v).into_bytes()))
                    .collect();
                column.typed::<ByteArrayType>().write_batch(&values, Some(&def_levels), None)?;
            }
        }
        column.close()?;
    }

    row_group.close()?;
    writer.close()?;
    debug!(
        rows = rows.len(),
        columns = kinds.len(),
        bytes = buffer.len(),
        "encoded parquet object"
    );
    Ok(buffer)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    pub account_id: String,
    /// `YYYYMMDD`
    pub event_day: String,
}

impl PartitionKey {
    pub fn for_record(record: &OcsfRecord, account_id_path: &str, default_account: &str) -> Self {
        let account_id = record
            .get(account_id_path)
            .map(text_of)
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| default_account.to_string());
        let event_day = Utc
            .timestamp_millis_opt(record.time_ms())
            .single()
            .unwrap_or_else(Utc::now)
            .format("%Y%m%d")
            .to_string();
        Self { account_id, event_day }
    }

    pub fn object_key(&self, prefix: &str) -> String {
        let file = format!(
            "accountid={}/eventday={}/{}.parquet",
            self.account_id,
            self.event_day,
            Uuid::new_v4()
        );
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            file
        } else {
            format!("{}/{}", prefix, file)
        }
    }
}

/// One object to write, with the caller's tags for the rows it holds
#[derive(Debug, Clone)]
pub struct ObjectPlan<T> {
    pub key: String,
    pub partition: PartitionKey,
    pub rows: Vec<Row>,
    pub tags: Vec<T>,
}

/// Group records by partition and split each group into files of at most `max_rows` rows
pub fn plan_objects<T>(
    records: Vec<(T, OcsfRecord)>,
    prefix: &str,
    account_id_path: &str,
    default_account: &str,
    max_rows: usize,
) -> Vec<ObjectPlan<T>> {
    let max_rows = max_rows.max(1);
    let mut groups: BTreeMap<PartitionKey, Vec<(T, Row)>> = BTreeMap::new();
    for (tag, record) in records {
        let partition = PartitionKey::for_record(&record, account_id_path, default_account);
        groups
            .entry(partition)
            .or_default()
            .push((tag, flatten(record.as_value())));
    }

    let mut plans = Vec::new();
    for (partition, members) in groups {
        let mut members = members.into_iter().peekable();
        while members.peek().is_some() {
            let (tags, rows): (Vec<T>, Vec<Row>) = members.by_ref().take(max_rows).unzip();
            plans.push(ObjectPlan {
                key: partition.object_key(prefix),
                partition: partition.clone(),
                rows,
                tags,
            });
        }
    }
    plans
}
