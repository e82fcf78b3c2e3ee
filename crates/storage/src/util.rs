use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Row;
use serde_json::{Map, Value};

use sti_core::{Record, StiError, StiResult};

use crate::registry::EntityDef;

/// Page size clamps shared by every list operation.
pub const MAX_PAGE_SIZE: i64 = 200;
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Normalize limit/offset into (LIMIT, OFFSET) within the service clamps.
pub fn clamp_pagination(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let take = match limit {
        Some(l) if l > 0 && l <= MAX_PAGE_SIZE => l,
        _ => DEFAULT_PAGE_SIZE,
    };
    let skip = match offset {
        Some(o) if o >= 0 => o,
        _ => 0,
    };
    (take, skip)
}

/// Current time in the canonical storage format.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `taskStatusId` -> `task_status_id`.
pub fn camel_to_snake(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 4);
    for ch in field.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// `task_status_id` -> `taskStatusId`.
pub fn snake_to_camel(column: &str) -> String {
    let mut out = String::with_capacity(column.len());
    let mut upper_next = false;
    for ch in column.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Convert a JSON scalar into an owned SQL value. Arrays and objects are not
/// storable and come back as a validation error naming the field.
pub fn json_to_sql(field: &str, value: &Value) -> StiResult<SqlValue> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SqlValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(SqlValue::Real(f))
            } else {
                Err(StiError::Validation(format!("invalid number for {field}")))
            }
        }
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        _ => Err(StiError::Validation(format!(
            "field {field} must be a scalar value"
        ))),
    }
}

fn sql_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(_) => Value::Null,
    }
}

/// Materialize a `SELECT *` row into the canonical wire shape: camelCase
/// keys, declared boolean fields converted from their 0/1 storage form.
pub fn row_to_record(def: &EntityDef, column_names: &[String], row: &Row<'_>) -> StiResult<Record> {
    let mut out = Map::with_capacity(column_names.len());
    for (idx, col) in column_names.iter().enumerate() {
        let raw = row
            .get_ref(idx)
            .map_err(|e| StiError::Storage(e.to_string()))?;
        let field = snake_to_camel(col);
        let mut value = sql_ref_to_json(raw);
        if def.bool_fields.contains(&field.as_str()) {
            if let Some(n) = value.as_i64() {
                value = Value::Bool(n != 0);
            }
        }
        out.insert(field, value);
    }
    Ok(out)
}

/// Parse a stored RFC 3339 timestamp.
pub fn parse_datetime(field: &str, raw: &str) -> StiResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StiError::Validation(format!("invalid timestamp in {field}: {raw}")))
}
