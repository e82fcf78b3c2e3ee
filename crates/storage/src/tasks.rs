use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;

use sti_core::{Page, Record, StiError, StiResult};

use crate::registry::{EntityDef, TASKS, TASK_PRIORITIES, TASK_STATUSES, TASK_TAGS,
    TASK_TAG_ASSIGNMENTS, TASK_TYPES, TERMS};
use crate::sqlite::SqliteStore;
use crate::util::{clamp_pagination, row_to_record};

/// Flat task listing filters, mapped from query parameters.
#[derive(Debug, Default, Clone)]
pub struct TaskFilter {
    pub q: Option<String>,
    pub status_id: Option<i64>,
    pub priority_id: Option<i64>,
    pub type_id: Option<i64>,
    pub term_id: Option<i64>,
    pub tag_id: Option<String>,
    pub due_from: Option<String>,
    pub due_to: Option<String>,
    /// Tri-state: None and Some(false) list active tasks, Some(true) lists
    /// archived ones.
    pub archived: Option<bool>,
}

/// Which related rows get joined into task responses.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IncludeSpec {
    pub lookups: bool,
    pub tags: bool,
}

impl IncludeSpec {
    /// Parse the `include` query parameter: `all`, or a comma list drawing
    /// from `lookups` and `tags`. Unknown entries are ignored.
    pub fn parse(raw: Option<&str>) -> Self {
        let mut spec = Self::default();
        let Some(raw) = raw else { return spec };
        for part in raw.split(',').map(str::trim) {
            match part {
                "all" => {
                    spec.lookups = true;
                    spec.tags = true;
                }
                "lookups" => spec.lookups = true,
                "tags" => spec.tags = true,
                _ => {}
            }
        }
        spec
    }
}

/// Allow-listed sortable fields; anything else falls back to the default.
const TASK_ORDER_FIELDS: &[(&str, &str)] = &[
    ("dueAt", "due_at"),
    ("createdAt", "created_at"),
    ("updatedAt", "updated_at"),
    ("completedAt", "completed_at"),
    ("title", "title"),
    ("estimatedMinutes", "estimated_minutes"),
    ("actualMinutes", "actual_minutes"),
];

pub(crate) fn order_clause(field: Option<&str>, dir: Option<&str>) -> String {
    let column = field
        .and_then(|f| {
            TASK_ORDER_FIELDS
                .iter()
                .find(|(name, _)| *name == f)
                .map(|(_, col)| *col)
        })
        .unwrap_or("due_at");
    let dir = match dir {
        Some(d) if d.eq_ignore_ascii_case("desc") => "DESC",
        _ => "ASC",
    };
    format!("ORDER BY {column} {dir}")
}

/// Accepts either a full RFC 3339 timestamp or a plain date (midnight UTC).
pub(crate) fn parse_query_datetime(field: &str, raw: &str) -> StiResult<String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt
            .with_timezone(&Utc)
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let dt = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| StiError::Validation(format!("invalid date in {field}: {raw}")))?;
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true));
    }
    Err(StiError::Validation(format!(
        "invalid datetime in {field}: {raw}"
    )))
}

/// Translate the flat filter into a WHERE clause plus bind parameters.
pub(crate) fn build_where(filter: &TaskFilter) -> StiResult<(String, Vec<SqlValue>)> {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();

    match filter.archived {
        Some(true) => clauses.push("archived_at IS NOT NULL".into()),
        _ => clauses.push("archived_at IS NULL".into()),
    }

    let eq = |column: &str, value: Option<i64>, params: &mut Vec<SqlValue>,
              clauses: &mut Vec<String>| {
        if let Some(v) = value {
            params.push(SqlValue::Integer(v));
            clauses.push(format!("{column} = ?{}", params.len()));
        }
    };
    eq("task_status_id", filter.status_id, &mut params, &mut clauses);
    eq("task_priority_id", filter.priority_id, &mut params, &mut clauses);
    eq("task_type_id", filter.type_id, &mut params, &mut clauses);
    eq("term_id", filter.term_id, &mut params, &mut clauses);

    if let Some(from) = &filter.due_from {
        params.push(SqlValue::Text(parse_query_datetime("dueFrom", from)?));
        clauses.push(format!("due_at >= ?{}", params.len()));
    }
    if let Some(to) = &filter.due_to {
        params.push(SqlValue::Text(parse_query_datetime("dueTo", to)?));
        clauses.push(format!("due_at <= ?{}", params.len()));
    }

    if let Some(q) = filter.q.as_deref().filter(|q| !q.trim().is_empty()) {
        params.push(SqlValue::Text(q.to_string()));
        let n = params.len();
        clauses.push(format!(
            "(lower(title) LIKE '%' || lower(?{n}) || '%' \
             OR lower(coalesce(description, '')) LIKE '%' || lower(?{n}) || '%')"
        ));
    }

    if let Some(tag) = &filter.tag_id {
        params.push(SqlValue::Text(tag.clone()));
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM task_tag_assignments a \
             WHERE a.task_id = tasks.task_id AND a.task_tag_id = ?{})",
            params.len()
        ));
    }

    Ok((format!("WHERE {}", clauses.join(" AND ")), params))
}

/// Attach a single related record under `out_field`, looked up through the
/// `fk_field` each record carries. Missing or null FKs yield a JSON null.
pub(crate) fn attach_relation(
    conn: &Connection,
    records: &mut [Record],
    fk_field: &str,
    target: &EntityDef,
    out_field: &str,
) -> StiResult<()> {
    let mut wanted: HashSet<String> = HashSet::new();
    for record in records.iter() {
        if let Some(v) = record.get(fk_field) {
            if !v.is_null() {
                wanted.insert(value_key(v));
            }
        }
    }

    let mut by_id: HashMap<String, Value> = HashMap::new();
    if !wanted.is_empty() {
        let ids: Vec<&String> = wanted.iter().collect();
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT * FROM {} WHERE {} IN ({})",
            target.table,
            target.id_column,
            placeholders.join(", ")
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StiError::Storage(e.to_string()))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt
            .query(params_from_iter(ids.iter()))
            .map_err(|e| StiError::Storage(e.to_string()))?;
        while let Some(row) = rows.next().map_err(|e| StiError::Storage(e.to_string()))? {
            let rec = row_to_record(target, &columns, row)?;
            if let Some(id) = rec.get(target.id_field) {
                by_id.insert(value_key(id), Value::Object(rec.clone()));
            }
        }
    }

    for record in records.iter_mut() {
        let related = record
            .get(fk_field)
            .filter(|v| !v.is_null())
            .and_then(|v| by_id.get(&value_key(v)).cloned())
            .unwrap_or(Value::Null);
        record.insert(out_field.to_string(), related);
    }
    Ok(())
}

fn value_key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Attach tag assignments (each nested with its tag) under
/// `taskTagAssignments`.
fn attach_tags(conn: &Connection, records: &mut [Record]) -> StiResult<()> {
    let task_ids: Vec<String> = records
        .iter()
        .filter_map(|r| r.get("taskId").and_then(Value::as_str))
        .map(str::to_string)
        .collect();

    let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();
    if !task_ids.is_empty() {
        let placeholders: Vec<String> = (1..=task_ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT * FROM task_tag_assignments WHERE task_id IN ({}) ORDER BY created_at",
            placeholders.join(", ")
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StiError::Storage(e.to_string()))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt
            .query(params_from_iter(task_ids.iter()))
            .map_err(|e| StiError::Storage(e.to_string()))?;

        let mut assignments: Vec<Record> = Vec::new();
        while let Some(row) = rows.next().map_err(|e| StiError::Storage(e.to_string()))? {
            assignments.push(row_to_record(&TASK_TAG_ASSIGNMENTS, &columns, row)?);
        }
        attach_relation(conn, &mut assignments, "taskTagId", &TASK_TAGS, "taskTag")?;

        for assignment in assignments {
            if let Some(task_id) = assignment.get("taskId").and_then(Value::as_str) {
                grouped
                    .entry(task_id.to_string())
                    .or_default()
                    .push(Value::Object(assignment.clone()));
            }
        }
    }

    for record in records.iter_mut() {
        let list = record
            .get("taskId")
            .and_then(Value::as_str)
            .and_then(|id| grouped.remove(id))
            .unwrap_or_default();
        record.insert("taskTagAssignments".to_string(), Value::Array(list));
    }
    Ok(())
}

pub(crate) fn attach_task_includes(
    conn: &Connection,
    records: &mut [Record],
    include: IncludeSpec,
) -> StiResult<()> {
    if include.lookups {
        attach_relation(conn, records, "taskStatusId", &TASK_STATUSES, "taskStatus")?;
        attach_relation(conn, records, "taskPriorityId", &TASK_PRIORITIES, "taskPriority")?;
        attach_relation(conn, records, "taskTypeId", &TASK_TYPES, "taskType")?;
        attach_relation(conn, records, "termId", &TERMS, "term")?;
    }
    if include.tags {
        attach_tags(conn, records)?;
    }
    Ok(())
}

impl SqliteStore {
    /// Filtered, paginated task listing with optional related-row includes.
    pub fn list_tasks(
        &self,
        filter: &TaskFilter,
        include: IncludeSpec,
        limit: Option<i64>,
        offset: Option<i64>,
        order_field: Option<&str>,
        order_dir: Option<&str>,
    ) -> StiResult<Page<Record>> {
        let (where_sql, mut params) = build_where(filter)?;
        let order_sql = order_clause(order_field, order_dir);
        let (take, skip) = clamp_pagination(limit, offset);

        self.with_conn(|conn| {
            let count_sql = format!("SELECT COUNT(*) FROM tasks {where_sql}");
            let total: i64 = conn
                .query_row(&count_sql, params_from_iter(params.iter()), |row| row.get(0))
                .map_err(|e| StiError::Storage(e.to_string()))?;

            let next = params.len() + 1;
            let items_sql = format!(
                "SELECT * FROM tasks {where_sql} {order_sql} LIMIT ?{next} OFFSET ?{}",
                next + 1
            );
            params.push(SqlValue::Integer(take));
            params.push(SqlValue::Integer(skip));

            let mut stmt = conn
                .prepare(&items_sql)
                .map_err(|e| StiError::Storage(e.to_string()))?;
            let columns: Vec<String> =
                stmt.column_names().iter().map(|c| c.to_string()).collect();
            let mut rows = stmt
                .query(params_from_iter(params.iter()))
                .map_err(|e| StiError::Storage(e.to_string()))?;

            let mut items = Vec::new();
            while let Some(row) = rows.next().map_err(|e| StiError::Storage(e.to_string()))? {
                items.push(row_to_record(&TASKS, &columns, row)?);
            }

            attach_task_includes(conn, &mut items, include)?;
            Ok(Page { items, total })
        })
    }

    /// Fetch one task by id with optional includes.
    pub fn get_task(&self, id: &str, include: IncludeSpec) -> StiResult<Record> {
        let id = TASKS.parse_id_str(id)?;
        self.with_conn(|conn| {
            let record = crate::crud::get_record(conn, &TASKS, &id)?
                .ok_or_else(|| StiError::NotFound(format!("tasks id={id}")))?;
            let mut records = vec![record];
            attach_task_includes(conn, &mut records, include)?;
            Ok(records.remove(0))
        })
    }
}
