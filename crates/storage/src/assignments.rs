use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use sti_core::{Page, Record, StiError, StiResult};

use crate::registry::{TASKS, TASK_TAGS, TASK_TAG_ASSIGNMENTS};
use crate::sqlite::SqliteStore;
use crate::tasks::attach_relation;
use crate::util::{clamp_pagination, row_to_record};

/// Filters for the tag assignment listing.
#[derive(Debug, Default, Clone)]
pub struct AssignmentFilter {
    pub task_id: Option<String>,
    pub tag_id: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentInclude {
    pub task: bool,
    pub tag: bool,
}

impl AssignmentInclude {
    pub fn parse(raw: Option<&str>) -> Self {
        let mut spec = Self::default();
        let Some(raw) = raw else { return spec };
        for part in raw.split(',').map(str::trim) {
            match part {
                "all" => {
                    spec.task = true;
                    spec.tag = true;
                }
                "task" => spec.task = true,
                "tag" => spec.tag = true,
                _ => {}
            }
        }
        spec
    }
}

impl SqliteStore {
    pub fn list_assignments(
        &self,
        filter: &AssignmentFilter,
        include: AssignmentInclude,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> StiResult<Page<Record>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();
        if let Some(task_id) = &filter.task_id {
            params.push(SqlValue::Text(task_id.clone()));
            clauses.push(format!("task_id = ?{}", params.len()));
        }
        if let Some(tag_id) = &filter.tag_id {
            params.push(SqlValue::Text(tag_id.clone()));
            clauses.push(format!("task_tag_id = ?{}", params.len()));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let (take, skip) = clamp_pagination(limit, offset);

        self.with_conn(|conn| {
            let count_sql = format!("SELECT COUNT(*) FROM task_tag_assignments {where_sql}");
            let total: i64 = conn
                .query_row(&count_sql, params_from_iter(params.iter()), |row| row.get(0))
                .map_err(|e| StiError::Storage(e.to_string()))?;

            let next = params.len() + 1;
            let items_sql = format!(
                "SELECT * FROM task_tag_assignments {where_sql} \
                 ORDER BY created_at ASC LIMIT ?{next} OFFSET ?{}",
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
                items.push(row_to_record(&TASK_TAG_ASSIGNMENTS, &columns, row)?);
            }

            if include.task {
                attach_relation(conn, &mut items, "taskId", &TASKS, "task")?;
            }
            if include.tag {
                attach_relation(conn, &mut items, "taskTagId", &TASK_TAGS, "taskTag")?;
            }
            Ok(Page { items, total })
        })
    }

    pub fn get_assignment(&self, id: &str, include: AssignmentInclude) -> StiResult<Record> {
        let id = TASK_TAG_ASSIGNMENTS.parse_id_str(id)?;
        self.with_conn(|conn| {
            let record = crate::crud::get_record(conn, &TASK_TAG_ASSIGNMENTS, &id)?
                .ok_or_else(|| {
                    StiError::NotFound(format!("task_tag_assignments id={id}"))
                })?;
            let mut records = vec![record];
            if include.task {
                attach_relation(conn, &mut records, "taskId", &TASKS, "task")?;
            }
            if include.tag {
                attach_relation(conn, &mut records, "taskTagId", &TASK_TAGS, "taskTag")?;
            }
            Ok(records.remove(0))
        })
    }
}

/// Both FKs must be present on create; the generic layer handles the rest.
pub fn validate_assignment_payload(record: &Record) -> StiResult<()> {
    for field in ["taskId", "taskTagId"] {
        match record.get(field) {
            Some(Value::String(s)) if !s.is_empty() => {}
            _ => {
                return Err(StiError::Validation(format!(
                    "{field} is required and must be a non-empty string"
                )))
            }
        }
    }
    Ok(())
}
