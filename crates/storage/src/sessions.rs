use chrono::{DateTime, Utc};
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use sti_core::{ConflictEntry, CreateResult, Page, Record, StiError, StiResult, UpdateResult};

use crate::crud::{create_record, get_record, update_record, UpdateOutcome};
use crate::registry::{STUDY_SESSIONS, TASKS};
use crate::sqlite::SqliteStore;
use crate::tasks::{attach_relation, parse_query_datetime};
use crate::util::{clamp_pagination, parse_datetime, row_to_record};

/// Flat study session listing filters.
#[derive(Debug, Default, Clone)]
pub struct SessionFilter {
    pub task_id: Option<String>,
    pub started_from: Option<String>,
    pub started_to: Option<String>,
    pub ended_from: Option<String>,
    pub ended_to: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionInclude {
    pub task: bool,
}

impl SessionInclude {
    pub fn parse(raw: Option<&str>) -> Self {
        let task = raw
            .map(|r| {
                r.split(',')
                    .map(str::trim)
                    .any(|p| p == "task" || p == "all")
            })
            .unwrap_or(false);
        Self { task }
    }
}

fn time_field(
    payload: &Record,
    existing: Option<&Record>,
    field: &str,
) -> StiResult<(Option<DateTime<Utc>>, bool)> {
    if let Some(value) = payload.get(field) {
        return match value {
            Value::Null => Ok((None, true)),
            Value::String(s) => Ok((Some(parse_datetime(field, s)?), true)),
            _ => Err(StiError::Validation(format!(
                "{field} must be an RFC 3339 string or null"
            ))),
        };
    }
    let stored = existing
        .and_then(|r| r.get(field))
        .and_then(Value::as_str)
        .map(|s| parse_datetime(field, s))
        .transpose()?;
    Ok((stored, false))
}

/// Enforce the session time contract and inject the derived duration.
///
/// The client-supplied `durationMinutes` is always discarded. Whenever the
/// payload touches either bound, both are revalidated against the stored
/// record and the duration is recomputed (null while the session is open).
pub(crate) fn apply_session_times(
    payload: &mut Record,
    existing: Option<&Record>,
) -> StiResult<()> {
    payload.remove("durationMinutes");

    let (started, touched_start) = time_field(payload, existing, "startedAt")?;
    let (ended, touched_end) = time_field(payload, existing, "endedAt")?;

    if existing.is_some() && !touched_start && !touched_end {
        return Ok(());
    }

    let Some(started) = started else {
        return Err(StiError::Validation("startedAt is required".into()));
    };

    let duration = match ended {
        Some(ended) => {
            if ended < started {
                return Err(StiError::Validation(
                    "endedAt must not be earlier than startedAt".into(),
                ));
            }
            let minutes = (ended - started).num_seconds() as f64 / 60.0;
            Value::from(minutes.round() as i64)
        }
        None => Value::Null,
    };
    payload.insert("durationMinutes".to_string(), duration);
    Ok(())
}

impl SqliteStore {
    pub fn list_sessions(
        &self,
        filter: &SessionFilter,
        include: SessionInclude,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> StiResult<Page<Record>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();

        if let Some(task_id) = &filter.task_id {
            params.push(SqlValue::Text(task_id.clone()));
            clauses.push(format!("task_id = ?{}", params.len()));
        }
        let ranges = [
            ("started_at >=", "startedFrom", &filter.started_from),
            ("started_at <=", "startedTo", &filter.started_to),
            ("ended_at >=", "endedFrom", &filter.ended_from),
            ("ended_at <=", "endedTo", &filter.ended_to),
        ];
        for (cmp, field, raw) in ranges {
            if let Some(raw) = raw {
                params.push(SqlValue::Text(parse_query_datetime(field, raw)?));
                clauses.push(format!("{cmp} ?{}", params.len()));
            }
        }
        if let Some(q) = filter.q.as_deref().filter(|q| !q.trim().is_empty()) {
            params.push(SqlValue::Text(q.to_string()));
            clauses.push(format!(
                "lower(coalesce(notes, '')) LIKE '%' || lower(?{}) || '%'",
                params.len()
            ));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let (take, skip) = clamp_pagination(limit, offset);

        self.with_conn(|conn| {
            let count_sql = format!("SELECT COUNT(*) FROM study_sessions {where_sql}");
            let total: i64 = conn
                .query_row(&count_sql, params_from_iter(params.iter()), |row| row.get(0))
                .map_err(|e| StiError::Storage(e.to_string()))?;

            let next = params.len() + 1;
            let items_sql = format!(
                "SELECT * FROM study_sessions {where_sql} \
                 ORDER BY started_at ASC LIMIT ?{next} OFFSET ?{}",
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
                items.push(row_to_record(&STUDY_SESSIONS, &columns, row)?);
            }

            if include.task {
                attach_relation(conn, &mut items, "taskId", &TASKS, "task")?;
            }
            Ok(Page { items, total })
        })
    }

    pub fn get_session(&self, id: &str, include: SessionInclude) -> StiResult<Record> {
        let id = STUDY_SESSIONS.parse_id_str(id)?;
        self.with_conn(|conn| {
            let record = get_record(conn, &STUDY_SESSIONS, &id)?
                .ok_or_else(|| StiError::NotFound(format!("study-sessions id={id}")))?;
            let mut records = vec![record];
            if include.task {
                attach_relation(conn, &mut records, "taskId", &TASKS, "task")?;
            }
            Ok(records.remove(0))
        })
    }

    /// Create sessions in one transaction, computing each duration server
    /// side. Any invalid payload rolls back the whole batch.
    pub fn create_sessions(&self, records: &[Record]) -> StiResult<CreateResult> {
        if records.is_empty() {
            return Err(StiError::Validation("empty body".into()));
        }
        self.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StiError::Storage(e.to_string()))?;
            let mut items = Vec::with_capacity(records.len());
            for record in records {
                let mut payload = record.clone();
                apply_session_times(&mut payload, None)?;
                items.push(create_record(&tx, &STUDY_SESSIONS, &payload)?);
            }
            tx.commit().map_err(|e| StiError::Storage(e.to_string()))?;
            Ok(CreateResult {
                count: items.len(),
                items,
            })
        })
    }

    /// Update sessions one by one. Partial time updates are validated
    /// against the stored counterpart before the duration is recomputed.
    pub fn update_sessions(&self, records: &[Record]) -> StiResult<UpdateResult> {
        if records.is_empty() {
            return Err(StiError::Validation("empty body".into()));
        }
        self.with_conn(|conn| {
            let mut result = UpdateResult {
                count: 0,
                items: Vec::new(),
                not_found_ids: Vec::new(),
                conflict_ids: Vec::new(),
            };
            for record in records {
                let raw_id = record.get(STUDY_SESSIONS.id_field).ok_or_else(|| {
                    StiError::Validation(format!(
                        "missing {} in update",
                        STUDY_SESSIONS.id_field
                    ))
                })?;
                let id = STUDY_SESSIONS.parse_id(raw_id)?;
                let Some(existing) = get_record(conn, &STUDY_SESSIONS, &id)? else {
                    result.not_found_ids.push(id.to_json());
                    continue;
                };

                let mut payload = record.clone();
                apply_session_times(&mut payload, Some(&existing))?;
                match update_record(conn, &STUDY_SESSIONS, &payload)? {
                    UpdateOutcome::Updated(item) => result.items.push(item),
                    UpdateOutcome::NotFound(id) => result.not_found_ids.push(id.to_json()),
                    UpdateOutcome::Conflict(id, message) => {
                        result.conflict_ids.push(ConflictEntry {
                            id: id.to_json(),
                            message,
                        })
                    }
                }
            }
            result.count = result.items.len();
            Ok(result)
        })
    }
}
