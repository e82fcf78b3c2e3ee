use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;

use sti_core::{
    ConflictEntry, CreateResult, DeleteResult, Page, Record, StiError, StiResult, UpdateResult,
};

use crate::registry::{EntityDef, IdKind, IdValue};
use crate::sqlite::{classify_sqlite_error, SqliteStore};
use crate::util::{camel_to_snake, clamp_pagination, json_to_sql, now_rfc3339, row_to_record};

/// Outcome of a single record inside an update batch.
pub(crate) enum UpdateOutcome {
    Updated(Record),
    NotFound(IdValue),
    Conflict(IdValue, String),
}

/// Outcome of a single record inside a delete batch.
pub(crate) enum DeleteOutcome {
    Deleted,
    NotFound,
    Blocked,
}

/// Strip read-only fields, reject unknown ones, and map the rest to
/// `(column, sql value)` pairs ready for an INSERT or UPDATE.
fn sanitize_write(def: &EntityDef, record: &Record) -> StiResult<Vec<(String, SqlValue)>> {
    let mut out = Vec::with_capacity(record.len());
    for (field, value) in record {
        if field == def.id_field || def.read_only.contains(&field.as_str()) {
            continue;
        }
        if !def.writable.contains(&field.as_str()) && !def.derived.contains(&field.as_str()) {
            return Err(StiError::Validation(format!(
                "unknown field for {}: {field}",
                def.name
            )));
        }
        out.push((camel_to_snake(field), json_to_sql(field, value)?));
    }
    Ok(out)
}

pub(crate) fn get_record(
    conn: &Connection,
    def: &EntityDef,
    id: &IdValue,
) -> StiResult<Option<Record>> {
    let sql = format!(
        "SELECT * FROM {} WHERE {} = ?1",
        def.table, def.id_column
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StiError::Storage(e.to_string()))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt
        .query([id])
        .map_err(|e| StiError::Storage(e.to_string()))?;
    match rows.next().map_err(|e| StiError::Storage(e.to_string()))? {
        Some(row) => Ok(Some(row_to_record(def, &columns, row)?)),
        None => Ok(None),
    }
}

/// Insert one sanitized record and read it back. Runs inside the caller's
/// transaction so multi-record creates stay all-or-nothing.
pub(crate) fn create_record(
    conn: &Connection,
    def: &EntityDef,
    record: &Record,
) -> StiResult<Record> {
    let mut fields = sanitize_write(def, record)?;

    let now = now_rfc3339();
    fields.push(("created_at".into(), SqlValue::Text(now.clone())));
    if def.has_updated_at {
        fields.push(("updated_at".into(), SqlValue::Text(now)));
    }

    let id = match def.id_kind {
        IdKind::Uuid => {
            let id = uuid::Uuid::new_v4().to_string();
            fields.push((def.id_column.into(), SqlValue::Text(id.clone())));
            Some(IdValue::Text(id))
        }
        IdKind::Integer => None,
    };

    let columns: Vec<&str> = fields.iter().map(|(c, _)| c.as_str()).collect();
    let placeholders: Vec<String> = (1..=fields.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        def.table,
        columns.join(", "),
        placeholders.join(", ")
    );

    conn.execute(&sql, params_from_iter(fields.iter().map(|(_, v)| v)))
        .map_err(|e| classify_sqlite_error(e, def.name))?;

    let id = id.unwrap_or_else(|| IdValue::Int(conn.last_insert_rowid()));
    get_record(conn, def, &id)?.ok_or_else(|| {
        StiError::Internal(format!("{}: created row vanished (id={id})", def.name))
    })
}

pub(crate) fn update_record(
    conn: &Connection,
    def: &EntityDef,
    record: &Record,
) -> StiResult<UpdateOutcome> {
    let raw_id = record
        .get(def.id_field)
        .ok_or_else(|| StiError::Validation(format!("missing {} in update", def.id_field)))?;
    let id = def.parse_id(raw_id)?;

    let mut fields = sanitize_write(def, record)?;
    if fields.is_empty() {
        return Err(StiError::Validation(format!(
            "no updatable fields for {} id={id}",
            def.name
        )));
    }
    if def.has_updated_at {
        fields.push(("updated_at".into(), SqlValue::Text(now_rfc3339())));
    }

    let assignments: Vec<String> = fields
        .iter()
        .enumerate()
        .map(|(i, (c, _))| format!("{c} = ?{}", i + 1))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        def.table,
        assignments.join(", "),
        def.id_column,
        fields.len() + 1
    );

    let mut params: Vec<SqlValue> = fields.into_iter().map(|(_, v)| v).collect();
    params.push(match &id {
        IdValue::Int(n) => SqlValue::Integer(*n),
        IdValue::Text(s) => SqlValue::Text(s.clone()),
    });

    match conn.execute(&sql, params_from_iter(params.iter())) {
        Ok(0) => Ok(UpdateOutcome::NotFound(id)),
        Ok(_) => {
            let updated = get_record(conn, def, &id)?.ok_or_else(|| {
                StiError::Internal(format!("{}: updated row vanished (id={id})", def.name))
            })?;
            Ok(UpdateOutcome::Updated(updated))
        }
        Err(err) => match classify_sqlite_error(err, def.name) {
            StiError::UniqueConflict(msg) | StiError::ForeignKey(msg) => {
                Ok(UpdateOutcome::Conflict(id, msg))
            }
            other => Err(other),
        },
    }
}

pub(crate) fn delete_record(
    conn: &Connection,
    def: &EntityDef,
    id: &IdValue,
) -> StiResult<DeleteOutcome> {
    let sql = format!("DELETE FROM {} WHERE {} = ?1", def.table, def.id_column);
    match conn.execute(&sql, [id]) {
        Ok(0) => Ok(DeleteOutcome::NotFound),
        Ok(_) => Ok(DeleteOutcome::Deleted),
        Err(err) => match classify_sqlite_error(err, def.name) {
            StiError::ForeignKey(_) => Ok(DeleteOutcome::Blocked),
            other => Err(other),
        },
    }
}

fn search_clause(def: &EntityDef, q: Option<&str>) -> (String, Vec<SqlValue>) {
    match q {
        Some(q) if !q.trim().is_empty() && !def.searchable.is_empty() => {
            let ors: Vec<String> = def
                .searchable
                .iter()
                .map(|col| format!("lower({col}) LIKE '%' || lower(?1) || '%'"))
                .collect();
            (
                format!("WHERE ({})", ors.join(" OR ")),
                vec![SqlValue::Text(q.to_string())],
            )
        }
        _ => (String::new(), Vec::new()),
    }
}

impl SqliteStore {
    /// List an entity with optional free-text search and pagination clamps.
    pub fn list_entity(
        &self,
        def: &EntityDef,
        q: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> StiResult<Page<Record>> {
        let (where_sql, mut params) = search_clause(def, q);
        let (take, skip) = clamp_pagination(limit, offset);

        self.with_conn(|conn| {
            let count_sql = format!("SELECT COUNT(*) FROM {} {}", def.table, where_sql);
            let total: i64 = conn
                .query_row(&count_sql, params_from_iter(params.iter()), |row| row.get(0))
                .map_err(|e| StiError::Storage(e.to_string()))?;

            let next = params.len() + 1;
            let items_sql = format!(
                "SELECT * FROM {} {} ORDER BY {} LIMIT ?{} OFFSET ?{}",
                def.table,
                where_sql,
                def.default_order,
                next,
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
                items.push(row_to_record(def, &columns, row)?);
            }
            Ok(Page { items, total })
        })
    }

    /// Fetch one record or fail with NotFound.
    pub fn get_entity(&self, def: &EntityDef, id: &IdValue) -> StiResult<Record> {
        self.with_conn(|conn| {
            get_record(conn, def, id)?
                .ok_or_else(|| StiError::NotFound(format!("{} id={id}", def.name)))
        })
    }

    /// Create one or more records inside a single transaction. Any failure
    /// (unique conflict, dangling FK, bad field) rolls back the whole batch.
    pub fn create_entities(&self, def: &EntityDef, records: &[Record]) -> StiResult<CreateResult> {
        if records.is_empty() {
            return Err(StiError::Validation("empty body".into()));
        }
        self.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StiError::Storage(e.to_string()))?;
            let mut items = Vec::with_capacity(records.len());
            for record in records {
                items.push(create_record(&tx, def, record)?);
            }
            tx.commit().map_err(|e| StiError::Storage(e.to_string()))?;
            Ok(CreateResult {
                count: items.len(),
                items,
            })
        })
    }

    /// Update records one by one, classifying each outcome independently so
    /// a bad id never blocks the rest of the batch.
    pub fn update_entities(&self, def: &EntityDef, records: &[Record]) -> StiResult<UpdateResult> {
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
                match update_record(conn, def, record)? {
                    UpdateOutcome::Updated(item) => result.items.push(item),
                    UpdateOutcome::NotFound(id) => result.not_found_ids.push(id.to_json()),
                    UpdateOutcome::Conflict(id, message) => result.conflict_ids.push(ConflictEntry {
                        id: id.to_json(),
                        message,
                    }),
                }
            }
            result.count = result.items.len();
            Ok(result)
        })
    }

    /// Delete records one by one; FK-blocked deletions are reported, not fatal.
    pub fn delete_entities(&self, def: &EntityDef, ids: &[Value]) -> StiResult<DeleteResult> {
        if ids.is_empty() {
            return Err(StiError::Validation("empty ids".into()));
        }
        let parsed: Vec<IdValue> = ids
            .iter()
            .map(|raw| def.parse_id(raw))
            .collect::<StiResult<_>>()?;

        self.with_conn(|conn| {
            let mut result = DeleteResult {
                count: 0,
                deleted_ids: Vec::new(),
                not_found_ids: Vec::new(),
                blocked_ids: Vec::new(),
            };
            for id in &parsed {
                match delete_record(conn, def, id)? {
                    DeleteOutcome::Deleted => result.deleted_ids.push(id.to_json()),
                    DeleteOutcome::NotFound => result.not_found_ids.push(id.to_json()),
                    DeleteOutcome::Blocked => result.blocked_ids.push(id.to_json()),
                }
            }
            result.count = result.deleted_ids.len();
            Ok(result)
        })
    }
}
