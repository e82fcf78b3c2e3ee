use std::collections::BTreeMap;

use rusqlite::Connection;
use serde_json::Value;
use tracing::info;

use sti_core::{BatchImportCounts, BatchImportRequest, BatchImportResult, Record, StiError,
    StiResult};

use crate::assignments::validate_assignment_payload;
use crate::crud::create_record;
use crate::registry::{STUDY_SESSIONS, TASKS, TASK_TAG_ASSIGNMENTS};
use crate::sessions::apply_session_times;
use crate::sqlite::SqliteStore;

/// Replace a transient `taskRef` token with the durable id minted for the
/// matching task earlier in the same batch. Records carrying a plain
/// `taskId` pass through untouched.
fn resolve_task_ref(
    record: &mut Record,
    id_map: &BTreeMap<String, String>,
    kind: &str,
    index: usize,
) -> StiResult<()> {
    let Some(task_ref) = record.remove("taskRef") else {
        return Ok(());
    };
    if record.contains_key("taskId") {
        return Err(StiError::Validation(format!(
            "{kind}[{index}]: taskRef and taskId are mutually exclusive"
        )));
    }
    let token = match task_ref {
        Value::String(s) => s,
        _ => {
            return Err(StiError::Validation(format!(
                "{kind}[{index}]: taskRef must be a string"
            )))
        }
    };
    let task_id = id_map.get(&token).ok_or_else(|| {
        StiError::Validation(format!(
            "{kind}[{index}]: taskRef {token:?} matches no task clientId in this batch"
        ))
    })?;
    record.insert("taskId".to_string(), Value::String(task_id.clone()));
    Ok(())
}

fn import_tasks(
    tx: &Connection,
    tasks: &[Record],
) -> StiResult<BTreeMap<String, String>> {
    let mut id_map = BTreeMap::new();
    for (index, task) in tasks.iter().enumerate() {
        let mut payload = task.clone();
        let client_id = match payload.remove("clientId") {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            Some(Value::Null) | None => None,
            Some(_) => {
                return Err(StiError::Validation(format!(
                    "tasks[{index}]: clientId must be a non-empty string"
                )))
            }
        };
        let created = create_record(tx, &TASKS, &payload)?;
        if let Some(client_id) = client_id {
            let task_id = created
                .get("taskId")
                .and_then(Value::as_str)
                .ok_or_else(|| StiError::Internal("created task lacks taskId".into()))?;
            if id_map.insert(client_id.clone(), task_id.to_string()).is_some() {
                return Err(StiError::Validation(format!(
                    "tasks[{index}]: duplicate clientId {client_id:?} in batch"
                )));
            }
        }
    }
    Ok(id_map)
}

impl SqliteStore {
    /// Import tasks, tag assignments, and study sessions as one atomic
    /// batch. Any invalid record rolls back everything already inserted.
    pub fn import_batch(&self, request: &BatchImportRequest) -> StiResult<BatchImportResult> {
        if request.tasks.is_empty()
            && request.assignments.is_empty()
            && request.sessions.is_empty()
        {
            return Err(StiError::Validation("empty import batch".into()));
        }

        self.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StiError::Storage(e.to_string()))?;

            let id_map = import_tasks(&tx, &request.tasks)?;

            for (index, assignment) in request.assignments.iter().enumerate() {
                let mut payload = assignment.clone();
                resolve_task_ref(&mut payload, &id_map, "assignments", index)?;
                validate_assignment_payload(&payload)?;
                create_record(&tx, &TASK_TAG_ASSIGNMENTS, &payload)?;
            }

            for (index, session) in request.sessions.iter().enumerate() {
                let mut payload = session.clone();
                resolve_task_ref(&mut payload, &id_map, "sessions", index)?;
                apply_session_times(&mut payload, None)?;
                create_record(&tx, &STUDY_SESSIONS, &payload)?;
            }

            tx.commit().map_err(|e| StiError::Storage(e.to_string()))?;
            info!(
                tasks = request.tasks.len(),
                assignments = request.assignments.len(),
                sessions = request.sessions.len(),
                "batch import committed"
            );
            Ok(BatchImportResult {
                ok: true,
                created: BatchImportCounts {
                    tasks: request.tasks.len(),
                    assignments: request.assignments.len(),
                    sessions: request.sessions.len(),
                },
                task_id_map: id_map,
            })
        })
    }
}
