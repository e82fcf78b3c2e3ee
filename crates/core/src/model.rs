use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored record in wire shape: camelCase keys, server-assigned fields
/// included. Catalog and task records are registry-driven, so they travel as
/// JSON objects rather than one struct per table.
pub type Record = Map<String, Value>;

/// Paginated listing envelope shared by every list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

/// Result of a multi-record create (all-or-nothing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResult {
    pub count: usize,
    pub items: Vec<Record>,
}

/// One update that bounced off a unique or foreign-key constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub id: Value,
    pub message: String,
}

/// Result of a per-record update batch. Records that fail are classified,
/// not fatal: `count` covers successful items only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub count: usize,
    pub items: Vec<Record>,
    pub not_found_ids: Vec<Value>,
    pub conflict_ids: Vec<ConflictEntry>,
}

/// Result of a per-record delete batch. `blocked_ids` holds ids whose
/// deletion was refused by a foreign-key dependent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub count: usize,
    pub deleted_ids: Vec<Value>,
    pub not_found_ids: Vec<Value>,
    pub blocked_ids: Vec<Value>,
}

/// One row of the weekly productivity aggregate. Read-only: the application
/// never writes this table directly, only the refresh command does.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyProductivity {
    pub weekly_productivity_id: i64,
    pub iso_year: i32,
    pub iso_week: i32,
    pub tasks_created: i64,
    pub tasks_completed: i64,
    pub completion_rate: f64,
    pub planned_minutes: i64,
    pub actual_minutes: i64,
    pub avg_completion_time_min: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a weekly-productivity refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResult {
    pub ok: bool,
    pub refreshed: bool,
    pub at: DateTime<Utc>,
}

/// Batch import payload. Assignments and sessions may reference a task either
/// by durable `taskId` or by the transient `taskRef` token matching a task's
/// `clientId` within the same batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchImportRequest {
    #[serde(default)]
    pub tasks: Vec<Record>,
    #[serde(default)]
    pub assignments: Vec<Record>,
    #[serde(default)]
    pub sessions: Vec<Record>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchImportCounts {
    pub tasks: usize,
    pub assignments: usize,
    pub sessions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchImportResult {
    pub ok: bool,
    pub created: BatchImportCounts,
    /// Resolved transient token -> durable task id map.
    pub task_id_map: BTreeMap<String, String>,
}
