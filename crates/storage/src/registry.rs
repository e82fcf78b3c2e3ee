use std::fmt;

use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue};
use serde_json::Value;

use sti_core::{StiError, StiResult};

/// How an entity's primary key is generated and parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    /// AUTOINCREMENT integer, assigned by the database.
    Integer,
    /// UUID v4 string, assigned by the service on create.
    Uuid,
}

/// Static definition of one storable entity: where it lives, how it is
/// identified, which fields callers may write, and how listings behave.
/// Field names are the camelCase wire names; column lists are snake_case.
pub struct EntityDef {
    pub name: &'static str,
    pub table: &'static str,
    pub id_column: &'static str,
    pub id_field: &'static str,
    pub id_kind: IdKind,
    /// Default ORDER BY clause body, e.g. `"name ASC"`.
    pub default_order: &'static str,
    /// Columns the free-text `q` filter ORs across.
    pub searchable: &'static [&'static str],
    /// Fields accepted from client payloads.
    pub writable: &'static [&'static str],
    /// Server-computed fields the generic layer may write but clients may not.
    pub derived: &'static [&'static str],
    /// Fields stripped from incoming payloads before any write.
    pub read_only: &'static [&'static str],
    /// Fields stored as 0/1 integers but exposed as JSON booleans.
    pub bool_fields: &'static [&'static str],
    /// Whether the table carries an `updated_at` column maintained on update.
    pub has_updated_at: bool,
}

pub const TERMS: EntityDef = EntityDef {
    name: "terms",
    table: "terms",
    id_column: "term_id",
    id_field: "termId",
    id_kind: IdKind::Integer,
    default_order: "name ASC",
    searchable: &["name"],
    writable: &["name", "startsOn", "endsOn"],
    derived: &[],
    read_only: &["termId", "createdAt", "updatedAt"],
    bool_fields: &[],
    has_updated_at: true,
};

pub const TASK_STATUSES: EntityDef = EntityDef {
    name: "task-statuses",
    table: "task_statuses",
    id_column: "task_status_id",
    id_field: "taskStatusId",
    id_kind: IdKind::Integer,
    default_order: "code ASC",
    searchable: &["code", "description"],
    writable: &["code", "description", "isFinal"],
    derived: &[],
    read_only: &["taskStatusId", "createdAt"],
    bool_fields: &["isFinal"],
    has_updated_at: false,
};

pub const TASK_PRIORITIES: EntityDef = EntityDef {
    name: "task-priorities",
    table: "task_priorities",
    id_column: "task_priority_id",
    id_field: "taskPriorityId",
    id_kind: IdKind::Integer,
    // Lower weight means higher priority, so ascending puts urgent first.
    default_order: "weight ASC",
    searchable: &["code"],
    writable: &["code", "weight"],
    derived: &[],
    read_only: &["taskPriorityId", "createdAt"],
    bool_fields: &[],
    has_updated_at: false,
};

pub const TASK_TYPES: EntityDef = EntityDef {
    name: "task-types",
    table: "task_types",
    id_column: "task_type_id",
    id_field: "taskTypeId",
    id_kind: IdKind::Integer,
    default_order: "code ASC",
    searchable: &["code", "description"],
    writable: &["code", "description"],
    derived: &[],
    read_only: &["taskTypeId", "createdAt"],
    bool_fields: &[],
    has_updated_at: false,
};

pub const TASK_TAGS: EntityDef = EntityDef {
    name: "task-tags",
    table: "task_tags",
    id_column: "task_tag_id",
    id_field: "taskTagId",
    id_kind: IdKind::Uuid,
    default_order: "name ASC",
    searchable: &["name", "color"],
    writable: &["name", "color"],
    derived: &[],
    read_only: &["taskTagId", "createdAt"],
    bool_fields: &[],
    has_updated_at: false,
};

pub const TASKS: EntityDef = EntityDef {
    name: "tasks",
    table: "tasks",
    id_column: "task_id",
    id_field: "taskId",
    id_kind: IdKind::Uuid,
    default_order: "due_at ASC",
    searchable: &["title", "description"],
    writable: &[
        "title",
        "description",
        "taskStatusId",
        "taskPriorityId",
        "taskTypeId",
        "termId",
        "dueAt",
        "estimatedMinutes",
        "actualMinutes",
        "completedAt",
        "archivedAt",
    ],
    derived: &[],
    read_only: &["taskId", "createdAt", "updatedAt"],
    bool_fields: &[],
    has_updated_at: true,
};

pub const TASK_TAG_ASSIGNMENTS: EntityDef = EntityDef {
    name: "task-tag-assignments",
    table: "task_tag_assignments",
    id_column: "task_tag_assignment_id",
    id_field: "taskTagAssignmentId",
    id_kind: IdKind::Uuid,
    default_order: "created_at ASC",
    searchable: &[],
    writable: &["taskId", "taskTagId"],
    derived: &[],
    read_only: &["taskTagAssignmentId", "createdAt"],
    bool_fields: &[],
    has_updated_at: false,
};

pub const STUDY_SESSIONS: EntityDef = EntityDef {
    name: "study-sessions",
    table: "study_sessions",
    id_column: "study_session_id",
    id_field: "studySessionId",
    id_kind: IdKind::Uuid,
    default_order: "started_at ASC",
    searchable: &["notes"],
    writable: &["taskId", "startedAt", "endedAt", "notes"],
    derived: &["durationMinutes"],
    read_only: &["studySessionId", "createdAt"],
    bool_fields: &[],
    has_updated_at: false,
};

/// Catalogs addressable through `/api/catalogs/:entity`.
pub const CATALOGS: &[&EntityDef] = &[
    &TERMS,
    &TASK_STATUSES,
    &TASK_PRIORITIES,
    &TASK_TYPES,
    &TASK_TAGS,
];

/// Look up a catalog definition by its route name.
pub fn catalog(name: &str) -> StiResult<&'static EntityDef> {
    CATALOGS
        .iter()
        .find(|def| def.name == name)
        .copied()
        .ok_or_else(|| StiError::Validation(format!("unsupported catalog: {name}")))
}

/// A parsed entity id, typed according to the entity's `IdKind`.
#[derive(Debug, Clone, PartialEq)]
pub enum IdValue {
    Int(i64),
    Text(String),
}

impl IdValue {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Text(s) => Value::from(s.clone()),
        }
    }
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl ToSql for IdValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Int(n) => ToSqlOutput::Owned(SqlValue::Integer(*n)),
            Self::Text(s) => ToSqlOutput::Owned(SqlValue::Text(s.clone())),
        })
    }
}

impl EntityDef {
    /// Parse a raw id (path segment or JSON value) into the entity's id type.
    pub fn parse_id(&self, raw: &Value) -> StiResult<IdValue> {
        match self.id_kind {
            IdKind::Integer => match raw {
                Value::Number(n) if n.as_i64().is_some() => {
                    Ok(IdValue::Int(n.as_i64().unwrap_or_default()))
                }
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(IdValue::Int)
                    .map_err(|_| StiError::Validation(format!("invalid id: {s}"))),
                other => Err(StiError::Validation(format!("invalid id: {other}"))),
            },
            IdKind::Uuid => match raw {
                Value::String(s) if !s.trim().is_empty() => Ok(IdValue::Text(s.clone())),
                other => Err(StiError::Validation(format!("invalid id: {other}"))),
            },
        }
    }

    /// Parse an id supplied as a URL path segment.
    pub fn parse_id_str(&self, raw: &str) -> StiResult<IdValue> {
        self.parse_id(&Value::String(raw.to_string()))
    }
}
