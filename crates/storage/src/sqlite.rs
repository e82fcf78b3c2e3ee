use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rusqlite::{ffi, Connection};

use sti_core::{StiError, StiResult};

/// Default number of connections in the pool.
/// SQLite WAL mode supports 1 writer + N readers, so even a small pool
/// eliminates head-of-line blocking for concurrent read queries.
const DEFAULT_POOL_SIZE: usize = 4;

pub struct SqliteStore {
    /// Connection pool, round-robin across `DEFAULT_POOL_SIZE` connections.
    /// Each connection is independently protected by a Mutex so callers can
    /// run synchronous rusqlite operations without holding an async lock.
    pool: Vec<Mutex<Connection>>,
    /// Atomic counter for round-robin slot selection.
    next_slot: AtomicUsize,
}

impl SqliteStore {
    /// Execute a synchronous closure with a pooled database connection.
    ///
    /// Picks the next connection via round-robin, locks it, runs the
    /// closure, then releases. The closure gets `&mut Connection` so it can
    /// open a `rusqlite::Transaction` when it needs multi-statement atomicity.
    pub(crate) fn with_conn<F, T>(&self, f: F) -> StiResult<T>
    where
        F: FnOnce(&mut Connection) -> StiResult<T>,
    {
        let idx = self.next_slot.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        let mut conn = self.pool[idx]
            .lock()
            .map_err(|e| StiError::Storage(e.to_string()))?;
        f(&mut conn)
    }

    fn open_connection(path: &Path) -> StiResult<Connection> {
        let conn = Connection::open(path)
            .map_err(|e| StiError::Storage(format!("failed to open sqlite: {e}")))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
        )
        .map_err(|e| StiError::Storage(format!("pragma error: {e}")))?;

        Ok(conn)
    }

    pub fn open(path: &Path) -> StiResult<Self> {
        let mut pool = Vec::with_capacity(DEFAULT_POOL_SIZE);
        for _ in 0..DEFAULT_POOL_SIZE {
            pool.push(Mutex::new(Self::open_connection(path)?));
        }

        let store = Self {
            pool,
            next_slot: AtomicUsize::new(0),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn open_in_memory() -> StiResult<Self> {
        // In-memory DBs: use a shared cache URI so all pool connections see
        // the same data. Without this, each Connection::open_in_memory()
        // gets its own isolated database.
        //
        // SQLITE_OPEN_URI is required for rusqlite to parse the URI; the
        // default OpenFlags do NOT include it.
        let uri = format!(
            "file:memdb{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4()
        );
        let flags = rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
            | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
            | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX
            | rusqlite::OpenFlags::SQLITE_OPEN_URI;
        let mut pool = Vec::with_capacity(DEFAULT_POOL_SIZE);
        for _ in 0..DEFAULT_POOL_SIZE {
            let conn = Connection::open_with_flags(&uri, flags)
                .map_err(|e| StiError::Storage(format!("failed to open in-memory sqlite: {e}")))?;
            conn.execute_batch("PRAGMA foreign_keys=ON;")
                .map_err(|e| StiError::Storage(format!("pragma error: {e}")))?;
            pool.push(Mutex::new(conn));
        }

        let store = Self {
            pool,
            next_slot: AtomicUsize::new(0),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> StiResult<()> {
        // Migrations run on slot 0 only, they need exclusive access.
        let conn = self.pool[0]
            .lock()
            .map_err(|e| StiError::Storage(e.to_string()))?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| StiError::Storage(format!("migration error: {e}")))?;
        Ok(())
    }
}

const SCHEMA: &str = "
BEGIN;

CREATE TABLE IF NOT EXISTS terms (
    term_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    starts_on   TEXT,
    ends_on     TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_statuses (
    task_status_id INTEGER PRIMARY KEY AUTOINCREMENT,
    code           TEXT NOT NULL UNIQUE,
    description    TEXT,
    is_final       INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_priorities (
    task_priority_id INTEGER PRIMARY KEY AUTOINCREMENT,
    code             TEXT NOT NULL UNIQUE,
    weight           INTEGER NOT NULL,
    created_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_types (
    task_type_id INTEGER PRIMARY KEY AUTOINCREMENT,
    code         TEXT NOT NULL UNIQUE,
    description  TEXT,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_tags (
    task_tag_id TEXT PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    color       TEXT,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    task_id           TEXT PRIMARY KEY,
    title             TEXT NOT NULL,
    description       TEXT,
    task_status_id    INTEGER REFERENCES task_statuses(task_status_id),
    task_priority_id  INTEGER REFERENCES task_priorities(task_priority_id),
    task_type_id      INTEGER REFERENCES task_types(task_type_id),
    term_id           INTEGER REFERENCES terms(term_id),
    due_at            TEXT,
    estimated_minutes INTEGER,
    actual_minutes    INTEGER,
    completed_at      TEXT,
    archived_at       TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

-- One active (non-archived) task per title within a term.
CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_active_title_term
    ON tasks(title, term_id) WHERE archived_at IS NULL;

CREATE INDEX IF NOT EXISTS idx_tasks_due_at ON tasks(due_at);

CREATE TABLE IF NOT EXISTS task_tag_assignments (
    task_tag_assignment_id TEXT PRIMARY KEY,
    task_id     TEXT NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
    task_tag_id TEXT NOT NULL REFERENCES task_tags(task_tag_id),
    created_at  TEXT NOT NULL,
    UNIQUE(task_id, task_tag_id)
);

CREATE TABLE IF NOT EXISTS study_sessions (
    study_session_id TEXT PRIMARY KEY,
    task_id          TEXT NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
    started_at       TEXT NOT NULL,
    ended_at         TEXT,
    duration_minutes INTEGER,
    notes            TEXT,
    created_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_study_sessions_task ON study_sessions(task_id);

-- Rendered materialized view: recomputed only by the refresh command, never
-- written by request handlers.
CREATE TABLE IF NOT EXISTS weekly_productivity (
    weekly_productivity_id  INTEGER PRIMARY KEY AUTOINCREMENT,
    iso_year                INTEGER NOT NULL,
    iso_week                INTEGER NOT NULL,
    tasks_created           INTEGER NOT NULL DEFAULT 0,
    tasks_completed         INTEGER NOT NULL DEFAULT 0,
    completion_rate         REAL NOT NULL DEFAULT 0,
    planned_minutes         INTEGER NOT NULL DEFAULT 0,
    actual_minutes          INTEGER NOT NULL DEFAULT 0,
    avg_completion_time_min INTEGER NOT NULL DEFAULT 0,
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL,
    UNIQUE(iso_year, iso_week)
);

COMMIT;
";

/// Map a rusqlite failure onto the service error taxonomy. Unique and
/// foreign-key constraint hits become structured conflicts so batch loops
/// can classify them per record instead of aborting.
pub(crate) fn classify_sqlite_error(err: rusqlite::Error, context: &str) -> StiError {
    if let rusqlite::Error::SqliteFailure(e, ref msg) = err {
        let detail = msg.clone().unwrap_or_else(|| context.to_string());
        match e.extended_code {
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                return StiError::UniqueConflict(detail);
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY | ffi::SQLITE_CONSTRAINT_TRIGGER => {
                return StiError::ForeignKey(detail);
            }
            _ => {}
        }
    }
    StiError::Storage(format!("{context}: {err}"))
}
