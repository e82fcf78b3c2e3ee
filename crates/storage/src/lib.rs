//! SQLite persistence for the study task engine.
//!
//! A small pool of rusqlite connections backs a registry-driven CRUD layer:
//! every lookup catalog shares one generic implementation, while tasks,
//! tag assignments, study sessions, the weekly productivity aggregate, and
//! the batch importer add their own filtering and validation on top.

pub mod assignments;
mod crud;
pub mod import;
pub mod registry;
pub mod sessions;
pub mod sqlite;
pub mod tasks;
pub mod util;
pub mod weekly;

pub use assignments::{AssignmentFilter, AssignmentInclude};
pub use registry::{catalog, EntityDef, IdValue, CATALOGS, STUDY_SESSIONS, TASKS,
    TASK_TAG_ASSIGNMENTS};
pub use sessions::{SessionFilter, SessionInclude};
pub use sqlite::SqliteStore;
pub use tasks::{IncludeSpec, TaskFilter};
pub use weekly::WeeklyFilter;
