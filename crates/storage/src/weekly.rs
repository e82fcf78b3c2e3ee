use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Datelike, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use sti_core::{Page, RefreshResult, StiError, StiResult, WeeklyProductivity};

use crate::sqlite::SqliteStore;
use crate::util::{clamp_pagination, now_rfc3339, parse_datetime};

/// Allow-listed sort fields for the weekly listing; anything else falls
/// back to `iso_year`.
const WEEKLY_SORT_FIELDS: &[(&str, &str)] = &[
    ("isoYear", "iso_year"),
    ("isoWeek", "iso_week"),
    ("tasksCreated", "tasks_created"),
    ("tasksCompleted", "tasks_completed"),
    ("completionRate", "completion_rate"),
    ("plannedMinutes", "planned_minutes"),
    ("actualMinutes", "actual_minutes"),
    ("avgCompletionTimeMin", "avg_completion_time_min"),
    ("createdAt", "created_at"),
    ("updatedAt", "updated_at"),
];

fn sort_clause(field: Option<&str>, dir: Option<&str>) -> String {
    let column = field
        .and_then(|f| {
            WEEKLY_SORT_FIELDS
                .iter()
                .find(|(name, _)| *name == f)
                .map(|(_, col)| *col)
        })
        .unwrap_or("iso_year");
    let dir = match dir {
        Some(d) if d.eq_ignore_ascii_case("asc") => "ASC",
        _ => "DESC",
    };
    format!("ORDER BY {column} {dir}, iso_week {dir}")
}

/// Equality and range filters for the weekly listing.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeeklyFilter {
    pub iso_year: Option<i32>,
    pub iso_week: Option<u32>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub week_from: Option<u32>,
    pub week_to: Option<u32>,
}

impl WeeklyFilter {
    fn to_sql(self) -> (String, Vec<rusqlite::types::Value>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<rusqlite::types::Value> = Vec::new();
        let push = |clause: &str, value: i64, params: &mut Vec<rusqlite::types::Value>,
                        clauses: &mut Vec<String>| {
            params.push(rusqlite::types::Value::Integer(value));
            clauses.push(format!("{clause} ?{}", params.len()));
        };
        if let Some(year) = self.iso_year {
            push("iso_year =", year as i64, &mut params, &mut clauses);
        }
        if let Some(week) = self.iso_week {
            push("iso_week =", week as i64, &mut params, &mut clauses);
        }
        if let Some(from) = self.year_from {
            push("iso_year >=", from as i64, &mut params, &mut clauses);
        }
        if let Some(to) = self.year_to {
            push("iso_year <=", to as i64, &mut params, &mut clauses);
        }
        if let Some(from) = self.week_from {
            push("iso_week >=", from as i64, &mut params, &mut clauses);
        }
        if let Some(to) = self.week_to {
            push("iso_week <=", to as i64, &mut params, &mut clauses);
        }
        if clauses.is_empty() {
            (String::new(), params)
        } else {
            (format!("WHERE {}", clauses.join(" AND ")), params)
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct WeekStats {
    tasks_created: i64,
    tasks_completed: i64,
    planned_minutes: i64,
    actual_minutes: i64,
    completion_time_total_min: i64,
}

type WeekKey = (i32, u32);

fn week_of(dt: DateTime<Utc>) -> WeekKey {
    let iso = dt.iso_week();
    (iso.year(), iso.week())
}

/// Recompute the per-week aggregates from the base tables. Creation counts
/// and planned minutes land in the task's creation week, completion counts
/// and completion times in its completion week, and actual minutes in the
/// session's start week.
fn compute_stats(conn: &Connection) -> StiResult<BTreeMap<WeekKey, WeekStats>> {
    let mut stats: BTreeMap<WeekKey, WeekStats> = BTreeMap::new();

    let mut stmt = conn
        .prepare("SELECT created_at, completed_at, estimated_minutes FROM tasks")
        .map_err(|e| StiError::Storage(e.to_string()))?;
    let tasks = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<i64>>(2)?,
            ))
        })
        .map_err(|e| StiError::Storage(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StiError::Storage(e.to_string()))?;

    for (created_at, completed_at, estimated) in tasks {
        let created = parse_datetime("created_at", &created_at)?;
        let entry = stats.entry(week_of(created)).or_default();
        entry.tasks_created += 1;
        entry.planned_minutes += estimated.unwrap_or(0);

        if let Some(completed_at) = completed_at {
            let completed = parse_datetime("completed_at", &completed_at)?;
            let entry = stats.entry(week_of(completed)).or_default();
            entry.tasks_completed += 1;
            entry.completion_time_total_min +=
                ((completed - created).num_seconds().max(0) as f64 / 60.0).round() as i64;
        }
    }

    let mut stmt = conn
        .prepare("SELECT started_at, duration_minutes FROM study_sessions")
        .map_err(|e| StiError::Storage(e.to_string()))?;
    let sessions = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?))
        })
        .map_err(|e| StiError::Storage(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StiError::Storage(e.to_string()))?;

    for (started_at, duration) in sessions {
        let started = parse_datetime("started_at", &started_at)?;
        let entry = stats.entry(week_of(started)).or_default();
        entry.actual_minutes += duration.unwrap_or(0);
    }

    Ok(stats)
}

fn upsert_week(conn: &Connection, key: WeekKey, s: &WeekStats, now: &str) -> StiResult<()> {
    let completion_rate = if s.tasks_created > 0 {
        s.tasks_completed as f64 / s.tasks_created as f64
    } else {
        0.0
    };
    let avg_completion = if s.tasks_completed > 0 {
        s.completion_time_total_min / s.tasks_completed
    } else {
        0
    };
    conn.execute(
        "INSERT INTO weekly_productivity \
         (iso_year, iso_week, tasks_created, tasks_completed, completion_rate, \
          planned_minutes, actual_minutes, avg_completion_time_min, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9) \
         ON CONFLICT(iso_year, iso_week) DO UPDATE SET \
           tasks_created = excluded.tasks_created, \
           tasks_completed = excluded.tasks_completed, \
           completion_rate = excluded.completion_rate, \
           planned_minutes = excluded.planned_minutes, \
           actual_minutes = excluded.actual_minutes, \
           avg_completion_time_min = excluded.avg_completion_time_min, \
           updated_at = excluded.updated_at",
        params![
            key.0,
            key.1,
            s.tasks_created,
            s.tasks_completed,
            completion_rate,
            s.planned_minutes,
            s.actual_minutes,
            avg_completion,
            now,
        ],
    )
    .map_err(|e| StiError::Storage(e.to_string()))?;
    Ok(())
}

/// Merge-style refresh: upsert every computed week and drop rows for weeks
/// that no longer have any source data. Readers never see an empty table.
fn refresh_merge(conn: &mut Connection) -> StiResult<usize> {
    let tx = conn
        .transaction()
        .map_err(|e| StiError::Storage(e.to_string()))?;
    let stats = compute_stats(&tx)?;
    let now = now_rfc3339();
    for (key, week) in &stats {
        upsert_week(&tx, *key, week, &now)?;
    }

    let live: HashSet<WeekKey> = stats.keys().copied().collect();
    let existing: Vec<WeekKey> = {
        let mut stmt = tx
            .prepare("SELECT iso_year, iso_week FROM weekly_productivity")
            .map_err(|e| StiError::Storage(e.to_string()))?;
        let keys = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| StiError::Storage(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StiError::Storage(e.to_string()))?;
        keys
    };
    for key in existing {
        if !live.contains(&key) {
            tx.execute(
                "DELETE FROM weekly_productivity WHERE iso_year = ?1 AND iso_week = ?2",
                params![key.0, key.1],
            )
            .map_err(|e| StiError::Storage(e.to_string()))?;
        }
    }

    let count = stats.len();
    tx.commit().map_err(|e| StiError::Storage(e.to_string()))?;
    Ok(count)
}

/// Fallback: wipe and rebuild the whole table in one transaction.
fn refresh_rebuild(conn: &mut Connection) -> StiResult<usize> {
    let tx = conn
        .transaction()
        .map_err(|e| StiError::Storage(e.to_string()))?;
    tx.execute("DELETE FROM weekly_productivity", [])
        .map_err(|e| StiError::Storage(e.to_string()))?;
    let stats = compute_stats(&tx)?;
    let now = now_rfc3339();
    for (key, week) in &stats {
        upsert_week(&tx, *key, week, &now)?;
    }
    let count = stats.len();
    tx.commit().map_err(|e| StiError::Storage(e.to_string()))?;
    Ok(count)
}

fn row_to_weekly(
    row: (
        i64,
        i32,
        u32,
        i64,
        i64,
        f64,
        i64,
        i64,
        i64,
        String,
        String,
    ),
) -> StiResult<WeeklyProductivity> {
    Ok(WeeklyProductivity {
        weekly_productivity_id: row.0,
        iso_year: row.1,
        iso_week: row.2 as i32,
        tasks_created: row.3,
        tasks_completed: row.4,
        completion_rate: row.5,
        planned_minutes: row.6,
        actual_minutes: row.7,
        avg_completion_time_min: row.8,
        created_at: parse_datetime("created_at", &row.9)?,
        updated_at: parse_datetime("updated_at", &row.10)?,
    })
}

const WEEKLY_COLUMNS: &str = "weekly_productivity_id, iso_year, iso_week, tasks_created, \
     tasks_completed, completion_rate, planned_minutes, actual_minutes, \
     avg_completion_time_min, created_at, updated_at";

fn map_weekly_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(
    i64,
    i32,
    u32,
    i64,
    i64,
    f64,
    i64,
    i64,
    i64,
    String,
    String,
)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

impl SqliteStore {
    pub fn list_weekly(
        &self,
        filter: WeeklyFilter,
        limit: Option<i64>,
        offset: Option<i64>,
        sort_field: Option<&str>,
        sort_dir: Option<&str>,
    ) -> StiResult<Page<WeeklyProductivity>> {
        let (take, skip) = clamp_pagination(limit, offset);
        let order = sort_clause(sort_field, sort_dir);
        let (where_sql, mut params) = filter.to_sql();
        self.with_conn(|conn| {
            let count_sql = format!("SELECT COUNT(*) FROM weekly_productivity {where_sql}");
            let total: i64 = conn
                .query_row(
                    &count_sql,
                    rusqlite::params_from_iter(params.iter()),
                    |row| row.get(0),
                )
                .map_err(|e| StiError::Storage(e.to_string()))?;

            let next = params.len() + 1;
            let sql = format!(
                "SELECT {WEEKLY_COLUMNS} FROM weekly_productivity {where_sql} {order} \
                 LIMIT ?{next} OFFSET ?{}",
                next + 1
            );
            params.push(rusqlite::types::Value::Integer(take));
            params.push(rusqlite::types::Value::Integer(skip));
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StiError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), map_weekly_row)
                .map_err(|e| StiError::Storage(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StiError::Storage(e.to_string()))?;

            let items = rows
                .into_iter()
                .map(row_to_weekly)
                .collect::<StiResult<Vec<_>>>()?;
            Ok(Page { items, total })
        })
    }

    pub fn get_weekly(&self, iso_year: i32, iso_week: u32) -> StiResult<WeeklyProductivity> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {WEEKLY_COLUMNS} FROM weekly_productivity \
                 WHERE iso_year = ?1 AND iso_week = ?2"
            );
            let row = conn
                .query_row(&sql, params![iso_year, iso_week], map_weekly_row)
                .optional()
                .map_err(|e| StiError::Storage(e.to_string()))?
                .ok_or_else(|| {
                    StiError::NotFound(format!(
                        "weekly-productivity year={iso_year} week={iso_week}"
                    ))
                })?;
            row_to_weekly(row)
        })
    }

    /// Rebuild the weekly aggregates. Prefers the merge path so readers keep
    /// a populated table throughout; falls back to a full rebuild if the
    /// merge fails.
    pub fn refresh_weekly(&self) -> StiResult<RefreshResult> {
        self.with_conn(|conn| {
            let weeks = match refresh_merge(conn) {
                Ok(n) => n,
                Err(StiError::Storage(reason)) => {
                    warn!(%reason, "weekly merge refresh failed, rebuilding from scratch");
                    refresh_rebuild(conn)?
                }
                Err(other) => return Err(other),
            };
            info!(weeks, "weekly productivity refreshed");
            Ok(RefreshResult {
                ok: true,
                refreshed: true,
                at: Utc::now(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_clause_allows_listed_fields_only() {
        assert_eq!(
            sort_clause(Some("completionRate"), Some("asc")),
            "ORDER BY completion_rate ASC, iso_week ASC"
        );
        assert_eq!(
            sort_clause(Some("isoYear; DROP TABLE"), None),
            "ORDER BY iso_year DESC, iso_week DESC"
        );
        assert_eq!(sort_clause(None, None), "ORDER BY iso_year DESC, iso_week DESC");
    }

    #[test]
    fn filter_builds_clauses_for_every_bound() {
        let filter = WeeklyFilter {
            iso_year: Some(2026),
            week_from: Some(10),
            week_to: Some(20),
            ..Default::default()
        };
        let (sql, params) = filter.to_sql();
        assert_eq!(sql, "WHERE iso_year = ?1 AND iso_week >= ?2 AND iso_week <= ?3");
        assert_eq!(params.len(), 3);

        let (sql, params) = WeeklyFilter::default().to_sql();
        assert!(sql.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn week_of_respects_iso_boundaries() {
        // 2026-01-01 falls in ISO week 1 of 2026; 2027-01-01 in week 53 of 2026.
        let d1 = parse_datetime("t", "2026-01-01T12:00:00Z").unwrap();
        assert_eq!(week_of(d1), (2026, 1));
        let d2 = parse_datetime("t", "2027-01-01T12:00:00Z").unwrap();
        assert_eq!(week_of(d2), (2026, 53));
    }
}
