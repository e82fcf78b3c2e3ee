use std::sync::Arc;

use axum::extract::{Path, Query, RawQuery, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use sti_core::{CreateResult, DeleteResult, Page, Record, UpdateResult};
use sti_storage::registry::TASKS;
use sti_storage::{IncludeSpec, TaskFilter};

use crate::error::ApiResult;
use crate::rest::{body_records, reject_query_ids, DeleteBody};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TaskListQuery {
    q: Option<String>,
    status_id: Option<i64>,
    priority_id: Option<i64>,
    type_id: Option<i64>,
    term_id: Option<i64>,
    tag_id: Option<String>,
    due_from: Option<String>,
    due_to: Option<String>,
    archived: Option<bool>,
    include: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    order_by_field: Option<String>,
    order_by_dir: Option<String>,
}

impl TaskListQuery {
    fn filter(&self) -> TaskFilter {
        TaskFilter {
            q: self.q.clone(),
            status_id: self.status_id,
            priority_id: self.priority_id,
            type_id: self.type_id,
            term_id: self.term_id,
            tag_id: self.tag_id.clone(),
            due_from: self.due_from.clone(),
            due_to: self.due_to.clone(),
            archived: self.archived,
        }
    }
}

pub(crate) async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TaskListQuery>,
) -> ApiResult<Json<Page<Record>>> {
    let include = IncludeSpec::parse(query.include.as_deref());
    let page = state.store.list_tasks(
        &query.filter(),
        include,
        query.limit,
        query.offset,
        query.order_by_field.as_deref(),
        query.order_by_dir.as_deref(),
    )?;
    Ok(Json(page))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct IncludeQuery {
    include: Option<String>,
}

pub(crate) async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<IncludeQuery>,
) -> ApiResult<Json<Value>> {
    let include = IncludeSpec::parse(query.include.as_deref());
    let record = state.store.get_task(&id, include)?;
    Ok(Json(Value::Object(record)))
}

pub(crate) async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<CreateResult>)> {
    let records = body_records(body)?;
    let result = state.store.create_entities(&TASKS, &records)?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub(crate) async fn update(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> ApiResult<Json<UpdateResult>> {
    let records = body_records(body)?;
    let result = state.store.update_entities(&TASKS, &records)?;
    Ok(Json(result))
}

pub(crate) async fn delete(
    State(state): State<Arc<AppState>>,
    RawQuery(raw): RawQuery,
    Json(body): Json<DeleteBody>,
) -> ApiResult<Json<DeleteResult>> {
    reject_query_ids(raw.as_deref())?;
    let result = state.store.delete_entities(&TASKS, &body.ids)?;
    Ok(Json(result))
}
