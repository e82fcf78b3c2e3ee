use std::sync::Arc;

use axum::extract::{Path, Query, RawQuery, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use sti_core::{CreateResult, DeleteResult, Page, Record, UpdateResult};
use sti_storage::registry::STUDY_SESSIONS;
use sti_storage::{SessionFilter, SessionInclude};

use crate::error::ApiResult;
use crate::rest::{body_records, reject_query_ids, DeleteBody};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionListQuery {
    task_id: Option<String>,
    started_from: Option<String>,
    started_to: Option<String>,
    ended_from: Option<String>,
    ended_to: Option<String>,
    q: Option<String>,
    include: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

pub(crate) async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionListQuery>,
) -> ApiResult<Json<Page<Record>>> {
    let filter = SessionFilter {
        task_id: query.task_id.clone(),
        started_from: query.started_from.clone(),
        started_to: query.started_to.clone(),
        ended_from: query.ended_from.clone(),
        ended_to: query.ended_to.clone(),
        q: query.q.clone(),
    };
    let include = SessionInclude::parse(query.include.as_deref());
    let page = state
        .store
        .list_sessions(&filter, include, query.limit, query.offset)?;
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
    let include = SessionInclude::parse(query.include.as_deref());
    let record = state.store.get_session(&id, include)?;
    Ok(Json(Value::Object(record)))
}

pub(crate) async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<CreateResult>)> {
    let records = body_records(body)?;
    let result = state.store.create_sessions(&records)?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub(crate) async fn update(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> ApiResult<Json<UpdateResult>> {
    let records = body_records(body)?;
    let result = state.store.update_sessions(&records)?;
    Ok(Json(result))
}

pub(crate) async fn delete(
    State(state): State<Arc<AppState>>,
    RawQuery(raw): RawQuery,
    Json(body): Json<DeleteBody>,
) -> ApiResult<Json<DeleteResult>> {
    reject_query_ids(raw.as_deref())?;
    let result = state.store.delete_entities(&STUDY_SESSIONS, &body.ids)?;
    Ok(Json(result))
}
