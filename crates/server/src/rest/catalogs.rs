use std::sync::Arc;

use axum::extract::{Path, Query, RawQuery, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;

use sti_core::{CreateResult, DeleteResult, Page, Record, UpdateResult};
use sti_storage::catalog;

use crate::error::ApiResult;
use crate::rest::{body_records, reject_query_ids, DeleteBody, ListQuery};
use crate::state::AppState;

pub(crate) async fn list(
    State(state): State<Arc<AppState>>,
    Path(entity): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Page<Record>>> {
    let def = catalog(&entity)?;
    let page = state
        .store
        .list_entity(def, query.q.as_deref(), query.limit, query.offset)?;
    Ok(Json(page))
}

pub(crate) async fn get_one(
    State(state): State<Arc<AppState>>,
    Path((entity, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let def = catalog(&entity)?;
    let parsed = def.parse_id_str(&id)?;
    let record = state.store.get_entity(def, &parsed)?;
    Ok(Json(Value::Object(record)))
}

pub(crate) async fn create(
    State(state): State<Arc<AppState>>,
    Path(entity): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<CreateResult>)> {
    let def = catalog(&entity)?;
    let records = body_records(body)?;
    let result = state.store.create_entities(def, &records)?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub(crate) async fn update(
    State(state): State<Arc<AppState>>,
    Path(entity): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<UpdateResult>> {
    let def = catalog(&entity)?;
    let records = body_records(body)?;
    let result = state.store.update_entities(def, &records)?;
    Ok(Json(result))
}

pub(crate) async fn delete(
    State(state): State<Arc<AppState>>,
    Path(entity): Path<String>,
    RawQuery(raw): RawQuery,
    Json(body): Json<DeleteBody>,
) -> ApiResult<Json<DeleteResult>> {
    reject_query_ids(raw.as_deref())?;
    let def = catalog(&entity)?;
    let result = state.store.delete_entities(def, &body.ids)?;
    Ok(Json(result))
}
