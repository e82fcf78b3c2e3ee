use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use sti_core::{Page, RefreshResult, WeeklyProductivity};
use sti_storage::WeeklyFilter;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WeeklyListQuery {
    year: Option<i32>,
    week: Option<u32>,
    year_from: Option<i32>,
    year_to: Option<i32>,
    week_from: Option<u32>,
    week_to: Option<u32>,
    order_by_field: Option<String>,
    order_by_dir: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

pub(crate) async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WeeklyListQuery>,
) -> ApiResult<Json<Page<WeeklyProductivity>>> {
    let filter = WeeklyFilter {
        iso_year: query.year,
        iso_week: query.week,
        year_from: query.year_from,
        year_to: query.year_to,
        week_from: query.week_from,
        week_to: query.week_to,
    };
    let page = state.store.list_weekly(
        filter,
        query.limit,
        query.offset,
        query.order_by_field.as_deref(),
        query.order_by_dir.as_deref(),
    )?;
    Ok(Json(page))
}

pub(crate) async fn get_one(
    State(state): State<Arc<AppState>>,
    Path((year, week)): Path<(i32, u32)>,
) -> ApiResult<Json<WeeklyProductivity>> {
    let row = state.store.get_weekly(year, week)?;
    Ok(Json(row))
}

pub(crate) async fn refresh(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<RefreshResult>> {
    let result = state.store.refresh_weekly()?;
    Ok(Json(result))
}
