use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use sti_core::{BatchImportRequest, BatchImportResult};

use crate::error::ApiResult;
use crate::state::AppState;

pub(crate) async fn batch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchImportRequest>,
) -> ApiResult<(StatusCode, Json<BatchImportResult>)> {
    let result = state.store.import_batch(&request)?;
    Ok((StatusCode::CREATED, Json(result)))
}
