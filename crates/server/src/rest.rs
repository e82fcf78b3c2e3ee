use std::sync::Arc;

use axum::extract::Request;
use axum::http::{HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use sti_core::{Record, StiError, StiResult};

use crate::error::ErrorMessage;
use crate::gate;
use crate::state::AppState;

mod assignments;
mod catalogs;
mod import;
mod llm;
mod sessions;
mod tasks;
mod weekly;

/// Pagination and free-text search knobs shared by every listing route.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuery {
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeleteBody {
    pub ids: Vec<Value>,
}

/// Create and update bodies accept a single object or an array of them.
pub(crate) fn body_records(body: Value) -> StiResult<Vec<Record>> {
    match body {
        Value::Object(map) => Ok(vec![map]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                _ => Err(StiError::Validation(
                    "array elements must be objects".into(),
                )),
            })
            .collect(),
        _ => Err(StiError::Validation(
            "body must be an object or an array of objects".into(),
        )),
    }
}

/// Ids are only accepted in the request body, never in the query string.
pub(crate) fn reject_query_ids(raw_query: Option<&str>) -> StiResult<()> {
    let has_ids = raw_query
        .map(|raw| {
            raw.split('&')
                .any(|pair| pair.split('=').next() == Some("ids"))
        })
        .unwrap_or(false);
    if has_ids {
        return Err(StiError::Validation(
            "pass ids in the request body, not the query string".into(),
        ));
    }
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Outermost layer: mints a request id, logs the outcome, and renders the
/// uniform error envelope for any response flagged by `ApiError`.
async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = std::time::Instant::now();

    let mut response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    if let Some(ErrorMessage(message)) = response.extensions().get::<ErrorMessage>().cloned() {
        warn!(%method, path, status = status.as_u16(), elapsed_ms, request_id, message, "request failed");
        let body = Json(json!({
            "error": true,
            "message": message,
            "requestId": request_id,
        }));
        let mut wrapped = (status, body).into_response();
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            wrapped.headers_mut().insert("x-request-id", value);
        }
        return wrapped;
    }

    info!(%method, path, status = status.as_u16(), elapsed_ms, request_id, "request");
    response
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let mut parsed = Vec::new();
    for origin in origins {
        match HeaderValue::from_str(origin) {
            Ok(value) => parsed.push(value),
            Err(err) => warn!("ignoring invalid CORS origin '{origin}': {err}"),
        }
    }

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static("x-access-token"),
        ])
        .allow_credentials(true)
        .allow_origin(parsed)
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/healthz", get(health))
        .route("/gate/login", post(gate::login))
        .route("/gate/logout", post(gate::logout))
        .route(
            "/api/catalogs/:entity",
            get(catalogs::list)
                .post(catalogs::create)
                .put(catalogs::update)
                .delete(catalogs::delete),
        )
        .route("/api/catalogs/:entity/:id", get(catalogs::get_one))
        .route(
            "/api/tasks",
            get(tasks::list)
                .post(tasks::create)
                .put(tasks::update)
                .delete(tasks::delete),
        )
        .route("/api/tasks/:id", get(tasks::get_one))
        .route(
            "/api/task-tag-assignments",
            get(assignments::list)
                .post(assignments::create)
                .put(assignments::update)
                .delete(assignments::delete),
        )
        .route("/api/task-tag-assignments/:id", get(assignments::get_one))
        .route(
            "/api/study-sessions",
            get(sessions::list)
                .post(sessions::create)
                .put(sessions::update)
                .delete(sessions::delete),
        )
        .route("/api/study-sessions/:id", get(sessions::get_one))
        .route("/api/weekly-productivity", get(weekly::list))
        .route("/api/weekly-productivity/refresh", post(weekly::refresh))
        .route("/api/weekly-productivity/:year/:week", get(weekly::get_one))
        .route("/api/import/batch", post(import::batch))
        .route("/api/llm/recommendations", get(llm::recommendations))
        .route("/api/llm/chat", post(llm::chat))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            gate::gate_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .with_state(state)
}
