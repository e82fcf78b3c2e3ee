//! Full-stack REST API integration tests.
//!
//! Each test builds a real router over an in-memory SQLite store and sends
//! actual HTTP requests via `tower::ServiceExt`, validating routing,
//! serialisation, handler logic, and storage in one pass.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt; // for `.oneshot()`

use sti_engine::{AppConfig, ChatMessage, LlmService};
use sti_server::rest::create_router;
use sti_server::state::AppState;
use sti_storage::SqliteStore;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn setup() -> axum::Router {
    setup_with_config(AppConfig::default())
}

fn setup_with_config(config: AppConfig) -> axum::Router {
    let store = SqliteStore::open_in_memory().expect("in-memory store");
    let state = Arc::new(AppState::with_store(Arc::new(store), config));
    create_router(state)
}

fn setup_with_state(config: AppConfig) -> (axum::Router, Arc<AppState>) {
    let store = SqliteStore::open_in_memory().expect("in-memory store");
    let state = Arc::new(AppState::with_store(Arc::new(store), config));
    (create_router(state.clone()), state)
}

fn json_request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    match body {
        Some(val) => builder.body(Body::from(val.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
}

async fn send(router: &axum::Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let resp = router
        .clone()
        .oneshot(json_request(method, uri, body))
        .await
        .unwrap();
    let status = resp.status();
    (status, body_json(resp).await)
}

// ---------------------------------------------------------------------------
// Health + envelope
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let router = setup();
    let (status, body) = send(&router, Method::GET, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn data_survives_a_restart_of_the_file_backed_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = AppConfig::default();
    config.data_dir = dir.path().to_string_lossy().into_owned();

    let state = Arc::new(AppState::init(config.clone()).expect("init"));
    let router = create_router(state);
    let (status, _) = send(
        &router,
        Method::POST,
        "/api/catalogs/terms",
        Some(json!({"name": "Spring 2027"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    drop(router);

    let state = Arc::new(AppState::init(config).expect("reopen"));
    let router = create_router(state);
    let (_, list) = send(&router, Method::GET, "/api/catalogs/terms", None).await;
    assert_eq!(list["total"], json!(1));
    assert_eq!(list["items"][0]["name"], json!("Spring 2027"));
}

#[tokio::test]
async fn errors_use_the_uniform_envelope() {
    let router = setup();
    let resp = router
        .clone()
        .oneshot(json_request(Method::GET, "/api/catalogs/terms/999", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(resp.headers().contains_key("x-request-id"));
    let body = body_json(resp).await;
    assert_eq!(body["error"], json!(true));
    assert!(body["message"].as_str().unwrap().contains("not found"));
    assert!(body["requestId"].is_string());
}

#[tokio::test]
async fn unknown_catalog_is_a_validation_error() {
    let router = setup();
    let (status, body) = send(&router, Method::GET, "/api/catalogs/users", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("unsupported catalog"));
}

// ---------------------------------------------------------------------------
// Catalog CRUD
// ---------------------------------------------------------------------------

#[tokio::test]
async fn catalog_create_then_get_round_trips() {
    let router = setup();
    let (status, created) = send(
        &router,
        Method::POST,
        "/api/catalogs/terms",
        Some(json!({"name": "Fall 2026", "startsOn": "2026-09-01"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["count"], json!(1));
    let id = created["items"][0]["termId"].as_i64().unwrap();

    let (status, fetched) = send(
        &router,
        Method::GET,
        &format!("/api/catalogs/terms/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], json!("Fall 2026"));
    assert_eq!(fetched["startsOn"], json!("2026-09-01"));
}

#[tokio::test]
async fn duplicate_tag_name_is_a_conflict() {
    let router = setup();
    let payload = json!({"name": "urgent"});
    let (status, _) = send(&router, Method::POST, "/api/catalogs/task-tags", Some(payload.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send(&router, Method::POST, "/api/catalogs/task-tags", Some(payload)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], json!(true));

    // First create won.
    let (_, list) = send(&router, Method::GET, "/api/catalogs/task-tags", None).await;
    assert_eq!(list["total"], json!(1));
}

#[tokio::test]
async fn update_reports_missing_ids_with_ok_status() {
    let router = setup();
    let (status, body) = send(
        &router,
        Method::PUT,
        "/api/catalogs/terms",
        Some(json!([{"termId": 42, "name": "ghost"}])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], json!(0));
    assert_eq!(body["notFoundIds"], json!([42]));
}

#[tokio::test]
async fn delete_takes_ids_in_the_body_only() {
    let router = setup();
    let (status, body) = send(
        &router,
        Method::DELETE,
        "/api/catalogs/terms?ids=1,2",
        Some(json!({"ids": [1, 2]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("request body"));

    let (status, body) = send(
        &router,
        Method::DELETE,
        "/api/catalogs/terms",
        Some(json!({"ids": [77]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["notFoundIds"], json!([77]));
    assert_eq!(body["count"], json!(0));
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn create_task(router: &axum::Router, payload: Value) -> Value {
    let (status, body) = send(router, Method::POST, "/api/tasks", Some(payload)).await;
    assert_eq!(status, StatusCode::CREATED);
    body["items"][0].clone()
}

#[tokio::test]
async fn task_create_then_get_with_includes() {
    let router = setup();
    let (_, status_created) = send(
        &router,
        Method::POST,
        "/api/catalogs/task-statuses",
        Some(json!({"code": "TODO"})),
    )
    .await;
    let status_id = status_created["items"][0]["taskStatusId"].clone();

    let task = create_task(
        &router,
        json!({"title": "write essay", "taskStatusId": status_id}),
    )
    .await;
    let id = task["taskId"].as_str().unwrap();

    let (status, fetched) = send(
        &router,
        Method::GET,
        &format!("/api/tasks/{id}?include=all"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["title"], json!("write essay"));
    assert_eq!(fetched["taskStatus"]["code"], json!("TODO"));
    assert_eq!(fetched["taskTagAssignments"], json!([]));
}

#[tokio::test]
async fn task_update_with_unknown_id_reports_not_found() {
    let router = setup();
    let (status, body) = send(
        &router,
        Method::PUT,
        "/api/tasks",
        Some(json!([{"taskId": "no-such-task", "title": "renamed"}])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], json!(0));
    assert_eq!(body["notFoundIds"], json!(["no-such-task"]));
}

#[tokio::test]
async fn archived_filter_is_tri_state() {
    let router = setup();
    create_task(&router, json!({"title": "active one"})).await;
    create_task(
        &router,
        json!({"title": "archived one", "archivedAt": "2026-01-01T00:00:00.000Z"}),
    )
    .await;

    let (_, default_list) = send(&router, Method::GET, "/api/tasks", None).await;
    assert_eq!(default_list["total"], json!(1));
    let (_, archived) = send(&router, Method::GET, "/api/tasks?archived=true", None).await;
    assert_eq!(archived["total"], json!(1));
    assert_eq!(archived["items"][0]["title"], json!("archived one"));
}

#[tokio::test]
async fn task_listing_sorts_by_the_documented_params() {
    let router = setup();
    create_task(&router, json!({"title": "alpha"})).await;
    create_task(&router, json!({"title": "zulu"})).await;

    let (status, body) = send(
        &router,
        Method::GET,
        "/api/tasks?orderByField=title&orderByDir=desc",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let titles: Vec<&str> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["zulu", "alpha"]);

    let (_, body) = send(
        &router,
        Method::GET,
        "/api/tasks?orderByField=title&orderByDir=asc",
        None,
    )
    .await;
    let first = body["items"][0]["title"].as_str().unwrap();
    assert_eq!(first, "alpha");
}

#[tokio::test]
async fn task_create_with_dangling_fk_is_a_conflict() {
    let router = setup();
    let (status, body) = send(
        &router,
        Method::POST,
        "/api/tasks",
        Some(json!({"title": "x", "taskStatusId": 999})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().contains("foreign key"));
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn session_time_contract_enforced_over_http() {
    let router = setup();
    let task = create_task(&router, json!({"title": "t"})).await;
    let task_id = task["taskId"].clone();

    let (status, created) = send(
        &router,
        Method::POST,
        "/api/study-sessions",
        Some(json!({
            "taskId": task_id,
            "startedAt": "2026-03-02T09:00:00Z",
            "endedAt": "2026-03-02T10:00:00Z"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["items"][0]["durationMinutes"], json!(60));

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/study-sessions",
        Some(json!({
            "taskId": created["items"][0]["taskId"],
            "startedAt": "2026-03-02T12:00:00Z",
            "endedAt": "2026-03-02T11:00:00Z"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("endedAt"));
}

// ---------------------------------------------------------------------------
// Weekly productivity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn weekly_refresh_is_idempotent() {
    let router = setup();
    let task = create_task(&router, json!({"title": "t", "estimatedMinutes": 30})).await;
    send(
        &router,
        Method::POST,
        "/api/study-sessions",
        Some(json!({
            "taskId": task["taskId"],
            "startedAt": "2026-03-02T09:00:00Z",
            "endedAt": "2026-03-02T10:00:00Z"
        })),
    )
    .await;

    let (status, first) = send(&router, Method::POST, "/api/weekly-productivity/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["ok"], json!(true));

    let (_, rows_a) = send(&router, Method::GET, "/api/weekly-productivity", None).await;
    send(&router, Method::POST, "/api/weekly-productivity/refresh", None).await;
    let (_, rows_b) = send(&router, Method::GET, "/api/weekly-productivity", None).await;

    let strip = |rows: &Value| -> Vec<Value> {
        rows["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| {
                let mut r = r.clone();
                let obj = r.as_object_mut().unwrap();
                obj.remove("updatedAt");
                obj.remove("createdAt");
                obj.remove("weeklyProductivityId");
                r
            })
            .collect()
    };
    assert_eq!(strip(&rows_a), strip(&rows_b));

    let (status, week) = send(&router, Method::GET, "/api/weekly-productivity/2026/10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(week["actualMinutes"], json!(60));
}

#[tokio::test]
async fn weekly_listing_honors_week_range_filters() {
    let router = setup();
    let task = create_task(&router, json!({"title": "t"})).await;
    send(
        &router,
        Method::POST,
        "/api/study-sessions",
        Some(json!({
            "taskId": task["taskId"],
            "startedAt": "2026-03-02T09:00:00Z",
            "endedAt": "2026-03-02T10:00:00Z"
        })),
    )
    .await;
    send(&router, Method::POST, "/api/weekly-productivity/refresh", None).await;

    let (_, all) = send(&router, Method::GET, "/api/weekly-productivity", None).await;
    let total = all["total"].as_i64().unwrap();
    assert!(total >= 1);

    // ISO weeks never exceed 53, so these bounds partition the listing.
    let (status, body) = send(
        &router,
        Method::GET,
        "/api/weekly-productivity?weekFrom=999",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], json!(0));

    let (_, body) = send(
        &router,
        Method::GET,
        "/api/weekly-productivity?weekTo=999",
        None,
    )
    .await;
    assert_eq!(body["total"], json!(total));

    let (_, body) = send(
        &router,
        Method::GET,
        "/api/weekly-productivity?year=2026&weekFrom=10&weekTo=10",
        None,
    )
    .await;
    assert_eq!(body["items"][0]["isoWeek"], json!(10));
    assert_eq!(body["items"][0]["actualMinutes"], json!(60));

    let (_, body) = send(
        &router,
        Method::GET,
        "/api/weekly-productivity?orderByField=isoWeek&orderByDir=asc",
        None,
    )
    .await;
    let weeks: Vec<i64> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["isoWeek"].as_i64().unwrap())
        .collect();
    let mut sorted = weeks.clone();
    sorted.sort_unstable();
    assert_eq!(weeks, sorted);
}

#[tokio::test]
async fn missing_week_is_not_found() {
    let router = setup();
    send(&router, Method::POST, "/api/weekly-productivity/refresh", None).await;
    let (status, _) = send(&router, Method::GET, "/api/weekly-productivity/1999/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Batch import
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batch_import_round_trips_and_rolls_back() {
    let router = setup();
    let (_, tag) = send(
        &router,
        Method::POST,
        "/api/catalogs/task-tags",
        Some(json!({"name": "imported"})),
    )
    .await;
    let tag_id = tag["items"][0]["taskTagId"].clone();

    let (status, result) = send(
        &router,
        Method::POST,
        "/api/import/batch",
        Some(json!({
            "tasks": [{"clientId": "a", "title": "imported task"}],
            "assignments": [{"taskRef": "a", "taskTagId": tag_id}],
            "sessions": [{
                "taskRef": "a",
                "startedAt": "2026-03-02T09:00:00Z",
                "endedAt": "2026-03-02T09:30:00Z"
            }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(result["created"]["tasks"], json!(1));
    assert!(result["taskIdMap"]["a"].is_string());

    // An unresolved ref rolls back everything, including the new task.
    let (status, _) = send(
        &router,
        Method::POST,
        "/api/import/batch",
        Some(json!({
            "tasks": [{"clientId": "b", "title": "doomed"}],
            "assignments": [{"taskRef": "ghost", "taskTagId": 1}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (_, tasks) = send(&router, Method::GET, "/api/tasks?q=doomed", None).await;
    assert_eq!(tasks["total"], json!(0));
}

// ---------------------------------------------------------------------------
// Access gate
// ---------------------------------------------------------------------------

fn gated_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.access.enabled = true;
    config.access.token = Some("sesame".to_string());
    config
}

#[tokio::test]
async fn gate_blocks_api_routes_without_credentials() {
    let router = setup_with_config(gated_config());
    let (status, body) = send(&router, Method::GET, "/api/tasks", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], json!(true));

    // Exempt paths stay reachable.
    let (status, _) = send(&router, Method::GET, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn gate_accepts_the_header_secret() {
    let router = setup_with_config(gated_config());
    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/tasks")
        .header("x-access-token", "sesame")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(request).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn gate_login_issues_a_working_cookie() {
    let router = setup_with_config(gated_config());

    let (status, _) = send(
        &router,
        Method::POST,
        "/gate/login",
        Some(json!({"secret": "wrong"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let resp = router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/gate/login",
            Some(json!({"secret": "sesame"})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = resp
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("sti_session="));

    let session = cookie.split(';').next().unwrap().to_string();
    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/tasks")
        .header("cookie", session)
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(request).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// ---------------------------------------------------------------------------
// LLM endpoints
// ---------------------------------------------------------------------------

struct CannedLlm;

#[async_trait::async_trait]
impl sti_engine::LlmProvider for CannedLlm {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _params: &sti_engine::llm::CompletionParams,
    ) -> Result<String, sti_engine::llm::LlmError> {
        Ok(format!("canned reply to {} messages", messages.len()))
    }

    fn name(&self) -> &str {
        "canned"
    }
}

fn stubbed_llm_state() -> (axum::Router, Arc<AppState>) {
    let (router, state) = setup_with_state(AppConfig::default());
    let _ = router;
    let store = state.store.clone();
    let state = Arc::new(AppState {
        store,
        config: AppConfig::default(),
        llm: LlmService::with_provider(Arc::new(CannedLlm), "canned-model"),
    });
    (create_router(state.clone()), state)
}

#[tokio::test]
async fn llm_disabled_returns_service_unavailable() {
    let router = setup();
    let (status, body) = send(
        &router,
        Method::POST,
        "/api/llm/chat",
        Some(json!({"messages": [{"role": "user", "content": "hi"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["message"].as_str().unwrap().contains("disabled"));
}

#[tokio::test]
async fn llm_chat_validates_roles() {
    let (router, _state) = stubbed_llm_state();
    let (status, body) = send(
        &router,
        Method::POST,
        "/api/llm/chat",
        Some(json!({"messages": [{"role": "wizard", "content": "hi"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("role"));

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/llm/chat",
        Some(json!({"messages": [{"role": "user", "content": "hi"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model"], json!("canned-model"));
    assert!(body["text"].as_str().unwrap().contains("canned reply"));
}

#[tokio::test]
async fn llm_recommendations_require_metrics() {
    let (router, _state) = stubbed_llm_state();
    let (status, body) = send(&router, Method::GET, "/api/llm/recommendations", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("refresh"));
}

#[tokio::test]
async fn llm_recommendations_use_weekly_metrics() {
    let (router, _state) = stubbed_llm_state();
    create_task(&router, json!({"title": "t", "estimatedMinutes": 45})).await;
    send(&router, Method::POST, "/api/weekly-productivity/refresh", None).await;

    let (status, body) = send(&router, Method::GET, "/api/llm/recommendations", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["inputWeeks"], json!(1));
    assert!(body["text"].is_string());
}
