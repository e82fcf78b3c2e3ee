use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use sti_core::StiError;
use sti_engine::ChatMessage;
use sti_storage::WeeklyFilter;

use crate::error::ApiResult;
use crate::state::AppState;

const DEFAULT_RECOMMENDATION_WEEKS: i64 = 8;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RecommendationQuery {
    year: Option<i32>,
    week: Option<u32>,
    limit_weeks: Option<i64>,
}

pub(crate) async fn recommendations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecommendationQuery>,
) -> ApiResult<Json<Value>> {
    let filter = WeeklyFilter {
        iso_year: query.year,
        iso_week: query.week,
        ..Default::default()
    };
    let limit = query.limit_weeks.unwrap_or(DEFAULT_RECOMMENDATION_WEEKS);
    let page = state
        .store
        .list_weekly(filter, Some(limit), None, None, None)?;
    if page.items.is_empty() {
        return Err(StiError::Validation(
            "no weekly productivity metrics yet, run a refresh first".into(),
        )
        .into());
    }

    let text = state.llm.recommend(&page.items).await?;
    Ok(Json(json!({
        "ok": true,
        "model": state.llm.model(),
        "inputWeeks": page.items.len(),
        "text": text,
        "createdAt": Utc::now(),
    })))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatRequest {
    messages: Vec<ChatMessage>,
}

const ALLOWED_ROLES: &[&str] = &["system", "user", "assistant"];

pub(crate) async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<Value>> {
    if request.messages.is_empty() {
        return Err(StiError::Validation("messages must not be empty".into()).into());
    }
    for message in &request.messages {
        if !ALLOWED_ROLES.contains(&message.role.as_str()) {
            return Err(StiError::Validation(format!(
                "unsupported message role: {}",
                message.role
            ))
            .into());
        }
        if message.content.trim().is_empty() {
            return Err(StiError::Validation("message content must not be empty".into()).into());
        }
    }

    let text = state.llm.chat(&request.messages).await?;
    Ok(Json(json!({
        "ok": true,
        "model": state.llm.model(),
        "text": text,
        "createdAt": Utc::now(),
    })))
}
