use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use sti_core::StiError;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "sti_session";

/// Paths reachable without credentials.
const EXEMPT_PATHS: &[&str] = &["/healthz", "/gate/login", "/gate/logout"];

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    iat: i64,
    exp: i64,
}

fn session_token_valid(token: &str, secret: &str) -> bool {
    decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .is_ok()
}

/// Shared-secret gate in front of every route except the exempt list.
/// Accepts either a valid session cookie or the raw secret in an
/// `x-access-token` header; anything else gets a uniform 401.
pub async fn gate_middleware(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let access = &state.config.access;
    if !access.enabled {
        return next.run(request).await;
    }
    let Some(secret) = access.token.as_deref() else {
        warn!("access gate enabled without a token, letting requests through");
        return next.run(request).await;
    };

    let path = request.uri().path();
    if EXEMPT_PATHS.contains(&path) {
        return next.run(request).await;
    }

    let header_ok = request
        .headers()
        .get("x-access-token")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == secret)
        .unwrap_or(false);
    let cookie_ok = jar
        .get(SESSION_COOKIE)
        .map(|c| session_token_valid(c.value(), secret))
        .unwrap_or(false);

    if header_ok || cookie_ok {
        return next.run(request).await;
    }

    warn!(method = %request.method(), path, "request rejected by access gate");
    ApiError(StiError::Unauthorized).into_response()
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    secret: String,
}

/// Exchange the shared secret for a signed session cookie.
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> ApiResult<(CookieJar, Json<Value>)> {
    let access = &state.config.access;
    let secret = access
        .token
        .as_deref()
        .filter(|_| access.enabled)
        .ok_or_else(|| StiError::Validation("access gate is not enabled".into()))?;
    if body.secret != secret {
        return Err(StiError::Unauthorized.into());
    }

    let now = chrono::Utc::now().timestamp();
    let claims = SessionClaims {
        sub: "access".to_string(),
        iat: now,
        exp: now + (access.session_hours as i64) * 3600,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| StiError::Internal(format!("cannot sign session: {e}")))?;

    let cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .build();
    Ok((jar.add(cookie), Json(json!({"ok": true}))))
}

/// Drop the session cookie.
pub async fn logout(jar: CookieJar) -> (CookieJar, Json<Value>) {
    let cookie = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    (jar.remove(cookie), Json(json!({"ok": true})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_tokens_round_trip_with_the_right_secret() {
        let now = chrono::Utc::now().timestamp();
        let claims = SessionClaims {
            sub: "access".into(),
            iat: now,
            exp: now + 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"hunter2"),
        )
        .unwrap();
        assert!(session_token_valid(&token, "hunter2"));
        assert!(!session_token_valid(&token, "other-secret"));
        assert!(!session_token_valid("garbage", "hunter2"));
    }

    #[test]
    fn expired_sessions_are_rejected() {
        let now = chrono::Utc::now().timestamp();
        let claims = SessionClaims {
            sub: "access".into(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"hunter2"),
        )
        .unwrap();
        assert!(!session_token_valid(&token, "hunter2"));
    }
}
