use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use sti_core::StiError;

/// Error message carried through response extensions so the outermost
/// layer can render the envelope with the request id it minted.
#[derive(Debug, Clone)]
pub struct ErrorMessage(pub String);

pub struct ApiError(pub StiError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<StiError> for ApiError {
    fn from(err: StiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = status.into_response();
        response
            .extensions_mut()
            .insert(ErrorMessage(self.0.to_string()));
        response
    }
}
