//! Maps [`UxmcpError`] to the `{error_kind, field?, detail}` HTTP body and
//! status code of spec §7.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uxmcp_core::error::UxmcpError;

pub struct ApiError(pub UxmcpError);

impl From<UxmcpError> for ApiError {
    fn from(err: UxmcpError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
