//! Maps `wsb_domain::Error` onto HTTP responses.
//!
//! `wsb_domain::Error` can't implement `axum::IntoResponse` directly (orphan
//! rule: neither type lives in this crate), so this is a thin newtype that
//! does nothing but carry the error across that boundary and format it per
//! the request's negotiated `format`.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

pub struct ApiError {
    pub inner: wsb_domain::Error,
    pub json: bool,
}

impl ApiError {
    pub fn new(inner: wsb_domain::Error, json: bool) -> Self {
        ApiError { inner, json }
    }
}

impl From<wsb_domain::Error> for ApiError {
    /// Defaults to the HTML error path; handlers that already know the
    /// negotiated format should build `ApiError::new` directly instead.
    fn from(inner: wsb_domain::Error) -> Self {
        ApiError { inner, json: false }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = self.inner.to_string();

        match &self.inner {
            wsb_domain::Error::Internal(_) | wsb_domain::Error::Io(_) | wsb_domain::Error::Json(_) => {
                tracing::error!(error = %message, "internal error");
            }
            wsb_domain::Error::Forbidden(_) | wsb_domain::Error::Unauthenticated => {
                tracing::warn!(error = %message, "request denied");
            }
            _ => {}
        }

        let mut response = if self.json {
            (
                status,
                axum::Json(serde_json::json!({
                    "error": { "status": status.as_u16(), "message": message }
                })),
            )
                .into_response()
        } else {
            (status, message).into_response()
        };

        if matches!(self.inner, wsb_domain::Error::Unauthenticated) {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"Authentication required.\""),
            );
        }
        if matches!(self.inner, wsb_domain::Error::MethodNotAllowed) {
            response
                .headers_mut()
                .insert(axum::http::header::ALLOW, HeaderValue::from_static("POST"));
        }

        response
    }
}
