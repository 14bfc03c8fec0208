//! JSON response envelope shared by every action handler that negotiates
//! `format=json`.

use axum::response::{IntoResponse, Response};
use axum::Json;

pub fn success(data: serde_json::Value) -> Response {
    Json(serde_json::json!({ "success": true, "data": data })).into_response()
}

pub fn success_empty() -> Response {
    Json(serde_json::json!({ "success": true, "data": null })).into_response()
}
