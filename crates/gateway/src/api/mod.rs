pub mod auth;

use std::collections::HashMap;

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;

use crate::dispatcher::{self, RequestCtx};
use crate::error::ApiError;
use crate::state::AppState;

/// Every request, whatever its verb, lands on this single wildcard route —
/// the namespace doesn't have REST-shaped endpoints, just a path into the
/// scrapbook and an `a`/`action` query parameter naming what to do with it.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", any(handle))
        .route("/*path", any(handle))
}

async fn handle(
    State(state): State<AppState>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    let (parts, body) = req.into_parts();
    let query = parse_query(parts.uri.query().unwrap_or(""));
    let path = decode_path(parts.uri.path());

    let action = wsb_engine::permissions::Action::parse(
        query
            .get("action")
            .or_else(|| query.get("a"))
            .map(|s| s.as_str())
            .unwrap_or(""),
    );
    let json = query.get("format").or_else(|| query.get("f")).map(|s| s.as_str()) == Some("json");

    if let Err(e) = auth::authorize(&state, &parts.headers, action) {
        return ApiError::new(e, json).into_response();
    }

    let body_bytes = match axum::body::to_bytes(body, 64 * 1024 * 1024).await {
        Ok(b) => b,
        Err(e) => return ApiError::new(wsb_domain::Error::BadRequest(e.to_string()), json).into_response(),
    };

    let ctx = RequestCtx {
        state,
        method: parts.method,
        headers: parts.headers,
        path,
        query,
        peer_addr,
    };
    dispatcher::dispatch(ctx, body_bytes).await
}

fn decode_path(raw: &str) -> String {
    percent_encoding::percent_decode_str(raw.trim_start_matches('/'))
        .decode_utf8_lossy()
        .to_string()
}

fn parse_query(query: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in query.split('&').filter(|s| !s.is_empty()) {
        let mut it = pair.splitn(2, '=');
        let k = it.next().unwrap_or("");
        let v = it.next().unwrap_or("");
        map.insert(decode_component(k), decode_component(v));
    }
    map
}

fn decode_component(s: &str) -> String {
    percent_encoding::percent_decode_str(&s.replace('+', " "))
        .decode_utf8_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_short_and_long_param_names() {
        let q = parse_query("a=view&f=json&name=hello%20world");
        assert_eq!(q.get("a").unwrap(), "view");
        assert_eq!(q.get("f").unwrap(), "json");
        assert_eq!(q.get("name").unwrap(), "hello world");
    }

    #[test]
    fn decode_path_strips_leading_slash_and_percent_decodes() {
        assert_eq!(decode_path("/a%20b/c"), "a b/c");
    }
}
