//! Per-verb action handlers and their pre-conditions.
//!
//! Each verb in `wsb_engine::permissions::Action` has a handler here. The
//! three pre-conditions from the original's decorator stack — *advanced*,
//! *writing*, *renaming* — are plain functions composed explicitly at the
//! top of whichever handler needs them, instead of a decorator chain.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use wsb_domain::{Error, Result};
use wsb_engine::permissions::Action;
use wsb_engine::{archive, listing, maff, resolver, Resolved};

use crate::listing_formatter::{self, Entry};
use crate::responses;
use crate::state::AppState;

/// Everything a handler needs, gathered once by the router before dispatch.
pub struct RequestCtx {
    pub state: AppState,
    pub method: Method,
    pub headers: HeaderMap,
    /// Percent-decoded path, relative to the scrapbook root, no leading `/`.
    pub path: String,
    pub query: HashMap<String, String>,
    /// The real TCP peer, as seen by this process — never spoofable by a
    /// request header, unlike `Host` or `X-Forwarded-For`.
    pub peer_addr: std::net::SocketAddr,
}

impl RequestCtx {
    fn param<'a>(&'a self, short: &str, long: &str) -> Option<&'a str> {
        self.query
            .get(long)
            .or_else(|| self.query.get(short))
            .map(|s| s.as_str())
    }

    pub fn action(&self) -> Action {
        Action::parse(self.param("a", "action").unwrap_or(""))
    }

    pub fn format(&self) -> Option<&str> {
        self.param("f", "format")
    }

    pub fn json(&self) -> bool {
        self.format() == Some("json")
    }

    pub fn sse(&self) -> bool {
        self.format() == Some("sse")
    }

    pub fn encoding(&self) -> String {
        self.param("e", "encoding").unwrap_or("utf-8").to_string()
    }

    pub fn recursive(&self) -> bool {
        matches!(
            self.query.get("recursive").map(|s| s.as_str()),
            Some("1") | Some("true")
        )
    }

    pub fn token(&self) -> Option<&str> {
        self.query.get("token").map(|s| s.as_str())
    }

    pub fn target(&self) -> Option<&str> {
        self.query.get("target").map(|s| s.as_str())
    }

    pub fn name(&self) -> Option<&str> {
        self.query.get("name").map(|s| s.as_str())
    }

    pub fn chks(&self) -> u64 {
        self.query
            .get("chks")
            .and_then(|s| s.parse().ok())
            .unwrap_or(300)
    }

    pub fn chkt(&self) -> u64 {
        self.query
            .get("chkt")
            .and_then(|s| s.parse().ok())
            .unwrap_or(5)
    }

}

// ── Pre-conditions ──────────────────────────────────────────────────────

/// POST + a valid, unconsumed token; consumes it before the action runs.
async fn require_advanced(ctx: &RequestCtx) -> Result<()> {
    if ctx.method != Method::POST {
        return Err(Error::MethodNotAllowed);
    }
    let token = ctx
        .token()
        .ok_or_else(|| Error::BadRequest("missing token".into()))?
        .to_string();
    let store = ctx.state.tokens.clone();
    tokio::task::spawn_blocking(move || store.validate_and_consume(&token))
        .await
        .map_err(|e| Error::internal(e.to_string()))?
}

fn require_writing(ctx: &RequestCtx) -> Result<()> {
    if ctx.path.trim_matches('/').is_empty() {
        return Err(Error::Forbidden(
            "cannot perform this action on the namespace root".into(),
        ));
    }
    Ok(())
}

fn require_renaming(ctx: &RequestCtx) -> Result<PathBuf> {
    let target = ctx
        .target()
        .ok_or_else(|| Error::BadRequest("missing target parameter".into()))?;
    if matches!(
        resolver::resolve(&ctx.state.root, target),
        Resolved::Archive { .. }
    ) {
        return Err(Error::Forbidden("target is inside an archive".into()));
    }
    let resolved = resolver::normalize_under(&ctx.state.root, target)
        .ok_or_else(|| Error::BadRequest("target escapes the namespace root".into()))?;
    if resolved.symlink_metadata().is_ok() {
        return Err(Error::BadRequest("target already exists".into()));
    }
    Ok(resolved)
}

// ── Dispatch entry point ────────────────────────────────────────────────

pub async fn dispatch(ctx: RequestCtx, body: axum::body::Bytes) -> Response {
    let action = ctx.action();
    let result = run(&ctx, action, body).await;
    match result {
        Ok(resp) => resp,
        Err(e) => crate::error::ApiError::new(e, ctx.json()).into_response(),
    }
}

async fn run(ctx: &RequestCtx, action: Action, body: axum::body::Bytes) -> Result<Response> {
    match action {
        Action::View => view(ctx).await,
        Action::Source => source(ctx).await,
        Action::List => list(ctx).await,
        Action::Static => static_file(ctx).await,
        Action::Edit => edit(ctx).await,
        Action::Editx => editx(ctx).await,
        Action::Exec => exec_or_browse(ctx, false).await,
        Action::Browse => exec_or_browse(ctx, true).await,
        Action::Config => config_action(ctx).await,
        Action::Token => token_action(ctx).await,
        Action::Lock => lock_action(ctx).await,
        Action::Unlock => unlock_action(ctx).await,
        Action::Mkdir => mkdir_action(ctx).await,
        Action::Save => save_action(ctx, body).await,
        Action::Delete => delete_action(ctx).await,
        Action::Move => move_action(ctx).await,
        Action::Copy => copy_action(ctx).await,
        Action::Unknown => Err(Error::BadRequest("action not supported".into())),
    }
}

// ── view / source ────────────────────────────────────────────────────────

async fn view(ctx: &RequestCtx) -> Result<Response> {
    let resolved = resolver::resolve(&ctx.state.root, &ctx.path);
    render_target(ctx, resolved, false).await
}

async fn source(ctx: &RequestCtx) -> Result<Response> {
    let resolved = resolver::resolve(&ctx.state.root, &ctx.path);
    render_target(ctx, resolved, true).await
}

async fn render_target(ctx: &RequestCtx, resolved: Resolved, as_source: bool) -> Result<Response> {
    match resolved {
        Resolved::None => Err(Error::Forbidden("path escapes the namespace root".into())),
        Resolved::Physical(path) => render_physical(ctx, &path, as_source).await,
        Resolved::Archive {
            archive_path,
            inner_path,
        } => render_archive_entry(ctx, &archive_path, &inner_path, as_source).await,
    }
}

async fn render_physical(ctx: &RequestCtx, path: &Path, as_source: bool) -> Result<Response> {
    let path = path.to_path_buf();
    let meta = tokio::task::spawn_blocking({
        let path = path.clone();
        move || std::fs::symlink_metadata(&path)
    })
    .await
    .map_err(|e| Error::internal(e.to_string()))?;

    let meta = match meta {
        Ok(m) => m,
        Err(_) => return Err(Error::NotFound(format!("{}", path.display()))),
    };

    if let Some(fmt) = ctx.format() {
        if fmt != "sse" {
            return Ok(metadata_response(ctx, &path, &meta));
        }
    }

    if meta.is_dir() {
        if !ctx.path.ends_with('/') && !ctx.path.is_empty() {
            return Ok(Redirect::to(&format!("/{}/", ctx.path.trim_start_matches('/'))).into_response());
        }
        let entries = tokio::task::spawn_blocking({
            let path = path.clone();
            move || listing::list_dir(&path, false)
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))??;
        let entries: Vec<Entry> = entries.iter().map(Entry::from).collect();
        let mtime = meta
            .modified()
            .ok()
            .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs());
        return Ok(render_listing(ctx, &ctx.path, entries, mtime));
    }

    let mime = wsb_domain::mime::guess(&path);
    if !as_source && (wsb_domain::mime::is_htz(&mime) || wsb_domain::mime::is_maff(&mime)) {
        return archive_landing(ctx, &path).await;
    }
    if !as_source && wsb_domain::mime::is_markdown(&mime) {
        let bytes = tokio::task::spawn_blocking({
            let path = path.clone();
            move || std::fs::read(&path)
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))??;
        let text = String::from_utf8_lossy(&bytes);
        let html = render_markdown(&text);
        return Ok(([("content-type", "text/html; charset=utf-8")], html).into_response());
    }

    stream_file(&ctx.headers, &path, &mime, as_source).await
}

async fn render_archive_entry(
    ctx: &RequestCtx,
    archive_path: &Path,
    inner_path: &str,
    as_source: bool,
) -> Result<Response> {
    let archive_path = archive_path.to_path_buf();
    let inner_path = inner_path.to_string();
    let info = {
        let archive_path = archive_path.clone();
        let inner_path = inner_path.clone();
        tokio::task::spawn_blocking(move || archive::entry_info(&archive_path, &inner_path))
            .await
            .map_err(|e| Error::internal(e.to_string()))??
    };

    if let Some(fmt) = ctx.format() {
        if fmt != "sse" {
            return Ok(responses::success(serde_json::json!({
                "name": inner_path.rsplit('/').next().unwrap_or(&inner_path),
                "kind": if info.kind == archive::EntryKind::Dir { "dir" } else { "file" },
                "size": info.size,
                "last_modified": info.last_modified,
            })));
        }
    }

    if info.kind == archive::EntryKind::Dir {
        let entries = {
            let archive_path = archive_path.clone();
            let inner_path = inner_path.clone();
            tokio::task::spawn_blocking(move || archive::list_dir(&archive_path, &inner_path))
                .await
                .map_err(|e| Error::internal(e.to_string()))??
        };
        let entries: Vec<Entry> = entries.iter().map(Entry::from).collect();
        return Ok(render_listing(ctx, &ctx.path, entries, info.last_modified));
    }
    if info.kind == archive::EntryKind::Absent {
        return Err(Error::NotFound(format!("no such entry '{inner_path}'")));
    }

    let mime = wsb_domain::mime::guess(Path::new(&inner_path));
    let data = {
        let archive_path = archive_path.clone();
        let inner_path = inner_path.clone();
        tokio::task::spawn_blocking(move || archive::read_entry(&archive_path, &inner_path))
            .await
            .map_err(|e| Error::internal(e.to_string()))??
    };

    let content_type = if as_source {
        format!("text/plain; charset={}", normalize_charset(&ctx.encoding()))
    } else {
        strip_charset(&mime)
    };
    let etag = archive_etag(&archive_path, info.last_modified.unwrap_or(0), data.len() as u64);
    let disposition = as_source.then_some("inline");

    let mut response = byte_response(
        &ctx.headers,
        data,
        &content_type,
        &etag,
        info.last_modified,
        disposition,
    );
    response
        .headers_mut()
        .insert("cache-control", "no-store".parse().unwrap());
    Ok(response)
}

fn render_listing(ctx: &RequestCtx, base_path: &str, entries: Vec<Entry>, last_modified: Option<u64>) -> Response {
    let etag = listing_formatter::listing_etag(base_path, &entries);
    if let Some(resp) = not_modified_response(&ctx.headers, &etag, last_modified) {
        return resp;
    }

    if ctx.sse() {
        return listing_formatter::sse_response(entries);
    }
    if ctx.json() {
        return responses::success(listing_formatter::render_json(&entries));
    }
    let html = listing_formatter::render_html(base_path, &entries);
    let mut response = (
        [
            ("content-type", "text/html; charset=utf-8"),
            ("cache-control", "no-store"),
            ("etag", etag.as_str()),
        ],
        html,
    )
        .into_response();
    if let Some(secs) = last_modified {
        if let Ok(value) = format_http_date(secs).parse() {
            response.headers_mut().insert(axum::http::header::LAST_MODIFIED, value);
        }
    }
    response
}

/// Formats a unix timestamp as an HTTP-date (RFC 7231 §7.1.1.1), e.g.
/// `Tue, 15 Nov 1994 08:12:31 GMT`.
fn format_http_date(secs: u64) -> String {
    let dt = chrono::DateTime::<chrono::Utc>::from_timestamp(secs as i64, 0).unwrap_or_default();
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn parse_http_date(s: &str) -> Option<u64> {
    chrono::NaiveDateTime::parse_from_str(s, "%a, %d %b %Y %H:%M:%S GMT")
        .ok()
        .map(|dt| dt.and_utc().timestamp() as u64)
}

/// `true` if `headers` carries a conditional-GET precondition that `etag`/
/// `last_modified` already satisfy. Translated from `is_resource_modified`:
/// `If-None-Match` takes priority over `If-Modified-Since` when both are
/// present, per RFC 7232 §6.
fn is_not_modified(headers: &HeaderMap, etag: &str, last_modified: Option<u64>) -> bool {
    if let Some(inm) = headers.get("if-none-match").and_then(|v| v.to_str().ok()) {
        return inm.split(',').map(|s| s.trim()).any(|t| t == etag || t == "*");
    }
    if let (Some(ims), Some(lm)) = (
        headers.get("if-modified-since").and_then(|v| v.to_str().ok()),
        last_modified,
    ) {
        if let Some(since) = parse_http_date(ims) {
            return lm <= since;
        }
    }
    false
}

fn not_modified_response(headers: &HeaderMap, etag: &str, last_modified: Option<u64>) -> Option<Response> {
    if !is_not_modified(headers, etag, last_modified) {
        return None;
    }
    let mut resp = StatusCode::NOT_MODIFIED.into_response();
    if let Ok(value) = etag.parse() {
        resp.headers_mut().insert(axum::http::header::ETAG, value);
    }
    Some(resp)
}

enum RangeOutcome {
    Full,
    Partial(u64, u64),
    Unsatisfiable,
}

/// Resolves a `Range` header against a known body length. Only the first
/// range in a multi-range request is honored; anything else (no header, an
/// unparsable header, a multi-range header) falls back to a full response,
/// matching the common single-range behavior of HTTP range servers.
fn resolve_range(header: Option<&str>, total: u64) -> RangeOutcome {
    let Some(header) = header else {
        return RangeOutcome::Full;
    };
    let Some(spec) = header.strip_prefix("bytes=") else {
        return RangeOutcome::Full;
    };
    let Some(first) = spec.split(',').next() else {
        return RangeOutcome::Full;
    };
    let Some((start_s, end_s)) = first.trim().split_once('-') else {
        return RangeOutcome::Full;
    };
    if total == 0 {
        return RangeOutcome::Unsatisfiable;
    }
    if start_s.is_empty() {
        let Ok(n) = end_s.parse::<u64>() else {
            return RangeOutcome::Full;
        };
        if n == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        let n = n.min(total);
        return RangeOutcome::Partial(total - n, total - 1);
    }
    let Ok(start) = start_s.parse::<u64>() else {
        return RangeOutcome::Full;
    };
    if start >= total {
        return RangeOutcome::Unsatisfiable;
    }
    let end = if end_s.is_empty() {
        total - 1
    } else {
        match end_s.parse::<u64>() {
            Ok(e) => e.min(total - 1),
            Err(_) => return RangeOutcome::Full,
        }
    };
    if end < start {
        return RangeOutcome::Unsatisfiable;
    }
    RangeOutcome::Partial(start, end)
}

/// Builds the final response for a resolved byte payload: honors
/// conditional-GET first, then an optional `Range` request, falling back to
/// a full `200` body. Shared by physical-file and archive-entry streaming
/// so both get real partial-content support behind the `Accept-Ranges:
/// bytes` they advertise.
fn byte_response(
    headers: &HeaderMap,
    data: Vec<u8>,
    content_type: &str,
    etag: &str,
    last_modified: Option<u64>,
    disposition: Option<&str>,
) -> Response {
    if let Some(resp) = not_modified_response(headers, etag, last_modified) {
        return resp;
    }

    let total = data.len() as u64;
    let range_header = headers.get(axum::http::header::RANGE).and_then(|v| v.to_str().ok());
    let mut response = match resolve_range(range_header, total) {
        RangeOutcome::Unsatisfiable => {
            let mut resp = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
            if let Ok(value) = format!("bytes */{total}").parse() {
                resp.headers_mut().insert("content-range", value);
            }
            return resp;
        }
        RangeOutcome::Partial(start, end) => {
            let slice = data[start as usize..=end as usize].to_vec();
            let content_range = format!("bytes {start}-{end}/{total}");
            (
                StatusCode::PARTIAL_CONTENT,
                [
                    ("content-type", content_type),
                    ("content-range", content_range.as_str()),
                    ("accept-ranges", "bytes"),
                    ("etag", etag),
                ],
                slice,
            )
                .into_response()
        }
        RangeOutcome::Full => (
            [
                ("content-type", content_type),
                ("accept-ranges", "bytes"),
                ("etag", etag),
            ],
            data,
        )
            .into_response(),
    };

    if let Some(d) = disposition {
        if let Ok(value) = d.parse() {
            response.headers_mut().insert("content-disposition", value);
        }
    }
    if let Some(secs) = last_modified {
        if let Ok(value) = format_http_date(secs).parse() {
            response.headers_mut().insert(axum::http::header::LAST_MODIFIED, value);
        }
    }
    response
}

fn metadata_response(ctx: &RequestCtx, path: &Path, meta: &std::fs::Metadata) -> Response {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let kind = if meta.is_dir() { "dir" } else { "file" };
    let size = if meta.is_file() { Some(meta.len()) } else { None };
    let mtime = meta
        .modified()
        .ok()
        .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs());
    let mime = wsb_domain::mime::guess(path);
    let data = serde_json::json!({
        "name": name, "kind": kind, "size": size, "last_modified": mtime, "mime": mime,
    });
    if ctx.json() {
        responses::success(data)
    } else {
        axum::Json(data).into_response()
    }
}

async fn archive_landing(ctx: &RequestCtx, path: &Path) -> Result<Response> {
    let mime = wsb_domain::mime::guess(path);
    let base = ctx.path.trim_end_matches('/').to_string();
    if wsb_domain::mime::is_htz(&mime) {
        return Ok(Redirect::to(&format!("/{base}!/index.html")).into_response());
    }
    let pages = {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || maff::get_maff_pages(&path))
            .await
            .map_err(|e| Error::internal(e.to_string()))??
    };
    match pages.as_slice() {
        [] => Ok((
            [("content-type", "text/html; charset=utf-8")],
            "<!doctype html><title>Empty archive</title><p>No pages found.</p>",
        )
            .into_response()),
        [only] => {
            let index_path = only.index_filename.as_deref().unwrap_or("index.html");
            Ok(Redirect::to(&format!("/{base}!/{index_path}")).into_response())
        }
        many => {
            let mut items = String::new();
            for p in many {
                let title = p.title.as_deref().unwrap_or("(untitled)");
                let href = p.index_filename.as_deref().unwrap_or("index.html");
                items.push_str(&format!(
                    "<li><a href=\"/{base}!/{href}\">{}</a></li>\n",
                    html_escape(title)
                ));
            }
            Ok((
                [("content-type", "text/html; charset=utf-8")],
                format!("<!doctype html><title>Choose a page</title><ul>\n{items}</ul>"),
            )
                .into_response())
        }
    }
}

fn render_markdown(text: &str) -> String {
    let parser = pulldown_cmark::Parser::new(text);
    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    format!("<!doctype html><meta charset=\"utf-8\"><body>{html}</body>")
}

async fn stream_file(headers: &HeaderMap, path: &Path, mime: &str, as_source: bool) -> Result<Response> {
    let path = path.to_path_buf();
    let (bytes, meta) = tokio::task::spawn_blocking({
        let path = path.clone();
        move || -> std::io::Result<(Vec<u8>, std::fs::Metadata)> {
            let meta = std::fs::metadata(&path)?;
            let bytes = std::fs::read(&path)?;
            Ok((bytes, meta))
        }
    })
    .await
    .map_err(|e| Error::internal(e.to_string()))??;

    let content_type = if as_source {
        "text/plain; charset=utf-8".to_string()
    } else {
        strip_charset(mime)
    };
    let mtime = meta
        .modified()
        .ok()
        .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let etag = format!(
        "\"{}-{}-{:x}\"",
        mtime,
        bytes.len(),
        adler32::adler32(std::io::Cursor::new(&bytes)).unwrap_or(0)
    );
    let disposition = as_source.then_some("inline");

    Ok(byte_response(headers, bytes, &content_type, &etag, Some(mtime), disposition))
}

fn strip_charset(mime: &str) -> String {
    mime.split(';').next().unwrap_or(mime).trim().to_string()
}

fn normalize_charset(e: &str) -> String {
    if e.is_empty() {
        "utf-8".to_string()
    } else {
        e.to_string()
    }
}

fn archive_etag(archive_path: &Path, entry_mtime: u64, size: u64) -> String {
    let archive_mtime = std::fs::metadata(archive_path)
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(entry_mtime);
    let checksum = adler32::adler32(std::io::Cursor::new(archive_path.as_os_str().to_string_lossy().as_bytes()))
        .unwrap_or(0);
    format!("\"{archive_mtime}-{size}-{checksum:x}\"")
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

// ── list ─────────────────────────────────────────────────────────────────

async fn list(ctx: &RequestCtx) -> Result<Response> {
    if ctx.format().is_none() {
        return Err(Error::BadRequest("list requires a format parameter".into()));
    }
    let resolved = resolver::resolve(&ctx.state.root, &ctx.path);
    let recursive = ctx.recursive();
    let entries: Vec<Entry> = match resolved {
        Resolved::None => return Err(Error::Forbidden("path escapes the namespace root".into())),
        Resolved::Physical(path) => {
            let infos = tokio::task::spawn_blocking(move || listing::list_dir(&path, recursive))
                .await
                .map_err(|e| Error::internal(e.to_string()))??;
            infos.iter().map(Entry::from).collect()
        }
        Resolved::Archive {
            archive_path,
            inner_path,
        } => {
            let entries = tokio::task::spawn_blocking(move || archive::list_dir(&archive_path, &inner_path))
                .await
                .map_err(|e| Error::internal(e.to_string()))??;
            entries.iter().map(Entry::from).collect()
        }
    };
    Ok(render_listing(ctx, &ctx.path, entries, None))
}

// ── static ───────────────────────────────────────────────────────────────

async fn static_file(ctx: &RequestCtx) -> Result<Response> {
    let rel = ctx.path.trim_start_matches('/');
    for dir in ctx.state.theme_static_dirs.iter() {
        let candidate = dir.join(rel);
        if candidate.is_file() {
            let mime = wsb_domain::mime::guess(&candidate);
            return stream_file(&ctx.headers, &candidate, &mime, false).await;
        }
    }
    Err(Error::NotFound(format!("static asset '{rel}' not found")))
}

// ── edit / editx ─────────────────────────────────────────────────────────

async fn edit(ctx: &RequestCtx) -> Result<Response> {
    let bytes = read_target_bytes(ctx).await?;
    let encoding = ctx.encoding();
    let text = decode_best_effort(&bytes, &encoding);
    Ok(editor_page(&ctx.path, &text, false))
}

async fn editx(ctx: &RequestCtx) -> Result<Response> {
    let resolved = resolver::resolve(&ctx.state.root, &ctx.path);
    let mime = match &resolved {
        Resolved::Physical(p) => wsb_domain::mime::guess(p),
        Resolved::Archive { inner_path, .. } => wsb_domain::mime::guess(Path::new(inner_path)),
        Resolved::None => return Err(Error::Forbidden("path escapes the namespace root".into())),
    };
    if !wsb_domain::mime::is_html(&mime) {
        return Err(Error::BadRequest(
            "editx only applies to HTML/XHTML targets".into(),
        ));
    }
    let bytes = read_target_bytes(ctx).await?;
    let text = decode_best_effort(&bytes, &ctx.encoding());
    Ok(editor_page(&ctx.path, &text, true))
}

async fn read_target_bytes(ctx: &RequestCtx) -> Result<Vec<u8>> {
    match resolver::resolve(&ctx.state.root, &ctx.path) {
        Resolved::None => Err(Error::Forbidden("path escapes the namespace root".into())),
        Resolved::Physical(path) => tokio::task::spawn_blocking(move || std::fs::read(&path))
            .await
            .map_err(|e| Error::internal(e.to_string()))?
            .map_err(Error::from),
        Resolved::Archive {
            archive_path,
            inner_path,
        } => tokio::task::spawn_blocking(move || archive::read_entry(&archive_path, &inner_path))
            .await
            .map_err(|e| Error::internal(e.to_string()))?,
    }
}

/// Decodes `bytes` as `encoding`, falling back to a lossless ISO-8859-1
/// byte-to-codepoint mapping so editing never fails on non-UTF-8 content.
fn decode_best_effort(bytes: &[u8], encoding: &str) -> String {
    if encoding.eq_ignore_ascii_case("utf-8") || encoding.is_empty() {
        if let Ok(s) = std::str::from_utf8(bytes) {
            return s.to_string();
        }
    }
    bytes.iter().map(|&b| b as char).collect()
}

fn editor_page(path: &str, text: &str, html_mode: bool) -> Response {
    let html = format!(
        "<!doctype html><meta charset=\"utf-8\"><title>Edit {path}</title>\n\
         <form method=\"post\" action=\"/{path}?a=save&format=json\">\n\
         <textarea name=\"text\" data-html-mode=\"{html_mode}\" rows=\"30\" cols=\"100\">{}</textarea>\n\
         <button type=\"submit\">Save</button>\n</form>",
        html_escape_full(text),
    );
    ([("content-type", "text/html; charset=utf-8")], html).into_response()
}

fn html_escape_full(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

// ── exec / browse ────────────────────────────────────────────────────────

/// `exec` launches the target itself; `browse` opens its parent directory
/// with the target selected, falling back to launching the parent when the
/// platform has no "select in explorer" command.
async fn exec_or_browse(ctx: &RequestCtx, browse: bool) -> Result<Response> {
    if !is_local_peer(ctx) {
        return Err(Error::Forbidden(
            "exec/browse is only available to local-access peers".into(),
        ));
    }
    let path = physical_source(ctx)?;
    let exists = tokio::task::spawn_blocking({
        let path = path.clone();
        move || path.symlink_metadata().is_ok()
    })
    .await
    .map_err(|e| Error::internal(e.to_string()))?;
    if !exists {
        return Err(Error::NotFound(format!("{}", path.display())));
    }

    tokio::task::spawn_blocking(move || {
        if browse {
            view_in_explorer(&path)
        } else {
            launch(&path)
        }
    })
    .await
    .map_err(|e| Error::internal(e.to_string()))?;

    if ctx.format().is_some() {
        return Ok(responses::success(serde_json::json!("Command run successfully.")));
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(target_os = "windows")]
fn launch(path: &Path) {
    let _ = std::process::Command::new("cmd")
        .args(["/C", "start", "", "/B"])
        .arg(path)
        .spawn();
}

#[cfg(target_os = "macos")]
fn launch(path: &Path) {
    let _ = std::process::Command::new("open").arg(path).spawn();
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn launch(path: &Path) {
    let _ = std::process::Command::new("xdg-open").arg(path).spawn();
}

#[cfg(target_os = "windows")]
fn view_in_explorer(path: &Path) {
    let mut arg = std::ffi::OsString::from("/select,");
    arg.push(path.as_os_str());
    let _ = std::process::Command::new("explorer").arg(arg).spawn();
}

#[cfg(target_os = "macos")]
fn view_in_explorer(path: &Path) {
    if std::process::Command::new("open")
        .args(["-R"])
        .arg(path)
        .spawn()
        .is_err()
    {
        if let Some(parent) = path.parent() {
            launch(parent);
        }
    }
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn view_in_explorer(path: &Path) {
    if std::process::Command::new("nautilus")
        .args(["--select"])
        .arg(path)
        .spawn()
        .is_err()
    {
        if let Some(parent) = path.parent() {
            launch(parent);
        }
    }
}

/// `true` when the client and server are the same host. Translated from
/// `is_local_access`, which compares the host segment of the effective
/// `Host` header against the effective remote address: either one being a
/// loopback name, or the two being textually equal, counts as local. The
/// "effective" values come from `X-Forwarded-Host`/`X-Forwarded-For` only
/// when the corresponding trust count allows it; otherwise they fall back
/// to the real `Host` header and the real TCP peer, which a client behind
/// no proxy cannot spoof.
fn is_local_peer(ctx: &RequestCtx) -> bool {
    let app = &ctx.state.config.app;

    let server_host = forwarded_header(&ctx.headers, "x-forwarded-host", app.allowed_x_host)
        .or_else(|| {
            ctx.headers
                .get(axum::http::header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
        .unwrap_or_default();
    let server_host = server_host.split(':').next().unwrap_or("").to_string();

    let client_host = forwarded_header(&ctx.headers, "x-forwarded-for", app.allowed_x_for)
        .unwrap_or_else(|| ctx.peer_addr.ip().to_string());

    is_localhost(&server_host) || is_localhost(&client_host) || server_host == client_host
}

fn is_localhost(host: &str) -> bool {
    matches!(host, "127.0.0.1" | "::1" | "localhost") || host.starts_with("127.")
}

/// Reads the right-most trusted hop out of a (possibly multi-valued)
/// forwarded header, per the corresponding `allowed_x_*` trust count: a
/// proxy chain is read right-to-left, trusting only as many hops as
/// configured, matching `ProxyFix`'s `x_for`/`x_host`/`x_proto`/`x_port`
/// hop counting.
fn forwarded_header(headers: &HeaderMap, name: &str, trust: u32) -> Option<String> {
    if trust == 0 {
        return None;
    }
    let raw = headers.get(name)?.to_str().ok()?;
    let hops: Vec<&str> = raw.split(',').map(|s| s.trim()).collect();
    let idx = hops.len().checked_sub(trust as usize)?;
    hops.get(idx).map(|s| s.to_string())
}

/// Computes the effective `app.base` the client should treat the app as
/// mounted under: the configured value if set, otherwise a mount prefix
/// derived from a trusted `X-Forwarded-Prefix`, extended to a full origin
/// when a trusted `X-Forwarded-Proto` is also present. Translated from
/// `request.script_root` as computed by `ProxyFix` from the same set of
/// forwarded headers (`x_proto`/`x_host`/`x_port`/`x_prefix`).
fn effective_base(ctx: &RequestCtx) -> String {
    let app = &ctx.state.config.app;
    if !app.base.is_empty() {
        return app.base.clone();
    }

    let prefix = forwarded_header(&ctx.headers, "x-forwarded-prefix", app.allowed_x_prefix)
        .map(|p| format!("/{}", p.trim_matches('/')))
        .unwrap_or_default();

    let Some(scheme) = forwarded_header(&ctx.headers, "x-forwarded-proto", app.allowed_x_proto)
    else {
        return prefix;
    };
    let host = forwarded_header(&ctx.headers, "x-forwarded-host", app.allowed_x_host)
        .unwrap_or_else(|| ctx.state.config.server.host.clone());
    let port = forwarded_header(&ctx.headers, "x-forwarded-port", app.allowed_x_port)
        .map(|p| format!(":{p}"))
        .unwrap_or_default();
    format!("{scheme}://{host}{port}{prefix}")
}

// ── config ───────────────────────────────────────────────────────────────

async fn config_action(ctx: &RequestCtx) -> Result<Response> {
    let cfg = &ctx.state.config;
    let data = serde_json::json!({
        "app": {
            "name": cfg.app.name,
            "theme": cfg.app.theme,
            "base": effective_base(ctx),
            "is_local": is_local_peer(ctx),
        },
        "VERSION": env!("CARGO_PKG_VERSION"),
        "WSB_DIR": ".wsb",
    });
    Ok(responses::success(data))
}

// ── token ────────────────────────────────────────────────────────────────

async fn token_action(ctx: &RequestCtx) -> Result<Response> {
    let store = ctx.state.tokens.clone();
    let token = tokio::task::spawn_blocking(move || store.acquire())
        .await
        .map_err(|e| Error::internal(e.to_string()))??;
    Ok(responses::success(serde_json::json!({ "token": token })))
}

// ── lock / unlock ────────────────────────────────────────────────────────

async fn lock_action(ctx: &RequestCtx) -> Result<Response> {
    require_advanced(ctx).await?;
    let name = ctx
        .name()
        .ok_or_else(|| Error::BadRequest("missing name parameter".into()))?
        .to_string();
    let chks = ctx.chks();
    let chkt = ctx.chkt();
    ctx.state.locks.acquire(&name, chks, chkt).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn unlock_action(ctx: &RequestCtx) -> Result<Response> {
    require_advanced(ctx).await?;
    let name = ctx
        .name()
        .ok_or_else(|| Error::BadRequest("missing name parameter".into()))?
        .to_string();
    let locks = ctx.state.locks.clone();
    tokio::task::spawn_blocking(move || locks.release(&name))
        .await
        .map_err(|e| Error::internal(e.to_string()))??;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ── mkdir ────────────────────────────────────────────────────────────────

async fn mkdir_action(ctx: &RequestCtx) -> Result<Response> {
    require_advanced(ctx).await?;
    require_writing(ctx)?;
    match resolver::resolve(&ctx.state.root, &ctx.path) {
        Resolved::None => Err(Error::Forbidden("path escapes the namespace root".into())),
        Resolved::Physical(path) => {
            tokio::task::spawn_blocking(move || std::fs::create_dir_all(&path))
                .await
                .map_err(|e| Error::internal(e.to_string()))??;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        Resolved::Archive {
            archive_path,
            inner_path,
        } => {
            tokio::task::spawn_blocking(move || archive::mkdir_entry(&archive_path, &inner_path))
                .await
                .map_err(|e| Error::internal(e.to_string()))??;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

// ── save ─────────────────────────────────────────────────────────────────

async fn save_action(ctx: &RequestCtx, body: axum::body::Bytes) -> Result<Response> {
    require_advanced(ctx).await?;
    require_writing(ctx)?;

    let content_type = ctx
        .headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let data = if content_type.starts_with("multipart/form-data") {
        extract_multipart_field(content_type, &body, "upload")
            .ok_or_else(|| Error::BadRequest("missing 'upload' field".into()))?
    } else {
        extract_form_field(&body, "text")
            .ok_or_else(|| Error::BadRequest("missing 'text' field".into()))?
    };

    match resolver::resolve(&ctx.state.root, &ctx.path) {
        Resolved::None => Err(Error::Forbidden("path escapes the namespace root".into())),
        Resolved::Physical(path) => {
            tokio::task::spawn_blocking(move || -> Result<()> {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, &data)?;
                Ok(())
            })
            .await
            .map_err(|e| Error::internal(e.to_string()))??;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        Resolved::Archive {
            archive_path,
            inner_path,
        } => {
            tokio::task::spawn_blocking(move || archive::write_entry(&archive_path, &inner_path, &data))
                .await
                .map_err(|e| Error::internal(e.to_string()))??;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

/// Finds `field=<percent-encoded bytes>` in an `application/x-www-form-urlencoded`
/// body and percent-decodes it straight to raw bytes, so the saved content is
/// byte-identical to what the client intended even when it isn't valid UTF-8.
fn extract_form_field(body: &[u8], field: &str) -> Option<Vec<u8>> {
    let body = std::str::from_utf8(body).ok()?;
    for pair in body.split('&') {
        let (k, v) = pair.split_once('=')?;
        if k == field {
            return Some(percent_decode_bytes(v));
        }
    }
    None
}

fn percent_decode_bytes(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

/// Minimal multipart/form-data scan for a single named field, used instead
/// of a streaming extractor since the body is already buffered for the
/// urlencoded branch above.
fn extract_multipart_field(content_type: &str, body: &[u8], field: &str) -> Option<Vec<u8>> {
    let boundary = content_type.split("boundary=").nth(1)?.trim_matches('"');
    let delimiter = format!("--{boundary}").into_bytes();
    let needle = format!("name=\"{field}\"");

    for part in split_on(body, &delimiter) {
        if let Some(header_end) = find_subslice(part, b"\r\n\r\n") {
            let header = String::from_utf8_lossy(&part[..header_end]);
            if header.contains(&needle) {
                let mut content = &part[header_end + 4..];
                if content.ends_with(b"\r\n") {
                    content = &content[..content.len() - 2];
                }
                return Some(content.to_vec());
            }
        }
    }
    None
}

fn split_on<'a>(haystack: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
    let mut parts = Vec::new();
    let mut rest = haystack;
    while let Some(pos) = find_subslice(rest, delimiter) {
        if pos > 0 {
            parts.push(&rest[..pos]);
        }
        rest = &rest[pos + delimiter.len()..];
    }
    parts.push(rest);
    parts
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ── delete ───────────────────────────────────────────────────────────────

async fn delete_action(ctx: &RequestCtx) -> Result<Response> {
    require_advanced(ctx).await?;
    require_writing(ctx)?;
    match resolver::resolve(&ctx.state.root, &ctx.path) {
        Resolved::None => Err(Error::Forbidden("path escapes the namespace root".into())),
        Resolved::Physical(path) => {
            tokio::task::spawn_blocking(move || -> Result<()> {
                let meta = std::fs::symlink_metadata(&path).map_err(|_| {
                    Error::NotFound(format!("{}", path.display()))
                })?;
                if meta.is_dir() {
                    std::fs::remove_dir_all(&path)?;
                } else {
                    std::fs::remove_file(&path)?;
                }
                Ok(())
            })
            .await
            .map_err(|e| Error::internal(e.to_string()))??;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        Resolved::Archive {
            archive_path,
            inner_path,
        } => {
            tokio::task::spawn_blocking(move || archive::delete_entry(&archive_path, &inner_path))
                .await
                .map_err(|e| Error::internal(e.to_string()))??;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

// ── move / copy ──────────────────────────────────────────────────────────

async fn move_action(ctx: &RequestCtx) -> Result<Response> {
    require_advanced(ctx).await?;
    require_writing(ctx)?;
    let dest = require_renaming(ctx)?;
    let src = physical_source(ctx)?;
    tokio::task::spawn_blocking(move || -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&src, &dest)?;
        Ok(())
    })
    .await
    .map_err(|e| Error::internal(e.to_string()))??;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn copy_action(ctx: &RequestCtx) -> Result<Response> {
    require_advanced(ctx).await?;
    require_writing(ctx)?;
    let dest = require_renaming(ctx)?;
    let src = physical_source(ctx)?;
    tokio::task::spawn_blocking(move || -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        copy_recursive(&src, &dest)
    })
    .await
    .map_err(|e| Error::internal(e.to_string()))??;
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn physical_source(ctx: &RequestCtx) -> Result<PathBuf> {
    match resolver::resolve(&ctx.state.root, &ctx.path) {
        Resolved::Physical(p) => Ok(p),
        Resolved::Archive { .. } => Err(Error::Forbidden(
            "move/copy only operates on physical paths".into(),
        )),
        Resolved::None => Err(Error::Forbidden("path escapes the namespace root".into())),
    }
}

fn copy_recursive(src: &Path, dst: &Path) -> Result<()> {
    let meta = std::fs::symlink_metadata(src)?;
    if meta.is_dir() {
        std::fs::create_dir_all(dst)?;
        for entry in std::fs::read_dir(src)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        std::fs::copy(src, dst)?;
    }
    Ok(())
}
