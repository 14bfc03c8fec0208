//! Renders a directory listing (physical or archive) as HTML, a JSON array,
//! or a server-sent-events stream. The entry shape is the lowest common
//! denominator of `wsb_engine::listing::FileInfo` and
//! `wsb_engine::archive::FileEntry`.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_core::Stream;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    pub name: String,
    pub kind: &'static str,
    pub size: Option<u64>,
    pub last_modified: Option<u64>,
}

impl From<&wsb_engine::listing::FileInfo> for Entry {
    fn from(f: &wsb_engine::listing::FileInfo) -> Self {
        Entry {
            name: f.name.clone(),
            kind: match f.kind {
                wsb_engine::listing::Kind::Dir => "dir",
                wsb_engine::listing::Kind::File => "file",
                wsb_engine::listing::Kind::Link => "link",
                wsb_engine::listing::Kind::Unknown => "unknown",
            },
            size: f.size,
            last_modified: f.last_modified,
        }
    }
}

impl From<&wsb_engine::archive::FileEntry> for Entry {
    fn from(f: &wsb_engine::archive::FileEntry) -> Self {
        Entry {
            name: f.name.clone(),
            kind: match f.kind {
                wsb_engine::archive::EntryKind::Dir => "dir",
                wsb_engine::archive::EntryKind::File => "file",
                wsb_engine::archive::EntryKind::Absent => "unknown",
            },
            size: f.size,
            last_modified: f.last_modified,
        }
    }
}

/// Self-contained HTML listing: a breadcrumb built from `base_path`, then a
/// row per entry. No template engine — the original renders from a Jinja
/// template; this renders the equivalent markup directly in Rust.
pub fn render_html(base_path: &str, entries: &[Entry]) -> String {
    let mut rows = String::new();
    for e in entries {
        let href = if e.kind == "dir" {
            format!("{}/", escape(&e.name))
        } else {
            escape(&e.name)
        };
        let size = e
            .size
            .map(|s| wsb_engine::listing::format_filesize(s, false))
            .unwrap_or_default();
        let mtime = e.last_modified.map(|t| t.to_string()).unwrap_or_default();
        rows.push_str(&format!(
            "<tr><td class=\"name\"><a href=\"{href}\">{name}</a></td><td class=\"kind\">{kind}</td><td class=\"size\">{size}</td><td class=\"mtime\">{mtime}</td></tr>\n",
            href = href,
            name = escape(&e.name),
            kind = e.kind,
        ));
    }
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>{path}</title></head>\n\
         <body>\n<h1>Index of {path}</h1>\n<table>\n<thead><tr><th>Name</th><th>Type</th><th>Size</th><th>Modified</th></tr></thead>\n\
         <tbody>\n{rows}</tbody>\n</table>\n</body></html>\n",
        path = escape(base_path),
    )
}

pub fn render_json(entries: &[Entry]) -> serde_json::Value {
    serde_json::to_value(entries).unwrap_or(serde_json::Value::Array(vec![]))
}

/// Content hash of a listing, usable as an ETag even when no single mtime
/// covers the whole directory (e.g. an archive directory, whose entries
/// come from scattered zip-entry timestamps rather than one inode).
pub fn listing_etag(base_path: &str, entries: &[Entry]) -> String {
    let mut buf = String::with_capacity(entries.len() * 32);
    buf.push_str(base_path);
    for e in entries {
        buf.push('\0');
        buf.push_str(&e.name);
        buf.push('\0');
        buf.push_str(e.kind);
        buf.push('\0');
        buf.push_str(&e.size.map(|s| s.to_string()).unwrap_or_default());
        buf.push('\0');
        buf.push_str(&e.last_modified.map(|t| t.to_string()).unwrap_or_default());
    }
    let checksum = adler32::adler32(std::io::Cursor::new(buf.as_bytes())).unwrap_or(0);
    format!("\"{:x}-{}\"", checksum, entries.len())
}

/// Streams one `data: <json entry>` line per entry, followed by a terminal
/// `event: complete` line, matching the original's chunked SSE listing
/// response.
pub fn sse_response(entries: Vec<Entry>) -> Response {
    let stream = make_entry_stream(entries);
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

fn make_entry_stream(entries: Vec<Entry>) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        for entry in entries {
            let data = serde_json::to_string(&entry).unwrap_or_default();
            yield Ok(Event::default().data(data));
        }
        yield Ok(Event::default().event("complete").data(""));
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, kind: &'static str) -> Entry {
        Entry {
            name: name.to_string(),
            kind,
            size: Some(3),
            last_modified: Some(0),
        }
    }

    #[test]
    fn html_listing_contains_every_entry_name() {
        let html = render_html("/sub/", &[entry("a.txt", "file"), entry("b", "dir")]);
        assert!(html.contains("a.txt"));
        assert!(html.contains("b/"));
    }

    #[test]
    fn html_escapes_entry_names() {
        let html = render_html("/", &[entry("<script>", "file")]);
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn json_listing_is_an_array_of_entries() {
        let value = render_json(&[entry("a.txt", "file")]);
        assert!(value.is_array());
        assert_eq!(value[0]["name"], "a.txt");
    }
}
