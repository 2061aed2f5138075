//! WebDAV facade over the tree.
//!
//! A deliberately small, read-only subset served under the `/mount`
//! prefix: OPTIONS, HEAD, GET (honoring a single byte range) and
//! PROPFIND with Depth 0/1. Every write verb gets 405. This is all the
//! OS WebDAV clients need to browse and read.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};

use super::file::FileHandle;
use super::tree::{FileInfo, Tree};

pub const MOUNT_PREFIX: &str = "/mount";

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Clone)]
struct DavState {
    tree: Arc<Tree>,
}

pub fn router(tree: Arc<Tree>) -> Router {
    Router::new().fallback(handle).with_state(DavState { tree })
}

async fn handle(State(state): State<DavState>, request: Request) -> Response {
    let method = request.method().clone();
    let raw_path = request.uri().path().to_string();
    tracing::debug!(method = %method, path = %raw_path, "webdav request");

    let Some(path) = mount_relative_path(&raw_path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match method {
        Method::OPTIONS => options_response(),
        Method::GET => serve_file(&state, &path, &request, true).await,
        Method::HEAD => serve_file(&state, &path, &request, false).await,
        _ if method.as_str() == "PROPFIND" => propfind(&state, &path, &request).await,
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

/// Strip the `/mount` prefix and percent-decode the remainder.
fn mount_relative_path(raw: &str) -> Option<String> {
    let rest = raw.strip_prefix(MOUNT_PREFIX)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    let decoded = percent_decode_str(rest).decode_utf8().ok()?;
    Some(decoded.trim_matches('/').to_string())
}

fn options_response() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("Allow", "OPTIONS, GET, HEAD, PROPFIND")
        .header("DAV", "1")
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn httpdate(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse a single `bytes=a-b` range against a known size, returning the
/// inclusive offsets. Multi-range and suffix forms fall back to a full
/// response.
fn parse_range(header_value: &str, size: u64) -> Option<(u64, u64)> {
    let spec = header_value.strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (from, to) = spec.split_once('-')?;
    let start: u64 = from.parse().ok()?;
    let end: u64 = if to.is_empty() { size.checked_sub(1)? } else { to.parse().ok()? };
    if start > end || end >= size {
        return None;
    }
    Some((start, end))
}

fn handle_body(handle: Arc<FileHandle>, offset: u64, length: u64) -> Body {
    let chunks = stream::unfold(
        (handle, offset, length),
        |(handle, offset, remaining)| async move {
            if remaining == 0 {
                return None;
            }
            let count = remaining.min(STREAM_CHUNK_SIZE as u64) as usize;
            let reader = handle.clone();
            let read = tokio::task::spawn_blocking(move || reader.read_range(offset, count)).await;
            let data = match read {
                Ok(Ok(data)) => data,
                Ok(Err(err)) => {
                    return Some((
                        Err(std::io::Error::other(err.to_string())),
                        (handle, offset, 0),
                    ))
                }
                Err(err) => return Some((Err(std::io::Error::other(err)), (handle, offset, 0))),
            };
            if data.is_empty() {
                return None;
            }
            let advanced = data.len() as u64;
            Some((Ok(Bytes::from(data)), (handle, offset + advanced, remaining - advanced)))
        },
    );
    Body::from_stream(chunks)
}

async fn serve_file(state: &DavState, path: &str, request: &Request, with_body: bool) -> Response {
    let Some(node) = state.tree.stat(path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if node.is_dir() {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let size = node.size;

    let range = request
        .headers()
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_range(v, size));

    let handle = match node.open().await {
        Ok(handle) => Arc::new(handle),
        Err(err) => {
            tracing::warn!(path, error = %err, "webdav open failed");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::LAST_MODIFIED, httpdate(node.mtime));

    let (status, offset, length) = match range {
        Some((start, end)) => {
            builder = builder.header(
                header::CONTENT_RANGE,
                format!("bytes {start}-{end}/{size}"),
            );
            (StatusCode::PARTIAL_CONTENT, start, end - start + 1)
        }
        None => (StatusCode::OK, 0, size),
    };
    builder = builder.status(status).header(header::CONTENT_LENGTH, length);

    let body = if with_body { handle_body(handle, offset, length) } else { Body::empty() };
    builder.body(body).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

fn href_for(path: &str, is_dir: bool) -> String {
    let mut href = String::from(MOUNT_PREFIX);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        href.push('/');
        href.push_str(&utf8_percent_encode(segment, NON_ALPHANUMERIC).to_string());
    }
    if is_dir {
        href.push('/');
    }
    href
}

fn response_fragment(node: &FileInfo) -> String {
    let resourcetype = if node.is_dir() { "<D:collection/>" } else { "" };
    format!(
        concat!(
            "<D:response><D:href>{href}</D:href>",
            "<D:propstat><D:prop>",
            "<D:displayname>{name}</D:displayname>",
            "<D:resourcetype>{rtype}</D:resourcetype>",
            "<D:getcontentlength>{len}</D:getcontentlength>",
            "<D:getlastmodified>{mtime}</D:getlastmodified>",
            "</D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat>",
            "</D:response>"
        ),
        href = xml_escape(&href_for(&node.full_path, node.is_dir())),
        name = xml_escape(node.name()),
        rtype = resourcetype,
        len = node.size,
        mtime = httpdate(node.mtime),
    )
}

async fn propfind(state: &DavState, path: &str, request: &Request) -> Response {
    let Some(node) = state.tree.stat(path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let depth = request
        .headers()
        .get("Depth")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("infinity");
    if depth != "0" && depth != "1" {
        // Unbounded listings are refused, matching common server policy.
        return StatusCode::FORBIDDEN.into_response();
    }

    let mut body = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?><D:multistatus xmlns:D=\"DAV:\">");
    body.push_str(&response_fragment(node));
    if depth == "1" && node.is_dir() {
        if let Some(children) = state.tree.readdir(path) {
            for child in &children {
                body.push_str(&response_fragment(child));
            }
        }
    }
    body.push_str("</D:multistatus>");

    Response::builder()
        .status(StatusCode::MULTI_STATUS)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml; charset=utf-8"),
        )
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_parsing() {
        assert_eq!(parse_range("bytes=0-4", 10), Some((0, 4)));
        assert_eq!(parse_range("bytes=5-", 10), Some((5, 9)));
        assert_eq!(parse_range("bytes=5-100", 10), None);
        assert_eq!(parse_range("bytes=0-1,3-4", 10), None);
        assert_eq!(parse_range("items=0-4", 10), None);
    }

    #[test]
    fn mount_prefix_is_required() {
        assert_eq!(mount_relative_path("/mount/a/b.txt").as_deref(), Some("a/b.txt"));
        assert_eq!(mount_relative_path("/mount").as_deref(), Some(""));
        assert_eq!(mount_relative_path("/mount/").as_deref(), Some(""));
        assert!(mount_relative_path("/other/a").is_none());
        assert!(mount_relative_path("/mountx/a").is_none());
    }

    #[test]
    fn hrefs_are_percent_encoded() {
        assert_eq!(href_for("a dir/file one.txt", false), "/mount/a%20dir/file%20one%2Etxt");
    }
}
