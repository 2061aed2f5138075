//! HTTP proxy mode: `GET /<relpath>?filename=<member>` resolves the
//! archive at `<uri-prefix>/<relpath>` and streams the member back.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio_util::io::ReaderStream;

use crate::remote;
use crate::zip::CentralDirectoryParser;

#[derive(Clone)]
struct ProxyState {
    uri_prefix: String,
}

pub async fn run(uri_prefix: &str, listen: &str) -> anyhow::Result<()> {
    let state = ProxyState { uri_prefix: uri_prefix.trim_end_matches('/').to_string() };
    let app = Router::new().fallback(handle).with_state(state);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    println!("HTTP server listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await.context("error running HTTP server")?;
    Ok(())
}

async fn handle(
    State(state): State<ProxyState>,
    Query(params): Query<HashMap<String, String>>,
    request: Request,
) -> Response {
    let object_path = request.uri().path();
    let internal_path = params.get("filename").map(String::as_str).unwrap_or("");
    tracing::debug!(object_path, internal_path, "proxy request");

    let uri = format!("{}{}", state.uri_prefix, object_path);
    let fetcher = match remote::object(&uri).await {
        Ok(fetcher) => Arc::new(fetcher),
        Err(err) => {
            tracing::warn!(uri, error = %err, "could not open zip file");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let parser = CentralDirectoryParser::new(fetcher);
    match parser.read(internal_path).await {
        Ok(reader) => Body::from_stream(ReaderStream::new(reader)).into_response(),
        Err(err) if err.is_not_found() => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            tracing::warn!(uri, error = %err, "error reading zip file from upstream");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}
