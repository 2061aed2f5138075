//! `http(s)://` adapter using HTTP Range requests.

use std::time::Instant;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::{Client, StatusCode};
use tokio_util::io::StreamReader;

use super::{range_header, ByteStream, Fetcher};
use crate::error::{Error, Result};

pub struct HttpFetcher {
    client: Client,
    url: String,
}

impl HttpFetcher {
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self { client: Client::builder().build()?, url: url.to_string() })
    }
}

/// Send a GET with an optional Range header and hand the body back as a
/// stream. Shared by the adapters that resolve down to plain HTTP
/// (kaggle and lakeFS pre-signed URLs included).
pub(crate) async fn range_request(
    request: reqwest::RequestBuilder,
    url: &str,
    start: Option<u64>,
    end: Option<u64>,
) -> Result<ByteStream> {
    let request = match range_header(start, end) {
        Some(range) => request.header(reqwest::header::RANGE, range),
        None => request,
    };
    let began = Instant::now();
    let response = request.send().await?;
    let took_ms = began.elapsed().as_millis() as u64;
    if response.status() == StatusCode::NOT_FOUND {
        tracing::warn!(url, took_ms, "http.get: not found");
        return Err(Error::NotFound);
    }
    let response = response.error_for_status()?;
    tracing::debug!(url, took_ms, status = %response.status(), "http.get");
    let stream = response
        .bytes_stream()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err));
    Ok(Box::new(StreamReader::new(stream)))
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, start: Option<u64>, end: Option<u64>) -> Result<ByteStream> {
        let request = self.client.get(&self.url);
        range_request(request, &self.url, start, end).await
    }
}
