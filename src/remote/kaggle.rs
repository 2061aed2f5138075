//! `kaggle://` adapter: resolves a dataset to its signed download URL
//! and range-fetches over plain HTTP.
//!
//! URIs look like `kaggle://owner/dataset-slug`. The API responds to an
//! authenticated download request with a redirect to a time-limited
//! signed URL; that URL is cached and refreshed with a safety margin so
//! concurrent readers never race a stale link.

use chrono::{DateTime, Duration, Utc};
use reqwest::{redirect, Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

use async_trait::async_trait;

use super::http::range_request;
use super::{ByteStream, Fetcher};
use crate::error::{Error, Result};

const KAGGLE_CONFIG: &str = ".kaggle/kaggle.json";
const KAGGLE_KEY_FILE_ENV_VAR: &str = "KAGGLE_KEY_FILE";
const KAGGLE_API_ENDPOINT: &str = "https://www.kaggle.com/api/v1";

/// Refresh the signed URL at least this many minutes before it expires.
const REFRESH_MARGIN_MINUTES: i64 = 5;
/// Signed URLs that carry no expiry are assumed valid this long.
const DEFAULT_VALIDITY_MINUTES: i64 = 30;

#[derive(Deserialize)]
struct KaggleCredentials {
    username: String,
    key: String,
}

struct SignedUrl {
    url: String,
    expires_at: DateTime<Utc>,
}

pub struct KaggleFetcher {
    client: Client,
    api_url: String,
    signed: Mutex<Option<SignedUrl>>,
}

fn credentials() -> Result<KaggleCredentials> {
    let path = match std::env::var(KAGGLE_KEY_FILE_ENV_VAR) {
        Ok(p) if !p.is_empty() => std::path::PathBuf::from(p),
        _ => dirs::home_dir()
            .ok_or_else(|| Error::InvalidUri("cannot locate home directory".to_string()))?
            .join(KAGGLE_CONFIG),
    };
    let data = std::fs::read(&path)?;
    serde_json::from_slice(&data)
        .map_err(|err| Error::Io(std::io::Error::other(format!("{}: {err}", path.display()))))
}

impl KaggleFetcher {
    pub fn new(url: &Url) -> Result<Self> {
        let slug = url
            .host_str()
            .ok_or_else(|| Error::InvalidUri(format!("{url}: missing dataset owner")))?;
        let dataset = url.path().trim_start_matches('/');
        if dataset.is_empty() {
            return Err(Error::InvalidUri(format!("{url}: missing dataset name")));
        }
        Ok(Self {
            client: Client::builder().build()?,
            api_url: format!("{KAGGLE_API_ENDPOINT}/datasets/download/{slug}/{dataset}"),
            signed: Mutex::new(None),
        })
    }

    /// Ask the API for the current signed download URL. Redirects are
    /// disabled so the `Location` can be captured instead of followed.
    async fn resolve_signed_url(&self) -> Result<SignedUrl> {
        let creds = credentials()?;
        let client = Client::builder().redirect(redirect::Policy::none()).build()?;
        let response = client
            .get(&self.api_url)
            .basic_auth(&creds.username, Some(&creds.key))
            .send()
            .await?;
        if response.status() != StatusCode::FOUND {
            tracing::warn!(url = %self.api_url, status = %response.status(), "kaggle.resolve");
            return Err(Error::NotFound);
        }
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(Error::NotFound)?
            .to_string();
        let expires_at = signed_url_expiry(&location)
            .unwrap_or_else(|| Utc::now() + Duration::minutes(DEFAULT_VALIDITY_MINUTES));
        tracing::debug!(url = %self.api_url, %expires_at, "kaggle.resolve: refreshed signed url");
        Ok(SignedUrl { url: location, expires_at })
    }

    async fn signed_url(&self) -> Result<String> {
        let mut guard = self.signed.lock().await;
        if let Some(cached) = guard.as_ref() {
            if Utc::now() + Duration::minutes(REFRESH_MARGIN_MINUTES) < cached.expires_at {
                return Ok(cached.url.clone());
            }
        }
        let fresh = self.resolve_signed_url().await?;
        let url = fresh.url.clone();
        *guard = Some(fresh);
        Ok(url)
    }
}

/// Best-effort expiry extraction from a signed URL's query string
/// (`Expires=<unix>` for GCS-style links, `X-Amz-Date` + `X-Amz-Expires`
/// for SigV4 ones).
fn signed_url_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let url = Url::parse(raw).ok()?;
    let mut amz_date: Option<DateTime<Utc>> = None;
    let mut amz_expires: Option<i64> = None;
    for (k, v) in url.query_pairs() {
        match &*k {
            "Expires" => {
                let ts = v.parse::<i64>().ok()?;
                return DateTime::from_timestamp(ts, 0);
            }
            "X-Amz-Date" => {
                amz_date = chrono::NaiveDateTime::parse_from_str(&v, "%Y%m%dT%H%M%SZ")
                    .ok()
                    .map(|t| t.and_utc());
            }
            "X-Amz-Expires" => amz_expires = v.parse().ok(),
            _ => {}
        }
    }
    match (amz_date, amz_expires) {
        (Some(date), Some(secs)) => Some(date + Duration::seconds(secs)),
        _ => None,
    }
}

#[async_trait]
impl Fetcher for KaggleFetcher {
    async fn fetch(&self, start: Option<u64>, end: Option<u64>) -> Result<ByteStream> {
        let url = self.signed_url().await?;
        let request = self.client.get(&url);
        range_request(request, &self.api_url, start, end).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_from_gcs_style_query() {
        let url = "https://storage.example.com/blob?Expires=1700000000&Signature=abc";
        let expires = signed_url_expiry(url).unwrap();
        assert_eq!(expires, DateTime::from_timestamp(1_700_000_000, 0).unwrap());
    }

    #[test]
    fn expiry_from_sigv4_query() {
        let url =
            "https://bucket.s3.amazonaws.com/blob?X-Amz-Date=20240101T000000Z&X-Amz-Expires=3600";
        let expires = signed_url_expiry(url).unwrap();
        let start = chrono::NaiveDateTime::parse_from_str("20240101T000000Z", "%Y%m%dT%H%M%SZ")
            .unwrap()
            .and_utc();
        assert_eq!(expires, start + Duration::seconds(3600));
    }

    #[test]
    fn no_expiry_hint_yields_none() {
        assert!(signed_url_expiry("https://example.com/blob?sig=x").is_none());
    }
}
