//! `lakefs://` adapter.
//!
//! URIs look like `lakefs://repository/ref/path/to/archive.zip`. When
//! the installation supports pre-signing, object reads go through a
//! cached pre-signed physical address (refreshed with a safety margin);
//! otherwise they hit the objects endpoint directly with basic auth.

use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

use async_trait::async_trait;

use super::http::range_request;
use super::{ByteStream, Fetcher};
use crate::error::{Error, Result};

const DEFAULT_CONFIG_LOCATION: &str = ".lakectl.yaml";
const CONFIG_ENV_VAR: &str = "LAKECTL_CONFIG";
const API_PREFIX: &str = "/api/v1";
const ENV_ACCESS_KEY_ID: &str = "LAKECTL_ACCESS_KEY_ID";
const ENV_SECRET_ACCESS_KEY: &str = "LAKECTL_SECRET_ACCESS_KEY";
const ENV_ENDPOINT_URL: &str = "LAKECTL_ENDPOINT_URL";

/// Refresh the pre-signed URL at least this many minutes before expiry.
const REFRESH_MARGIN_MINUTES: i64 = 5;

#[derive(Deserialize, Default, Clone)]
struct Config {
    credentials: Credentials,
    server: Server,
}

#[derive(Deserialize, Default, Clone)]
struct Credentials {
    access_key_id: String,
    secret_access_key: String,
}

#[derive(Deserialize, Default, Clone)]
struct Server {
    endpoint_url: String,
}

#[derive(Deserialize)]
struct InstallationConfig {
    storage_config: StorageConfig,
}

#[derive(Deserialize)]
struct StorageConfig {
    pre_sign_support: bool,
}

#[derive(Deserialize)]
struct ObjectStats {
    physical_address: String,
    physical_address_expiry: Option<i64>,
}

struct ParsedUri {
    repo: String,
    reference: String,
    object: String,
}

struct CachedUrl {
    url: String,
    expires: Option<DateTime<Utc>>,
}

pub struct LakeFsFetcher {
    client: Client,
    config: Config,
    addr: ParsedUri,
    pre_sign_supported: bool,
    cached: Mutex<Option<CachedUrl>>,
}

fn load_config_from_env() -> Result<Config> {
    let access_key_id = std::env::var(ENV_ACCESS_KEY_ID).unwrap_or_default();
    let secret_access_key = std::env::var(ENV_SECRET_ACCESS_KEY).unwrap_or_default();
    let endpoint_url = std::env::var(ENV_ENDPOINT_URL).unwrap_or_default();
    if access_key_id.is_empty() || secret_access_key.is_empty() || endpoint_url.is_empty() {
        return Err(Error::InvalidUri("no lakeFS configuration found".to_string()));
    }
    Ok(Config {
        credentials: Credentials { access_key_id, secret_access_key },
        server: Server { endpoint_url },
    })
}

fn load_config() -> Result<Config> {
    let location = match std::env::var(CONFIG_ENV_VAR) {
        Ok(p) if !p.is_empty() => std::path::PathBuf::from(p),
        _ => dirs::home_dir()
            .ok_or_else(|| Error::InvalidUri("cannot locate home directory".to_string()))?
            .join(DEFAULT_CONFIG_LOCATION),
    };
    let mut config = match std::fs::read(&location) {
        Ok(data) => serde_yaml::from_slice::<Config>(&data)
            .map_err(|err| Error::Io(std::io::Error::other(format!("{}: {err}", location.display()))))?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return load_config_from_env(),
        Err(err) => return Err(err.into()),
    };
    let endpoint = config.server.endpoint_url.trim_end_matches('/');
    config.server.endpoint_url = if endpoint.ends_with(API_PREFIX) {
        endpoint.to_string()
    } else {
        format!("{endpoint}{API_PREFIX}")
    };
    Ok(config)
}

fn parse_uri(url: &Url) -> Result<ParsedUri> {
    let repo = url
        .host_str()
        .ok_or_else(|| Error::InvalidUri(format!("{url}: missing repository")))?
        .to_string();
    let path = url.path().trim_start_matches('/');
    let (reference, object) = path
        .split_once('/')
        .ok_or_else(|| Error::InvalidUri(format!("{url}: expected ref/path")))?;
    if reference.is_empty() || object.is_empty() {
        return Err(Error::InvalidUri(format!("{url}: expected ref/path")));
    }
    Ok(ParsedUri { repo, reference: reference.to_string(), object: object.to_string() })
}

impl LakeFsFetcher {
    pub async fn new(url: &Url) -> Result<Self> {
        let config = load_config()?;
        let addr = parse_uri(url)?;
        let client = Client::builder().build()?;
        let pre_sign_supported = can_pre_sign(&client, &config).await?;
        Ok(Self { client, config, addr, pre_sign_supported, cached: Mutex::new(None) })
    }

    /// Stat the object with `presign=true` to obtain a time-limited
    /// physical address.
    async fn stat_presigned(&self) -> Result<CachedUrl> {
        let stat_url = format!(
            "{}/repositories/{}/refs/{}/objects/stat",
            self.config.server.endpoint_url, self.addr.repo, self.addr.reference
        );
        let response = self
            .client
            .get(&stat_url)
            .basic_auth(
                &self.config.credentials.access_key_id,
                Some(&self.config.credentials.secret_access_key),
            )
            .query(&[("path", self.addr.object.as_str()), ("presign", "true")])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound);
        }
        if !response.status().is_success() {
            return Err(Error::Io(std::io::Error::other(format!(
                "lakeFS API error: got HTTP {} getting object URL",
                response.status()
            ))));
        }
        let stats: ObjectStats = response.json().await?;
        let expires = stats
            .physical_address_expiry
            .filter(|ts| *ts != 0)
            .and_then(|ts| DateTime::from_timestamp(ts, 0));
        if expires.is_none() {
            return Err(Error::Io(std::io::Error::other(
                "lakeFS API error: could not get pre-signed URL",
            )));
        }
        Ok(CachedUrl { url: stats.physical_address, expires })
    }

    async fn presigned_url(&self) -> Result<String> {
        let mut guard = self.cached.lock().await;
        if let Some(cached) = guard.as_ref() {
            let fresh = match cached.expires {
                Some(expires) => Utc::now() + Duration::minutes(REFRESH_MARGIN_MINUTES) < expires,
                None => true,
            };
            if fresh {
                return Ok(cached.url.clone());
            }
        }
        let refreshed = self.stat_presigned().await?;
        tracing::debug!(repo = %self.addr.repo, object = %self.addr.object, "lakefs: refreshed pre-signed url");
        let url = refreshed.url.clone();
        *guard = Some(refreshed);
        Ok(url)
    }

    /// Non-pre-signing installations stream the object straight from
    /// the API with basic auth.
    async fn direct_fetch(&self, start: Option<u64>, end: Option<u64>) -> Result<ByteStream> {
        let object_url = format!(
            "{}/repositories/{}/refs/{}/objects",
            self.config.server.endpoint_url, self.addr.repo, self.addr.reference
        );
        let request = self
            .client
            .get(&object_url)
            .basic_auth(
                &self.config.credentials.access_key_id,
                Some(&self.config.credentials.secret_access_key),
            )
            .query(&[("path", self.addr.object.as_str()), ("presign", "false")]);
        range_request(request, &object_url, start, end).await
    }
}

async fn can_pre_sign(client: &Client, config: &Config) -> Result<bool> {
    let config_url = format!("{}/config", config.server.endpoint_url);
    let response = client
        .get(&config_url)
        .basic_auth(
            &config.credentials.access_key_id,
            Some(&config.credentials.secret_access_key),
        )
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(Error::Io(std::io::Error::other(format!(
            "lakeFS API error: got HTTP {} getting server config",
            response.status()
        ))));
    }
    let installation: InstallationConfig = response.json().await?;
    Ok(installation.storage_config.pre_sign_support)
}

#[async_trait]
impl Fetcher for LakeFsFetcher {
    async fn fetch(&self, start: Option<u64>, end: Option<u64>) -> Result<ByteStream> {
        if !self.pre_sign_supported {
            return self.direct_fetch(start, end).await;
        }
        let url = self.presigned_url().await?;
        let request = self.client.get(&url);
        range_request(request, &url, start, end).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_splits_repo_ref_object() {
        let url = Url::parse("lakefs://my-repo/main/data/archive.zip").unwrap();
        let parsed = parse_uri(&url).unwrap();
        assert_eq!(parsed.repo, "my-repo");
        assert_eq!(parsed.reference, "main");
        assert_eq!(parsed.object, "data/archive.zip");
    }

    #[test]
    fn uri_without_object_is_invalid() {
        let url = Url::parse("lakefs://my-repo/main").unwrap();
        assert!(matches!(parse_uri(&url), Err(Error::InvalidUri(_))));
    }
}
