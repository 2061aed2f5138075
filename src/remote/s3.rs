//! `s3://` adapter over the AWS SDK.

use std::time::Instant;

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use url::Url;

use super::{range_header, ByteStream, Fetcher};
use crate::error::{Error, Result};

const DEFAULT_REGION: &str = "us-east-1";

pub struct S3Fetcher {
    client: Client,
    bucket: String,
    key: String,
}

impl S3Fetcher {
    pub async fn new(url: &Url) -> Result<Self> {
        let bucket = url
            .host_str()
            .ok_or_else(|| Error::InvalidUri(format!("{url}: missing bucket")))?
            .to_string();
        let key = url.path().trim_start_matches('/').to_string();
        let region = RegionProviderChain::default_provider().or_else(DEFAULT_REGION);
        let config = aws_config::defaults(BehaviorVersion::latest()).region(region).load().await;
        Ok(Self { client: Client::new(&config), bucket, key })
    }
}

#[async_trait]
impl Fetcher for S3Fetcher {
    async fn fetch(&self, start: Option<u64>, end: Option<u64>) -> Result<ByteStream> {
        let range = range_header(start, end);
        let began = Instant::now();
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .set_range(range.clone())
            .send()
            .await;
        let took_ms = began.elapsed().as_millis() as u64;
        match result {
            Ok(output) => {
                tracing::debug!(bucket = %self.bucket, key = %self.key, ?range, took_ms, "s3.get_object");
                Ok(Box::new(output.body.into_async_read()))
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    tracing::warn!(bucket = %self.bucket, key = %self.key, ?range, took_ms, "s3.get_object: not found");
                    return Err(Error::NotFound);
                }
                tracing::error!(bucket = %self.bucket, key = %self.key, ?range, took_ms, error = %service_err, "s3.get_object");
                Err(Error::Io(std::io::Error::other(service_err)))
            }
        }
    }
}
