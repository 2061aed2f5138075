//! Range fetchers for remote (and local) archives.
//!
//! Every scheme adapter implements [`Fetcher`]: a single `fetch`
//! operation that returns a byte stream for an inclusive range of the
//! object, mirroring HTTP `Range: bytes=a-b` semantics:
//!
//! - both bounds set: exactly `[start, end]`
//! - start only: from `start` to the end of the object
//! - end only: the *last* `end` bytes (suffix range)
//! - neither: the entire object
//!
//! [`object`] is the registry: it parses the URI scheme and constructs
//! the matching adapter.

mod http;
mod kaggle;
mod lakefs;
mod local;
mod s3;

pub use http::HttpFetcher;
pub use kaggle::KaggleFetcher;
pub use lakefs::LakeFsFetcher;
pub use local::{InMemoryFetcher, LocalFetcher};
pub use s3::S3Fetcher;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use url::Url;

use crate::error::{Error, Result};

/// A readable stream of bytes coming back from a range fetch.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Random-range access to a single remote object.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch an inclusive byte range of the object.
    async fn fetch(&self, start: Option<u64>, end: Option<u64>) -> Result<ByteStream>;
}

/// The set of supported scheme adapters.
pub enum Remote {
    S3(S3Fetcher),
    Local(LocalFetcher),
    Http(HttpFetcher),
    Kaggle(KaggleFetcher),
    LakeFs(LakeFsFetcher),
}

/// Construct the fetcher matching the URI's scheme.
///
/// Fails with [`Error::InvalidUri`] when the URI does not parse or the
/// scheme has no registered adapter.
pub async fn object(uri: &str) -> Result<Remote> {
    let parsed = Url::parse(uri).map_err(|_| Error::InvalidUri(uri.to_string()))?;
    match parsed.scheme() {
        "s3" | "s3a" => Ok(Remote::S3(S3Fetcher::new(&parsed).await?)),
        "file" | "local" => Ok(Remote::Local(LocalFetcher::new(&parsed))),
        "http" | "https" => Ok(Remote::Http(HttpFetcher::new(uri)?)),
        "kaggle" => Ok(Remote::Kaggle(KaggleFetcher::new(&parsed)?)),
        "lakefs" => Ok(Remote::LakeFs(LakeFsFetcher::new(&parsed).await?)),
        scheme => Err(Error::InvalidUri(format!("unknown scheme: {scheme}"))),
    }
}

#[async_trait]
impl Fetcher for Remote {
    async fn fetch(&self, start: Option<u64>, end: Option<u64>) -> Result<ByteStream> {
        match self {
            Remote::S3(f) => f.fetch(start, end).await,
            Remote::Local(f) => f.fetch(start, end).await,
            Remote::Http(f) => f.fetch(start, end).await,
            Remote::Kaggle(f) => f.fetch(start, end).await,
            Remote::LakeFs(f) => f.fetch(start, end).await,
        }
    }
}

/// Render the `Range` header value for the given bounds, or `None` for
/// a whole-object request. The same string is accepted by S3.
pub(crate) fn range_header(start: Option<u64>, end: Option<u64>) -> Option<String> {
    match (start, end) {
        (Some(s), Some(e)) => Some(format!("bytes={s}-{e}")),
        (Some(s), None) => Some(format!("bytes={s}-")),
        (None, Some(e)) => Some(format!("bytes=-{e}")),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_header_bounds() {
        assert_eq!(range_header(Some(0), Some(99)).as_deref(), Some("bytes=0-99"));
        assert_eq!(range_header(Some(10), None).as_deref(), Some("bytes=10-"));
        assert_eq!(range_header(None, Some(5)).as_deref(), Some("bytes=-5"));
        assert_eq!(range_header(None, None), None);
    }

    #[tokio::test]
    async fn unknown_scheme_is_invalid_uri() {
        let err = object("gopher://example.com/a.zip").await.unwrap_err();
        assert!(matches!(err, Error::InvalidUri(_)));
    }

}
