//! `file://` adapter reading from the local filesystem.
//!
//! Suffix ranges are served by seeking from the end of the file, so the
//! adapter never needs a separate size probe.

use std::io::{Cursor, SeekFrom};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use url::Url;

use super::{ByteStream, Fetcher};
use crate::error::{Error, Result};

pub struct LocalFetcher {
    path: PathBuf,
}

impl LocalFetcher {
    /// `file://testdata/archive.zip` resolves to `testdata/archive.zip`:
    /// the URL host (if any) is the first path component.
    pub fn new(url: &Url) -> Self {
        let mut raw = PathBuf::new();
        if let Some(host) = url.host_str() {
            raw.push(host);
        }
        raw.push(url.path().trim_start_matches('/'));
        Self { path: clean_path(&raw) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn clean_path(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in p.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[async_trait]
impl Fetcher for LocalFetcher {
    async fn fetch(&self, start: Option<u64>, end: Option<u64>) -> Result<ByteStream> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound)
            }
            Err(err) => return Err(err.into()),
        };
        let size = file.metadata().await?.len();
        match (start, end) {
            (Some(s), Some(e)) => {
                file.seek(SeekFrom::Start(s)).await?;
                Ok(Box::new(file.take(e + 1 - s)))
            }
            (Some(s), None) => {
                file.seek(SeekFrom::Start(s)).await?;
                Ok(Box::new(file))
            }
            (None, Some(n)) => {
                file.seek(SeekFrom::Start(size.saturating_sub(n))).await?;
                Ok(Box::new(file))
            }
            (None, None) => Ok(Box::new(file)),
        }
    }
}

/// A fetcher over a byte buffer, for exercising the parser without
/// touching the filesystem.
pub struct InMemoryFetcher {
    data: Vec<u8>,
}

impl InMemoryFetcher {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

#[async_trait]
impl Fetcher for InMemoryFetcher {
    async fn fetch(&self, start: Option<u64>, end: Option<u64>) -> Result<ByteStream> {
        let len = self.data.len() as u64;
        let (from, to) = match (start, end) {
            (Some(s), Some(e)) => (s.min(len), (e + 1).min(len)),
            (Some(s), None) => (s.min(len), len),
            (None, Some(n)) => (len.saturating_sub(n), len),
            (None, None) => (0, len),
        };
        let slice = self.data[from as usize..to as usize].to_vec();
        Ok(Box::new(Cursor::new(slice)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::io::AsyncReadExt;

    async fn read_all(mut r: ByteStream) -> Vec<u8> {
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn suffix_range_equals_tail_slice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        let data: Vec<u8> = (0..446u32).map(|i| (i % 251) as u8).collect();
        std::fs::File::create(&path).unwrap().write_all(&data).unwrap();

        let url = Url::parse(&format!("file://{}", path.display())).unwrap();
        let fetcher = LocalFetcher::new(&url);

        let tail = read_all(fetcher.fetch(None, Some(5)).await.unwrap()).await;
        let explicit = read_all(fetcher.fetch(Some(441), Some(445)).await.unwrap()).await;
        assert_eq!(tail.len(), 5);
        assert_eq!(tail, explicit);
        assert_eq!(tail, &data[441..]);
    }

    #[tokio::test]
    async fn bounded_range_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"0123456789").unwrap();

        let url = Url::parse(&format!("file://{}", path.display())).unwrap();
        let fetcher = LocalFetcher::new(&url);
        let got = read_all(fetcher.fetch(Some(2), Some(4)).await.unwrap()).await;
        assert_eq!(got, b"234");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let url = Url::parse("file:///no/such/file.zip").unwrap();
        let err = LocalFetcher::new(&url).fetch(None, None).await.unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[test]
    fn url_host_is_first_component() {
        let url = Url::parse("file://testdata/regular.zip").unwrap();
        assert_eq!(LocalFetcher::new(&url).path(), Path::new("testdata/regular.zip"));
    }
}
