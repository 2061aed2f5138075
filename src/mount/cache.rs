//! Content-addressed on-disk cache of fully materialized members.
//!
//! Writers stage into `<key>-w` and publish with an atomic rename, so
//! readers only ever observe a missing entry or a complete one. Two
//! writers racing on the same key both publish byte-identical content
//! (the key encodes the member's CRC), so the rename that loses changes
//! nothing.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::error::{Error, Result};

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open a published entry, or [`Error::NotFound`].
    pub fn get(&self, key: &str) -> Result<std::fs::File> {
        match std::fs::File::open(self.dir.join(key)) {
            Ok(f) => Ok(f),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    /// Copy `content` into the cache and publish it under `key`.
    ///
    /// `expected_size == 0` means the size is unknown and any byte count
    /// is accepted. On a copy error or a size mismatch the staging file
    /// is removed; no partial entry ever appears under `key`.
    ///
    /// The `-w` staging name carries a per-writer suffix so concurrent
    /// fillers of the same key each publish a complete copy; whichever
    /// rename lands last replaces identical bytes.
    pub async fn set(
        &self,
        key: &str,
        mut content: impl AsyncRead + Unpin,
        expected_size: u64,
    ) -> Result<std::fs::File> {
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        let staging = self.dir.join(format!("{key}-w{}-{seq}", std::process::id()));
        let mut out = tokio::fs::File::create(&staging).await?;
        let copied = match tokio::io::copy(&mut content, &mut out).await {
            Ok(n) => n,
            Err(err) => {
                drop(out);
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(err.into());
            }
        };
        out.flush().await?;
        drop(out);
        if expected_size > 0 && copied != expected_size {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("cache write for {key}: expected {expected_size} bytes, copied {copied}"),
            )));
        }
        tokio::fs::rename(&staging, self.dir.join(key)).await?;
        self.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn staging_files(dir: &Path, key: &str) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with(&format!("{key}-w")))
            .collect()
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        cache.set("k1", &b"hello cache"[..], 11).await.unwrap();

        let mut out = String::new();
        cache.get("k1").unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello cache");
        assert!(staging_files(dir.path(), "k1").is_empty());
    }

    #[tokio::test]
    async fn size_mismatch_removes_staging_and_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        let err = cache.set("k2", &b"short"[..], 100).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(!dir.path().join("k2").exists());
        assert!(staging_files(dir.path(), "k2").is_empty());
        assert!(matches!(cache.get("k2"), Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn unknown_expected_size_accepts_any_count() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        cache.set("k3", &b"whatever"[..], 0).await.unwrap();
        assert!(cache.get("k3").is_ok());
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        assert!(matches!(cache.get("absent"), Err(Error::NotFound)));
    }
}
