//! Cache-first opener for archive members.
//!
//! A cache hit hands back the local file directly; a miss streams the
//! member through the parser into the cache and returns the published
//! entry. The cache key is content-addressed, so racing fillers publish
//! identical bytes and never need a lock.

use std::sync::Arc;

use async_trait::async_trait;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::remote::Remote;
use crate::zip::{CentralDirectoryParser, Cdr};

use super::cache::FileCache;
use super::file::FileHandle;
use super::tree::Opener;

/// `sha1(archive_uri || member_path || crc32)`, hex-encoded.
pub fn cache_key(uri: &str, member_path: &str, crc32: u32) -> String {
    let mut hasher = Sha1::new();
    hasher.update(uri.as_bytes());
    hasher.update(member_path.as_bytes());
    hasher.update(crc32.to_string().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Resolve `.` and `..` segments of a `/`-separated member name.
pub fn clean_member_path(name: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in name.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

pub struct MemberOpener {
    uri: String,
    record: Cdr,
    fetcher: Arc<Remote>,
    cache: Arc<FileCache>,
}

impl MemberOpener {
    pub fn new(uri: String, record: Cdr, fetcher: Arc<Remote>, cache: Arc<FileCache>) -> Self {
        Self { uri, record, fetcher, cache }
    }
}

#[async_trait]
impl Opener for MemberOpener {
    async fn open(&self) -> Result<FileHandle> {
        let member = clean_member_path(&self.record.file_name);
        let key = cache_key(&self.uri, &member, self.record.crc32_uncompressed);
        match self.cache.get(&key) {
            Ok(file) => Ok(FileHandle::Disk(file)),
            Err(Error::NotFound) => {
                tracing::debug!(member = %member, key = %key, "cache miss, materializing member");
                let parser = CentralDirectoryParser::new(self.fetcher.clone());
                let reader = parser.reader_for_record(&self.record).await?;
                let file =
                    self.cache.set(&key, reader, self.record.uncompressed_size_bytes).await?;
                Ok(FileHandle::Disk(file))
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_and_component_sensitive() {
        let base = cache_key("s3://bucket/a.zip", "dir/file.txt", 0xdeadbeef);
        assert_eq!(base, cache_key("s3://bucket/a.zip", "dir/file.txt", 0xdeadbeef));
        assert_ne!(base, cache_key("s3://bucket/b.zip", "dir/file.txt", 0xdeadbeef));
        assert_ne!(base, cache_key("s3://bucket/a.zip", "dir/other.txt", 0xdeadbeef));
        assert_ne!(base, cache_key("s3://bucket/a.zip", "dir/file.txt", 0xdeadbeef + 1));
        assert_eq!(base.len(), 40);
    }

    #[test]
    fn member_paths_are_cleaned() {
        assert_eq!(clean_member_path("./a/b.txt"), "a/b.txt");
        assert_eq!(clean_member_path("a//b/../c.txt"), "a/c.txt");
        assert_eq!(clean_member_path("plain.txt"), "plain.txt");
    }
}
