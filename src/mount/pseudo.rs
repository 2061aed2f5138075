//! In-memory pseudo-files exposed under the reserved `.cz/` subtree.
//!
//! These participate in the tree as first-class nodes; their bytes live
//! in process memory and die with it.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::zip::S_IFREG;

use super::file::FileHandle;
use super::tree::{immutable_info, FileInfo, Opener};

struct MemOpener {
    content: Bytes,
}

#[async_trait]
impl Opener for MemOpener {
    async fn open(&self) -> Result<FileHandle> {
        Ok(FileHandle::Mem(self.content.clone()))
    }
}

pub fn pseudo_file(
    path: &str,
    content: impl Into<Bytes>,
    mtime: DateTime<Utc>,
    uid: u32,
    gid: u32,
) -> FileInfo {
    let content = content.into();
    immutable_info(
        path,
        mtime,
        S_IFREG | 0o644,
        content.len() as u64,
        uid,
        gid,
        Some(Arc::new(MemOpener { content })),
    )
}
