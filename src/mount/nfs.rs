//! NFSv3 facade over the tree.
//!
//! The wire protocol itself comes from the `nfsserve` crate; this
//! module adapts its `NFSFileSystem` trait onto the tree + opener
//! contract. Every mutating operation answers `NFS3ERR_ROFS`.
//!
//! The listener has to bind before the index is built (the bound port
//! feeds the `.cz/listen_addr` pseudo-file), so the filesystem state
//! sits behind a `OnceLock` that is populated between bind and serve.
//! No RPC is processed until the serve loop starts.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use nfsserve::nfs::{
    fattr3, fileid3, filename3, ftype3, nfspath3, nfsstat3, nfstime3, sattr3, specdata3,
};
use nfsserve::vfs::{DirEntry, NFSFileSystem, ReadDirResult, VFSCapabilities};

use crate::zip::{S_IFDIR, S_IFLNK, S_IFMT};

use super::file::FileHandle;
use super::tree::{file_id_for, FileInfo, Tree};

/// Bounds the number of materialized member handles kept open.
pub const DEFAULT_HANDLE_CACHE_SIZE: usize = 1_000_000;

struct NfsInner {
    tree: Tree,
    paths_by_id: HashMap<fileid3, String>,
    handles: Mutex<LruCache<fileid3, Arc<FileHandle>>>,
}

#[derive(Clone)]
pub struct ZipNfs {
    inner: Arc<OnceLock<NfsInner>>,
    handle_cache_size: usize,
}

impl ZipNfs {
    pub fn new(handle_cache_size: usize) -> Self {
        Self { inner: Arc::new(OnceLock::new()), handle_cache_size }
    }

    /// Install the built tree. Must happen before the serve loop starts
    /// handling RPCs; calling it twice is a bug.
    pub fn install(&self, tree: Tree) {
        let paths_by_id =
            tree.iter().map(|(path, info)| (info.file_id, path.clone())).collect();
        let capacity =
            NonZeroUsize::new(self.handle_cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        let installed = self.inner.set(NfsInner {
            tree,
            paths_by_id,
            handles: Mutex::new(LruCache::new(capacity)),
        });
        debug_assert!(installed.is_ok(), "tree installed twice");
    }

    fn state(&self) -> Result<&NfsInner, nfsstat3> {
        self.inner.get().ok_or(nfsstat3::NFS3ERR_IO)
    }

    fn node(&self, id: fileid3) -> Result<&Arc<FileInfo>, nfsstat3> {
        let inner = self.state()?;
        let path = inner.paths_by_id.get(&id).ok_or(nfsstat3::NFS3ERR_STALE)?;
        inner.tree.stat(path).ok_or(nfsstat3::NFS3ERR_NOENT)
    }

    async fn content_handle(&self, id: fileid3, node: &FileInfo) -> Result<Arc<FileHandle>, nfsstat3> {
        let inner = self.state()?;
        if let Some(handle) = inner.handles.lock().map_err(|_| nfsstat3::NFS3ERR_IO)?.get(&id) {
            return Ok(handle.clone());
        }
        let handle = Arc::new(node.open().await.map_err(|err| {
            tracing::warn!(path = %node.full_path, error = %err, "open failed");
            nfsstat3::NFS3ERR_IO
        })?);
        inner
            .handles
            .lock()
            .map_err(|_| nfsstat3::NFS3ERR_IO)?
            .put(id, handle.clone());
        Ok(handle)
    }
}

fn to_nfstime(t: DateTime<Utc>) -> nfstime3 {
    nfstime3 { seconds: t.timestamp().max(0) as u32, nseconds: t.timestamp_subsec_nanos() }
}

fn to_fattr(node: &FileInfo) -> fattr3 {
    let ftype = match node.mode & S_IFMT {
        S_IFDIR => ftype3::NF3DIR,
        S_IFLNK => ftype3::NF3LNK,
        _ => ftype3::NF3REG,
    };
    fattr3 {
        ftype,
        mode: node.mode & 0o7777,
        nlink: 1,
        uid: node.uid,
        gid: node.gid,
        size: node.size,
        used: node.size,
        rdev: specdata3 { specdata1: 0, specdata2: 0 },
        fsid: 0,
        fileid: node.file_id,
        atime: to_nfstime(node.mtime),
        mtime: to_nfstime(node.mtime),
        ctime: to_nfstime(node.mtime),
    }
}

fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..i],
        None => "",
    }
}

#[async_trait]
impl NFSFileSystem for ZipNfs {
    fn root_dir(&self) -> fileid3 {
        file_id_for("")
    }

    fn capabilities(&self) -> VFSCapabilities {
        VFSCapabilities::ReadOnly
    }

    async fn lookup(&self, dirid: fileid3, filename: &filename3) -> Result<fileid3, nfsstat3> {
        let inner = self.state()?;
        let dir_path = inner.paths_by_id.get(&dirid).ok_or(nfsstat3::NFS3ERR_STALE)?;
        let name = std::str::from_utf8(&filename[..]).map_err(|_| nfsstat3::NFS3ERR_NOENT)?;
        match name {
            "." => Ok(dirid),
            ".." => Ok(file_id_for(parent_path(dir_path))),
            _ => {
                let children = inner.tree.readdir(dir_path).ok_or(nfsstat3::NFS3ERR_NOTDIR)?;
                children
                    .iter()
                    .find(|child| child.name() == name)
                    .map(|child| child.file_id)
                    .ok_or(nfsstat3::NFS3ERR_NOENT)
            }
        }
    }

    async fn getattr(&self, id: fileid3) -> Result<fattr3, nfsstat3> {
        Ok(to_fattr(self.node(id)?))
    }

    async fn setattr(&self, _id: fileid3, _setattr: sattr3) -> Result<fattr3, nfsstat3> {
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn read(
        &self,
        id: fileid3,
        offset: u64,
        count: u32,
    ) -> Result<(Vec<u8>, bool), nfsstat3> {
        let node = self.node(id)?.clone();
        if node.is_dir() {
            return Err(nfsstat3::NFS3ERR_ISDIR);
        }
        let handle = self.content_handle(id, &node).await?;
        let data = tokio::task::spawn_blocking(move || handle.read_range(offset, count as usize))
            .await
            .map_err(|_| nfsstat3::NFS3ERR_IO)?
            .map_err(|_| nfsstat3::NFS3ERR_IO)?;
        let eof = offset + data.len() as u64 >= node.size;
        Ok((data, eof))
    }

    async fn write(&self, _id: fileid3, _offset: u64, _data: &[u8]) -> Result<fattr3, nfsstat3> {
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn create(
        &self,
        _dirid: fileid3,
        _filename: &filename3,
        _attr: sattr3,
    ) -> Result<(fileid3, fattr3), nfsstat3> {
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn create_exclusive(
        &self,
        _dirid: fileid3,
        _filename: &filename3,
    ) -> Result<fileid3, nfsstat3> {
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn mkdir(
        &self,
        _dirid: fileid3,
        _dirname: &filename3,
    ) -> Result<(fileid3, fattr3), nfsstat3> {
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn remove(&self, _dirid: fileid3, _filename: &filename3) -> Result<(), nfsstat3> {
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn rename(
        &self,
        _from_dirid: fileid3,
        _from_filename: &filename3,
        _to_dirid: fileid3,
        _to_filename: &filename3,
    ) -> Result<(), nfsstat3> {
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn readdir(
        &self,
        dirid: fileid3,
        start_after: fileid3,
        max_entries: usize,
    ) -> Result<ReadDirResult, nfsstat3> {
        let inner = self.state()?;
        let dir_path = inner.paths_by_id.get(&dirid).ok_or(nfsstat3::NFS3ERR_STALE)?;
        let children = inner.tree.readdir(dir_path).ok_or(nfsstat3::NFS3ERR_NOTDIR)?;

        let skip = if start_after == 0 {
            0
        } else {
            match children.iter().position(|c| c.file_id == start_after) {
                Some(i) => i + 1,
                None => return Err(nfsstat3::NFS3ERR_BAD_COOKIE),
            }
        };
        let remaining = &children[skip.min(children.len())..];
        let entries: Vec<DirEntry> = remaining
            .iter()
            .take(max_entries)
            .map(|child| DirEntry {
                fileid: child.file_id,
                name: child.name().as_bytes().to_vec().into(),
                attr: to_fattr(child),
            })
            .collect();
        let end = entries.len() == remaining.len();
        Ok(ReadDirResult { entries, end })
    }

    async fn symlink(
        &self,
        _dirid: fileid3,
        _linkname: &filename3,
        _symlink: &nfspath3,
        _attr: &sattr3,
    ) -> Result<(fileid3, fattr3), nfsstat3> {
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn readlink(&self, id: fileid3) -> Result<nfspath3, nfsstat3> {
        let node = self.node(id)?.clone();
        if !node.is_symlink() {
            return Err(nfsstat3::NFS3ERR_INVAL);
        }
        // The member body of a symlink entry is its target path.
        let handle = node.open().await.map_err(|_| nfsstat3::NFS3ERR_IO)?;
        let target = tokio::task::spawn_blocking(move || handle.read_range(0, node.size as usize))
            .await
            .map_err(|_| nfsstat3::NFS3ERR_IO)?
            .map_err(|_| nfsstat3::NFS3ERR_IO)?;
        Ok(target.into())
    }
}
