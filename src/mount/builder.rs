//! Assemble the mountable tree for a remote archive.
//!
//! Parses the central directory once, wires every member to a
//! cache-first opener, adds the `.cz/` pseudo-files, and seals the
//! result behind the tree's integrity check.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use crate::error::Result;
use crate::remote;
use crate::zip::{CentralDirectoryParser, S_IFDIR};

use super::cache::FileCache;
use super::opener::MemberOpener;
use super::pseudo::pseudo_file;
use super::tree::{immutable_info, FileInfo, Opener, Tree};

#[cfg(unix)]
pub(crate) fn process_uid() -> u32 {
    unsafe { libc::getuid() }
}

#[cfg(unix)]
pub(crate) fn process_gid() -> u32 {
    unsafe { libc::getgid() }
}

#[cfg(not(unix))]
pub(crate) fn process_uid() -> u32 {
    0
}

#[cfg(not(unix))]
pub(crate) fn process_gid() -> u32 {
    0
}

/// Build the tree for `uri`, caching member content under `cache_dir`.
///
/// `attrs` become extra read-only `.cz/<key>` pseudo-files alongside
/// the standard `server.pid`, `cachedir` and `source`.
pub async fn build_zip_tree(
    cache_dir: &Path,
    uri: &str,
    attrs: &BTreeMap<String, String>,
) -> Result<Tree> {
    let fetcher = Arc::new(remote::object(uri).await?);
    let parser = CentralDirectoryParser::new(fetcher.clone());
    let records = parser.get_central_directory().await?;

    let start_time = Utc::now();
    let uid = process_uid();
    let gid = process_gid();
    let cache = Arc::new(FileCache::new(cache_dir));

    let mut infos: Vec<Arc<FileInfo>> = Vec::with_capacity(records.len() + attrs.len() + 3);
    for record in records {
        let opener: Option<Arc<dyn Opener>> = if record.is_dir() {
            None
        } else {
            Some(Arc::new(MemberOpener::new(
                uri.to_string(),
                record.clone(),
                fetcher.clone(),
                cache.clone(),
            )))
        };
        infos.push(Arc::new(immutable_info(
            &record.file_name,
            record.modified,
            record.mode,
            record.uncompressed_size_bytes,
            uid,
            gid,
            opener,
        )));
    }

    let pid = std::process::id().to_string();
    let cache_dir_text = cache_dir.display().to_string();
    infos.push(Arc::new(pseudo_file(".cz/server.pid", pid.into_bytes(), start_time, uid, gid)));
    infos.push(Arc::new(pseudo_file(
        ".cz/cachedir",
        cache_dir_text.into_bytes(),
        start_time,
        uid,
        gid,
    )));
    infos.push(Arc::new(pseudo_file(
        ".cz/source",
        uri.as_bytes().to_vec(),
        start_time,
        uid,
        gid,
    )));
    for (key, value) in attrs {
        infos.push(Arc::new(pseudo_file(
            &format!(".cz/{key}"),
            value.as_bytes().to_vec(),
            start_time,
            uid,
            gid,
        )));
    }

    infos.sort_by(|a, b| a.full_path.cmp(&b.full_path));

    Tree::index(infos, &move |entry: &str| {
        immutable_info(entry, start_time, S_IFDIR | 0o755, 64, uid, gid, None)
    })
}
