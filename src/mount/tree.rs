//! Path-indexed in-memory tree over the archive's members.
//!
//! The builder accepts a lexicographically sorted list of entries,
//! synthesizes directories the archive never declared, and seals the
//! result behind an integrity check. After [`Tree::index`] returns the
//! structure is immutable, so queries need no locking.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::zip::{S_IFDIR, S_IFLNK, S_IFMT};

use super::file::FileHandle;

pub const DELIMITER: char = '/';

/// Deterministic 64-bit id for a tree path (FNV-1a). Stability across
/// restarts keeps NFS file handles valid when the server is respawned.
pub fn file_id_for(path: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for byte in path.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Produces an open handle for a file's content.
#[async_trait]
pub trait Opener: Send + Sync {
    async fn open(&self) -> Result<FileHandle>;
}

/// Immutable descriptor of one file or directory in the tree.
#[derive(Clone)]
pub struct FileInfo {
    /// Full path from the root, no leading or trailing slash.
    pub full_path: String,
    /// Basename override used for readdir listings.
    display_name: Option<String>,
    pub mtime: DateTime<Utc>,
    /// POSIX `st_mode` bits.
    pub mode: u32,
    pub file_id: u64,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub opener: Option<Arc<dyn Opener>>,
}

impl FileInfo {
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.full_path)
    }

    /// A copy of this descriptor presented under a different name
    /// (readdir entries display their basename, not their full path).
    pub fn as_named(&self, name: impl Into<String>) -> FileInfo {
        FileInfo { display_name: Some(name.into()), ..self.clone() }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    pub async fn open(&self) -> Result<FileHandle> {
        match &self.opener {
            Some(opener) => opener.open().await,
            None => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                format!("{}: no content to open", self.full_path),
            ))),
        }
    }
}

/// Construct a new [`FileInfo`] for members and pseudo-files; the id is
/// derived from the (trimmed) path.
#[allow(clippy::too_many_arguments)]
pub fn immutable_info(
    path: &str,
    mtime: DateTime<Utc>,
    mode: u32,
    size: u64,
    uid: u32,
    gid: u32,
    opener: Option<Arc<dyn Opener>>,
) -> FileInfo {
    let trimmed = path.trim_matches(DELIMITER).to_string();
    FileInfo {
        file_id: file_id_for(&trimmed),
        full_path: trimmed,
        display_name: None,
        mtime,
        mode,
        size,
        uid,
        gid,
        opener,
    }
}

/// All ancestor prefixes of a path, root first, the path itself last.
///
/// `dir_parts("a/b/c")` is `["", "a", "a/b", "a/b/c"]`.
pub fn dir_parts(path: &str) -> Vec<String> {
    let trimmed = path.trim_matches(DELIMITER);
    if trimmed.is_empty() || trimmed == "." {
        return vec![String::new()];
    }
    let mut parts = vec![String::new()];
    let mut accum = String::new();
    for segment in trimmed.split(DELIMITER) {
        parts.push(format!("{accum}{segment}"));
        accum = format!("{accum}{segment}{DELIMITER}");
    }
    parts
}

fn dirname(path: &str) -> &str {
    match path.rfind(DELIMITER) {
        Some(i) => &path[..i],
        None => "",
    }
}

fn basename(path: &str) -> &str {
    match path.rfind(DELIMITER) {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// The sealed tree: path → descriptor, and parent path → children.
pub struct Tree {
    files: HashMap<String, Arc<FileInfo>>,
    dirs: HashMap<String, Vec<Arc<FileInfo>>>,
}

impl Tree {
    /// Build the tree from a sorted entry list.
    ///
    /// `dir_template` supplies descriptors for directories the input
    /// never declared. An explicit directory entry for a path that is
    /// already registered means the input was unsorted or duplicated,
    /// and fails with [`Error::InvalidInput`].
    pub fn index(
        infos: Vec<Arc<FileInfo>>,
        dir_template: &dyn Fn(&str) -> FileInfo,
    ) -> Result<Tree> {
        let mut files: HashMap<String, Arc<FileInfo>> = HashMap::new();
        let mut dirs: HashMap<String, Vec<Arc<FileInfo>>> = HashMap::new();
        let mut added_to_parent: HashSet<String> = HashSet::new();

        // The root always exists, even for an empty archive.
        files.insert(String::new(), Arc::new(dir_template("")));
        dirs.insert(String::new(), Vec::new());

        for info in infos {
            let parts = dir_parts(&info.full_path);
            let terminal = parts.len() - 1;
            for (i, part) in parts.iter().enumerate() {
                let is_terminal = i == terminal;
                let node: Arc<FileInfo> = if is_terminal {
                    info.clone()
                } else {
                    match files.get(part) {
                        Some(existing) => existing.clone(),
                        None => Arc::new(dir_template(part)),
                    }
                };

                let explicit_dir = is_terminal && node.is_dir();
                let registered = files.contains_key(part);
                if (explicit_dir || !registered) && !part.is_empty() {
                    files.insert(part.clone(), node.clone());
                }
                if node.is_dir() {
                    dirs.entry(part.clone()).or_default();
                }

                if i > 0 {
                    let parent = &parts[i - 1];
                    let already_added = added_to_parent.contains(part);
                    if already_added && explicit_dir {
                        return Err(Error::InvalidInput("entries should be sorted".to_string()));
                    }
                    if !already_added {
                        dirs.entry(parent.clone()).or_default().push(node.clone());
                        added_to_parent.insert(part.clone());
                    }
                }
            }
        }

        let tree = Tree { files, dirs };
        tree.fsck()?;
        Ok(tree)
    }

    /// Verify the structure is self-consistent: the root exists and is
    /// a directory, every non-root entry appears exactly once in its
    /// parent's listing with a matching id, and every directory has a
    /// child listing.
    fn fsck(&self) -> Result<()> {
        let root = self
            .files
            .get("")
            .ok_or_else(|| Error::Integrity("could not find file entry for ''".to_string()))?;
        if !root.is_dir() {
            return Err(Error::Integrity("root entry is not a directory".to_string()));
        }
        for (path, file) in &self.files {
            if !path.is_empty() {
                let parent = dirname(path);
                let listing = self.dirs.get(parent).ok_or_else(|| {
                    Error::Integrity(format!(
                        "could not locate parent dir '{parent}' for '{path}'"
                    ))
                })?;
                let mut matches = listing.iter().filter(|child| child.name() == file.name());
                let in_parent = matches.next().ok_or_else(|| {
                    Error::Integrity(format!("no dir entry in parent '{parent}' of file '{path}'"))
                })?;
                if matches.next().is_some() {
                    return Err(Error::Integrity(format!(
                        "multiple dir entries in parent '{parent}' for file '{path}'"
                    )));
                }
                if in_parent.file_id != file.file_id {
                    return Err(Error::Integrity(format!(
                        "dir entry for '{path}' in parent '{parent}' has file_id={}, file entry has file_id={}",
                        in_parent.file_id, file.file_id
                    )));
                }
            }
            if file.is_dir() && !self.dirs.contains_key(path.as_str()) {
                return Err(Error::Integrity(format!(
                    "'{path}' is a directory, but it has no listing"
                )));
            }
        }
        Ok(())
    }

    /// Descriptor for the entry at `path`, if any.
    pub fn stat(&self, path: &str) -> Option<&Arc<FileInfo>> {
        self.files.get(path.trim_matches(DELIMITER))
    }

    /// Direct children of the directory at `path`, displayed under
    /// their basenames.
    pub fn readdir(&self, path: &str) -> Option<Vec<FileInfo>> {
        let entries = self.dirs.get(path.trim_matches(DELIMITER))?;
        Some(entries.iter().map(|e| e.as_named(basename(&e.full_path))).collect())
    }

    /// Every registered descriptor, for building id lookup tables.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<FileInfo>)> {
        self.files.iter()
    }

    #[cfg(test)]
    pub(crate) fn corrupt_listing_for_test(&mut self, parent: &str) {
        if let Some(children) = self.dirs.get_mut(parent) {
            children.clear();
        }
    }

    #[cfg(test)]
    pub(crate) fn check_integrity_for_test(&self) -> Result<()> {
        self.fsck()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::S_IFREG;

    fn dir_template(uid: u32, gid: u32) -> impl Fn(&str) -> FileInfo {
        move |entry: &str| {
            immutable_info(entry, Utc::now(), S_IFDIR | 0o755, 64, uid, gid, None)
        }
    }

    fn file_entry(path: &str, mode: u32) -> Arc<FileInfo> {
        Arc::new(immutable_info(path, Utc::now(), mode, 100, 1000, 1000, None))
    }

    #[test]
    fn dir_parts_vectors() {
        assert_eq!(dir_parts(""), vec![""]);
        assert_eq!(dir_parts("foo.txt"), vec!["", "foo.txt"]);
        assert_eq!(
            dir_parts("/foo/bar/baz/bar.txt"),
            vec!["", "foo", "foo/bar", "foo/bar/baz", "foo/bar/baz/bar.txt"]
        );
    }

    #[test]
    fn file_id_is_stable() {
        assert_eq!(file_id_for("hello/world"), file_id_for("hello/world"));
        assert_ne!(file_id_for("hello/world"), file_id_for("hello/worlb"));
        // FNV-1a-64 known vector
        assert_eq!(file_id_for(""), 0xcbf2_9ce4_8422_2325);
    }

    #[test]
    fn index_synthesizes_directories() {
        let paths = [
            "hello/world/a.txt",
            "hello/world/b.txt",
            "hello/world/c.txt",
            "hello/world/d/e.txt",
            "hello/world/d/f.txt",
            "hello/world/e",
            "hello/zzz.info",
        ];
        let mut infos: Vec<Arc<FileInfo>> =
            paths.iter().map(|p| file_entry(p, S_IFREG | 0o777)).collect();
        infos.sort_by(|a, b| a.full_path.cmp(&b.full_path));
        let tree = Tree::index(infos, &dir_template(1000, 1000)).unwrap();

        let root = tree.readdir("").unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].name(), "hello");

        let hello = tree.readdir("hello").unwrap();
        assert_eq!(hello.len(), 2);
        let names: Vec<&str> = hello.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["world", "zzz.info"]);

        let stat = tree.stat("hello/world/a.txt").unwrap();
        assert_eq!(stat.mode & 0o777, 0o777);
        assert!(tree.stat("hello/world").unwrap().is_dir());
        assert!(tree.stat("no/such/entry").is_none());
        assert!(tree.readdir("hello/world/a.txt").is_none());
    }

    #[test]
    fn unsorted_directory_entry_is_invalid_input() {
        // "a/b" arrives as an explicit directory after "a/b/c" already
        // synthesized it.
        let infos = vec![
            file_entry("a/b/c", S_IFREG | 0o644),
            file_entry("a/b", S_IFDIR | 0o755),
        ];
        let err = Tree::index(infos, &dir_template(0, 0)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn duplicate_explicit_directories_are_invalid_input() {
        let infos = vec![
            file_entry("a", S_IFDIR | 0o755),
            file_entry("a", S_IFDIR | 0o755),
        ];
        let err = Tree::index(infos, &dir_template(0, 0)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn explicit_empty_directory_passes_fsck() {
        let infos = vec![file_entry("empty", S_IFDIR | 0o755)];
        let tree = Tree::index(infos, &dir_template(0, 0)).unwrap();
        assert_eq!(tree.readdir("empty").unwrap().len(), 0);
    }

    #[test]
    fn corrupted_listing_fails_integrity_check() {
        let infos = vec![file_entry("a/b.txt", S_IFREG | 0o644)];
        let mut tree = Tree::index(infos, &dir_template(0, 0)).unwrap();
        tree.corrupt_listing_for_test("a");
        let err = tree.check_integrity_for_test().unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }

    #[test]
    fn readdir_displays_basenames() {
        let infos = vec![file_entry("deep/nested/file.bin", S_IFREG | 0o644)];
        let tree = Tree::index(infos, &dir_template(0, 0)).unwrap();
        let entries = tree.readdir("deep/nested").unwrap();
        assert_eq!(entries[0].name(), "file.bin");
        assert_eq!(entries[0].full_path, "deep/nested/file.bin");
    }
}
