//! Error taxonomy shared across the crate.
//!
//! Library code returns [`Error`]; the command layer wraps it with
//! `anyhow` for user-facing context.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The URI could not be parsed or uses an unsupported scheme.
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// The remote object does not exist at the source.
    #[error("object does not exist")]
    NotFound,

    /// Malformed archive: bad header, missing required zip64 block,
    /// or an unsupported compression method.
    #[error("invalid zip file: {0}")]
    InvalidZip(&'static str),

    /// The requested member name is not present in the central directory.
    #[error("file not found in archive: {0}")]
    FileNotFound(String),

    /// The tree builder was handed unsorted or duplicated directory entries.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A post-build tree invariant does not hold.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// An OS mount/umount command failed, with and without sudo.
    #[error("mount command failed: {0}")]
    Command(String),

    /// The target directory is not a mount managed by this tool.
    #[error("{0}: not a cz mount")]
    NotOurMount(String),

    /// The spawned mount server did not report back in time.
    #[error("timeout waiting for mount server")]
    CallbackTimeout,

    /// An attempt was made to mutate the read-only filesystem.
    #[error("filesystem is read-only")]
    ReadOnly,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound | Error::FileNotFound(_) => true,
            Error::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
