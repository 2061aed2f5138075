//! Everything behind `cz mount`: the on-disk member cache, the
//! in-memory tree, the NFS and WebDAV facades over it, the server
//! runtime, and the OS mount plumbing.

pub mod builder;
pub mod cache;
pub mod dav;
pub mod file;
pub mod nfs;
pub mod opener;
pub mod pseudo;
pub mod server;
pub mod sys;
pub mod tree;

pub use builder::build_zip_tree;
pub use cache::FileCache;
pub use file::FileHandle;
pub use server::{Protocol, ServerConfig};
pub use tree::{dir_parts, file_id_for, FileInfo, Tree};
