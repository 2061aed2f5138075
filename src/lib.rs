//! # cloudzip
//!
//! Efficiently interact with remote zip archives without downloading or
//! extracting the whole file.
//!
//! The central directory at the archive's tail is fetched with byte
//! range requests, members are streamed and decompressed on demand, and
//! `cz mount` exposes the archive as a read-only local directory over
//! NFSv3 or WebDAV with an on-disk cache of materialized members.
//!
//! Supported archive locations: `s3://`, `file://`, `http(s)://`,
//! `kaggle://` and `lakefs://`.

pub mod cli;
pub mod commands;
pub mod error;
pub mod mount;
pub mod remote;
pub mod zip;

pub use error::{Error, Result};
