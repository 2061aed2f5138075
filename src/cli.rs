//! Command-line definitions for the `cz` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::mount::server::DEFAULT_BIND_ADDRESS;

#[derive(Parser, Debug)]
#[command(name = "cz")]
#[command(version)]
#[command(about = "Efficiently interact with remote zip files (without downloading/extracting the entire archive)", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the files that exist in the remote zip archive
    #[command(after_help = "Example:\n  cz ls s3://example-bucket/path/to/archive.zip")]
    Ls {
        /// Archive URI ('-' reads it from stdin)
        uri: String,
    },

    /// Extract a specific file from the remote archive to stdout
    #[command(after_help = "Example:\n  cz cat s3://example-bucket/path/to/archive.zip images/file.png > image.png")]
    Cat {
        /// Archive URI ('-' reads it from stdin)
        uri: String,
        /// Path of the member inside the archive
        path: String,
    },

    /// Display aggregate information about the remote archive (number of files, total size, etc)
    Info {
        /// Archive URI ('-' reads it from stdin)
        uri: String,
    },

    /// Run HTTP proxy server mode
    Http {
        /// URI prefix under which zip archives are found
        uri_prefix: String,
        /// Address to listen on
        #[arg(short = 'l', long, default_value = DEFAULT_BIND_ADDRESS)]
        listen: String,
    },

    /// Virtually mount the remote archive onto a local directory
    #[command(after_help = "Example:\n  cz mount s3://example-bucket/path/to/archive.zip data_dir/")]
    Mount {
        /// Archive URI ('-' reads it from stdin)
        uri: String,
        /// Directory to mount onto
        directory: PathBuf,
        /// Protocol to use (nfs | webdav); defaults to nfs, webdav on Windows
        #[arg(long)]
        protocol: Option<String>,
        /// Directory to cache read files in
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Address for the mount server to listen on
        #[arg(short = 'l', long, default_value = DEFAULT_BIND_ADDRESS)]
        listen: String,
        /// Log file for the server to write to
        #[arg(long)]
        log: Option<PathBuf>,
        /// Assume a server is already running at the listen address
        #[arg(long, hide = true)]
        no_spawn: bool,
    },

    /// Unmounts a currently mounted remote archive from the given directory
    #[command(alias = "unmount")]
    Umount {
        /// The mounted directory
        directory: PathBuf,
    },

    /// The long-lived server process behind `mount` (spawned automatically)
    #[command(name = "mount-server", hide = true)]
    MountServer {
        /// Archive URI
        uri: String,
        /// Address to listen on
        #[arg(short = 'l', long, default_value = DEFAULT_BIND_ADDRESS)]
        listen: String,
        /// Address to report readiness to, exactly once
        #[arg(long)]
        callback_addr: Option<String>,
        /// Directory to cache read files in
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Log file to write to
        #[arg(long)]
        log: Option<PathBuf>,
        /// Protocol to serve (nfs | webdav)
        #[arg(long)]
        protocol: Option<String>,
    },
}

impl Cli {
    /// The log file destination, for commands that take one.
    pub fn log_file(&self) -> Option<&PathBuf> {
        match &self.command {
            Command::MountServer { log, .. } => log.as_ref(),
            _ => None,
        }
    }
}

/// nfs everywhere except Windows, which only speaks WebDAV natively.
pub fn default_protocol() -> &'static str {
    if cfg!(windows) {
        "webdav"
    } else {
        "nfs"
    }
}
