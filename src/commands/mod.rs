//! One submodule per subcommand, plus the shared helpers they lean on.

mod cat;
mod http;
mod info;
mod ls;
mod mount;
mod mount_server;
mod umount;

use std::io::Read;
use std::sync::Arc;

use anyhow::Context;

use crate::cli::{Cli, Command};
use crate::remote;
use crate::zip::{CentralDirectoryParser, Cdr, S_IFDIR, S_IFLNK, S_IFMT};

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Ls { uri } => ls::run(&uri).await,
        Command::Cat { uri, path } => cat::run(&uri, &path).await,
        Command::Info { uri } => info::run(&uri).await,
        Command::Http { uri_prefix, listen } => http::run(&uri_prefix, &listen).await,
        Command::Mount { uri, directory, protocol, cache_dir, listen, log, no_spawn } => {
            mount::run(mount::MountArgs {
                uri,
                directory,
                protocol,
                cache_dir,
                listen,
                log,
                no_spawn,
            })
            .await
        }
        Command::Umount { directory } => umount::run(&directory).await,
        Command::MountServer { uri, listen, callback_addr, cache_dir, protocol, .. } => {
            mount_server::run(uri, listen, callback_addr, cache_dir, protocol).await
        }
    }
}

/// A URI of `-` means the real URI arrives on stdin.
fn expand_stdin(arg: &str) -> anyhow::Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut data = String::new();
    std::io::stdin().read_to_string(&mut data).context("could not read stdin")?;
    Ok(data.trim_matches(&['\n', ' ', '\t'][..]).to_string())
}

/// Fetch and parse the central directory of the archive at `uri`.
async fn get_cdr(uri: &str) -> anyhow::Result<Vec<Cdr>> {
    let fetcher =
        Arc::new(remote::object(uri).await.context("could not open remote zip file")?);
    let parser = CentralDirectoryParser::new(fetcher);
    parser.get_central_directory().await.context("could not read zip file contents")
}

/// Symbolic mode string, `drwxr-xr-x` style.
fn format_mode(mode: u32) -> String {
    let file_type = match mode & S_IFMT {
        S_IFDIR => 'd',
        S_IFLNK => 'l',
        _ => '-',
    };
    let mut out = String::with_capacity(10);
    out.push(file_type);
    for shift in [6u32, 3, 0] {
        let bits = mode >> shift;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

/// Human-readable IEC rendering (KiB/MiB/...).
fn byte_count_iec(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0usize;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let prefixes = ['K', 'M', 'G', 'T', 'P', 'E'];
    format!("{:.1} {}iB", bytes as f64 / div as f64, prefixes[exp])
}
