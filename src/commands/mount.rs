//! `cz mount`: spawn the detached mount server, wait for its readiness
//! callback, then invoke the OS mount command with the negotiated port.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::default_protocol;
use crate::mount::server::Protocol;
use crate::mount::sys;

use super::expand_stdin;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

pub struct MountArgs {
    pub uri: String,
    pub directory: PathBuf,
    pub protocol: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub listen: String,
    pub log: Option<PathBuf>,
    pub no_spawn: bool,
}

enum ServerStatus {
    Success(String),
    Error(String),
}

/// Accept exactly one connection on the callback socket and parse its
/// single `KIND=MESSAGE` line.
async fn await_server_callback(listener: tokio::net::TcpListener) -> anyhow::Result<ServerStatus> {
    let (stream, _) = listener
        .accept()
        .await
        .context("could not receive communications from mount server")?;
    let mut line = String::new();
    BufReader::new(stream)
        .read_line(&mut line)
        .await
        .context("could not get back status from mount server")?;
    let line = line.trim_end_matches('\n');
    let (kind, message) = line
        .split_once('=')
        .with_context(|| format!("malformed mount server status: '{line}'"))?;
    match kind {
        "SUCCESS" => Ok(ServerStatus::Success(message.to_string())),
        "ERROR" => Ok(ServerStatus::Error(message.to_string())),
        other => bail!("unknown mount server status: '{other}'"),
    }
}

async fn spawn_server(args: &MountArgs, uri: &str, protocol: Protocol) -> anyhow::Result<String> {
    let callback_listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("could not open callback socket")?;
    let callback_addr =
        callback_listener.local_addr().context("could not resolve callback address")?.to_string();

    let mut server_cmd = vec![
        "mount-server".to_string(),
        uri.to_string(),
        "--listen".to_string(),
        args.listen.clone(),
        "--callback-addr".to_string(),
        callback_addr,
        "--protocol".to_string(),
        match protocol {
            Protocol::Nfs => "nfs".to_string(),
            Protocol::Webdav => "webdav".to_string(),
        },
    ];
    if let Some(cache_dir) = &args.cache_dir {
        server_cmd.push("--cache-dir".to_string());
        server_cmd.push(cache_dir.display().to_string());
    }
    if let Some(log) = &args.log {
        server_cmd.push("--log".to_string());
        server_cmd.push(log.display().to_string());
    }

    let pid = sys::daemonize(&server_cmd).context("could not spawn mount server")?;

    let status = match tokio::time::timeout(CALLBACK_TIMEOUT, await_server_callback(callback_listener))
        .await
    {
        Ok(status) => status?,
        Err(_) => {
            let _ = sys::kill_process(pid);
            bail!("timeout waiting for mount server");
        }
    };
    match status {
        ServerStatus::Success(addr) => {
            tracing::info!(pid, listen_addr = %addr, "mount server started");
            Ok(addr)
        }
        ServerStatus::Error(message) => {
            let _ = sys::kill_process(pid);
            bail!("mount server initialization error:\n{message}");
        }
    }
}

pub async fn run(args: MountArgs) -> anyhow::Result<()> {
    let uri = expand_stdin(&args.uri)?;
    let protocol_str: &str = args.protocol.as_deref().unwrap_or_else(|| default_protocol());
    let protocol: Protocol = protocol_str.parse()?;

    let server_addr = if args.no_spawn {
        args.listen.clone()
    } else {
        spawn_server(&args, &uri, protocol).await?
    };

    if !args.directory.is_dir() {
        std::fs::create_dir_all(&args.directory).context("could not create target directory")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&args.directory, std::fs::Permissions::from_mode(0o700))
                .context("could not set target directory permissions")?;
        }
    }

    let mounted = match protocol {
        Protocol::Nfs => sys::nfs_mount(&server_addr, &args.directory),
        Protocol::Webdav => sys::webdav_mount(&server_addr, &args.directory),
    };
    mounted.context("could not run mount command")?;
    Ok(())
}
