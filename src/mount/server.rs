//! The long-lived mount server behind the `mount-server` subcommand.
//!
//! Lifecycle: resolve the cache directory, bind the listener, build the
//! index, report `SUCCESS=<host:port>` (or `ERROR=<reason>`) over the
//! parent's callback socket, then serve until SIGINT/SIGTERM. The
//! callback write is the last action before the serve loop; any earlier
//! failure takes the `ERROR=` branch instead.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tokio::sync::watch;

use crate::error::{Error, Result};

use super::builder::build_zip_tree;
use super::dav;
use super::nfs::{ZipNfs, DEFAULT_HANDLE_CACHE_SIZE};

pub const CACHE_DIR_ENV_VAR: &str = "CLOUDZIP_CACHE_DIR";
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Nfs,
    Webdav,
}

impl std::str::FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nfs" => Ok(Protocol::Nfs),
            "webdav" => Ok(Protocol::Webdav),
            other => Err(Error::InvalidInput(format!(
                "unsupported protocol: '{other}', select 'nfs' or 'webdav'"
            ))),
        }
    }
}

pub struct ServerConfig {
    pub uri: String,
    pub listen_addr: String,
    pub callback_addr: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub protocol: Protocol,
}

/// Reports readiness to the parent CLI exactly once.
///
/// Without a callback address (standalone runs) the line goes to
/// stdout instead, so scripts can still scrape it.
pub struct Callback {
    addr: Option<String>,
}

impl Callback {
    pub fn new(addr: Option<String>) -> Self {
        Self { addr }
    }

    pub async fn success(self, bound_addr: &str) {
        self.send(&format!("SUCCESS={bound_addr}\n")).await;
    }

    pub async fn error(self, message: &str) {
        // The message must stay a single line for the parent's parser.
        let flat = message.replace('\n', " ");
        self.send(&format!("ERROR={flat}\n")).await;
    }

    async fn send(self, line: &str) {
        match &self.addr {
            Some(addr) => match tokio::net::TcpStream::connect(addr).await {
                Ok(mut conn) => {
                    if let Err(err) = conn.write_all(line.as_bytes()).await {
                        tracing::error!(addr, error = %err, "could not write callback status");
                    }
                    let _ = conn.shutdown().await;
                }
                Err(err) => {
                    tracing::error!(addr, error = %err, "could not reach callback address");
                }
            },
            None => print!("{line}"),
        }
    }
}

/// Resolved cache directory plus whether this process created it (and
/// must therefore delete it on exit). Captured at startup, never
/// inferred later.
struct CacheDir {
    path: PathBuf,
    server_created: bool,
}

fn resolve_cache_dir(flag: Option<PathBuf>) -> CacheDir {
    if let Some(path) = flag {
        return CacheDir { path, server_created: false };
    }
    if let Ok(from_env) = std::env::var(CACHE_DIR_ENV_VAR) {
        if !from_env.is_empty() {
            return CacheDir { path: PathBuf::from(from_env), server_created: false };
        }
    }
    let generated = std::env::temp_dir()
        .join("cz-mount-cache")
        .join(uuid::Uuid::now_v7().to_string());
    CacheDir { path: generated, server_created: true }
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Run the mount server to completion.
///
/// Any error before readiness is reported through `callback` and
/// returned; after readiness the serve loop runs until a signal.
pub async fn run(config: ServerConfig) -> Result<()> {
    let callback = Callback::new(config.callback_addr.clone());
    prepare_and_serve(config, callback).await
}

async fn prepare_and_serve(config: ServerConfig, callback: Callback) -> Result<()> {
    let cache_dir = resolve_cache_dir(config.cache_dir.clone());
    if let Err(err) = tokio::fs::create_dir_all(&cache_dir.path).await {
        let message = format!(
            "could not create local cache directory {}: {err}",
            cache_dir.path.display()
        );
        callback.error(&message).await;
        return Err(err.into());
    }

    let result = match config.protocol {
        Protocol::Nfs => serve_nfs(&config, &cache_dir, callback).await,
        Protocol::Webdav => serve_webdav(&config, &cache_dir, callback).await,
    };

    if cache_dir.server_created {
        if let Err(err) = tokio::fs::remove_dir_all(&cache_dir.path).await {
            tracing::warn!(dir = %cache_dir.path.display(), error = %err, "could not clear cache dir");
        }
    }
    result
}

fn listen_host(listen_addr: &str) -> &str {
    listen_addr.rsplit_once(':').map(|(host, _)| host).unwrap_or("127.0.0.1")
}

async fn serve_nfs(config: &ServerConfig, cache_dir: &CacheDir, callback: Callback) -> Result<()> {
    use nfsserve::tcp::{NFSTcp, NFSTcpListener};

    let vfs = ZipNfs::new(DEFAULT_HANDLE_CACHE_SIZE);
    let listener = match NFSTcpListener::bind(&config.listen_addr, vfs.clone()).await {
        Ok(listener) => listener,
        Err(err) => {
            let message = format!("could not listen on {}: {err}", config.listen_addr);
            callback.error(&message).await;
            return Err(err.into());
        }
    };
    let bound_addr = format!("{}:{}", listen_host(&config.listen_addr), listener.get_listen_port());

    let tree = match build_tree_with_attrs(config, cache_dir, &bound_addr).await {
        Ok(tree) => tree,
        Err(err) => {
            callback.error(&format!("could not create filesystem: {err}")).await;
            return Err(err);
        }
    };
    vfs.install(tree);

    callback.success(&bound_addr).await;
    tracing::info!(listen_addr = %bound_addr, protocol = "nfs", "mount server ready");

    let (stop_tx, mut stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if shutdown_signal().await.is_ok() {
            let _ = stop_tx.send(true);
        }
    });
    tokio::select! {
        served = listener.handle_forever() => served.map_err(Error::from),
        _ = stop_rx.changed() => {
            tracing::info!("shutting down");
            Ok(())
        }
    }
}

async fn serve_webdav(
    config: &ServerConfig,
    cache_dir: &CacheDir,
    callback: Callback,
) -> Result<()> {
    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            let message = format!("could not listen on {}: {err}", config.listen_addr);
            callback.error(&message).await;
            return Err(err.into());
        }
    };
    let bound_addr = match listener.local_addr() {
        Ok(addr) => addr.to_string(),
        Err(err) => {
            callback.error(&format!("could not resolve bound address: {err}")).await;
            return Err(err.into());
        }
    };

    let tree = match build_tree_with_attrs(config, cache_dir, &bound_addr).await {
        Ok(tree) => tree,
        Err(err) => {
            callback.error(&format!("could not create filesystem: {err}")).await;
            return Err(err);
        }
    };
    let app = dav::router(std::sync::Arc::new(tree));

    callback.success(&bound_addr).await;
    tracing::info!(listen_addr = %bound_addr, protocol = "webdav", "mount server ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_signal().await;
            tracing::info!("shutting down");
        })
        .await
        .map_err(Error::from)
}

async fn build_tree_with_attrs(
    config: &ServerConfig,
    cache_dir: &CacheDir,
    bound_addr: &str,
) -> Result<super::tree::Tree> {
    let mut attrs = BTreeMap::new();
    attrs.insert("listen_addr".to_string(), bound_addr.to_string());
    build_zip_tree(&cache_dir.path, &config.uri, &attrs).await
}
