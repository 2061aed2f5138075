use std::path::PathBuf;

use crate::cli::default_protocol;
use crate::mount::server::{self, Protocol, ServerConfig};

pub async fn run(
    uri: String,
    listen: String,
    callback_addr: Option<String>,
    cache_dir: Option<PathBuf>,
    protocol: Option<String>,
) -> anyhow::Result<()> {
    let protocol_str: &str = protocol.as_deref().unwrap_or_else(|| default_protocol());
    let protocol: Protocol = protocol_str.parse()?;
    server::run(ServerConfig {
        uri,
        listen_addr: listen,
        callback_addr,
        cache_dir,
        protocol,
    })
    .await?;
    Ok(())
}
