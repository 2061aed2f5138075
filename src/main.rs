//! Entry point for the `cz` CLI.

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing::Level;

use cloudzip::cli::Cli;
use cloudzip::commands;

const LOGGING_ENV_VAR: &str = "CLOUDZIP_LOGGING";

/// ERROR by default; `CLOUDZIP_LOGGING=DEBUG` lowers the threshold.
/// The mount server can route output to a `--log` file since its
/// stderr is detached.
fn setup_logging(log_file: Option<&Path>) {
    let level = match std::env::var(LOGGING_ENV_VAR) {
        Ok(value) if value == "DEBUG" => Level::DEBUG,
        _ => Level::ERROR,
    };
    match log_file.and_then(|path| {
        std::fs::OpenOptions::new().create(true).append(true).open(path).ok()
    }) {
        Some(file) => {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.log_file().map(|p| p.as_path()));
    if let Err(err) = commands::dispatch(cli).await {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}
