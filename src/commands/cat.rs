use std::sync::Arc;

use anyhow::Context;

use crate::remote;
use crate::zip::CentralDirectoryParser;

use super::expand_stdin;

pub async fn run(uri: &str, path: &str) -> anyhow::Result<()> {
    let uri = expand_stdin(uri)?;
    let fetcher = Arc::new(remote::object(&uri).await.context("could not open zip file")?);
    let parser = CentralDirectoryParser::new(fetcher);
    let mut reader = parser.read(path).await.context("could not open zip file stream")?;
    let mut stdout = tokio::io::stdout();
    tokio::io::copy(&mut reader, &mut stdout).await.context("could not download file")?;
    Ok(())
}
