use std::path::Path;

use anyhow::Context;

use crate::mount::sys;

pub async fn run(directory: &Path) -> anyhow::Result<()> {
    sys::umount(directory)
        .with_context(|| format!("could not unmount directory '{}'", directory.display()))?;
    Ok(())
}
