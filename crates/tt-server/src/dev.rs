//! Frontend dev server for `--dev`

use std::path::Path;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tokio::process::{Child, Command};

/// Install frontend dependencies, then start the dev server in `web_root`
///
/// The returned child is killed when dropped.
pub async fn spawn_dev_server(web_root: &Path) -> Result<Child> {
    tracing::info!("Installing frontend dependencies in {}", web_root.display());

    let status = Command::new("npm")
        .arg("i")
        .current_dir(web_root)
        .stdin(Stdio::null())
        .status()
        .await
        .context("Failed to run `npm i`")?;
    if !status.success() {
        bail!("`npm i` exited with {}", status);
    }

    tracing::info!("Starting frontend dev server");
    let child = Command::new("npm")
        .args(["run", "dev"])
        .current_dir(web_root)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .context("Failed to start `npm run dev`")?;

    Ok(child)
}
