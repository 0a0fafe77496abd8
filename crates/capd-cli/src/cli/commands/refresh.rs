//! `capd refresh` – ask the daemon to scan now.

use anyhow::{bail, Result};
use capd_core::orchestrator::default_control_socket_path;

use crate::cli::control_socket;

pub async fn run_refresh() -> Result<()> {
    let path = default_control_socket_path()?;
    if !path.exists() {
        bail!("capd is not running (no control socket at {})", path.display());
    }
    control_socket::send_refresh(&path).await?;
    println!("Refresh requested");
    Ok(())
}
