//! `capd cancel <id>` – stop a running download through the control socket.

use anyhow::{bail, Result};
use capd_core::orchestrator::default_control_socket_path;

use crate::cli::control_socket;

pub async fn run_cancel(id: &str) -> Result<()> {
    let path = default_control_socket_path()?;
    if !path.exists() {
        bail!("capd is not running (no control socket at {})", path.display());
    }
    control_socket::send_cancel(&path, id).await?;
    println!("Cancel requested for {id}");
    Ok(())
}
