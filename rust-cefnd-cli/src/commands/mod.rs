//! Subcommand implementations.

pub mod interest;
pub mod pit;
pub mod route;
pub mod status;
pub mod stop;

use anyhow::{anyhow, Context, Result};
use log::debug;
use rust_cefnd_fwd::control::{self, ControlRequest, ControlResponse};
use std::path::Path;

/// Send `request` to the daemon, turning an error reply into an error.
pub async fn call(socket: &Path, request: ControlRequest) -> Result<ControlResponse> {
    debug!("Control request {:?} on {}", request, socket.display());
    let response = control::request(socket, &request)
        .await
        .with_context(|| format!("Cannot reach the daemon on {}", socket.display()))?;
    match response {
        ControlResponse::Error { message } => Err(anyhow!("daemon refused the request: {}", message)),
        other => Ok(other),
    }
}
