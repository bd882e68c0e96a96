use anyhow::Result;
use rust_cefnd_fwd::control::ControlRequest;
use std::path::Path;

pub async fn stop_daemon(socket: &Path) -> Result<()> {
    super::call(socket, ControlRequest::Stop).await?;
    println!("cefnd is stopping");
    Ok(())
}
