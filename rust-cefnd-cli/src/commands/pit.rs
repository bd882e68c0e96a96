//! `pit`: dump the Pending Interest Table

use anyhow::{bail, Result};
use rust_cefnd_fwd::control::{ControlRequest, ControlResponse};
use std::path::Path;

use crate::utils::{face_list, print_header};

pub async fn show_pit(socket: &Path, json: bool) -> Result<()> {
    let entries = match super::call(socket, ControlRequest::StatusPit).await? {
        ControlResponse::Pit { entries } => entries,
        other => bail!("unexpected reply to status_pit: {:?}", other),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    print_header(&format!("PIT ({} entries)", entries.len()));
    for e in &entries {
        let chunk = e.chunk.map(|c| format!("#{}", c)).unwrap_or_default();
        println!(
            "{}{:<12} {:?} down={} up={} {}ms",
            e.name,
            chunk,
            e.pit_type,
            face_list(&e.down_faces),
            face_list(&e.up_faces),
            e.remaining_ms
        );
    }
    Ok(())
}
