//! `status`: counters, faces and routes of a running daemon

use anyhow::{bail, Result};
use rust_cefnd_fwd::control::{ControlRequest, ControlResponse, DaemonStatus};
use std::path::Path;
use std::time::Duration;

use crate::utils::{face_list, format_bytes, format_duration, print_header};

/// Fetch and print the daemon status
pub async fn show_status(socket: &Path, json: bool) -> Result<()> {
    let status = match super::call(socket, ControlRequest::Status).await? {
        ControlResponse::Status(status) => status,
        other => bail!("unexpected reply to status: {:?}", other),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    Ok(())
}

fn print_status(status: &DaemonStatus) {
    let fwd = &status.forwarder;
    let m = &status.metrics;

    print_header("cefnd");
    println!("Uptime:            {}", format_duration(Duration::from_secs(status.uptime_secs)));
    println!("Strategy:          {}", fwd.strategy);
    println!("Suppression:       {:?}", fwd.suppression);
    println!("Interest Return:   {}", if fwd.interest_return { "enabled" } else { "disabled" });
    println!("PIT:               {} / {}", fwd.pit_entries, fwd.pit_capacity);
    println!("FIB:               {}", fwd.fib_entries);
    println!("Content Store:     {}", fwd.cs_entries);

    print_header("Traffic");
    println!("Interests:         {} received, {} forwarded, {} aggregated, {} suppressed",
        m.interests_received, m.interests_forwarded, m.interests_aggregated, m.interests_suppressed);
    println!("Objects:           {} received, {} forwarded, {} unsolicited",
        m.objects_received, m.objects_forwarded, m.objects_unsolicited);
    println!("Returns:           {} received, {} sent", m.returns_received, m.returns_sent);
    println!("Drops:             {} hop limit, {} no route, {} pit full, {} malformed",
        m.hop_limit_drops, m.no_route, m.pit_full, m.malformed);
    println!("CS:                {} hits, {} misses", m.cs_hits, m.cs_misses);
    println!("Received:          {}", format_bytes(m.bytes_received));
    println!("Avg processing:    {:.2} us", m.avg_processing_time_us);
    println!("Tx queue:          {} queued, {} sent, {} dropped, {} errors, {} to vanished faces",
        status.tx.queued, status.tx.sent, status.tx.dropped, status.tx.send_errors, status.tx.undeliverable);

    print_header("Faces");
    for face in &status.faces {
        println!("{:>5}  {:<6} {}", face.face, face.face_type.to_string(), face.peer.as_deref().unwrap_or("-"));
    }

    print_header("Routes");
    for route in &status.routes {
        let faces: Vec<u16> = route.faces.iter().map(|f| f.face).collect();
        println!("{:<32} faces={}", route.prefix, face_list(&faces));
        for f in &route.faces {
            println!("    face {:>5} cost {:>3} [{}] tx {} interests / {} objects",
                f.face, f.cost, f.flags, f.tx_interest, f.tx_object);
        }
    }
}
