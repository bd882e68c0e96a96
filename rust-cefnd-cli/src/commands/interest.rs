//! `interest`: fetch one object through the daemon's local socket

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use rust_cefnd_common::message::{Message, MessageBuilder, MessageKind, Name};
use rust_cefnd_fwd::framer::Framer;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::utils::{format_bytes, format_duration, print_header};

/// Send an Interest for `name` and print the first reply to it
pub async fn send_interest(local_socket: &Path, name: &str, chunk: Option<u32>, timeout_ms: u64) -> Result<()> {
    let name = Name::from_string(name);
    let mut builder = MessageBuilder::interest(name.clone());
    if let Some(chunk) = chunk {
        builder = builder.chunk(chunk);
    }
    let packet = builder.encode()?;

    let mut stream = UnixStream::connect(local_socket)
        .await
        .with_context(|| format!("Cannot connect to {}", local_socket.display()))?;
    stream.write_all(&packet).await?;
    debug!("Sent Interest {} ({} bytes)", name, packet.len());

    let started = Instant::now();
    let reply = timeout(Duration::from_millis(timeout_ms), read_reply(&mut stream, &name, chunk))
        .await
        .with_context(|| format!("No reply for {} within {} ms", name, timeout_ms))??;

    print_reply(&reply, started.elapsed());
    Ok(())
}

async fn read_reply(stream: &mut UnixStream, name: &Name, chunk: Option<u32>) -> Result<Message> {
    let mut framer = Framer::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            bail!("daemon closed the connection");
        }
        framer.push(&buf[..n]);

        for frame in framer.drain() {
            let msg = match Message::parse(frame.bytes) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Dropping malformed reply: {}", e);
                    continue;
                }
            };
            if &msg.name == name && msg.chunk == chunk && msg.kind != MessageKind::Interest {
                return Ok(msg);
            }
            debug!("Ignoring unrelated {:?} for {}", msg.kind, msg.name);
        }
    }
}

fn print_reply(msg: &Message, rtt: Duration) {
    match msg.kind {
        MessageKind::InterestReturn => {
            print_header("Interest Return");
            println!("Name:      {}", msg.name);
            println!("Code:      {:?}", msg.return_code);
        }
        _ => {
            print_header("Content Object");
            println!("Name:      {}", msg.name);
            if let Some(chunk) = msg.chunk {
                println!("Chunk:     {}", chunk);
            }
            let payload = msg.payload.clone().unwrap_or_default();
            println!("Size:      {}", format_bytes(payload.len() as u64));
            if !payload.is_empty() {
                println!("{}", String::from_utf8_lossy(&payload));
            }
        }
    }
    println!("RTT:       {}", format_duration(rtt));
}
