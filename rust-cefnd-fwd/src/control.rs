//! Administrative control channel.
//!
//! Requests and responses are JSON objects, one per line, over a Unix
//! socket. Each connection may issue any number of requests; the socket
//! task hands every request to the forwarding loop and waits for its reply.

use log::{debug, info, warn};
use rust_cefnd_common::metrics::MetricsSnapshot;
use rust_cefnd_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::face::FaceSnapshot;
use crate::fib::FibEntrySnapshot;
use crate::forwarder::ForwarderStatus;
use crate::pit::PitEntrySnapshot;
use crate::tx::TxStatsSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlRequest {
    Stop,
    Status,
    StatusPit,
    RouteAdd {
        prefix: String,
        protocol: String,
        next_hops: Vec<String>,
        #[serde(default)]
        cost: u16,
    },
    RouteDel {
        prefix: String,
        protocol: String,
        next_hops: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ControlResponse {
    Ok,
    Status(DaemonStatus),
    Pit { entries: Vec<PitEntrySnapshot> },
    Error { message: String },
}

impl ControlResponse {
    pub fn error(message: impl Into<String>) -> Self {
        ControlResponse::Error {
            message: message.into(),
        }
    }
}

/// Everything `status` reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub uptime_secs: u64,
    pub forwarder: ForwarderStatus,
    pub metrics: MetricsSnapshot,
    pub tx: TxStatsSnapshot,
    pub faces: Vec<FaceSnapshot>,
    pub routes: Vec<FibEntrySnapshot>,
}

/// A request on its way to the forwarding loop.
#[derive(Debug)]
pub struct ControlMessage {
    pub request: ControlRequest,
    pub reply: oneshot::Sender<ControlResponse>,
}

/// Listen on `path` and forward every request to `requests`.
pub async fn serve(path: &Path, requests: mpsc::Sender<ControlMessage>) -> io::Result<JoinHandle<()>> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    info!("Control channel on {}", path.display());

    Ok(tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(session(stream, requests.clone()));
                }
                Err(e) => {
                    warn!("Control accept error: {}", e);
                }
            }
        }
    }))
}

async fn session(stream: UnixStream, requests: mpsc::Sender<ControlMessage>) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ControlRequest>(&line) {
            Ok(request) => {
                debug!("Control request: {:?}", request);
                dispatch(&requests, request).await
            }
            Err(e) => ControlResponse::error(format!("invalid request: {}", e)),
        };

        let mut out = match serde_json::to_vec(&response) {
            Ok(out) => out,
            Err(e) => {
                warn!("Cannot encode control response: {}", e);
                return;
            }
        };
        out.push(b'\n');
        if write.write_all(&out).await.is_err() {
            return;
        }
    }
}

async fn dispatch(requests: &mpsc::Sender<ControlMessage>, request: ControlRequest) -> ControlResponse {
    let (reply, response) = oneshot::channel();
    if requests.send(ControlMessage { request, reply }).await.is_err() {
        return ControlResponse::error("forwarder is shutting down");
    }
    response
        .await
        .unwrap_or_else(|_| ControlResponse::error("forwarder dropped the request"))
}

/// Send one request to the daemon listening on `path`.
pub async fn request(path: &Path, request: &ControlRequest) -> Result<ControlResponse> {
    let stream = UnixStream::connect(path).await?;
    let (read, mut write) = stream.into_split();

    let mut line = serde_json::to_vec(request).map_err(|e| Error::Control(e.to_string()))?;
    line.push(b'\n');
    write.write_all(&line).await?;

    let mut lines = BufReader::new(read).lines();
    let reply = lines
        .next_line()
        .await?
        .ok_or_else(|| Error::Control("connection closed before a reply".into()))?;
    serde_json::from_str(&reply).map_err(|e| Error::Control(format!("invalid response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pit::PitType;

    #[test]
    fn test_request_wire_shape() {
        let parsed: ControlRequest =
            serde_json::from_str(r#"{"command":"route_add","prefix":"/a","protocol":"udp","next_hops":["10.0.0.1"]}"#)
                .unwrap();
        assert_eq!(
            parsed,
            ControlRequest::RouteAdd {
                prefix: "/a".into(),
                protocol: "udp".into(),
                next_hops: vec!["10.0.0.1".into()],
                cost: 0,
            }
        );

        let stop = serde_json::to_string(&ControlRequest::StatusPit).unwrap();
        assert_eq!(stop, r#"{"command":"status_pit"}"#);

        let err = serde_json::to_string(&ControlResponse::error("nope")).unwrap();
        assert_eq!(err, r#"{"result":"error","message":"nope"}"#);
    }

    #[tokio::test]
    async fn test_serve_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctrl.sock");
        let (tx, mut rx) = mpsc::channel::<ControlMessage>(4);
        let server = serve(&path, tx).await.unwrap();

        let responder = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let response = match msg.request {
                    ControlRequest::StatusPit => ControlResponse::Pit {
                        entries: vec![PitEntrySnapshot {
                            name: "/a".into(),
                            chunk: Some(1),
                            pit_type: PitType::Regular,
                            down_faces: vec![3],
                            up_faces: vec![],
                            remaining_ms: 10,
                        }],
                    },
                    _ => ControlResponse::Ok,
                };
                let _ = msg.reply.send(response);
            }
        });

        match request(&path, &ControlRequest::StatusPit).await.unwrap() {
            ControlResponse::Pit { entries } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].down_faces, vec![3]);
            }
            other => panic!("unexpected response {:?}", other),
        }
        assert_eq!(request(&path, &ControlRequest::Stop).await.unwrap(), ControlResponse::Ok);

        // malformed input gets an error line, not a dropped connection
        let mut stream = UnixStream::connect(&path).await.unwrap();
        stream.write_all(b"{\"command\":\"reboot\"}\n").await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let reply: ControlResponse = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(matches!(reply, ControlResponse::Error { .. }));

        server.abort();
        responder.abort();
    }
}
