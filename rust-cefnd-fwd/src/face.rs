//! Faces: the endpoints packets arrive on and leave through.
//!
//! The forwarding code only sees face ids. [`FaceTable`] owns the sockets:
//! UDP peers share the listening socket, TCP and Unix connections get a
//! reader task each. Every reader reports into one event channel drained by
//! the forwarding loop.

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use rust_cefnd_common::tlv::MAX_PACKET_LEN;
use rust_cefnd_common::types::{FaceId, FaceType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{tcp, unix, TcpListener, TcpStream, UdpSocket, UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

/// Size of a single stream read.
const READ_CHUNK: usize = 16 * 1024;

/// Read-only face queries used while deciding where to forward.
pub trait FaceInfo {
    fn is_active(&self, face: FaceId) -> bool;
    fn face_type(&self, face: FaceId) -> Option<FaceType>;
}

/// Face errors
#[derive(Debug, Error)]
pub enum FaceError {
    #[error("unknown face {0}")]
    Unknown(FaceId),

    #[error("face {0} is closed")]
    Closed(FaceId),

    #[error("cannot resolve {0}")]
    Resolve(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("I/O error on face {face}: {source}")]
    Io {
        face: FaceId,
        #[source]
        source: io::Error,
    },
}

/// The send side of the face capability.
#[async_trait]
pub trait FaceLayer: FaceInfo + Send + Sync {
    /// Write `payload` to `face`; returns the number of bytes sent.
    async fn send(&self, face: FaceId, payload: &Bytes) -> Result<usize, FaceError>;

    fn close(&self, face: FaceId);
}

/// Events emitted by the face table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaceEvent {
    /// A face was created (accepted, connected or first heard from)
    Opened { face: FaceId, face_type: FaceType },

    /// Bytes arrived on a face
    Received { face: FaceId, data: Bytes },

    /// The peer went away
    Closed(FaceId),
}

/// Control-channel view of a face.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceSnapshot {
    pub face: u16,
    pub face_type: FaceType,
    pub peer: Option<String>,
}

#[derive(Clone)]
enum Writer {
    Udp { socket: Arc<UdpSocket>, peer: SocketAddr },
    Tcp(Arc<tokio::sync::Mutex<tcp::OwnedWriteHalf>>),
    Unix(Arc<tokio::sync::Mutex<unix::OwnedWriteHalf>>),
    Memory(mpsc::UnboundedSender<Bytes>),
}

struct FaceHandle {
    face_type: FaceType,
    peer: Option<SocketAddr>,
    writer: Writer,
    reader: Option<AbortHandle>,
}

/// Registry of open faces.
pub struct FaceTable {
    faces: RwLock<HashMap<FaceId, FaceHandle>>,
    peers: RwLock<HashMap<(FaceType, SocketAddr), FaceId>>,
    next_id: AtomicU16,
    udp: RwLock<Option<Arc<UdpSocket>>>,
    /// Open UDP faces, and how many unknown sources may still become one.
    udp_faces: AtomicUsize,
    udp_limit: usize,
    events: mpsc::Sender<FaceEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl FaceTable {
    pub fn new(events: mpsc::Sender<FaceEvent>) -> Self {
        Self {
            faces: RwLock::new(HashMap::new()),
            peers: RwLock::new(HashMap::new()),
            next_id: AtomicU16::new(1),
            udp: RwLock::new(None),
            udp_faces: AtomicUsize::new(0),
            udp_limit: usize::MAX,
            events,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Stop learning UDP sources once `limit` UDP faces are open. Faces
    /// dialed through [`FaceTable::connect`] are not subject to the limit.
    pub fn with_udp_limit(mut self, limit: usize) -> Self {
        self.udp_limit = limit;
        self
    }

    pub fn len(&self) -> usize {
        self.faces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.read().is_empty()
    }

    fn allocate_id(&self) -> FaceId {
        let faces = self.faces.read();
        loop {
            let id = FaceId(self.next_id.fetch_add(1, Ordering::Relaxed));
            if id != FaceId::NONE && !faces.contains_key(&id) {
                return id;
            }
        }
    }

    fn insert(&self, face: FaceId, handle: FaceHandle) {
        let face_type = handle.face_type;
        if face_type == FaceType::Udp {
            self.udp_faces.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(peer) = handle.peer {
            self.peers.write().insert((face_type, peer), face);
        }
        self.faces.write().insert(face, handle);
        info!("[Face {}] Opened ({})", face.0, face_type);
        let _ = self.events.try_send(FaceEvent::Opened { face, face_type });
    }

    /// Bind the shared UDP socket and start receiving on it.
    pub async fn listen_udp(self: &Arc<Self>, addr: &str) -> io::Result<SocketAddr> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local = socket.local_addr()?;
        *self.udp.write() = Some(Arc::clone(&socket));
        info!("Listening on udp://{}", local);

        let table = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_PACKET_LEN];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((n, peer)) => {
                        let face = match table.learn_udp_face(&socket, peer) {
                            Some(face) => face,
                            None => continue,
                        };
                        let data = Bytes::copy_from_slice(&buf[..n]);
                        if table.events.send(FaceEvent::Received { face, data }).await.is_err() {
                            break;
                        }
                    }
                    // ICMP errors surface here on some platforms; the socket stays usable
                    Err(e) => warn!("UDP receive error: {}", e),
                }
            }
        });
        self.tasks.lock().push(handle);
        Ok(local)
    }

    /// Face of a datagram's source; `None` when the source is new and the
    /// UDP face limit is reached.
    fn learn_udp_face(&self, socket: &Arc<UdpSocket>, peer: SocketAddr) -> Option<FaceId> {
        if let Some(face) = self.find_peer(FaceType::Udp, peer) {
            return Some(face);
        }
        if self.udp_faces.load(Ordering::Relaxed) >= self.udp_limit {
            debug!("UDP face limit ({}) reached, ignoring {}", self.udp_limit, peer);
            return None;
        }
        Some(self.udp_face(socket, peer))
    }

    fn udp_face(&self, socket: &Arc<UdpSocket>, peer: SocketAddr) -> FaceId {
        if let Some(&face) = self.peers.read().get(&(FaceType::Udp, peer)) {
            return face;
        }
        let face = self.allocate_id();
        self.insert(
            face,
            FaceHandle {
                face_type: FaceType::Udp,
                peer: Some(peer),
                writer: Writer::Udp {
                    socket: Arc::clone(socket),
                    peer,
                },
                reader: None,
            },
        );
        face
    }

    /// Accept TCP connections on `addr`.
    pub async fn listen_tcp(self: &Arc<Self>, addr: &str) -> io::Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!("Listening on tcp://{}", local);

        let table = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("Accepted TCP connection from {}", peer);
                        table.attach_tcp(stream, peer);
                    }
                    Err(e) => warn!("TCP accept error: {}", e),
                }
            }
        });
        self.tasks.lock().push(handle);
        Ok(local)
    }

    fn attach_tcp(&self, stream: TcpStream, peer: SocketAddr) -> FaceId {
        let _ = stream.set_nodelay(true);
        let (read, write) = stream.into_split();
        let face = self.allocate_id();
        let reader = tokio::spawn(read_stream(face, read, self.events.clone()));
        self.insert(
            face,
            FaceHandle {
                face_type: FaceType::Tcp,
                peer: Some(peer),
                writer: Writer::Tcp(Arc::new(tokio::sync::Mutex::new(write))),
                reader: Some(reader.abort_handle()),
            },
        );
        face
    }

    /// Accept local application connections on the Unix socket at `path`.
    /// A stale socket file is replaced.
    pub async fn listen_local(self: &Arc<Self>, path: &Path) -> io::Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        info!("Listening on unix://{}", path.display());

        let table = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        table.attach_local(stream);
                    }
                    Err(e) => warn!("Local accept error: {}", e),
                }
            }
        });
        self.tasks.lock().push(handle);
        Ok(())
    }

    fn attach_local(&self, stream: UnixStream) -> FaceId {
        let (read, write) = stream.into_split();
        let face = self.allocate_id();
        let reader = tokio::spawn(read_stream(face, read, self.events.clone()));
        self.insert(
            face,
            FaceHandle {
                face_type: FaceType::Local,
                peer: None,
                writer: Writer::Unix(Arc::new(tokio::sync::Mutex::new(write))),
                reader: Some(reader.abort_handle()),
            },
        );
        face
    }

    /// Face towards `addr` over `face_type`, reusing an existing one.
    pub async fn connect(self: &Arc<Self>, face_type: FaceType, addr: &str) -> Result<FaceId, FaceError> {
        let peer = resolve(addr).await?;
        if let Some(face) = self.find_peer(face_type, peer) {
            return Ok(face);
        }

        match face_type {
            FaceType::Udp => {
                let existing = self.udp.read().clone();
                let socket = match existing {
                    Some(socket) => socket,
                    None => {
                        self.listen_udp("0.0.0.0:0").await.map_err(|source| FaceError::Io {
                            face: FaceId::NONE,
                            source,
                        })?;
                        self.udp
                            .read()
                            .clone()
                            .ok_or_else(|| FaceError::Unsupported("no UDP socket".into()))?
                    }
                };
                Ok(self.udp_face(&socket, peer))
            }
            FaceType::Tcp => {
                let stream = TcpStream::connect(peer).await.map_err(|source| FaceError::Io {
                    face: FaceId::NONE,
                    source,
                })?;
                Ok(self.attach_tcp(stream, peer))
            }
            FaceType::Local => Err(FaceError::Unsupported(
                "local faces are created by applications connecting".into(),
            )),
        }
    }

    pub fn find_peer(&self, face_type: FaceType, peer: SocketAddr) -> Option<FaceId> {
        self.peers.read().get(&(face_type, peer)).copied()
    }

    /// In-process face; whatever is sent to it shows up on the receiver.
    pub fn add_memory(&self, face_type: FaceType) -> (FaceId, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let face = self.allocate_id();
        self.insert(
            face,
            FaceHandle {
                face_type,
                peer: None,
                writer: Writer::Memory(tx),
                reader: None,
            },
        );
        (face, rx)
    }

    /// Feed bytes in as if `face` had received them.
    pub async fn inject(&self, face: FaceId, data: Bytes) -> Result<(), FaceError> {
        self.events
            .send(FaceEvent::Received { face, data })
            .await
            .map_err(|_| FaceError::Closed(face))
    }

    pub fn snapshot(&self) -> Vec<FaceSnapshot> {
        let mut faces: Vec<FaceSnapshot> = self
            .faces
            .read()
            .iter()
            .map(|(id, h)| FaceSnapshot {
                face: id.0,
                face_type: h.face_type,
                peer: h.peer.map(|p| p.to_string()),
            })
            .collect();
        faces.sort_by_key(|f| f.face);
        faces
    }

    /// Stop every listener and reader and forget all faces.
    pub fn close_all(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        for (_, handle) in self.faces.write().drain() {
            if let Some(reader) = handle.reader {
                reader.abort();
            }
        }
        self.peers.write().clear();
        self.udp_faces.store(0, Ordering::Relaxed);
        *self.udp.write() = None;
    }
}

impl FaceInfo for FaceTable {
    fn is_active(&self, face: FaceId) -> bool {
        self.faces.read().contains_key(&face)
    }

    fn face_type(&self, face: FaceId) -> Option<FaceType> {
        self.faces.read().get(&face).map(|h| h.face_type)
    }
}

#[async_trait]
impl FaceLayer for FaceTable {
    async fn send(&self, face: FaceId, payload: &Bytes) -> Result<usize, FaceError> {
        let writer = self
            .faces
            .read()
            .get(&face)
            .map(|h| h.writer.clone())
            .ok_or(FaceError::Unknown(face))?;

        let io_err = |source| FaceError::Io { face, source };
        match writer {
            Writer::Udp { socket, peer } => socket.send_to(payload, peer).await.map_err(io_err),
            Writer::Tcp(w) => {
                w.lock().await.write_all(payload).await.map_err(io_err)?;
                Ok(payload.len())
            }
            Writer::Unix(w) => {
                w.lock().await.write_all(payload).await.map_err(io_err)?;
                Ok(payload.len())
            }
            Writer::Memory(tx) => tx
                .send(payload.clone())
                .map(|_| payload.len())
                .map_err(|_| FaceError::Closed(face)),
        }
    }

    fn close(&self, face: FaceId) {
        let handle = match self.faces.write().remove(&face) {
            Some(handle) => handle,
            None => return,
        };
        if let Some(peer) = handle.peer {
            self.peers.write().remove(&(handle.face_type, peer));
        }
        if handle.face_type == FaceType::Udp {
            self.udp_faces.fetch_sub(1, Ordering::Relaxed);
        }
        if let Some(reader) = handle.reader {
            reader.abort();
        }
        info!("[Face {}] Closed", face.0);
    }
}

async fn read_stream<R>(face: FaceId, mut reader: R, events: mpsc::Sender<FaceEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("[Face {}] Peer closed the connection", face.0);
                break;
            }
            Ok(n) => {
                let data = Bytes::copy_from_slice(&buf[..n]);
                if events.send(FaceEvent::Received { face, data }).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("[Face {}] Read error: {}", face.0, e);
                break;
            }
        }
    }
    let _ = events.send(FaceEvent::Closed(face)).await;
}

/// Resolve `host:port` to the first address it names.
pub async fn resolve(addr: &str) -> Result<SocketAddr, FaceError> {
    tokio::net::lookup_host(addr)
        .await
        .map_err(|e| FaceError::Resolve(format!("{}: {}", addr, e)))?
        .next()
        .ok_or_else(|| FaceError::Resolve(addr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    async fn next_received(rx: &mut mpsc::Receiver<FaceEvent>) -> (FaceId, Bytes) {
        loop {
            let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
            if let FaceEvent::Received { face, data } = event {
                return (face, data);
            }
        }
    }

    #[tokio::test]
    async fn test_memory_face() {
        let (events, mut rx) = mpsc::channel(16);
        let table = FaceTable::new(events);
        let (face, mut out) = table.add_memory(FaceType::Local);

        assert!(table.is_active(face));
        assert_eq!(table.face_type(face), Some(FaceType::Local));
        assert_eq!(
            rx.recv().await,
            Some(FaceEvent::Opened {
                face,
                face_type: FaceType::Local
            })
        );

        let payload = Bytes::from_static(b"hello");
        assert_eq!(table.send(face, &payload).await.unwrap(), 5);
        assert_eq!(out.recv().await.unwrap(), payload);

        table.inject(face, Bytes::from_static(b"in")).await.unwrap();
        assert_eq!(next_received(&mut rx).await, (face, Bytes::from_static(b"in")));

        table.close(face);
        assert!(!table.is_active(face));
        assert!(matches!(table.send(face, &payload).await, Err(FaceError::Unknown(_))));
    }

    #[tokio::test]
    async fn test_udp_peer_becomes_face() {
        let (events, mut rx) = mpsc::channel(16);
        let table = Arc::new(FaceTable::new(events));
        let local = table.listen_udp("127.0.0.1:0").await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"ping", local).await.unwrap();
        let (face, data) = next_received(&mut rx).await;
        assert_eq!(&data[..], b"ping");
        assert_eq!(table.face_type(face), Some(FaceType::Udp));
        assert_eq!(table.find_peer(FaceType::Udp, client.local_addr().unwrap()), Some(face));

        // same peer, same face
        client.send_to(b"again", local).await.unwrap();
        assert_eq!(next_received(&mut rx).await.0, face);

        table.send(face, &Bytes::from_static(b"pong")).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"pong");
        table.close_all();
    }

    #[tokio::test]
    async fn test_udp_sources_beyond_limit_are_ignored() {
        let (events, mut rx) = mpsc::channel(16);
        let table = Arc::new(FaceTable::new(events).with_udp_limit(1));
        let local = table.listen_udp("127.0.0.1:0").await.unwrap();

        let first = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let second = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        first.send_to(b"one", local).await.unwrap();
        let (face, _) = next_received(&mut rx).await;

        second.send_to(b"two", local).await.unwrap();
        first.send_to(b"three", local).await.unwrap();
        let (again, data) = next_received(&mut rx).await;
        assert_eq!((again, &data[..]), (face, &b"three"[..]));
        assert_eq!(table.find_peer(FaceType::Udp, second.local_addr().unwrap()), None);
        assert_eq!(table.len(), 1);

        // explicitly dialed peers still get a face
        let dialed = table
            .connect(FaceType::Udp, &second.local_addr().unwrap().to_string())
            .await
            .unwrap();
        assert_eq!(table.face_type(dialed), Some(FaceType::Udp));

        // closing frees room for a new source
        table.close(face);
        table.close(dialed);
        second.send_to(b"four", local).await.unwrap();
        let (learned, data) = next_received(&mut rx).await;
        assert_eq!(&data[..], b"four");
        assert_eq!(table.find_peer(FaceType::Udp, second.local_addr().unwrap()), Some(learned));
        table.close_all();
    }

    #[tokio::test]
    async fn test_tcp_connect_and_close() {
        let (events, mut rx) = mpsc::channel(16);
        let table = Arc::new(FaceTable::new(events));
        let local = table.listen_tcp("127.0.0.1:0").await.unwrap();

        let (client_events, mut client_rx) = mpsc::channel(16);
        let client = Arc::new(FaceTable::new(client_events));
        let out = client.connect(FaceType::Tcp, &local.to_string()).await.unwrap();
        assert_eq!(client.connect(FaceType::Tcp, &local.to_string()).await.unwrap(), out);

        client.send(out, &Bytes::from_static(b"over tcp")).await.unwrap();
        let (face, data) = next_received(&mut rx).await;
        assert_eq!(&data[..], b"over tcp");
        assert_eq!(table.face_type(face), Some(FaceType::Tcp));

        // closing the server side ends the client's reader
        table.close(face);
        loop {
            let event = timeout(Duration::from_secs(5), client_rx.recv()).await.unwrap().unwrap();
            if event == FaceEvent::Closed(out) {
                break;
            }
        }
        table.close_all();
        client.close_all();
    }

    #[tokio::test]
    async fn test_local_faces_cannot_be_dialed() {
        let (events, _rx) = mpsc::channel(16);
        let table = Arc::new(FaceTable::new(events));
        let err = table.connect(FaceType::Local, "127.0.0.1:9").await.unwrap_err();
        assert!(matches!(err, FaceError::Unsupported(_)));
    }
}
