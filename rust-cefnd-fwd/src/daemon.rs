//! The forwarding event loop.
//!
//! One task owns the [`Forwarder`] and the per-face framers. It drains face
//! events, transmission failures and control requests, ticks the PIT sweep,
//! and executes the actions the forwarder hands back.

use bytes::Bytes;
use log::{debug, error, info, warn};
use rust_cefnd_common::message::{MessageBuilder, Name};
use rust_cefnd_common::types::{FaceId, FaceType};
use rust_cefnd_common::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ForwarderConfig;
use crate::control::{self, ControlMessage, ControlRequest, ControlResponse, DaemonStatus};
use crate::face::{self, FaceEvent, FaceLayer, FaceTable};
use crate::fib::{RouteChange, RouteFlags};
use crate::forwarder::{Action, AdminCommand, Forwarder};
use crate::framer::Framer;
use crate::pit::PitEntrySnapshot;
use crate::routes::{self, normalize_next_hop};
use crate::tx::{FrameClass, Priority, TxEvent, TxFrame, TxPipeline};

/// Capacity of the control request queue.
const CONTROL_QUEUE: usize = 16;

/// Cloneable remote control for a running daemon.
#[derive(Clone)]
pub struct DaemonHandle {
    control: mpsc::Sender<ControlMessage>,
    stop: Arc<watch::Sender<bool>>,
}

impl DaemonHandle {
    /// Ask the loop to stop. Queued frames are still flushed.
    pub fn graceful_stop(&self) {
        let _ = self.stop.send(true);
    }

    pub async fn request(&self, request: ControlRequest) -> Result<ControlResponse> {
        let (reply, response) = oneshot::channel();
        self.control
            .send(ControlMessage { request, reply })
            .await
            .map_err(|_| Error::Control("daemon is not running".into()))?;
        response
            .await
            .map_err(|_| Error::Control("daemon dropped the request".into()))
    }

    pub async fn status(&self) -> Result<DaemonStatus> {
        match self.request(ControlRequest::Status).await? {
            ControlResponse::Status(status) => Ok(status),
            other => Err(Error::Control(format!("unexpected response {:?}", other))),
        }
    }

    pub async fn pit_snapshot(&self) -> Result<Vec<PitEntrySnapshot>> {
        match self.request(ControlRequest::StatusPit).await? {
            ControlResponse::Pit { entries } => Ok(entries),
            other => Err(Error::Control(format!("unexpected response {:?}", other))),
        }
    }
}

pub struct Daemon {
    config: ForwarderConfig,
    forwarder: Forwarder,
    faces: Arc<FaceTable>,
    face_events: mpsc::Receiver<FaceEvent>,
    framers: HashMap<FaceId, Framer>,
    tx: TxPipeline,
    tx_events: mpsc::Receiver<TxEvent>,
    control_tx: mpsc::Sender<ControlMessage>,
    control_rx: mpsc::Receiver<ControlMessage>,
    control_task: Option<JoinHandle<()>>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    sockets: Vec<PathBuf>,
    started: Instant,
}

impl Daemon {
    /// Build the daemon without opening any socket. Must be called inside
    /// a tokio runtime.
    pub fn new(config: ForwarderConfig) -> Result<Self> {
        config.validate()?;
        let forwarder = Forwarder::new(config.clone())?;

        let (face_tx, face_events) = mpsc::channel(config.event_buffer_size.max(1));
        let faces = Arc::new(FaceTable::new(face_tx).with_udp_limit(config.max_udp_faces));
        let (tx_event_tx, tx_events) = mpsc::channel(config.event_buffer_size.max(1));
        let layer: Arc<dyn FaceLayer> = Arc::clone(&faces) as Arc<dyn FaceLayer>;
        let tx = TxPipeline::start(&config.tx, layer, tx_event_tx);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);
        let (stop_tx, stop_rx) = watch::channel(false);

        Ok(Self {
            config,
            forwarder,
            faces,
            face_events,
            framers: HashMap::new(),
            tx,
            tx_events,
            control_tx,
            control_rx,
            control_task: None,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            sockets: Vec::new(),
            started: Instant::now(),
        })
    }

    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            control: self.control_tx.clone(),
            stop: Arc::clone(&self.stop_tx),
        }
    }

    pub fn faces(&self) -> Arc<FaceTable> {
        Arc::clone(&self.faces)
    }

    /// Open the listeners and the control socket, then install the static
    /// routes.
    pub async fn start(&mut self) -> Result<()> {
        let endpoint = self.config.listen_endpoint();
        self.faces.listen_udp(&endpoint).await?;
        self.faces.listen_tcp(&endpoint).await?;
        self.faces.listen_local(&self.config.local_socket).await?;
        self.sockets.push(self.config.local_socket.clone());

        let task = control::serve(&self.config.control_socket, self.control_tx.clone()).await?;
        self.control_task = Some(task);
        self.sockets.push(self.config.control_socket.clone());

        if let Some(path) = self.config.routes_file.clone() {
            let routes = routes::load_routes(&path)?;
            let mut installed = 0;
            for route in &routes {
                for hop in &route.next_hops {
                    match self.faces.connect(route.face_type, hop).await {
                        Ok(face) => {
                            self.add_route(route.name(), face, RouteFlags::STATIC, 0)?;
                            installed += 1;
                        }
                        Err(e) => warn!("Skipping route {} via {}: {}", route.prefix, hop, e),
                    }
                }
            }
            info!("Installed {} static routes from {}", installed, path.display());
        }
        Ok(())
    }

    pub fn add_route(&mut self, prefix: Name, face: FaceId, flags: RouteFlags, cost: u16) -> Result<RouteChange> {
        self.forwarder
            .route_add(prefix, face, flags, cost)
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Run until [`DaemonHandle::graceful_stop`] is called.
    pub async fn run(mut self) -> Result<()> {
        let period = Duration::from_millis(self.config.pit.sweep_period_ms.max(1));
        let mut sweep = tokio::time::interval(period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Forwarder running (strategy {})", self.forwarder.status().strategy);

        loop {
            tokio::select! {
                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        break;
                    }
                }
                Some(event) = self.face_events.recv() => self.on_face_event(event).await,
                Some(event) = self.tx_events.recv() => match event {
                    TxEvent::FaceFailed(face) => self.close_face(face),
                },
                Some(msg) = self.control_rx.recv() => {
                    let response = self.on_control(msg.request).await;
                    let _ = msg.reply.send(response);
                }
                _ = sweep.tick() => {
                    let actions = self.forwarder.sweep(Instant::now());
                    self.execute(actions).await;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(self) {
        info!("Forwarder stopping");
        if let Some(task) = self.control_task {
            task.abort();
        }
        self.faces.close_all();
        self.tx.shutdown().await;
        for path in &self.sockets {
            if let Err(e) = std::fs::remove_file(path) {
                debug!("Cannot remove {}: {}", path.display(), e);
            }
        }
        info!("Forwarder stopped");
    }

    async fn on_face_event(&mut self, event: FaceEvent) {
        match event {
            FaceEvent::Opened { face, face_type } => {
                debug!("[Face {}] Ready ({})", face.0, face_type);
                self.framers.insert(face, Framer::new());
            }
            FaceEvent::Received { face, data } => {
                let framer = self.framers.entry(face).or_default();
                let discarded_before = framer.stats().discarded_bytes;
                framer.push(&data);
                let frames = framer.drain();
                let discarded = framer.stats().discarded_bytes - discarded_before;
                if discarded > 0 {
                    debug!("[Face {}] Discarded {} bytes while framing", face.0, discarded);
                    self.forwarder.metrics().framing_discards.add(discarded);
                }

                let now = Instant::now();
                for frame in frames {
                    let actions = self.forwarder.handle_frame(face, frame, self.faces.as_ref(), now);
                    self.execute(actions).await;
                }
            }
            FaceEvent::Closed(face) => self.close_face(face),
        }
    }

    async fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(frame, priority) => {
                    self.tx.push(frame, priority).await;
                }
                Action::CloseFace(face) => self.close_face(face),
                Action::Command { command, face, request } => {
                    self.on_admin(command, face, &request.name).await;
                }
            }
        }
    }

    fn close_face(&mut self, face: FaceId) {
        self.faces.close(face);
        self.framers.remove(&face);
        self.forwarder.face_closed(face);
    }

    /// Answer an administrative Interest with a ContentObject carrying JSON.
    async fn on_admin(&mut self, command: AdminCommand, face: FaceId, name: &Name) {
        let body = match command {
            AdminCommand::Status => serde_json::to_vec(&self.status()),
            AdminCommand::StatusPit => serde_json::to_vec(&self.forwarder.pit_snapshot(Instant::now())),
            AdminCommand::Stop => {
                info!("[Face {}] Stop requested", face.0);
                let _ = self.stop_tx.send(true);
                Ok(b"\"ok\"".to_vec())
            }
        };
        let payload = match body {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                error!("Cannot encode {:?} reply: {}", command, e);
                return;
            }
        };

        match MessageBuilder::object(name.clone(), payload).encode() {
            Ok(packet) => {
                let frame = TxFrame::single(packet, face, FrameClass::Object);
                self.tx.push(frame, Priority::High).await;
            }
            Err(e) => warn!("[Face {}] Cannot build {:?} reply: {}", face.0, command, e),
        }
    }

    async fn on_control(&mut self, request: ControlRequest) -> ControlResponse {
        match request {
            ControlRequest::Stop => {
                info!("Stop requested on the control channel");
                let _ = self.stop_tx.send(true);
                ControlResponse::Ok
            }
            ControlRequest::Status => ControlResponse::Status(self.status()),
            ControlRequest::StatusPit => ControlResponse::Pit {
                entries: self.forwarder.pit_snapshot(Instant::now()),
            },
            ControlRequest::RouteAdd {
                prefix,
                protocol,
                next_hops,
                cost,
            } => {
                let face_type = match route_protocol(&protocol) {
                    Ok(t) => t,
                    Err(response) => return response,
                };
                let name = Name::from_string(&prefix);
                for hop in &next_hops {
                    let hop = match normalize_next_hop(hop) {
                        Ok(hop) => hop,
                        Err(e) => return ControlResponse::error(e),
                    };
                    let face = match self.faces.connect(face_type, &hop).await {
                        Ok(face) => face,
                        Err(e) => return ControlResponse::error(format!("{}: {}", hop, e)),
                    };
                    if let Err(e) = self.forwarder.route_add(name.clone(), face, RouteFlags::CONTROL, cost) {
                        return ControlResponse::error(e.to_string());
                    }
                }
                ControlResponse::Ok
            }
            ControlRequest::RouteDel {
                prefix,
                protocol,
                next_hops,
            } => {
                let face_type = match route_protocol(&protocol) {
                    Ok(t) => t,
                    Err(response) => return response,
                };
                let name = Name::from_string(&prefix);
                for hop in &next_hops {
                    let peer = match normalize_next_hop(hop) {
                        Ok(hop) => face::resolve(&hop).await,
                        Err(e) => return ControlResponse::error(e),
                    };
                    let face = match peer.map(|p| self.faces.find_peer(face_type, p)) {
                        Ok(Some(face)) => face,
                        Ok(None) => return ControlResponse::error(format!("no {} face for {}", face_type, hop)),
                        Err(e) => return ControlResponse::error(e.to_string()),
                    };
                    let (change, actions) = self.forwarder.route_del(&name, face, self.faces.as_ref());
                    if change == RouteChange::NotFound {
                        return ControlResponse::error(format!("no route {} via {}", prefix, hop));
                    }
                    self.execute(actions).await;
                }
                ControlResponse::Ok
            }
        }
    }

    fn status(&self) -> DaemonStatus {
        DaemonStatus {
            uptime_secs: self.started.elapsed().as_secs(),
            forwarder: self.forwarder.status(),
            metrics: self.forwarder.metrics().snapshot(),
            tx: self.tx.stats().snapshot(),
            faces: self.faces.snapshot(),
            routes: self.forwarder.fib_snapshot(),
        }
    }
}

fn route_protocol(protocol: &str) -> std::result::Result<FaceType, ControlResponse> {
    match FaceType::from_protocol(protocol) {
        Some(t @ (FaceType::Udp | FaceType::Tcp)) => Ok(t),
        _ => Err(ControlResponse::error(format!("unsupported protocol '{}'", protocol))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TxMode;
    use rust_cefnd_common::message::{Message, MessageKind};
    use tokio::time::timeout;

    fn config() -> ForwarderConfig {
        let mut config = ForwarderConfig::default();
        config.tx.mode = TxMode::Simple;
        config.pit.sweep_period_ms = 10;
        config
    }

    async fn next_packet(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Message {
        let bytes = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("face closed");
        Message::parse(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_interest_and_reply_through_the_loop() {
        let mut daemon = Daemon::new(config()).unwrap();
        let faces = daemon.faces();
        let (consumer, mut consumer_rx) = faces.add_memory(FaceType::Udp);
        let (producer, mut producer_rx) = faces.add_memory(FaceType::Udp);
        daemon
            .add_route(Name::from_string("/data"), producer, RouteFlags::STATIC, 1)
            .unwrap();
        let handle = daemon.handle();
        let task = tokio::spawn(daemon.run());

        let interest = MessageBuilder::interest(Name::from_string("/data/x"))
            .chunk(3)
            .hop_limit(8)
            .encode()
            .unwrap();
        // split across two reads to go through the framer
        faces.inject(consumer, interest.slice(..5)).await.unwrap();
        faces.inject(consumer, interest.slice(5..)).await.unwrap();

        let forwarded = next_packet(&mut producer_rx).await;
        assert_eq!(forwarded.kind, MessageKind::Interest);
        assert_eq!(forwarded.hop_limit, 7);
        assert_eq!(handle.pit_snapshot().await.unwrap().len(), 1);

        let object = MessageBuilder::object(Name::from_string("/data/x"), &b"hello"[..])
            .chunk(3)
            .encode()
            .unwrap();
        faces.inject(producer, object).await.unwrap();

        let delivered = next_packet(&mut consumer_rx).await;
        assert_eq!(delivered.kind, MessageKind::ContentObject);
        assert_eq!(delivered.payload.as_deref(), Some(&b"hello"[..]));
        assert!(handle.pit_snapshot().await.unwrap().is_empty());

        let status = handle.status().await.unwrap();
        assert_eq!(status.metrics.interests_forwarded, 1);
        assert_eq!(status.metrics.objects_forwarded, 1);
        assert_eq!(status.faces.len(), 2);
        assert_eq!(status.routes[0].prefix, "/data");

        handle.graceful_stop();
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_admin_interest_from_local_face() {
        let daemon = Daemon::new(config()).unwrap();
        let faces = daemon.faces();
        let (app, mut app_rx) = faces.add_memory(FaceType::Local);
        let task = tokio::spawn(daemon.run());

        let status = MessageBuilder::interest(Name::from_string("/cefnd/status"))
            .encode()
            .unwrap();
        faces.inject(app, status).await.unwrap();
        let reply = next_packet(&mut app_rx).await;
        assert_eq!(reply.kind, MessageKind::ContentObject);
        let body: DaemonStatus = serde_json::from_slice(reply.payload.as_deref().unwrap()).unwrap();
        assert_eq!(body.forwarder.strategy, "default");

        let stop = MessageBuilder::interest(Name::from_string("/cefnd/stop"))
            .encode()
            .unwrap();
        faces.inject(app, stop).await.unwrap();
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_control_routes_open_and_close_faces() {
        let daemon = Daemon::new(config()).unwrap();
        let handle = daemon.handle();
        let task = tokio::spawn(daemon.run());

        let add = ControlRequest::RouteAdd {
            prefix: "/remote".into(),
            protocol: "udp".into(),
            next_hops: vec!["127.0.0.1:19896".into()],
            cost: 5,
        };
        assert_eq!(handle.request(add).await.unwrap(), ControlResponse::Ok);
        let status = handle.status().await.unwrap();
        assert_eq!(status.faces.len(), 1);
        assert_eq!(status.routes[0].faces[0].cost, 5);
        assert_eq!(status.routes[0].faces[0].flags, "control");

        let del = ControlRequest::RouteDel {
            prefix: "/remote".into(),
            protocol: "udp".into(),
            next_hops: vec!["127.0.0.1:19896".into()],
        };
        assert_eq!(handle.request(del.clone()).await.unwrap(), ControlResponse::Ok);
        let status = handle.status().await.unwrap();
        assert!(status.routes.is_empty());
        assert!(status.faces.is_empty());
        assert!(matches!(handle.request(del).await.unwrap(), ControlResponse::Error { .. }));

        let bad = ControlRequest::RouteAdd {
            prefix: "/x".into(),
            protocol: "sctp".into(),
            next_hops: vec!["127.0.0.1".into()],
            cost: 0,
        };
        assert_eq!(
            handle.request(bad).await.unwrap(),
            ControlResponse::error("unsupported protocol 'sctp'")
        );

        handle.request(ControlRequest::Stop).await.unwrap();
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap().unwrap();
    }
}
