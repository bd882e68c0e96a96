//! Transmission pipeline.
//!
//! Frames are queued on one of three priority lanes. A dispatcher task
//! drains the lanes in strict priority order and either sends each frame
//! itself (simple mode) or hands one single-destination copy per face to
//! the worker owning that face's bucket (sharded mode). Every queue is
//! bounded; a full queue costs a few short retries and then the frame.
//!
//! Per-face pacing only happens in sharded mode, where each worker can
//! sleep for its own faces. The simple-mode dispatcher serves every face
//! and never sleeps.

use bytes::Bytes;
use futures::future::join_all;
use log::{debug, trace, warn};
use rust_cefnd_common::metrics::Counter;
use rust_cefnd_common::types::FaceId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::{TxConfig, TxMode};
use crate::face::{FaceError, FaceLayer};

/// Queue priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    High = 0,
    Normal = 1,
    Low = 2,
}

/// Hop-limit-bearing or not; selects the FIB counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameClass {
    Interest,
    Object,
}

/// One buffer bound for one or more faces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxFrame {
    pub payload: Bytes,
    pub faces: Vec<FaceId>,
    pub class: FrameClass,
}

impl TxFrame {
    pub fn new(payload: Bytes, faces: Vec<FaceId>, class: FrameClass) -> Self {
        Self { payload, faces, class }
    }

    pub fn single(payload: Bytes, face: FaceId, class: FrameClass) -> Self {
        Self::new(payload, vec![face], class)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Reported back to the forwarding loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxEvent {
    /// A send hit a hard error; the face should be closed.
    FaceFailed(FaceId),
}

#[derive(Debug, Default)]
pub struct TxStats {
    pub queued: Counter,
    pub sent: Counter,
    /// Frames refused by a full or closed queue.
    pub dropped: Counter,
    pub send_errors: Counter,
    /// Sends addressed to a face that no longer exists.
    pub undeliverable: Counter,
}

impl TxStats {
    pub fn snapshot(&self) -> TxStatsSnapshot {
        TxStatsSnapshot {
            queued: self.queued.value(),
            sent: self.sent.value(),
            dropped: self.dropped.value(),
            send_errors: self.send_errors.value(),
            undeliverable: self.undeliverable.value(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatsSnapshot {
    pub queued: u64,
    pub sent: u64,
    pub dropped: u64,
    pub send_errors: u64,
    #[serde(default)]
    pub undeliverable: u64,
}

/// Bounded push with lossy backpressure.
#[derive(Debug, Clone, Copy)]
struct Backpressure {
    retries: u32,
    backoff: Duration,
}

impl Backpressure {
    /// Try `retries + 1` times; a frame that never fits is dropped and
    /// counted once.
    async fn push(&self, queue: &mpsc::Sender<TxFrame>, mut frame: TxFrame, stats: &TxStats) -> bool {
        for attempt in 0..=self.retries {
            match queue.try_send(frame) {
                Ok(()) => {
                    stats.queued.increment();
                    return true;
                }
                Err(TrySendError::Full(back)) => {
                    frame = back;
                    if attempt < self.retries {
                        sleep(self.backoff).await;
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    stats.dropped.increment();
                    return false;
                }
            }
        }
        trace!("Queue full, dropping {} byte frame", frame.len());
        stats.dropped.increment();
        false
    }
}

/// Per-face minimum gap between sends.
struct Pacer {
    gap: Duration,
    last: HashMap<FaceId, Instant>,
}

impl Pacer {
    fn new(gap: Duration) -> Self {
        Self {
            gap,
            last: HashMap::new(),
        }
    }

    async fn wait(&mut self, face: FaceId) {
        if self.gap.is_zero() {
            return;
        }
        if let Some(last) = self.last.get(&face) {
            let elapsed = last.elapsed();
            if elapsed < self.gap {
                sleep(self.gap - elapsed).await;
            }
        }
        self.last.insert(face, Instant::now());
    }
}

/// Sends frames through the face layer and reports failures.
#[derive(Clone)]
struct Sender {
    faces: Arc<dyn FaceLayer>,
    stats: Arc<TxStats>,
    events: mpsc::Sender<TxEvent>,
}

impl Sender {
    async fn send(&self, face: FaceId, payload: &Bytes) {
        match self.faces.send(face, payload).await {
            Ok(n) if n == payload.len() => {
                self.stats.sent.increment();
            }
            Ok(n) => {
                warn!("[Face {}] Partial send ({} of {} bytes), frame dropped", face.0, n, payload.len());
                self.stats.send_errors.increment();
            }
            Err(FaceError::Unknown(_)) | Err(FaceError::Closed(_)) => {
                debug!("[Face {}] Gone, frame dropped", face.0);
                self.stats.undeliverable.increment();
            }
            Err(e) => {
                warn!("[Face {}] Send failed: {}", face.0, e);
                self.stats.send_errors.increment();
                let _ = self.events.try_send(TxEvent::FaceFailed(face));
            }
        }
    }

    async fn send_frame(&self, frame: &TxFrame, pacer: &mut Pacer) {
        for &face in &frame.faces {
            pacer.wait(face).await;
            self.send(face, &frame.payload).await;
        }
    }
}

pub struct TxPipeline {
    lanes: [mpsc::Sender<TxFrame>; 3],
    backpressure: Backpressure,
    stats: Arc<TxStats>,
    tasks: Vec<JoinHandle<()>>,
}

impl TxPipeline {
    /// Spawn the dispatcher (and workers in sharded mode).
    pub fn start(config: &TxConfig, faces: Arc<dyn FaceLayer>, events: mpsc::Sender<TxEvent>) -> Self {
        let stats = Arc::new(TxStats::default());
        let backpressure = Backpressure {
            retries: config.push_retries,
            backoff: Duration::from_micros(config.retry_backoff_us),
        };
        let sender = Sender {
            faces,
            stats: Arc::clone(&stats),
            events,
        };
        let pacing = Duration::from_micros(config.pacing_us);

        let (high_tx, high_rx) = mpsc::channel(config.lane_capacity);
        let (normal_tx, normal_rx) = mpsc::channel(config.lane_capacity);
        let (low_tx, low_rx) = mpsc::channel(config.lane_capacity);
        let lanes = Lanes {
            high: high_rx,
            normal: normal_rx,
            low: low_rx,
        };

        let mut tasks = Vec::new();
        let route = match config.mode {
            TxMode::Simple => {
                if !pacing.is_zero() {
                    warn!("tx.pacing_us has no effect in simple mode");
                }
                Route::Direct {
                    sender,
                    pacer: Pacer::new(Duration::ZERO),
                }
            }
            TxMode::Sharded => {
                let workers = config.workers.max(1);
                let mut queues = Vec::with_capacity(workers);
                for index in 0..workers {
                    let (tx, rx) = mpsc::channel(config.worker_capacity);
                    queues.push(tx);
                    tasks.push(tokio::spawn(worker(index, rx, sender.clone(), Pacer::new(pacing))));
                }
                Route::Sharded {
                    queues,
                    backpressure,
                    stats: Arc::clone(&stats),
                }
            }
        };
        tasks.push(tokio::spawn(dispatch(lanes, route)));
        debug!("Transmission pipeline started ({:?}, {} tasks)", config.mode, tasks.len());

        Self {
            lanes: [high_tx, normal_tx, low_tx],
            backpressure,
            stats,
            tasks,
        }
    }

    /// Queue `frame`. Returns false when it was dropped.
    pub async fn push(&self, frame: TxFrame, priority: Priority) -> bool {
        if frame.faces.is_empty() {
            return true;
        }
        let lane = &self.lanes[priority as usize];
        self.backpressure.push(lane, frame, &self.stats).await
    }

    pub fn stats(&self) -> Arc<TxStats> {
        Arc::clone(&self.stats)
    }

    /// Close the lanes, let queued frames drain and wait for every task.
    pub async fn shutdown(self) {
        let TxPipeline { lanes, tasks, .. } = self;
        drop(lanes);
        join_all(tasks).await;
        debug!("Transmission pipeline stopped");
    }
}

struct Lanes {
    high: mpsc::Receiver<TxFrame>,
    normal: mpsc::Receiver<TxFrame>,
    low: mpsc::Receiver<TxFrame>,
}

impl Lanes {
    /// Next frame, always preferring the higher lane. `None` once every
    /// lane is closed and empty.
    async fn next(&mut self) -> Option<TxFrame> {
        tokio::select! {
            biased;
            Some(frame) = self.high.recv() => Some(frame),
            Some(frame) = self.normal.recv() => Some(frame),
            Some(frame) = self.low.recv() => Some(frame),
            else => None,
        }
    }
}

enum Route {
    Direct {
        sender: Sender,
        pacer: Pacer,
    },
    Sharded {
        queues: Vec<mpsc::Sender<TxFrame>>,
        backpressure: Backpressure,
        stats: Arc<TxStats>,
    },
}

async fn dispatch(mut lanes: Lanes, mut route: Route) {
    while let Some(frame) = lanes.next().await {
        match &mut route {
            Route::Direct { sender, pacer } => sender.send_frame(&frame, pacer).await,
            Route::Sharded {
                queues,
                backpressure,
                stats,
            } => {
                for &face in &frame.faces {
                    let queue = &queues[face.bucket(queues.len())];
                    let single = TxFrame::single(frame.payload.clone(), face, frame.class);
                    backpressure.push(queue, single, stats).await;
                }
            }
        }
    }
}

async fn worker(index: usize, mut queue: mpsc::Receiver<TxFrame>, sender: Sender, mut pacer: Pacer) {
    trace!("Tx worker {} running", index);
    while let Some(frame) = queue.recv().await {
        sender.send_frame(&frame, &mut pacer).await;
    }
    trace!("Tx worker {} stopped", index);
}
