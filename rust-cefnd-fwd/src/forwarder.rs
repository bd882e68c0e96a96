//! Forwarding decisions.
//!
//! [`Forwarder`] owns the PIT, FIB and Content Store and turns every
//! received packet into a list of [`Action`]s. It never performs I/O; the
//! event loop executes what it returns.

use log::{debug, trace, warn};
use rust_cefnd_common::message::{fnv1a_64, InterestType, Message, MessageKind, Name};
use rust_cefnd_common::metrics::ForwarderMetrics;
use rust_cefnd_common::types::{FaceId, ReturnCode};
use rust_cefnd_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ForwarderConfig;
use crate::cs::{ContentStore, MemoryContentStore};
use crate::face::FaceInfo;
use crate::fib::{Fib, FibEntrySnapshot, FibError, RouteChange, RouteFlags};
use crate::framer::Frame;
use crate::pit::{DownFaceUpdate, Pit, PitEntrySnapshot, PitKey, PitRequest, SuppressionMode, SuppressionPolicy};
use crate::strategy::{self, Strategy};
use crate::tx::{FrameClass, Priority, TxFrame};

/// Something the event loop must do on the forwarder's behalf.
#[derive(Debug, Clone)]
pub enum Action {
    /// Queue a frame on the transmission pipeline.
    Send(TxFrame, Priority),
    /// An administrative request arrived from a local face.
    Command {
        command: AdminCommand,
        face: FaceId,
        request: Message,
    },
    /// A face is no longer used by any route.
    CloseFace(FaceId),
}

/// Administrative requests reachable by Interest name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    Status,
    StatusPit,
    Stop,
}

/// Exact-match map from administrative names to commands, keyed by the
/// FNV-1a hash of the name's string form.
#[derive(Debug, Clone)]
pub struct CommandFilter {
    commands: HashMap<u64, (Name, AdminCommand)>,
}

impl CommandFilter {
    pub const STATUS: &'static str = "/cefnd/status";
    pub const STATUS_PIT: &'static str = "/cefnd/status/pit";
    pub const STOP: &'static str = "/cefnd/stop";

    pub fn new() -> Self {
        let mut commands = HashMap::new();
        for (uri, command) in [
            (Self::STATUS, AdminCommand::Status),
            (Self::STATUS_PIT, AdminCommand::StatusPit),
            (Self::STOP, AdminCommand::Stop),
        ] {
            let name = Name::from_string(uri);
            commands.insert(fnv1a_64(name.to_string().as_bytes()), (name, command));
        }
        Self { commands }
    }

    pub fn lookup(&self, name: &Name) -> Option<AdminCommand> {
        let (registered, command) = self.commands.get(&fnv1a_64(name.to_string().as_bytes()))?;
        (registered == name).then_some(*command)
    }
}

impl Default for CommandFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Packet validation hook. Runs before any table is touched.
pub trait Validator: Send + Sync {
    fn verify(&self, msg: &Message) -> bool;
}

/// Accepts every packet.
#[derive(Debug, Default)]
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn verify(&self, _msg: &Message) -> bool {
        true
    }
}

/// Table sizes and settings reported by the status command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwarderStatus {
    pub strategy: String,
    pub suppression: SuppressionMode,
    pub interest_return: bool,
    pub pit_entries: usize,
    pub pit_capacity: usize,
    pub fib_entries: usize,
    pub cs_entries: usize,
}

pub struct Forwarder {
    config: ForwarderConfig,
    pit: Pit,
    fib: Fib,
    cs: Box<dyn ContentStore>,
    strategy: Arc<dyn Strategy>,
    validator: Arc<dyn Validator>,
    suppression: SuppressionPolicy,
    commands: CommandFilter,
    metrics: Arc<ForwarderMetrics>,
}

impl Forwarder {
    pub fn new(config: ForwarderConfig) -> Result<Self> {
        let strategy = strategy::by_name(&config.strategy)
            .ok_or_else(|| Error::Config(format!("Unknown strategy '{}'", config.strategy)))?;
        let cs_capacity = if config.cs.enabled { config.cs.capacity } else { 0 };
        let cs = MemoryContentStore::new(cs_capacity, Duration::from_millis(config.cs.default_cache_time_ms));

        Ok(Self {
            pit: Pit::new(&config.pit),
            fib: Fib::new(config.fib.capacity),
            cs: Box::new(cs),
            strategy,
            validator: Arc::new(AcceptAll),
            suppression: SuppressionPolicy::new(config.pit.suppression),
            commands: CommandFilter::new(),
            metrics: Arc::new(ForwarderMetrics::new()),
            config,
        })
    }

    pub fn with_content_store(mut self, cs: Box<dyn ContentStore>) -> Self {
        self.cs = cs;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_suppression(mut self, policy: SuppressionPolicy) -> Self {
        self.suppression = policy;
        self
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<ForwarderMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn pit(&self) -> &Pit {
        &self.pit
    }

    /// Process one packet received on `face`.
    pub fn handle_frame(&mut self, face: FaceId, frame: Frame, faces: &dyn FaceInfo, now: Instant) -> Vec<Action> {
        let started = Instant::now();
        self.metrics.bytes_received.add(frame.bytes.len() as u64);

        let msg = match Message::parse(frame.bytes) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("[Face {}] Dropping malformed packet: {}", face.0, e);
                self.metrics.malformed.increment();
                return Vec::new();
            }
        };

        if !self.validator.verify(&msg) {
            debug!("[Face {}] Validation failed for {}", face.0, msg.name);
            self.metrics.validation_failures.increment();
            return self.interest_return(face, &msg, ReturnCode::MalformedInterest);
        }

        let actions = match msg.kind {
            MessageKind::Interest | MessageKind::TraceRequest => self.on_interest(face, msg, faces, now),
            MessageKind::ContentObject | MessageKind::TraceReply => self.on_reply(face, msg, faces, now),
            MessageKind::InterestReturn => self.on_return(face, msg, faces, now),
        };

        self.metrics.pit_size.set(self.pit.len() as u64);
        self.metrics
            .processing_time_us
            .observe(started.elapsed().as_micros() as u64);
        actions
    }

    fn on_interest(&mut self, face: FaceId, msg: Message, faces: &dyn FaceInfo, now: Instant) -> Vec<Action> {
        self.metrics.interests_received.increment();
        let local = faces.face_type(face).map_or(false, |t| t.is_local());

        if msg.kind == MessageKind::Interest {
            if let Some(command) = self.commands.lookup(&msg.name) {
                if !local {
                    warn!("[Face {}] Refusing administrative request {} from a remote face", face.0, msg.name);
                    return Vec::new();
                }
                self.metrics.commands.increment();
                return vec![Action::Command {
                    command,
                    face,
                    request: msg,
                }];
            }
        }

        // Hop limit. Local faces are trusted and not decremented.
        let (hop_limit, exhausted) = if local {
            (msg.hop_limit, false)
        } else if msg.hop_limit == 0 {
            debug!("[Face {}] Hop limit exceeded for {}", face.0, msg.name);
            self.metrics.hop_limit_drops.increment();
            return self.interest_return(face, &msg, ReturnCode::HopLimitExceeded);
        } else {
            let decremented = msg.hop_limit - 1;
            (decremented, decremented == 0)
        };

        let request = PitRequest::from_message(&msg, self.config.pit.default_lifetime());
        let deferred_return = (exhausted && self.config.interest_return && msg.kind == MessageKind::Interest)
            .then(|| msg.to_interest_return(self.config.hop_limit_return_code));

        let mut keys: Vec<PitKey> = Vec::new();
        let mut forward = false;
        for (key, pit_type) in request.keys() {
            let (entry, created) = match self.pit.lookup_or_create(key.clone(), pit_type, now) {
                Some(found) => found,
                None => {
                    self.metrics.pit_full.increment();
                    for touched in &keys {
                        self.pit.release_face(touched, face);
                    }
                    return self.interest_return(face, &msg, ReturnCode::NoResources);
                }
            };
            if created {
                entry.restrict(request.key_id_restriction, request.object_hash_restriction);
            }

            let update = entry.add_down_face(face, request.lifetime, request.fingerprint, now, &self.suppression);
            // Requesters held back so far (hop limit exhausted) never went
            // upstream; the first one that may go carries the entry.
            let upstream = update.should_forward()
                || (update == DownFaceUpdate::Added && entry.up_faces().is_empty());
            match update {
                DownFaceUpdate::Added if !upstream => self.metrics.interests_aggregated.increment(),
                DownFaceUpdate::Refreshed => self.metrics.interests_suppressed.increment(),
                _ => {}
            }
            forward |= upstream;

            if let Some(payload) = &deferred_return {
                entry.defer_return(face, payload.clone());
            }
            keys.push(key);
        }

        if !forward {
            trace!("[Face {}] {} pending, not forwarded", face.0, msg.name);
            return Vec::new();
        }

        if msg.kind == MessageKind::Interest && request.interest_type == InterestType::Regular && !msg.signed {
            match self.cs.lookup(&msg.name, msg.chunk, now) {
                Some(object) if satisfies(&request, &object) => {
                    trace!("[Face {}] {} answered from cache", face.0, msg.name);
                    self.metrics.cs_hits.increment();
                    for key in &keys {
                        self.pit.release_face(key, face);
                    }
                    return vec![Action::Send(
                        TxFrame::single(object.raw().clone(), face, FrameClass::Object),
                        Priority::High,
                    )];
                }
                _ => self.metrics.cs_misses.increment(),
            }
        }

        if exhausted {
            debug!(
                "[Face {}] {} reached hop limit, held until expiry",
                face.0, msg.name
            );
            self.metrics.hop_limit_drops.increment();
            return Vec::new();
        }

        let (prefix, targets) = match self.fib.longest_prefix_match(&msg.name) {
            Some(entry) => (
                Some(entry.key().clone()),
                self.strategy.select_for_interest(entry, face, faces),
            ),
            None => (None, Vec::new()),
        };

        let prefix = match prefix {
            Some(prefix) if !targets.is_empty() => prefix,
            _ => {
                debug!("[Face {}] No route for {}", face.0, msg.name);
                self.metrics.no_route.increment();
                for key in &keys {
                    self.pit.release_face(key, face);
                }
                return self.interest_return(face, &msg, ReturnCode::NoRoute);
            }
        };

        for &target in &targets {
            self.fib.count_tx(&prefix, target, FrameClass::Interest);
        }
        for key in &keys {
            if let Some(entry) = self.pit.get_mut(key) {
                for &target in &targets {
                    entry.add_up_face(target);
                }
            }
        }
        self.metrics.interests_forwarded.increment();

        let priority = match msg.kind {
            MessageKind::TraceRequest => Priority::Low,
            _ => Priority::Normal,
        };
        let payload = msg.with_hop_limit(hop_limit);
        vec![Action::Send(TxFrame::new(payload, targets, FrameClass::Interest), priority)]
    }

    fn on_reply(&mut self, face: FaceId, msg: Message, faces: &dyn FaceInfo, now: Instant) -> Vec<Action> {
        self.metrics.objects_received.increment();

        let delivery = self.pit.deliver_and_drain(&msg, now);
        self.metrics.restriction_rejects.add(delivery.rejected as u64);
        if delivery.matched == 0 {
            trace!("[Face {}] Unsolicited {}", face.0, msg.name);
            self.metrics.objects_unsolicited.increment();
            return Vec::new();
        }

        let targets = self.strategy.select_for_object(&delivery.faces, face, faces);
        if targets.is_empty() {
            return Vec::new();
        }

        let priority = if msg.kind == MessageKind::ContentObject {
            self.cs.put(&msg, now);
            Priority::High
        } else {
            Priority::Low
        };

        if let Some(prefix) = self.fib.longest_prefix_match(&msg.name).map(|e| e.key().clone()) {
            for &target in &targets {
                self.fib.count_tx(&prefix, target, FrameClass::Object);
            }
        }
        self.metrics.objects_forwarded.add(targets.len() as u64);

        let payload = msg.raw().clone();
        targets
            .into_iter()
            .map(|target| Action::Send(TxFrame::single(payload.clone(), target, FrameClass::Object), priority))
            .collect()
    }

    fn on_return(&mut self, face: FaceId, msg: Message, faces: &dyn FaceInfo, now: Instant) -> Vec<Action> {
        self.metrics.returns_received.increment();
        debug!(
            "[Face {}] Interest Return for {} ({:?})",
            face.0, msg.name, msg.return_code
        );

        let delivery = self.pit.deliver_and_drain(&msg, now);
        let targets = self.strategy.select_for_object(&delivery.faces, face, faces);
        self.metrics.returns_sent.add(targets.len() as u64);

        let payload = msg.raw().clone();
        targets
            .into_iter()
            .map(|target| Action::Send(TxFrame::single(payload.clone(), target, FrameClass::Object), Priority::Low))
            .collect()
    }

    /// Immediate Interest Return to `face`, when returns are enabled and the
    /// packet is an Interest.
    fn interest_return(&self, face: FaceId, msg: &Message, code: ReturnCode) -> Vec<Action> {
        if !self.config.interest_return || msg.kind != MessageKind::Interest {
            return Vec::new();
        }
        self.metrics.returns_sent.increment();
        vec![Action::Send(
            TxFrame::single(msg.to_interest_return(code), face, FrameClass::Object),
            Priority::Low,
        )]
    }

    /// Periodic housekeeping: PIT expiry (flushing deferred returns) and
    /// cache purge.
    pub fn sweep(&mut self, now: Instant) -> Vec<Action> {
        let report = self.pit.sweep(now);
        if !report.ran {
            return Vec::new();
        }
        self.metrics.pit_expirations.add(report.expired_faces as u64);
        self.metrics.pit_size.set(self.pit.len() as u64);

        let purged = self.cs.purge(now);
        if purged > 0 {
            trace!("CS purged {} objects", purged);
        }

        self.metrics.returns_sent.add(report.returns.len() as u64);
        report
            .returns
            .into_iter()
            .map(|(face, payload)| Action::Send(TxFrame::single(payload, face, FrameClass::Object), Priority::Low))
            .collect()
    }

    /// Forget a face that went away.
    pub fn face_closed(&mut self, face: FaceId) {
        self.pit.remove_face(face);
        let removed = self.fib.remove_face(face);
        if removed > 0 {
            debug!("[Face {}] Closed, {} prefixes lost their last route", face.0, removed);
        }
        self.metrics.fib_size.set(self.fib.len() as u64);
        self.metrics.pit_size.set(self.pit.len() as u64);
    }

    pub fn route_add(
        &mut self,
        prefix: Name,
        face: FaceId,
        flags: RouteFlags,
        cost: u16,
    ) -> std::result::Result<RouteChange, FibError> {
        let change = self.fib.route_add(prefix, face, flags, cost, None)?;
        self.metrics.fib_size.set(self.fib.len() as u64);
        Ok(change)
    }

    /// Remove a route. A non-local face left without any route is closed.
    pub fn route_del(&mut self, prefix: &Name, face: FaceId, faces: &dyn FaceInfo) -> (RouteChange, Vec<Action>) {
        let change = self.fib.route_del(prefix, face, None);
        self.metrics.fib_size.set(self.fib.len() as u64);

        let mut actions = Vec::new();
        if change != RouteChange::NotFound
            && !self.fib.face_referenced(face)
            && !faces.face_type(face).map_or(false, |t| t.is_local())
        {
            actions.push(Action::CloseFace(face));
        }
        (change, actions)
    }

    pub fn pit_snapshot(&self, now: Instant) -> Vec<PitEntrySnapshot> {
        self.pit.snapshot(now)
    }

    pub fn fib_snapshot(&self) -> Vec<FibEntrySnapshot> {
        self.fib.snapshot()
    }

    pub fn status(&self) -> ForwarderStatus {
        ForwarderStatus {
            strategy: self.strategy.name().to_string(),
            suppression: self.suppression.mode,
            interest_return: self.config.interest_return,
            pit_entries: self.pit.len(),
            pit_capacity: self.pit.capacity(),
            fib_entries: self.fib.len(),
            cs_entries: self.cs.len(),
        }
    }
}

/// Whether a cached object honours the request's restrictions.
fn satisfies(request: &PitRequest, object: &Message) -> bool {
    if let Some(key_id) = request.key_id_restriction {
        if object.key_id != Some(key_id) {
            return false;
        }
    }
    if let Some(hash) = request.object_hash_restriction {
        if object.object_hash() != hash {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_cefnd_common::message::MessageBuilder;
    use rust_cefnd_common::types::FaceType;

    /// Faces 1, 2 and 4 are UDP, 3 is TCP, 7 is local.
    struct Faces;

    impl FaceInfo for Faces {
        fn is_active(&self, face: FaceId) -> bool {
            face.0 != 0
        }

        fn face_type(&self, face: FaceId) -> Option<FaceType> {
            match face.0 {
                3 => Some(FaceType::Tcp),
                7 => Some(FaceType::Local),
                _ => Some(FaceType::Udp),
            }
        }
    }

    fn forwarder() -> Forwarder {
        let mut fwd = Forwarder::new(ForwarderConfig::default()).unwrap();
        fwd.route_add(Name::from_string("/a"), FaceId(2), RouteFlags::STATIC, 10)
            .unwrap();
        fwd.route_add(Name::from_string("/a"), FaceId(3), RouteFlags::STATIC, 10)
            .unwrap();
        fwd
    }

    fn frame(builder: MessageBuilder) -> Frame {
        let msg = builder.build().unwrap();
        Frame {
            bytes: msg.raw().clone(),
            header_len: msg.header_len,
        }
    }

    fn interest(name: &str, hop_limit: u8) -> Frame {
        frame(
            MessageBuilder::interest(Name::from_string(name))
                .chunk(0)
                .hop_limit(hop_limit),
        )
    }

    fn object(name: &str) -> Frame {
        frame(MessageBuilder::object(Name::from_string(name), &b"content"[..]).chunk(0))
    }

    fn sends(actions: &[Action]) -> Vec<(&TxFrame, Priority)> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(frame, prio) => Some((frame, *prio)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_type_matched_forward_decrements_hop_limit() {
        let mut fwd = forwarder();
        let now = Instant::now();

        let actions = fwd.handle_frame(FaceId(1), interest("/a/b", 5), &Faces, now);
        let sent = sends(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.faces, vec![FaceId(2)]);
        assert_eq!(sent[0].1, Priority::Normal);

        let out = Message::parse(sent[0].0.payload.clone()).unwrap();
        assert_eq!(out.hop_limit, 4);
        assert_eq!(out.name, Name::from_string("/a/b"));

        let snapshot = fwd.pit_snapshot(now);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].down_faces, vec![1]);
        assert_eq!(snapshot[0].up_faces, vec![2]);
        assert_eq!(fwd.fib_snapshot()[0].faces[0].tx_interest, 1);
    }

    #[test]
    fn test_aggregation_and_fan_out() {
        let mut fwd = forwarder();
        let now = Instant::now();

        let first = fwd.handle_frame(FaceId(1), interest("/a/b", 5), &Faces, now);
        assert_eq!(sends(&first).len(), 1);
        let second = fwd.handle_frame(FaceId(4), interest("/a/b", 5), &Faces, now);
        assert!(second.is_empty());

        let snapshot = fwd.pit_snapshot(now);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].down_faces, vec![1, 4]);
        assert_eq!(fwd.metrics().snapshot().interests_aggregated, 1);

        let replies = fwd.handle_frame(FaceId(2), object("/a/b"), &Faces, now);
        let sent = sends(&replies);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0.faces, vec![FaceId(1)]);
        assert_eq!(sent[1].0.faces, vec![FaceId(4)]);
        assert!(sent.iter().all(|(_, prio)| *prio == Priority::High));
        assert!(fwd.pit().is_empty());

        // a second copy of the reply finds nothing
        assert!(fwd.handle_frame(FaceId(3), object("/a/b"), &Faces, now).is_empty());
        assert_eq!(fwd.metrics().snapshot().objects_unsolicited, 1);
    }

    #[test]
    fn test_hop_limit_one_defers_return_until_expiry() {
        let mut fwd = Forwarder::new(ForwarderConfig::default()).unwrap();
        let now = Instant::now();

        let actions = fwd.handle_frame(FaceId(1), interest("/x/y", 1), &Faces, now);
        assert!(actions.is_empty());
        assert_eq!(fwd.pit().len(), 1);

        assert!(fwd.sweep(now).is_empty());
        assert!(fwd.sweep(now + Duration::from_secs(1)).is_empty());
        assert_eq!(fwd.pit().len(), 1);

        let flushed = fwd.sweep(now + Duration::from_millis(4001));
        let sent = sends(&flushed);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.faces, vec![FaceId(1)]);
        let ret = Message::parse(sent[0].0.payload.clone()).unwrap();
        assert_eq!(ret.kind, MessageKind::InterestReturn);
        assert_eq!(ret.return_code, Some(ReturnCode::HopLimitExceeded));
        assert!(fwd.pit().is_empty());
    }

    #[test]
    fn test_held_entry_still_forwards_later_requester() {
        let mut fwd = forwarder();
        let now = Instant::now();

        assert!(fwd.handle_frame(FaceId(1), interest("/a/b", 1), &Faces, now).is_empty());

        let actions = fwd.handle_frame(FaceId(4), interest("/a/b", 8), &Faces, now);
        let sent = sends(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.faces, vec![FaceId(2)]);
        assert_eq!(Message::parse(sent[0].0.payload.clone()).unwrap().hop_limit, 7);
        assert_eq!(fwd.metrics().snapshot().interests_aggregated, 0);

        // once upstream, newcomers aggregate as usual
        assert!(fwd.handle_frame(FaceId(5), interest("/a/b", 8), &Faces, now).is_empty());
        assert_eq!(fwd.metrics().snapshot().interests_aggregated, 1);
        let snapshot = fwd.pit_snapshot(now);
        assert_eq!(snapshot[0].down_faces, vec![1, 4, 5]);
        assert_eq!(snapshot[0].up_faces, vec![2]);

        let replies = fwd.handle_frame(FaceId(2), object("/a/b"), &Faces, now);
        let faces: Vec<FaceId> = sends(&replies).iter().flat_map(|(f, _)| f.faces.clone()).collect();
        assert_eq!(faces, vec![FaceId(1), FaceId(4), FaceId(5)]);
        assert!(fwd.pit().is_empty());
    }

    #[test]
    fn test_hop_limit_zero_returned_immediately() {
        let mut fwd = forwarder();
        let now = Instant::now();

        let actions = fwd.handle_frame(FaceId(1), interest("/a/b", 0), &Faces, now);
        let sent = sends(&actions);
        assert_eq!(sent.len(), 1);
        let ret = Message::parse(sent[0].0.payload.clone()).unwrap();
        assert_eq!(ret.return_code, Some(ReturnCode::HopLimitExceeded));
        assert!(fwd.pit().is_empty());

        // local faces are not subject to the hop limit
        let local = fwd.handle_frame(FaceId(7), interest("/a/b", 0), &Faces, now);
        assert_eq!(sends(&local)[0].0.faces, vec![FaceId(2)]);
    }

    #[test]
    fn test_no_route_withdraws_pit_state() {
        let mut fwd = forwarder();
        let now = Instant::now();

        let actions = fwd.handle_frame(FaceId(1), interest("/nowhere", 5), &Faces, now);
        let sent = sends(&actions);
        assert_eq!(sent.len(), 1);
        let ret = Message::parse(sent[0].0.payload.clone()).unwrap();
        assert_eq!(ret.return_code, Some(ReturnCode::NoRoute));
        assert!(fwd.pit().is_empty());
        assert_eq!(fwd.metrics().snapshot().no_route, 1);
    }

    #[test]
    fn test_cache_answers_later_interest() {
        let mut fwd = forwarder();
        let now = Instant::now();

        fwd.handle_frame(FaceId(1), interest("/a/b", 5), &Faces, now);
        fwd.handle_frame(FaceId(2), object("/a/b"), &Faces, now);

        let actions = fwd.handle_frame(FaceId(4), interest("/a/b", 5), &Faces, now);
        let sent = sends(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.faces, vec![FaceId(4)]);
        assert_eq!(sent[0].0.class, FrameClass::Object);
        assert!(fwd.pit().is_empty());
        assert_eq!(fwd.metrics().snapshot().cs_hits, 1);
    }

    fn small_pit(capacity: usize) -> Forwarder {
        let mut config = ForwarderConfig::default();
        config.pit.capacity = capacity;
        let mut fwd = Forwarder::new(config).unwrap();
        fwd.route_add(Name::from_string("/a"), FaceId(2), RouteFlags::STATIC, 10)
            .unwrap();
        fwd
    }

    fn return_code(actions: &[Action]) -> Option<ReturnCode> {
        let sent = sends(actions);
        assert_eq!(sent.len(), 1);
        Message::parse(sent[0].0.payload.clone()).unwrap().return_code
    }

    #[test]
    fn test_full_pit_refuses_regular_interest() {
        let mut fwd = small_pit(1);
        let now = Instant::now();

        assert_eq!(sends(&fwd.handle_frame(FaceId(1), interest("/a/b", 5), &Faces, now)).len(), 1);
        let refused = fwd.handle_frame(FaceId(4), interest("/a/c", 5), &Faces, now);
        assert_eq!(sends(&refused)[0].0.faces, vec![FaceId(4)]);
        assert_eq!(return_code(&refused), Some(ReturnCode::NoResources));

        assert_eq!(fwd.pit().len(), 1);
        assert_eq!(fwd.pit_snapshot(now)[0].name, "/a/b");
        assert_eq!(fwd.metrics().snapshot().pit_full, 1);
    }

    #[test]
    fn test_selective_over_capacity_rolls_back() {
        let mut fwd = small_pit(2);
        let now = Instant::now();
        let range = frame(MessageBuilder::interest(Name::from_string("/a/sel")).selective(0, 3));

        let actions = fwd.handle_frame(FaceId(1), range, &Faces, now);
        assert_eq!(return_code(&actions), Some(ReturnCode::NoResources));
        assert!(fwd.pit().is_empty());

        // within capacity every chunk gets its own entry and one upstream copy
        let fits = frame(MessageBuilder::interest(Name::from_string("/a/sel")).selective(4, 2));
        let actions = fwd.handle_frame(FaceId(1), fits, &Faces, now);
        assert_eq!(sends(&actions).len(), 1);
        let chunks: Vec<Option<u32>> = fwd.pit_snapshot(now).iter().map(|e| e.chunk).collect();
        assert_eq!(chunks, vec![Some(4), Some(5)]);
    }

    #[test]
    fn test_symbolic_interest_bypasses_cache() {
        let mut fwd = forwarder();
        let now = Instant::now();

        // chunk 0 of /a/s ends up in the cache
        fwd.handle_frame(FaceId(1), interest("/a/s", 5), &Faces, now);
        fwd.handle_frame(FaceId(2), object("/a/s"), &Faces, now);

        let symbolic = frame(MessageBuilder::interest(Name::from_string("/a/s")).chunk(0).symbolic());
        let actions = fwd.handle_frame(FaceId(4), symbolic, &Faces, now);
        let sent = sends(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.class, FrameClass::Interest);
        assert_eq!(sent[0].0.faces, vec![FaceId(2)]);
        assert_eq!(fwd.metrics().snapshot().cs_hits, 0);

        let chunk = |n: u32| frame(MessageBuilder::object(Name::from_string("/a/s"), &b"c"[..]).chunk(n));
        for n in 0..3 {
            let replies = fwd.handle_frame(FaceId(2), chunk(n), &Faces, now);
            assert_eq!(sends(&replies).len(), 1, "chunk {}", n);
            assert_eq!(sends(&replies)[0].0.faces, vec![FaceId(4)]);
        }
        // each chunk reaches the requester once
        assert!(fwd.handle_frame(FaceId(2), chunk(1), &Faces, now).is_empty());
        assert_eq!(fwd.pit().len(), 1);
    }

    #[test]
    fn test_admin_commands_local_only() {
        let mut fwd = forwarder();
        let now = Instant::now();
        let status = frame(MessageBuilder::interest(Name::from_string(CommandFilter::STATUS)));

        let actions = fwd.handle_frame(FaceId(7), status.clone(), &Faces, now);
        assert!(matches!(
            actions.as_slice(),
            [Action::Command {
                command: AdminCommand::Status,
                face: FaceId(7),
                ..
            }]
        ));
        assert!(fwd.handle_frame(FaceId(1), status, &Faces, now).is_empty());

        let filter = CommandFilter::new();
        assert_eq!(filter.lookup(&Name::from_string("/cefnd/stop")), Some(AdminCommand::Stop));
        assert_eq!(filter.lookup(&Name::from_string("/cefnd/status/pit")), Some(AdminCommand::StatusPit));
        assert_eq!(filter.lookup(&Name::from_string("/cefnd/other")), None);
    }

    #[test]
    fn test_validation_failure_returns_malformed() {
        struct RejectAll;
        impl Validator for RejectAll {
            fn verify(&self, _msg: &Message) -> bool {
                false
            }
        }

        let mut fwd = forwarder().with_validator(Arc::new(RejectAll));
        let actions = fwd.handle_frame(FaceId(1), interest("/a/b", 5), &Faces, Instant::now());
        let ret = Message::parse(sends(&actions)[0].0.payload.clone()).unwrap();
        assert_eq!(ret.return_code, Some(ReturnCode::MalformedInterest));
        assert!(fwd.pit().is_empty());
        assert_eq!(fwd.metrics().snapshot().validation_failures, 1);
    }

    #[test]
    fn test_route_del_closes_unreferenced_face() {
        let mut fwd = forwarder();
        let (change, actions) = fwd.route_del(&Name::from_string("/a"), FaceId(2), &Faces);
        assert_eq!(change, RouteChange::Removed);
        assert!(matches!(actions.as_slice(), [Action::CloseFace(FaceId(2))]));

        let (change, actions) = fwd.route_del(&Name::from_string("/a"), FaceId(2), &Faces);
        assert_eq!(change, RouteChange::NotFound);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_garbage_counted_as_malformed() {
        let mut fwd = forwarder();
        let junk = Frame {
            bytes: bytes::Bytes::from_static(&[1, 0, 0, 8, 5, 0, 0, 8]),
            header_len: 8,
        };
        assert!(fwd.handle_frame(FaceId(1), junk, &Faces, Instant::now()).is_empty());
        assert_eq!(fwd.metrics().snapshot().malformed, 1);
    }
}
