//! Pending Interest Table.
//!
//! The PIT remembers who is waiting for which name. Entries are owned by
//! the table; the forwarding loop is the only writer, so handing out a
//! `&mut PitEntry` is the whole locking story.

use bytes::Bytes;
use log::{debug, trace};
use rust_cefnd_common::message::{InterestType, Message, MessageKind, Name, SelectiveRange, DIGEST_LEN};
use rust_cefnd_common::types::FaceId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::PitConfig;

/// Request variant an entry was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PitType {
    Regular,
    Symbolic,
    Selective,
}

/// How a key is matched by replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchClass {
    /// Name and chunk must be equal.
    Exact,
    /// Name only; the entry is a window over chunks.
    Symbolic,
}

/// Table key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PitKey {
    pub name: Name,
    pub chunk: Option<u32>,
    pub class: MatchClass,
}

impl PitKey {
    pub fn exact(name: Name, chunk: Option<u32>) -> Self {
        Self {
            name,
            chunk,
            class: MatchClass::Exact,
        }
    }

    pub fn symbolic(name: Name) -> Self {
        Self {
            name,
            chunk: None,
            class: MatchClass::Symbolic,
        }
    }
}

impl fmt::Display for PitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(chunk) = self.chunk {
            write!(f, "/chunk={}", chunk)?;
        }
        if self.class == MatchClass::Symbolic {
            write!(f, " (symbolic)")?;
        }
        Ok(())
    }
}

/// The PIT-relevant part of an Interest.
#[derive(Debug, Clone)]
pub struct PitRequest {
    pub name: Name,
    pub chunk: Option<u32>,
    pub interest_type: InterestType,
    pub selective: Option<SelectiveRange>,
    pub lifetime: Duration,
    pub fingerprint: u64,
    pub key_id_restriction: Option<[u8; DIGEST_LEN]>,
    pub object_hash_restriction: Option<[u8; DIGEST_LEN]>,
}

impl PitRequest {
    /// Extract the request from a parsed Interest. `default_lifetime` is
    /// used when the Interest carries none.
    pub fn from_message(msg: &Message, default_lifetime: Duration) -> Self {
        Self {
            name: msg.name.clone(),
            chunk: msg.chunk,
            interest_type: msg.interest_type,
            selective: msg.selective,
            lifetime: msg.lifetime.unwrap_or(default_lifetime),
            fingerprint: msg.fingerprint(),
            key_id_restriction: msg.key_id_restriction,
            object_hash_restriction: msg.object_hash_restriction,
        }
    }

    /// The table keys this request touches. A Selective request expands to
    /// one exact key per requested chunk.
    pub fn keys(&self) -> Vec<(PitKey, PitType)> {
        match (self.interest_type, self.selective) {
            (InterestType::Symbolic, _) => vec![(PitKey::symbolic(self.name.clone()), PitType::Symbolic)],
            (InterestType::Selective, Some(range)) => range
                .chunks()
                .map(|chunk| (PitKey::exact(self.name.clone(), Some(chunk)), PitType::Selective))
                .collect(),
            _ => vec![(PitKey::exact(self.name.clone(), self.chunk), PitType::Regular)],
        }
    }
}

/* ---------------------------------------------------------------- *
 * Retransmission suppression
 * ---------------------------------------------------------------- */

/// Operator-selected down-face refresh behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuppressionMode {
    /// A live record hit by a retransmission is refreshed, not forwarded.
    Suppress,
    /// Every request is tracked and forwarded as it arrives.
    Verbatim,
}

impl Default for SuppressionMode {
    fn default() -> Self {
        SuppressionMode::Suppress
    }
}

/// Decides whether a request repeats the one already recorded for a face.
pub trait RetransmissionTest: Send + Sync {
    fn is_retransmission(&self, recorded: u64, incoming: u64) -> bool;
}

/// Two requests are the same transmission when their fingerprints (nonce,
/// or body hash when no nonce is present) are equal.
#[derive(Debug, Default, Clone, Copy)]
pub struct SameFingerprint;

impl RetransmissionTest for SameFingerprint {
    fn is_retransmission(&self, recorded: u64, incoming: u64) -> bool {
        recorded == incoming
    }
}

/// Mode plus predicate, held by the forwarder next to the table.
#[derive(Clone)]
pub struct SuppressionPolicy {
    pub mode: SuppressionMode,
    pub test: Arc<dyn RetransmissionTest>,
}

impl SuppressionPolicy {
    pub fn new(mode: SuppressionMode) -> Self {
        Self {
            mode,
            test: Arc::new(SameFingerprint),
        }
    }

    pub fn with_test(mut self, test: Arc<dyn RetransmissionTest>) -> Self {
        self.test = test;
        self
    }
}

impl Default for SuppressionPolicy {
    fn default() -> Self {
        Self::new(SuppressionMode::default())
    }
}

impl fmt::Debug for SuppressionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuppressionPolicy").field("mode", &self.mode).finish()
    }
}

/* ---------------------------------------------------------------- *
 * Entries
 * ---------------------------------------------------------------- */

/// One requester waiting on an entry.
#[derive(Debug, Clone)]
pub struct DownFace {
    pub face: FaceId,
    pub expiry: Instant,
    pub fingerprint: u64,
    /// Interest Return to send if the record expires unanswered.
    pub pending_return: Option<Bytes>,
}

/// Outcome of [`PitEntry::add_down_face`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownFaceUpdate {
    /// First live requester on the entry; forward.
    Created,
    /// Another face joined live requesters; aggregated, no forward.
    Added,
    /// Duplicate of the live record for this face; no forward.
    Refreshed,
    /// Repeat from the same face that must go upstream again.
    Retransmitted,
}

impl DownFaceUpdate {
    pub fn should_forward(self) -> bool {
        matches!(self, DownFaceUpdate::Created | DownFaceUpdate::Retransmitted)
    }
}

#[derive(Debug)]
pub struct PitEntry {
    key: PitKey,
    pit_type: PitType,
    down_faces: Vec<DownFace>,
    up_faces: Vec<FaceId>,
    object_hash_restriction: Option<[u8; DIGEST_LEN]>,
    key_id_restriction: Option<[u8; DIGEST_LEN]>,
    /// Drop lifetime: latest down-face expiry seen.
    adv_lifetime: Instant,
    clean_due: Instant,
    /// Chunks already answered through a Symbolic entry.
    delivered: VecDeque<u32>,
}

impl PitEntry {
    fn new(key: PitKey, pit_type: PitType, now: Instant, clean_interval: Duration) -> Self {
        Self {
            key,
            pit_type,
            down_faces: Vec::new(),
            up_faces: Vec::new(),
            object_hash_restriction: None,
            key_id_restriction: None,
            adv_lifetime: now,
            clean_due: now + clean_interval,
            delivered: VecDeque::new(),
        }
    }

    pub fn key(&self) -> &PitKey {
        &self.key
    }

    pub fn pit_type(&self) -> PitType {
        self.pit_type
    }

    pub fn down_faces(&self) -> &[DownFace] {
        &self.down_faces
    }

    pub fn up_faces(&self) -> &[FaceId] {
        &self.up_faces
    }

    pub fn adv_lifetime(&self) -> Instant {
        self.adv_lifetime
    }

    /// Copy the request's restrictions. Only the creating request sets them.
    pub fn restrict(&mut self, key_id: Option<[u8; DIGEST_LEN]>, object_hash: Option<[u8; DIGEST_LEN]>) {
        self.key_id_restriction = key_id;
        self.object_hash_restriction = object_hash;
    }

    /// Insert or refresh the wait record of `face`.
    pub fn add_down_face(
        &mut self,
        face: FaceId,
        lifetime: Duration,
        fingerprint: u64,
        now: Instant,
        policy: &SuppressionPolicy,
    ) -> DownFaceUpdate {
        let expiry = now + lifetime;
        if expiry > self.adv_lifetime {
            self.adv_lifetime = expiry;
        }

        let others_live = self.down_faces.iter().any(|d| d.face != face && d.expiry > now);

        if let Some(record) = self.down_faces.iter_mut().find(|d| d.face == face) {
            let live = record.expiry > now;
            let update = match policy.mode {
                SuppressionMode::Verbatim => DownFaceUpdate::Retransmitted,
                SuppressionMode::Suppress
                    if live && policy.test.is_retransmission(record.fingerprint, fingerprint) =>
                {
                    DownFaceUpdate::Refreshed
                }
                SuppressionMode::Suppress => DownFaceUpdate::Retransmitted,
            };
            record.expiry = expiry;
            record.fingerprint = fingerprint;
            record.pending_return = None;
            trace!("[Face {}] PIT {} record {:?}", face.0, self.key, update);
            return update;
        }

        self.down_faces.push(DownFace {
            face,
            expiry,
            fingerprint,
            pending_return: None,
        });
        if others_live {
            DownFaceUpdate::Added
        } else {
            DownFaceUpdate::Created
        }
    }

    /// Attach an Interest Return that is sent if `face`'s record expires
    /// before a reply arrives.
    pub fn defer_return(&mut self, face: FaceId, payload: Bytes) {
        if let Some(record) = self.down_faces.iter_mut().find(|d| d.face == face) {
            record.pending_return = Some(payload);
        }
    }

    pub fn add_up_face(&mut self, face: FaceId) {
        if !self.up_faces.contains(&face) {
            self.up_faces.push(face);
        }
    }

    fn live_faces(&self, now: Instant) -> impl Iterator<Item = FaceId> + '_ {
        self.down_faces.iter().filter(move |d| d.expiry > now).map(|d| d.face)
    }

    fn accepts(&self, reply: &Message) -> bool {
        if let Some(hash) = self.object_hash_restriction {
            if reply.object_hash() != hash {
                return false;
            }
        }
        if let Some(key_id) = self.key_id_restriction {
            if reply.key_id != Some(key_id) {
                return false;
            }
        }
        true
    }
}

/* ---------------------------------------------------------------- *
 * Table
 * ---------------------------------------------------------------- */

/// Result of matching one reply.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Faces to answer, deduplicated, in down-face insertion order.
    pub faces: Vec<FaceId>,
    /// Entries that matched by name.
    pub matched: usize,
    /// Entries whose restrictions the reply failed.
    pub rejected: usize,
}

/// Result of one periodic sweep.
#[derive(Debug, Default, Clone)]
pub struct SweepReport {
    pub ran: bool,
    /// Deferred Interest Returns to flush, with their destination.
    pub returns: Vec<(FaceId, Bytes)>,
    pub expired_faces: usize,
    pub removed_entries: usize,
}

/// Control-channel view of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitEntrySnapshot {
    pub name: String,
    pub chunk: Option<u32>,
    pub pit_type: PitType,
    pub down_faces: Vec<u16>,
    pub up_faces: Vec<u16>,
    pub remaining_ms: u64,
}

pub struct Pit {
    entries: HashMap<PitKey, PitEntry>,
    capacity: usize,
    sweep_period: Duration,
    clean_interval: Duration,
    symbolic_window: usize,
    next_sweep: Option<Instant>,
}

impl Pit {
    pub fn new(config: &PitConfig) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: config.capacity,
            sweep_period: Duration::from_millis(config.sweep_period_ms),
            clean_interval: Duration::from_millis(config.clean_interval_ms),
            symbolic_window: config.symbolic_window.max(1),
            next_sweep: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, key: &PitKey) -> Option<&PitEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &PitKey) -> Option<&mut PitEntry> {
        self.entries.get_mut(key)
    }

    /// Find the entry for `key`, creating it when absent. Returns `None`
    /// when the table is full. An empty entry past its drop lifetime is
    /// replaced, never handed back.
    pub fn lookup_or_create(
        &mut self,
        key: PitKey,
        pit_type: PitType,
        now: Instant,
    ) -> Option<(&mut PitEntry, bool)> {
        let state = self
            .entries
            .get(&key)
            .map(|e| e.down_faces.is_empty() && now >= e.adv_lifetime);

        match state {
            Some(false) => return self.entries.get_mut(&key).map(|e| (e, false)),
            Some(true) => {
                trace!("PIT entry {} expired, replacing", key);
            }
            None if self.entries.len() >= self.capacity => {
                debug!("PIT full ({} entries), refusing {}", self.capacity, key);
                return None;
            }
            None => {}
        }

        let entry = PitEntry::new(key.clone(), pit_type, now, self.clean_interval);
        self.entries.insert(key.clone(), entry);
        self.entries.get_mut(&key).map(|e| (e, true))
    }

    /// Drop `face`'s record from the entry at `key`, freeing the entry when
    /// nobody is left waiting. Used after answering from cache and when a
    /// fresh request turns out to be unroutable.
    pub fn release_face(&mut self, key: &PitKey, face: FaceId) {
        let empty = match self.entries.get_mut(key) {
            Some(entry) => {
                entry.down_faces.retain(|d| d.face != face);
                entry.down_faces.is_empty()
            }
            None => return,
        };
        if empty {
            self.entries.remove(key);
        }
    }

    /// Match a ContentObject, Interest Return or trace reply and collect the
    /// faces to answer.
    ///
    /// A reply carrying a chunk tries the exact entry, then the Symbolic
    /// window for its name. A chunkless reply only ever satisfies a Regular
    /// entry. Regular and Selective entries are consumed; Symbolic entries
    /// keep their requesters and answer each chunk once.
    pub fn deliver_and_drain(&mut self, reply: &Message, now: Instant) -> Delivery {
        let mut delivery = Delivery::default();
        let is_object = reply.kind == MessageKind::ContentObject;

        let mut candidates = vec![PitKey::exact(reply.name.clone(), reply.chunk)];
        if is_object && reply.chunk.is_some() {
            candidates.push(PitKey::symbolic(reply.name.clone()));
        }

        for key in candidates {
            let entry = match self.entries.get_mut(&key) {
                Some(entry) => entry,
                None => continue,
            };
            if reply.chunk.is_none() && entry.pit_type != PitType::Regular {
                continue;
            }
            if reply.kind == MessageKind::InterestReturn && entry.pit_type != PitType::Regular {
                continue;
            }
            delivery.matched += 1;

            if is_object && !entry.accepts(reply) {
                debug!("Reply {} rejected by restrictions of {}", reply.name, key);
                delivery.rejected += 1;
                continue;
            }

            match entry.pit_type {
                PitType::Symbolic => {
                    // chunk is present: chunkless replies never reach here
                    let chunk = reply.chunk.unwrap_or_default();
                    if entry.delivered.contains(&chunk) {
                        trace!("Chunk {} of {} already delivered", chunk, key);
                        continue;
                    }
                    if entry.delivered.len() >= self.symbolic_window {
                        entry.delivered.pop_front();
                    }
                    entry.delivered.push_back(chunk);
                    push_unique(&mut delivery.faces, entry.live_faces(now));
                }
                PitType::Regular | PitType::Selective => {
                    push_unique(&mut delivery.faces, entry.live_faces(now));
                    // taken out by value: no later reply can reach it
                    if let Some(entry) = self.entries.remove(&key) {
                        trace!("PIT entry {} consumed", entry.key);
                    }
                }
            }
        }

        delivery
    }

    /// Periodic two-phase cleanup. Does nothing until the sweep period has
    /// elapsed since the last run.
    pub fn sweep(&mut self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        if let Some(next) = self.next_sweep {
            if now < next {
                return report;
            }
        }
        self.next_sweep = Some(now + self.sweep_period);
        report.ran = true;

        for entry in self.entries.values_mut() {
            if now >= entry.adv_lifetime {
                for record in entry.down_faces.drain(..) {
                    if let Some(payload) = record.pending_return {
                        report.returns.push((record.face, payload));
                    }
                    report.expired_faces += 1;
                }
            } else if now >= entry.clean_due {
                let mut kept = Vec::with_capacity(entry.down_faces.len());
                for record in entry.down_faces.drain(..) {
                    if record.expiry > now {
                        kept.push(record);
                        continue;
                    }
                    if let Some(payload) = record.pending_return {
                        report.returns.push((record.face, payload));
                    }
                    report.expired_faces += 1;
                }
                entry.down_faces = kept;
                entry.clean_due = now + self.clean_interval;
            }
        }

        let before = self.entries.len();
        self.entries
            .retain(|_, e| !(e.down_faces.is_empty() && now >= e.adv_lifetime));
        report.removed_entries = before - self.entries.len();

        if report.expired_faces > 0 || report.removed_entries > 0 {
            debug!(
                "PIT sweep: {} down-faces expired, {} entries removed, {} returns",
                report.expired_faces,
                report.removed_entries,
                report.returns.len()
            );
        }
        report
    }

    /// Forget `face` everywhere.
    pub fn remove_face(&mut self, face: FaceId) {
        for entry in self.entries.values_mut() {
            entry.down_faces.retain(|d| d.face != face);
            entry.up_faces.retain(|&f| f != face);
        }
    }

    pub fn snapshot(&self, now: Instant) -> Vec<PitEntrySnapshot> {
        let mut entries: Vec<PitEntrySnapshot> = self
            .entries
            .values()
            .map(|e| PitEntrySnapshot {
                name: e.key.name.to_string(),
                chunk: e.key.chunk,
                pit_type: e.pit_type,
                down_faces: e.down_faces.iter().map(|d| d.face.0).collect(),
                up_faces: e.up_faces.iter().map(|f| f.0).collect(),
                remaining_ms: e.adv_lifetime.saturating_duration_since(now).as_millis() as u64,
            })
            .collect();
        entries.sort_by(|a, b| (&a.name, a.chunk).cmp(&(&b.name, b.chunk)));
        entries
    }
}

fn push_unique(out: &mut Vec<FaceId>, faces: impl Iterator<Item = FaceId>) {
    for face in faces {
        if !out.contains(&face) {
            out.push(face);
        }
    }
}
