//! Forwarding Information Base.
//!
//! Prefixes are registered explicitly, so longest-prefix match is a series
//! of exact hash probes from the full name down to the root.

use log::{debug, info};
use rust_cefnd_common::message::{Name, DIGEST_LEN};
use rust_cefnd_common::types::FaceId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use thiserror::Error;

use crate::face::FaceInfo;
use crate::tx::FrameClass;

/// Origin flags of a route. Merged with `|` when the same route is added
/// again by another source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteFlags(pub u8);

impl RouteFlags {
    pub const DYNAMIC: RouteFlags = RouteFlags(0x01);
    pub const STATIC: RouteFlags = RouteFlags(0x02);
    pub const CONTROL: RouteFlags = RouteFlags(0x04);

    pub fn contains(self, other: RouteFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for RouteFlags {
    type Output = RouteFlags;

    fn bitor(self, rhs: RouteFlags) -> RouteFlags {
        RouteFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for RouteFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (RouteFlags::DYNAMIC, "dynamic"),
            (RouteFlags::STATIC, "static"),
            (RouteFlags::CONTROL, "control"),
        ]
        .iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| *name)
        .collect();
        if names.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// FIB errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FibError {
    #[error("FIB is full ({0} prefixes)")]
    Full(usize),
}

/// A next hop of a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FibFace {
    pub face: FaceId,
    pub flags: RouteFlags,
    pub cost: u16,
    /// Key-scoped route; `None` for ordinary routes.
    pub key_id: Option<[u8; DIGEST_LEN]>,
    pub tx_interest: u64,
    pub tx_object: u64,
}

#[derive(Debug, Clone)]
pub struct FibEntry {
    key: Name,
    faces: Vec<FibFace>,
}

impl FibEntry {
    pub fn key(&self) -> &Name {
        &self.key
    }

    pub fn faces(&self) -> &[FibFace] {
        &self.faces
    }

    /// Default single-route selection.
    ///
    /// The first active face (other than `incoming`) on the same transport
    /// as `incoming` wins. Failing that, the first active face of any type.
    pub fn select_faces(&self, incoming: FaceId, faces: &dyn FaceInfo) -> Vec<FaceId> {
        let usable = |f: &&FibFace| f.face != incoming && faces.is_active(f.face);
        let incoming_type = faces.face_type(incoming);

        if let Some(t) = incoming_type {
            if let Some(f) = self
                .faces
                .iter()
                .filter(usable)
                .find(|f| faces.face_type(f.face) == Some(t))
            {
                return vec![f.face];
            }
        }

        self.faces.iter().find(usable).map(|f| vec![f.face]).unwrap_or_default()
    }
}

/// What a route mutation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChange {
    /// New prefix or new next hop.
    Added,
    /// Existing next hop; flags merged, cost replaced.
    Updated,
    /// Next hop removed, prefix still has others.
    Removed,
    /// Last next hop removed, prefix gone.
    EntryRemoved,
    NotFound,
}

/// Control-channel view of a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FibEntrySnapshot {
    pub prefix: String,
    pub faces: Vec<FibFaceSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FibFaceSnapshot {
    pub face: u16,
    pub flags: String,
    pub cost: u16,
    pub keyed: bool,
    pub tx_interest: u64,
    pub tx_object: u64,
}

#[derive(Debug)]
pub struct Fib {
    entries: HashMap<Name, FibEntry>,
    capacity: usize,
    /// Component count of the longest registered prefix; probes start here.
    longest: usize,
}

impl Fib {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            longest: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, prefix: &Name) -> Option<&FibEntry> {
        self.entries.get(prefix)
    }

    pub fn longest_prefix_match(&self, name: &Name) -> Option<&FibEntry> {
        let start = name.len().min(self.longest);
        (0..=start)
            .rev()
            .find_map(|len| self.entries.get(&name.prefix(len)))
    }

    /// Add `face` as a next hop of `prefix`. The same (face, key id) pair is
    /// never recorded twice.
    pub fn route_add(
        &mut self,
        prefix: Name,
        face: FaceId,
        flags: RouteFlags,
        cost: u16,
        key_id: Option<[u8; DIGEST_LEN]>,
    ) -> Result<RouteChange, FibError> {
        if !self.entries.contains_key(&prefix) && self.entries.len() >= self.capacity {
            return Err(FibError::Full(self.capacity));
        }

        self.longest = self.longest.max(prefix.len());
        let entry = self.entries.entry(prefix.clone()).or_insert_with(|| FibEntry {
            key: prefix,
            faces: Vec::new(),
        });

        if let Some(existing) = entry
            .faces
            .iter_mut()
            .find(|f| f.face == face && f.key_id == key_id)
        {
            existing.flags = existing.flags | flags;
            existing.cost = cost;
            debug!("FIB {} via face {} updated ({})", entry.key, face.0, existing.flags);
            return Ok(RouteChange::Updated);
        }

        entry.faces.push(FibFace {
            face,
            flags,
            cost,
            key_id,
            tx_interest: 0,
            tx_object: 0,
        });
        info!("FIB {} via face {} added ({}, cost {})", entry.key, face.0, flags, cost);
        Ok(RouteChange::Added)
    }

    pub fn route_del(&mut self, prefix: &Name, face: FaceId, key_id: Option<[u8; DIGEST_LEN]>) -> RouteChange {
        let entry = match self.entries.get_mut(prefix) {
            Some(entry) => entry,
            None => return RouteChange::NotFound,
        };
        let before = entry.faces.len();
        entry.faces.retain(|f| !(f.face == face && f.key_id == key_id));
        if entry.faces.len() == before {
            return RouteChange::NotFound;
        }
        info!("FIB {} via face {} removed", prefix, face.0);

        if entry.faces.is_empty() {
            self.entries.remove(prefix);
            self.recompute_longest();
            RouteChange::EntryRemoved
        } else {
            RouteChange::Removed
        }
    }

    /// Whether any prefix still routes through `face`. Full scan.
    pub fn face_referenced(&self, face: FaceId) -> bool {
        self.entries
            .values()
            .any(|e| e.faces.iter().any(|f| f.face == face))
    }

    /// Drop `face` from every prefix; returns the number of prefixes that
    /// disappeared as a result.
    pub fn remove_face(&mut self, face: FaceId) -> usize {
        let before = self.entries.len();
        for entry in self.entries.values_mut() {
            entry.faces.retain(|f| f.face != face);
        }
        self.entries.retain(|_, e| !e.faces.is_empty());
        self.recompute_longest();
        before - self.entries.len()
    }

    /// Count one transmission of `class` through `face` for `prefix`.
    pub fn count_tx(&mut self, prefix: &Name, face: FaceId, class: FrameClass) {
        if let Some(f) = self
            .entries
            .get_mut(prefix)
            .and_then(|e| e.faces.iter_mut().find(|f| f.face == face))
        {
            match class {
                FrameClass::Interest => f.tx_interest += 1,
                FrameClass::Object => f.tx_object += 1,
            }
        }
    }

    pub fn snapshot(&self) -> Vec<FibEntrySnapshot> {
        let mut entries: Vec<FibEntrySnapshot> = self
            .entries
            .values()
            .map(|e| FibEntrySnapshot {
                prefix: e.key.to_string(),
                faces: e
                    .faces
                    .iter()
                    .map(|f| FibFaceSnapshot {
                        face: f.face.0,
                        flags: f.flags.to_string(),
                        cost: f.cost,
                        keyed: f.key_id.is_some(),
                        tx_interest: f.tx_interest,
                        tx_object: f.tx_object,
                    })
                    .collect(),
            })
            .collect();
        entries.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        entries
    }

    fn recompute_longest(&mut self) {
        self.longest = self.entries.keys().map(Name::len).max().unwrap_or(0);
    }
}
