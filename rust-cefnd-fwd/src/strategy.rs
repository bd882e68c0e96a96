//! Forwarding strategies.
//!
//! A strategy picks the outgoing faces for an Interest (from its FIB entry)
//! and filters the requesters of a reply. Strategies are chosen by name at
//! startup from a fixed registry.

use rust_cefnd_common::types::FaceId;
use std::sync::Arc;

use crate::face::FaceInfo;
use crate::fib::FibEntry;

/// Names accepted by [`by_name`].
pub const NAMES: &[&str] = &["default", "flooding", "cost"];

pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Faces an Interest received on `incoming` is sent to.
    fn select_for_interest(&self, entry: &FibEntry, incoming: FaceId, faces: &dyn FaceInfo) -> Vec<FaceId>;

    /// Faces a reply received on `incoming` is returned to, given the
    /// requesters the PIT produced.
    fn select_for_object(&self, requesters: &[FaceId], incoming: FaceId, faces: &dyn FaceInfo) -> Vec<FaceId> {
        requesters
            .iter()
            .copied()
            .filter(|&f| f != incoming && faces.is_active(f))
            .collect()
    }
}

/// One route, same transport as the request when possible.
#[derive(Debug, Default)]
pub struct BestRoute;

impl Strategy for BestRoute {
    fn name(&self) -> &'static str {
        "default"
    }

    fn select_for_interest(&self, entry: &FibEntry, incoming: FaceId, faces: &dyn FaceInfo) -> Vec<FaceId> {
        entry.select_faces(incoming, faces)
    }
}

/// Every active next hop.
#[derive(Debug, Default)]
pub struct Flooding;

impl Strategy for Flooding {
    fn name(&self) -> &'static str {
        "flooding"
    }

    fn select_for_interest(&self, entry: &FibEntry, incoming: FaceId, faces: &dyn FaceInfo) -> Vec<FaceId> {
        let mut out: Vec<FaceId> = Vec::new();
        for f in entry.faces() {
            if f.face != incoming && faces.is_active(f.face) && !out.contains(&f.face) {
                out.push(f.face);
            }
        }
        out
    }
}

/// The cheapest active next hop; ties go to the earlier route.
#[derive(Debug, Default)]
pub struct LowestCost;

impl Strategy for LowestCost {
    fn name(&self) -> &'static str {
        "cost"
    }

    fn select_for_interest(&self, entry: &FibEntry, incoming: FaceId, faces: &dyn FaceInfo) -> Vec<FaceId> {
        entry
            .faces()
            .iter()
            .filter(|f| f.face != incoming && faces.is_active(f.face))
            .fold(None, |best: Option<&crate::fib::FibFace>, f| match best {
                Some(b) if b.cost <= f.cost => Some(b),
                _ => Some(f),
            })
            .map(|f| vec![f.face])
            .unwrap_or_default()
    }
}

/// Look a strategy up in the registry.
pub fn by_name(name: &str) -> Option<Arc<dyn Strategy>> {
    match name {
        "default" => Some(Arc::new(BestRoute)),
        "flooding" => Some(Arc::new(Flooding)),
        "cost" => Some(Arc::new(LowestCost)),
        _ => None,
    }
}
