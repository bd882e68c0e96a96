//! Content Store.
//!
//! The forwarder only needs `lookup` and `put`; the in-memory store below is
//! a bounded FIFO with per-object expiry.

use log::trace;
use rust_cefnd_common::message::{Message, Name};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Cache capability consumed by the forwarder.
pub trait ContentStore: Send {
    /// A cached object for `name`/`chunk`, if one is still fresh.
    fn lookup(&mut self, name: &Name, chunk: Option<u32>, now: Instant) -> Option<Message>;

    /// Offer an object to the cache.
    fn put(&mut self, object: &Message, now: Instant);

    fn len(&self) -> usize;

    /// Drop stale objects; returns how many were removed.
    fn purge(&mut self, _now: Instant) -> usize {
        0
    }
}

type CsKey = (Name, Option<u32>);

struct Cached {
    object: Message,
    expires: Instant,
}

pub struct MemoryContentStore {
    entries: HashMap<CsKey, Cached>,
    /// Insertion order for eviction; holds exactly the keys of `entries`.
    order: VecDeque<CsKey>,
    capacity: usize,
    default_cache_time: Duration,
}

impl MemoryContentStore {
    pub fn new(capacity: usize, default_cache_time: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
            default_cache_time,
        }
    }

    fn evict_one(&mut self) {
        if let Some(key) = self.order.pop_front() {
            self.entries.remove(&key);
            trace!("CS evicted {}", key.0);
        }
    }

    fn remove(&mut self, key: &CsKey) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }
}

impl ContentStore for MemoryContentStore {
    fn lookup(&mut self, name: &Name, chunk: Option<u32>, now: Instant) -> Option<Message> {
        let key = (name.clone(), chunk);
        match self.entries.get(&key) {
            Some(cached) if cached.expires > now => Some(cached.object.clone()),
            Some(_) => {
                self.remove(&key);
                None
            }
            None => None,
        }
    }

    fn put(&mut self, object: &Message, now: Instant) {
        if self.capacity == 0 {
            return;
        }
        // absolute expiry in milliseconds since the epoch
        if let Some(expiry) = object.expiry {
            let wall = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            if expiry <= wall {
                return;
            }
        }

        let key = (object.name.clone(), object.chunk);
        let cached = Cached {
            object: object.clone(),
            expires: now + object.cache_time.unwrap_or(self.default_cache_time),
        };
        if self.entries.insert(key.clone(), cached).is_none() {
            self.order.push_back(key);
            if self.entries.len() > self.capacity {
                self.evict_one();
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn purge(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, c| c.expires > now);
        let entries = &self.entries;
        self.order.retain(|k| entries.contains_key(k));
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_cefnd_common::message::MessageBuilder;

    fn object(name: &str, chunk: u32) -> Message {
        MessageBuilder::object(Name::from_string(name), &b"payload"[..])
            .chunk(chunk)
            .build()
            .unwrap()
    }

    #[test]
    fn test_put_and_lookup() {
        let now = Instant::now();
        let mut cs = MemoryContentStore::new(4, Duration::from_secs(1));
        cs.put(&object("/a", 0), now);

        let hit = cs.lookup(&Name::from_string("/a"), Some(0), now).unwrap();
        assert_eq!(hit.payload.as_deref(), Some(&b"payload"[..]));
        assert!(cs.lookup(&Name::from_string("/a"), Some(1), now).is_none());
        assert!(cs.lookup(&Name::from_string("/a"), None, now).is_none());
    }

    #[test]
    fn test_expiry() {
        let now = Instant::now();
        let mut cs = MemoryContentStore::new(4, Duration::from_secs(1));
        cs.put(&object("/a", 0), now);
        let short = MessageBuilder::object(Name::from_string("/b"), &b"x"[..])
            .cache_time(Duration::from_millis(10))
            .build()
            .unwrap();
        cs.put(&short, now);

        let later = now + Duration::from_millis(20);
        assert!(cs.lookup(&Name::from_string("/b"), None, later).is_none());
        assert!(cs.lookup(&Name::from_string("/a"), Some(0), later).is_some());
        assert_eq!(cs.purge(now + Duration::from_secs(2)), 1);
        assert_eq!(cs.len(), 0);

        // already past its absolute expiry: never cached
        let stale = MessageBuilder::object(Name::from_string("/c"), &b"x"[..])
            .expiry(1)
            .build()
            .unwrap();
        cs.put(&stale, now);
        assert_eq!(cs.len(), 0);
    }

    #[test]
    fn test_fifo_eviction() {
        let now = Instant::now();
        let mut cs = MemoryContentStore::new(2, Duration::from_secs(60));
        cs.put(&object("/e", 0), now);
        cs.put(&object("/e", 1), now);
        cs.put(&object("/e", 2), now);

        assert_eq!(cs.len(), 2);
        assert!(cs.lookup(&Name::from_string("/e"), Some(0), now).is_none());
        assert!(cs.lookup(&Name::from_string("/e"), Some(2), now).is_some());
    }

    #[test]
    fn test_expired_lookup_keeps_order_in_step() {
        let mut now = Instant::now();
        let mut cs = MemoryContentStore::new(4, Duration::from_millis(10));
        for _ in 0..1000 {
            cs.put(&object("/hot", 0), now);
            now += Duration::from_millis(20);
            assert!(cs.lookup(&Name::from_string("/hot"), Some(0), now).is_none());
        }
        assert_eq!(cs.len(), 0);
        assert!(cs.order.is_empty());

        // the fresh copy is not mistaken for an old one at eviction time
        cs.put(&object("/hot", 0), now);
        for chunk in 1..=4 {
            cs.put(&object("/cold", chunk), now);
        }
        assert_eq!(cs.len(), 4);
        assert_eq!(cs.order.len(), 4);
        assert!(cs.lookup(&Name::from_string("/hot"), Some(0), now).is_none());
        assert!(cs.lookup(&Name::from_string("/cold"), Some(1), now).is_some());
    }

    #[test]
    fn test_disabled_store() {
        let now = Instant::now();
        let mut cs = MemoryContentStore::new(0, Duration::from_secs(60));
        cs.put(&object("/n", 0), now);
        assert_eq!(cs.len(), 0);
    }
}
