//! The request registry (drain accounting, orphan detection) and the
//! per-connection cancellation set (spec Sections 3 and 4.9).
//!
//! Grounded on the teacher's `DashMap`-backed stream coordinator,
//! specialized into two concurrent maps per the spec's design note on
//! keeping peer- and local-cancellation distinguishable.

use dashmap::DashMap;

/// Metadata for one in-flight request, keyed by (connection id, stream id).
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub connection_id: u64,
    pub method: String,
    pub path: String,
    pub started_at: std::time::Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationReason {
    /// The peer sent RESET_STREAM or STOP_SENDING.
    Peer,
    /// The engine cancelled the stream itself (e.g. shutdown drain).
    Local,
}

pub type RequestKey = (u64, u64);

#[derive(Default)]
pub struct RequestRegistry {
    requests: DashMap<RequestKey, RequestInfo>,
    cancelled: DashMap<RequestKey, CancellationReason>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        RequestRegistry::default()
    }

    pub fn insert(&self, key: RequestKey, info: RequestInfo) {
        self.requests.insert(key, info);
    }

    pub fn remove(&self, key: RequestKey) -> Option<RequestInfo> {
        self.requests.remove(&key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: RequestKey) -> bool {
        self.requests.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Every stream id currently in the registry, for logging orphans at the
    /// end of a drain timeout.
    pub fn in_flight_keys(&self) -> Vec<RequestKey> {
        self.requests.iter().map(|entry| *entry.key()).collect()
    }

    pub fn mark_cancelled(&self, key: RequestKey, reason: CancellationReason) {
        self.cancelled.insert(key, reason);
        self.requests.remove(&key);
    }

    pub fn cancellation_reason(&self, key: RequestKey) -> Option<CancellationReason> {
        self.cancelled.get(&key).map(|entry| *entry.value())
    }

    pub fn is_cancelled(&self, key: RequestKey) -> bool {
        self.cancelled.contains_key(&key)
    }

    /// Drops cancellation bookkeeping for a stream once it's fully retired,
    /// so the set doesn't grow unboundedly across a connection's lifetime.
    pub fn forget_cancellation(&self, key: RequestKey) {
        self.cancelled.remove(&key);
    }

    /// Removes every entry belonging to `connection_id`, used when a
    /// connection is torn down (spec Section 4.8, `ConnectionClosed`).
    pub fn remove_connection(&self, connection_id: u64) {
        self.requests.retain(|(cid, _), _| *cid != connection_id);
        self.cancelled.retain(|(cid, _), _| *cid != connection_id);
    }
}
