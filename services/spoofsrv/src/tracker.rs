//! Per-connection transaction tracking
//!
//! Maps a Modbus transaction id to the read request that used it, so the
//! response flowing back can be matched to its starting address.

use std::collections::HashMap;
use std::time::Duration;

use mitm_protocols::modbus::ReadRegistersRequest;
use mitm_protocols::Frame;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Pending requests older than this are never matched
pub const PENDING_REQUEST_MAX_AGE: Duration = Duration::from_secs(5);

/// A read-holding-registers request waiting for its response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub function_code: u8,
    pub start_address: u16,
    pub quantity: u16,
    pub captured_at: Instant,
}

impl PendingRequest {
    /// Capture `frame` if it is an FC03 request, `None` otherwise
    pub fn capture(frame: &Frame) -> Option<Self> {
        let request = ReadRegistersRequest::parse_holding(&frame.pdu).ok()?;
        Some(Self {
            function_code: request.function_code,
            start_address: request.start_address,
            quantity: request.quantity,
            captured_at: Instant::now(),
        })
    }

    fn is_expired(&self, now: Instant, max_age: Duration) -> bool {
        now.saturating_duration_since(self.captured_at) > max_age
    }
}

/// Transaction id → pending request table for one client connection
///
/// All operations take the same lock. Expired entries are swept on every
/// insert, and an expired entry is never returned by [`pop`](Self::pop)
/// even if no insert has swept it yet.
#[derive(Debug)]
pub struct TransactionTracker {
    pending: Mutex<HashMap<u16, PendingRequest>>,
    max_age: Duration,
}

impl Default for TransactionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self::with_max_age(PENDING_REQUEST_MAX_AGE)
    }

    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            max_age,
        }
    }

    /// Insert or overwrite the request for `tid`, evicting stale entries
    pub fn put(&self, tid: u16, request: PendingRequest) {
        let now = Instant::now();
        let mut pending = self.pending.lock();

        let before = pending.len();
        pending.retain(|_, req| !req.is_expired(now, self.max_age));
        let evicted = before - pending.len();
        if evicted > 0 {
            trace!(evicted, "Evicted stale pending requests");
        }

        pending.insert(tid, request);
    }

    /// Remove and return the request for `tid` if present and not expired
    pub fn pop(&self, tid: u16) -> Option<PendingRequest> {
        let now = Instant::now();
        let request = self.pending.lock().remove(&tid)?;
        if request.is_expired(now, self.max_age) {
            trace!(tid, "Pending request expired before its response");
            return None;
        }
        Some(request)
    }

    /// Number of entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
