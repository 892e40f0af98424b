//! Correlation store: ties outgoing `execute` requests to their eventual
//! `response`, safely across concurrent callers.
//!
//! The table is the one piece of session state that is explicitly lockable on
//! its own: the session driver mutates it from the owner task, while test and
//! administrative code may query it from other threads. Everything lives
//! behind a single mutex, including the monotonically advancing id cursor.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::warn;

use crate::error::{RelayError, Result};
use crate::protocol::frame::NO_CORRELATION;

/// One outstanding correlated request.
#[derive(Debug, Default)]
struct PendingEntry {
    received: bool,
    payload: String,
}

#[derive(Debug, Default)]
struct TableInner {
    entries: HashMap<u64, PendingEntry>,
    last_id: u64,
}

/// Thread-safe map from correlation id to pending/received response state.
///
/// An entry is created when an id is allocated, mutated exactly once when the
/// matching response arrives, and destroyed when the owner collects it with
/// [`take`](CorrelationTable::take). Collection is unconditional: taking an
/// entry whose response never arrived yields an empty payload.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    inner: Mutex<TableInner>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recover the guard even if a panicking thread poisoned the lock; the
    /// table holds no invariants that a mid-update panic could break.
    fn lock(&self) -> MutexGuard<'_, TableInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Allocate a fresh correlation id and insert its pending entry.
    ///
    /// Walks forward from the last issued id, wrapping past `u64::MAX` back
    /// to 1 and skipping the reserved 0, until a free id is found. Fails with
    /// [`RelayError::IdSpaceExhausted`] only when every other id is
    /// simultaneously outstanding, which is a fatal local condition rather
    /// than a network error.
    pub fn allocate_id(&self) -> Result<u64> {
        let mut inner = self.lock();
        // The walk only revisits occupied ids, so len()+1 probes always
        // reach a free one if any exists.
        let mut probes = inner.entries.len().saturating_add(1);
        let mut candidate = inner.last_id;
        while probes > 0 {
            candidate = candidate.wrapping_add(1);
            if candidate == NO_CORRELATION {
                candidate = 1;
            }
            if !inner.entries.contains_key(&candidate) {
                inner.entries.insert(candidate, PendingEntry::default());
                inner.last_id = candidate;
                return Ok(candidate);
            }
            probes -= 1;
        }
        Err(RelayError::IdSpaceExhausted)
    }

    /// Record an inbound response.
    ///
    /// Returns `false` for an unknown id (the requester may have given up, or
    /// the delivery is stale or duplicated); the anomaly is logged and the
    /// payload dropped.
    pub fn on_response_received(&self, id: u64, payload: String) -> bool {
        let mut inner = self.lock();
        match inner.entries.get_mut(&id) {
            Some(entry) => {
                entry.received = true;
                entry.payload = payload;
                true
            }
            None => {
                warn!(correlation_id = id, "dropping response for unknown correlation id");
                false
            }
        }
    }

    /// `true` iff the id exists and its response has not arrived yet.
    pub fn is_pending(&self, id: u64) -> bool {
        self.lock().entries.get(&id).map(|e| !e.received).unwrap_or(false)
    }

    /// `true` iff any entry exists at all.
    ///
    /// A response that arrived but was not yet collected still counts, so
    /// callers can use this as "there is unclaimed request state" rather than
    /// "someone is actively awaiting".
    pub fn any_pending(&self) -> bool {
        !self.lock().entries.is_empty()
    }

    /// Remove and return the entry's payload, exactly once.
    ///
    /// Collecting an entry whose response never arrived yields an empty
    /// payload; that is the caller's logic error, not a failure at this
    /// layer. A second take of the same id logs a warning and yields empty.
    pub fn take(&self, id: u64) -> String {
        let mut inner = self.lock();
        match inner.entries.remove(&id) {
            Some(entry) => entry.payload,
            None => {
                warn!(correlation_id = id, "take for unknown correlation id");
                String::new()
            }
        }
    }

    /// Number of outstanding entries, for admin surfaces and tests.
    pub fn outstanding(&self) -> usize {
        self.lock().entries.len()
    }
}
