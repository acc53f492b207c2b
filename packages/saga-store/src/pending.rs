//! Pending-dispatch table and the [`Settlement`] future.
//!
//! Every dispatch registers one entry keyed by its correlation id. The entry
//! is removed the first time it is settled, so a second settlement for the
//! same id is a no-op. Settling an id that was never registered (an action a
//! store emitted on its own, say) is also a no-op.
//!
//! # Leaks
//!
//! An effect that never finishes leaves its entry in the table until the
//! store is disposed. Use [`Store::dispatch_timeout`](crate::Store::dispatch_timeout)
//! when the caller needs an upper bound; it evicts the entry on expiry.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::trace;

use crate::core::CorrelationId;
use crate::error::StoreError;

/// Result delivered to a dispatch caller.
pub(crate) type Outcome = Result<Value, StoreError>;

/// Table of dispatches awaiting settlement, plus the id sequence that keys it.
#[derive(Debug)]
pub struct PendingTable {
    entries: DashMap<CorrelationId, oneshot::Sender<Outcome>>,
    next_id: AtomicU64,
}

impl PendingTable {
    /// Create an empty table whose first id is 1.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Issue the next correlation id.
    pub fn next_id(&self) -> CorrelationId {
        CorrelationId::from(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a pending entry and return the future that observes it.
    pub fn register(&self, cid: CorrelationId) -> Settlement {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(cid, tx);
        Settlement {
            cid,
            state: SettlementState::Waiting(rx),
        }
    }

    /// Resolve an entry. Returns false if there was nothing to settle.
    pub fn resolve(&self, cid: CorrelationId, value: Value) -> bool {
        self.settle(cid, Ok(value))
    }

    /// Reject an entry. Returns false if there was nothing to settle.
    pub fn reject(&self, cid: CorrelationId, error: StoreError) -> bool {
        self.settle(cid, Err(error))
    }

    pub(crate) fn settle(&self, cid: CorrelationId, outcome: Outcome) -> bool {
        match self.entries.remove(&cid) {
            Some((_, tx)) => {
                // The caller may have dropped its settlement; that is fine.
                let _ = tx.send(outcome);
                true
            }
            None => {
                trace!(%cid, "settlement for unknown or settled dispatch ignored");
                false
            }
        }
    }

    /// Remove an entry without settling it.
    ///
    /// The matching settlement then completes with [`StoreError::Disposed`]
    /// unless the caller is already gone.
    pub fn evict(&self, cid: CorrelationId) -> bool {
        self.entries.remove(&cid).is_some()
    }

    /// Drop every entry. Waiting callers observe [`StoreError::Disposed`].
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Returns true if `cid` is still waiting.
    pub fn contains(&self, cid: CorrelationId) -> bool {
        self.entries.contains_key(&cid)
    }

    /// Number of dispatches still waiting.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The eventual result of one dispatch.
///
/// Resolves with the value the handling effect returned (`Value::Null` when
/// no effect is bound to the action type), or fails with the effect's error.
/// Dropping a settlement does not cancel anything: the effect still runs and
/// the result is discarded.
#[derive(Debug)]
pub struct Settlement {
    cid: CorrelationId,
    state: SettlementState,
}

#[derive(Debug)]
enum SettlementState {
    Ready(Option<Outcome>),
    Waiting(oneshot::Receiver<Outcome>),
}

impl Settlement {
    /// A settlement that is already resolved or rejected.
    pub(crate) fn ready(cid: CorrelationId, outcome: Outcome) -> Self {
        Self {
            cid,
            state: SettlementState::Ready(Some(outcome)),
        }
    }

    /// Correlation id assigned to the dispatch.
    pub fn correlation_id(&self) -> CorrelationId {
        self.cid
    }
}

impl Future for Settlement {
    type Output = Result<Value, StoreError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            SettlementState::Ready(outcome) => {
                Poll::Ready(outcome.take().unwrap_or(Err(StoreError::Disposed)))
            }
            SettlementState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(StoreError::Disposed))),
        }
    }
}
