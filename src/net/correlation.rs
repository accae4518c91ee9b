//! Request/reply correlation.
//!
//! # Responsibilities
//! - Register a waiter under a fresh correlation id
//! - Resolve a waiter when its reply frame arrives
//! - Expire a waiter when its timeout fires
//! - Remember settled ids for a while so late or duplicate replies are dropped
//!
//! Reply and timeout race on the same entry; whichever side removes it from
//! the map owns the resolution, the other side becomes a no-op.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::TransportError;
use crate::lifecycle::ShutdownSignal;

/// Upper bound on remembered settled ids; the oldest are forgotten first.
const SETTLED_CAPACITY: usize = 65_536;

/// What happened to an inbound duplex frame.
#[derive(Debug)]
pub(crate) enum Resolution {
    /// Handed to the waiting request.
    Delivered,
    /// Its request already settled; the frame is dropped.
    Late,
    /// Nobody asked for it: a new inbound message.
    Unmatched(Bytes),
}

/// Why a wait ended without a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitError {
    Timeout,
    Cancelled,
}

/// Settled ids in settlement order. Each id is settled at most once, so
/// `order` and `ids` always hold the same set.
#[derive(Debug, Default)]
struct SettledIds {
    ids: HashSet<Uuid>,
    order: VecDeque<(Instant, Uuid)>,
}

impl SettledIds {
    fn insert(&mut self, id: Uuid, retention: Duration) {
        self.prune(retention);
        if self.order.len() >= SETTLED_CAPACITY {
            if let Some((_, oldest)) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.ids.insert(id);
        self.order.push_back((Instant::now(), id));
    }

    fn contains(&mut self, id: &Uuid, retention: Duration) -> bool {
        self.prune(retention);
        self.ids.contains(id)
    }

    /// Forget ids older than `retention`. Only the expired front is touched.
    fn prune(&mut self, retention: Duration) {
        while let Some(&(at, id)) = self.order.front() {
            if at.elapsed() < retention {
                break;
            }
            self.order.pop_front();
            self.ids.remove(&id);
        }
    }
}

#[derive(Debug)]
pub(crate) struct PendingRequests {
    waiters: DashMap<Uuid, oneshot::Sender<Bytes>>,
    settled: Mutex<SettledIds>,
    retention: Duration,
}

impl PendingRequests {
    /// `retention` bounds how long a settled id is remembered.
    pub(crate) fn new(retention: Duration) -> Self {
        Self {
            waiters: DashMap::new(),
            settled: Mutex::new(SettledIds::default()),
            retention,
        }
    }

    /// Register a waiter under a freshly generated id.
    pub(crate) fn register(&self) -> Result<PendingSlot<'_>, TransportError> {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        match self.waiters.entry(id) {
            Entry::Occupied(_) => Err(TransportError::CorrelationConflict(id)),
            Entry::Vacant(slot) => {
                slot.insert(tx);
                Ok(PendingSlot {
                    id,
                    rx,
                    pending: self,
                })
            }
        }
    }

    /// Route an inbound duplex payload.
    pub(crate) fn resolve(&self, id: Uuid, payload: Bytes) -> Resolution {
        if let Some((_, waiter)) = self.waiters.remove(&id) {
            self.settle(id);
            if waiter.send(payload).is_err() {
                tracing::debug!(correlation_id = %id, "Reply arrived after its caller went away");
            }
            return Resolution::Delivered;
        }

        if !id.is_nil() && self.settled().contains(&id, self.retention) {
            return Resolution::Late;
        }

        Resolution::Unmatched(payload)
    }

    /// Remove a waiter if it is still present. `true` means this call owns the resolution.
    pub(crate) fn expire(&self, id: Uuid) -> bool {
        let removed = self.waiters.remove(&id).is_some();
        if removed {
            self.settle(id);
        }
        removed
    }

    /// Drop every waiter; their callers observe a cancellation.
    pub(crate) fn cancel_all(&self) {
        self.waiters.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    fn settle(&self, id: Uuid) {
        self.settled().insert(id, self.retention);
    }

    fn settled(&self) -> MutexGuard<'_, SettledIds> {
        self.settled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A registered waiter. Dropping it unregisters the id.
#[derive(Debug)]
pub(crate) struct PendingSlot<'a> {
    id: Uuid,
    rx: oneshot::Receiver<Bytes>,
    pending: &'a PendingRequests,
}

impl PendingSlot<'_> {
    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the reply, the timeout, or cancellation, whichever settles the entry first.
    pub(crate) async fn wait(
        mut self,
        timeout: Duration,
        cancel: &ShutdownSignal,
    ) -> Result<Bytes, WaitError> {
        enum Wake {
            Reply(Result<Bytes, oneshot::error::RecvError>),
            Elapsed,
            Cancelled,
        }

        let wake = tokio::select! {
            reply = &mut self.rx => Wake::Reply(reply),
            _ = tokio::time::sleep(timeout) => Wake::Elapsed,
            _ = cancel.cancelled() => Wake::Cancelled,
        };

        let lost = match wake {
            Wake::Reply(reply) => return reply.map_err(|_| WaitError::Cancelled),
            Wake::Elapsed => WaitError::Timeout,
            Wake::Cancelled => WaitError::Cancelled,
        };

        if self.pending.expire(self.id) {
            return Err(lost);
        }

        // The reply side removed the entry first and is handing over the payload.
        (&mut self.rx).await.map_err(|_| WaitError::Cancelled)
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.expire(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;

    fn pending() -> PendingRequests {
        PendingRequests::new(Duration::from_secs(20))
    }

    #[tokio::test]
    async fn reply_resolves_its_waiter() {
        let pending = pending();
        let shutdown = Shutdown::new();
        let slot = pending.register().unwrap();
        let id = slot.id();

        assert!(matches!(pending.resolve(id, Bytes::from_static(b"pong")), Resolution::Delivered));
        let reply = slot.wait(Duration::from_secs(1), &shutdown.subscribe()).await;
        assert_eq!(reply.unwrap(), Bytes::from_static(b"pong"));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_entry_and_late_reply_is_dropped() {
        let pending = pending();
        let shutdown = Shutdown::new();
        let slot = pending.register().unwrap();
        let id = slot.id();

        let result = slot.wait(Duration::from_millis(100), &shutdown.subscribe()).await;
        assert_eq!(result.unwrap_err(), WaitError::Timeout);
        assert_eq!(pending.len(), 0);

        assert!(matches!(pending.resolve(id, Bytes::from_static(b"late")), Resolution::Late));
    }

    #[tokio::test]
    async fn late_reply_does_not_touch_other_waiters() {
        let pending = pending();
        let first = pending.register().unwrap();
        let first_id = first.id();
        assert!(pending.expire(first_id));
        drop(first);

        let second = pending.register().unwrap();
        assert!(matches!(pending.resolve(first_id, Bytes::new()), Resolution::Late));
        assert_eq!(pending.len(), 1);
        drop(second);
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn expire_is_exactly_once() {
        let pending = pending();
        let slot = pending.register().unwrap();
        let id = slot.id();
        assert!(pending.expire(id));
        assert!(!pending.expire(id));
    }

    #[tokio::test]
    async fn unknown_and_nil_ids_are_new_messages() {
        let pending = pending();
        assert!(matches!(
            pending.resolve(Uuid::new_v4(), Bytes::from_static(b"req")),
            Resolution::Unmatched(_)
        ));
        assert!(matches!(pending.resolve(Uuid::nil(), Bytes::new()), Resolution::Unmatched(_)));
    }

    #[tokio::test]
    async fn cancellation_fails_waiter() {
        let pending = pending();
        let shutdown = Shutdown::new();
        let slot = pending.register().unwrap();
        shutdown.trigger();

        let result = slot.wait(Duration::from_secs(5), &shutdown.subscribe()).await;
        assert_eq!(result.unwrap_err(), WaitError::Cancelled);
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn cancel_all_wakes_waiters() {
        let pending = pending();
        let shutdown = Shutdown::new();
        let slot = pending.register().unwrap();
        pending.cancel_all();

        let result = slot.wait(Duration::from_secs(5), &shutdown.subscribe()).await;
        assert_eq!(result.unwrap_err(), WaitError::Cancelled);
    }

    #[test]
    fn dropped_slot_unregisters() {
        let pending = pending();
        let slot = pending.register().unwrap();
        assert_eq!(pending.len(), 1);
        drop(slot);
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn settled_ids_are_forgotten_after_retention() {
        let pending = PendingRequests::new(Duration::from_secs(10));
        let early: Vec<Uuid> = (0..3)
            .map(|_| {
                let id = pending.register().unwrap().id();
                assert!(!pending.expire(id), "dropping the slot already expired it");
                id
            })
            .collect();

        tokio::time::advance(Duration::from_secs(6)).await;
        let recent = pending.register().unwrap().id();

        tokio::time::advance(Duration::from_secs(5)).await;
        for id in early {
            assert!(matches!(pending.resolve(id, Bytes::new()), Resolution::Unmatched(_)));
        }
        assert!(matches!(pending.resolve(recent, Bytes::new()), Resolution::Late));
        assert_eq!(pending.settled().order.len(), 1);
    }

    #[test]
    fn settled_memory_stays_cheap_under_load() {
        let pending = pending();
        let first = pending.register().unwrap().id();
        for _ in 0..50_000 {
            let slot = pending.register().unwrap();
            assert!(matches!(pending.resolve(slot.id(), Bytes::new()), Resolution::Delivered));
        }

        assert!(matches!(pending.resolve(first, Bytes::new()), Resolution::Late));
        assert_eq!(pending.settled().order.len(), 50_001);
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn settled_memory_is_capped() {
        let pending = pending();
        let first = pending.register().unwrap().id();
        for _ in 0..SETTLED_CAPACITY {
            let slot = pending.register().unwrap();
            pending.expire(slot.id());
        }

        let settled = pending.settled();
        assert_eq!(settled.order.len(), SETTLED_CAPACITY);
        assert_eq!(settled.ids.len(), SETTLED_CAPACITY);
        assert!(!settled.ids.contains(&first));
    }
}
