//! Deferred reclamation.
//!
//! Objects unlinked from the namespace or the inode index may still be held
//! by readers that captured them earlier (a paged listing, a lookup in
//! flight). Instead of dropping them at unlink time they are parked here
//! with an expiry and freed by a periodic [`DelayFreeQueue::sweep`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fdir_utils::Clock;
use parking_lot::Mutex;
use serde::Serialize;

type FreeFn = Box<dyn FnOnce() + Send>;

struct ReclaimNode {
    expires: i64,
    free: FreeFn,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DelayFreeStats {
    pub pending: usize,
    pub scheduled: u64,
    pub freed: u64,
}

pub struct DelayFreeQueue {
    queue: Mutex<VecDeque<ReclaimNode>>,
    clock: Arc<dyn Clock>,
    scheduled: AtomicU64,
    freed: AtomicU64,
}

impl DelayFreeQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            clock,
            scheduled: AtomicU64::new(0),
            freed: AtomicU64::new(0),
        }
    }

    /// Hand `object` to `free_fn(&ctx, object)` once `grace_secs` have elapsed.
    pub fn schedule_ex<C, T>(&self, free_fn: fn(&C, T), ctx: Arc<C>, object: T, grace_secs: i64)
    where
        C: Send + Sync + 'static,
        T: Send + 'static,
    {
        self.push(Box::new(move || free_fn(&ctx, object)), grace_secs);
    }

    /// Drop `object` once `grace_secs` have elapsed.
    pub fn schedule<T: Send + 'static>(&self, object: T, grace_secs: i64) {
        self.push(Box::new(move || drop(object)), grace_secs);
    }

    fn push(&self, free: FreeFn, grace_secs: i64) {
        let now = self.clock.now_secs();
        let mut queue = self.queue.lock();
        // Keep expiries non-decreasing even if the clock steps back or the
        // grace period shrinks after a config reload.
        let floor = queue.back().map_or(i64::MIN, |n| n.expires);
        let expires = now.saturating_add(grace_secs.max(0)).max(floor);
        queue.push_back(ReclaimNode { expires, free });
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// Free every node whose expiry is at or before `now`, oldest first.
    ///
    /// Expired nodes are detached under the queue lock; the frees themselves
    /// run after it is released so they never stall `schedule`.
    pub fn sweep(&self, now: i64) -> usize {
        let expired: Vec<ReclaimNode> = {
            let mut queue = self.queue.lock();
            let n = queue.iter().take_while(|node| node.expires <= now).count();
            queue.drain(..n).collect()
        };
        let count = expired.len();
        for node in expired {
            (node.free)();
        }
        if count > 0 {
            self.freed.fetch_add(count as u64, Ordering::Relaxed);
            tracing::info!(freed = count, now, "reclaim sweep");
        }
        count
    }

    /// Free everything regardless of expiry. Only for shutdown.
    pub fn drain(&self) -> usize {
        self.sweep(i64::MAX)
    }

    pub fn next_expiry(&self) -> Option<i64> {
        self.queue.lock().front().map(|n| n.expires)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> DelayFreeStats {
        DelayFreeStats {
            pending: self.len(),
            scheduled: self.scheduled.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
        }
    }
}
