//! Single-attempt connection gate
//!
//! The guard is free or held by exactly one ticket. Acquisition is a
//! compare-and-swap from free to a fresh ticket, so concurrent callers can
//! never both win. [`AttemptPermit`] ties a successful acquisition to a scope
//! and releases it on drop; a permit only frees the guard if it still owns
//! it, so a forced [`ConnectionGuard::release`] followed by a new attempt is
//! not undone when the stale permit finally drops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

const FREE: u64 = 0;

/// Atomic gate allowing one connection sequence at a time
#[derive(Debug)]
pub struct ConnectionGuard {
    holder: AtomicU64,
    next_ticket: AtomicU64,
}

impl ConnectionGuard {
    pub fn new() -> Self {
        Self {
            holder: AtomicU64::new(FREE),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Take the guard if it is free; returns false if already held
    pub fn try_acquire(&self) -> bool {
        self.acquire_ticket().is_some()
    }

    /// Free the guard regardless of who holds it
    pub fn release(&self) {
        self.holder.store(FREE, Ordering::Release);
    }

    /// Whether an attempt currently holds the guard
    pub fn is_held(&self) -> bool {
        self.holder.load(Ordering::Acquire) != FREE
    }

    /// Take the guard for the lifetime of the returned permit
    pub fn try_permit(self: &Arc<Self>) -> Option<AttemptPermit> {
        self.acquire_ticket().map(|ticket| AttemptPermit {
            guard: Arc::clone(self),
            ticket,
        })
    }

    fn acquire_ticket(&self) -> Option<u64> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.holder
            .compare_exchange(FREE, ticket, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ticket)
    }
}

impl Default for ConnectionGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped ownership of a [`ConnectionGuard`]
#[derive(Debug)]
pub struct AttemptPermit {
    guard: Arc<ConnectionGuard>,
    ticket: u64,
}

impl AttemptPermit {
    /// Whether this permit still owns the guard
    pub fn is_current(&self) -> bool {
        self.guard.holder.load(Ordering::Acquire) == self.ticket
    }
}

impl Drop for AttemptPermit {
    fn drop(&mut self) {
        let released = self
            .guard
            .holder
            .compare_exchange(self.ticket, FREE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        trace!(ticket = self.ticket, released, "Attempt permit dropped");
    }
}
