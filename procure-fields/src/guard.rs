//! Stale-response guard.
//!
//! Every async request takes a [`Ticket`] before it starts. When the result
//! comes back it is applied only if its ticket is still the latest one; any
//! newer request (or an explicit invalidate on unmount) makes older tickets
//! stale.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of one issued request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// Issues tickets and answers whether a ticket is still current.
#[derive(Debug, Clone, Default)]
pub struct LatestGuard {
    latest: Arc<AtomicU64>,
}

impl LatestGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new request, superseding every earlier ticket
    pub fn issue(&self) -> Ticket {
        Ticket(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket.0
    }

    /// Make every outstanding ticket stale without starting a request
    pub fn invalidate(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }
}
