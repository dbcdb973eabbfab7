//! Latest-request-wins tracking.
//!
//! Callers that fire overlapping evaluator requests take a ticket per request
//! and pass results through [`RequestTracker::accept`], which drops anything
//! produced for a superseded ticket.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Handle for one in-flight request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestTicket {
    /// Correlation id for logs
    pub id: Uuid,
    generation: u64,
}

/// Hands out tickets; only the newest is current
#[derive(Debug, Default)]
pub struct RequestTracker {
    generation: AtomicU64,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a request, superseding every earlier ticket
    pub fn begin(&self) -> RequestTicket {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let ticket = RequestTicket {
            id: Uuid::new_v4(),
            generation,
        };
        tracing::debug!("Request {} started (generation {})", ticket.id, generation);
        ticket
    }

    pub fn is_current(&self, ticket: &RequestTicket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.generation
    }

    /// Pass a result through only if its ticket is still current
    pub fn accept<T>(&self, ticket: &RequestTicket, value: T) -> Option<T> {
        if self.is_current(ticket) {
            Some(value)
        } else {
            tracing::debug!("Discarding stale result for request {}", ticket.id);
            None
        }
    }
}
