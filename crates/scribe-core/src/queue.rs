//! Single-slot deferred request queue
//!
//! Holds at most one generation request while offline. A new enqueue
//! replaces any occupant (most-recent-intent-wins); the displaced request is
//! returned so callers can surface the discard instead of losing it
//! silently.

use crate::types::{GenerationInput, PendingRequest};
use parking_lot::Mutex;

/// The one-deep queue behind the "waiting for network" indicator.
#[derive(Default)]
pub struct RequestQueue {
    slot: Mutex<Option<PendingRequest>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a request, replacing any occupant. Returns the displaced
    /// request if one was waiting.
    pub fn enqueue(&self, input: GenerationInput) -> Option<PendingRequest> {
        self.slot.lock().replace(PendingRequest::new(input))
    }

    /// Take the held request, leaving the slot empty.
    pub fn drain(&self) -> Option<PendingRequest> {
        self.slot.lock().take()
    }

    /// Whether a request is waiting for the network.
    pub fn is_occupied(&self) -> bool {
        self.slot.lock().is_some()
    }
}
