//! One-shot Request Queue
//!
//! Callers waiting for a single location fix are batched onto one outstanding
//! backend request.
//!
//! ```text
//! request_one ─┐
//! request_one ─┼──► RequestQueue ──(empty → non-empty only)──► backend one-shot
//! request_one ─┘         │                                          │
//!                        ▼                                          ▼
//!               [all waiters receive                       locations / error
//!                the same outcome] ◄────────────────────────────────┘
//! ```
//!
//! The backend cancels an outstanding one-shot request whenever a new one is
//! issued, so the queue only asks for a new one when it goes from empty to
//! non-empty. That decision and the insertion happen in the same critical
//! section; two callers can never both see an empty queue.
//!
//! Handlers run after the critical section is left. A handler is free to
//! queue a new request from inside its callback.
//!
//! The backend exposes no request identity. An error that really belongs to a
//! request the backend already replaced is still delivered to every waiter
//! queued at that moment.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::RequestError;
use crate::location::Location;
use crate::synchronized::Synchronized;

/// Completion of a one-shot request. Called exactly once.
pub type LocationRequestHandler =
    Box<dyn FnOnce(Result<Vec<Location>, RequestError>) + Send + 'static>;

/// Per-request options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestOptions {
    /// Accuracy threshold in meters; larger means coarser.
    pub stop_at_accuracy: f64,
}

impl RequestOptions {
    pub const TEN_METERS: Self = Self {
        stop_at_accuracy: 10.0,
    };

    pub const HUNDRED_METERS: Self = Self {
        stop_at_accuracy: 100.0,
    };

    pub fn new(stop_at_accuracy: f64) -> Self {
        Self { stop_at_accuracy }
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::TEN_METERS
    }
}

/// A caller waiting for a fix.
pub struct PendingRequest {
    handler: LocationRequestHandler,
    pub options: RequestOptions,
    /// Samples gathered for this request, in delivery order.
    pub results: Vec<Location>,
    pub created_at: DateTime<Utc>,
}

impl PendingRequest {
    pub fn new(handler: LocationRequestHandler, options: RequestOptions) -> Self {
        Self {
            handler,
            options,
            results: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Resolve with the accumulated samples.
    pub fn complete(self) {
        (self.handler)(Ok(self.results));
    }

    /// Resolve with a failure.
    pub fn fail(self, error: RequestError) {
        (self.handler)(Err(error));
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("options", &self.options)
            .field("results", &self.results.len())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// What the caller of [`RequestQueue::request_one`] must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The queue just became non-empty: issue exactly one backend one-shot request.
    Trigger,
    /// A backend request is already outstanding, or nobody is waiting.
    Skip,
}

/// Counters for monitoring batching.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Requests queued with a completion.
    pub total_requests: u64,
    /// Requests that joined an outstanding backend request.
    pub coalesced_requests: u64,
    /// Backend one-shot requests the queue asked for.
    pub triggered_requests: u64,
}

/// Pending one-shot requests.
pub struct RequestQueue {
    requests: Synchronized<Vec<PendingRequest>>,
    total_requests: AtomicU64,
    coalesced_requests: AtomicU64,
    triggered_requests: AtomicU64,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            requests: Synchronized::with_label(Vec::new(), "synchronized.locationtracker.requests"),
            total_requests: AtomicU64::new(0),
            coalesced_requests: AtomicU64::new(0),
            triggered_requests: AtomicU64::new(0),
        }
    }

    /// Queue a request.
    ///
    /// Returns [`Dispatch::Trigger`] only when `completion` is present and the
    /// queue was empty; the caller then issues the backend request, after this
    /// call has returned. Without a completion nothing is queued.
    pub fn request_one(
        &self,
        options: RequestOptions,
        completion: Option<LocationRequestHandler>,
    ) -> Dispatch {
        let has_completion = completion.is_some();

        let (trigger, queued) = self.requests.access(|requests| {
            let trigger = requests.is_empty() && has_completion;
            if let Some(handler) = completion {
                requests.push(PendingRequest::new(handler, options));
            }
            (trigger, requests.len())
        });

        if !has_completion {
            return Dispatch::Skip;
        }

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if trigger {
            self.triggered_requests.fetch_add(1, Ordering::Relaxed);
            debug!(accuracy = options.stop_at_accuracy, "New one-shot request - triggering backend");
            Dispatch::Trigger
        } else {
            self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
            debug!(queued, "Coalescing one-shot request onto outstanding backend request");
            Dispatch::Skip
        }
    }

    /// Remove every request for which `filter` returns true.
    ///
    /// The filter runs inside the critical section and may update the request
    /// it is given. Handlers of the returned requests are the caller's to fire.
    ///
    /// # Panics
    ///
    /// If the filter calls back into this queue on the same thread.
    pub fn pop_all(&self, mut filter: impl FnMut(&mut PendingRequest) -> bool) -> Vec<PendingRequest> {
        self.requests.access(|requests| {
            let mut popped = Vec::new();
            let mut kept = Vec::new();
            for mut request in std::mem::take(requests) {
                if filter(&mut request) {
                    popped.push(request);
                } else {
                    kept.push(request);
                }
            }
            *requests = kept;
            popped
        })
    }

    /// Resolve every waiter with `locations`. Returns how many were resolved.
    pub fn complete_all(&self, locations: &[Location]) -> usize {
        let popped = self.pop_all(|request| {
            request.results.extend_from_slice(locations);
            true
        });
        let count = popped.len();
        for request in popped {
            request.complete();
        }
        count
    }

    /// Fail every waiter with `error`. Returns how many were failed.
    pub fn fail_all(&self, error: RequestError) -> usize {
        let popped = self.pop_all(|_| true);
        let count = popped.len();
        for request in popped {
            request.fail(error.clone());
        }
        count
    }

    pub fn len(&self) -> usize {
        self.requests.access(|requests| requests.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
            triggered_requests: self.triggered_requests.load(Ordering::Relaxed),
        }
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}
