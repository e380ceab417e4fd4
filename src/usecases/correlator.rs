//! Request Correlator - Matching Responses to Pending Requests
//!
//! Request/response exchanges over the duplex channel are keyed by
//! (symbol, kind). Responses do not echo request parameters such as the
//! candle interval, so only one variant per key is on the wire at a time:
//! - same variant: the caller joins the in-flight frame and shares its answer
//! - other variant: the caller is queued and its frame goes out once the
//!   in-flight one settles (answered or timed out)
//!
//! Unanswered requests are failed by `expire` once the wait bound passes,
//! counted from when their frame was sent.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::market::{Payload, ResponseKind, Symbol};
use crate::error::StreamError;

/// Reply channel handed to a waiting caller.
pub type Reply = oneshot::Sender<Result<Payload, StreamError>>;

/// Correlation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    /// Requested symbol.
    pub symbol: Symbol,
    /// Expected response kind.
    pub kind: ResponseKind,
}

impl RequestKey {
    /// Build a key.
    pub fn new(symbol: impl Into<Symbol>, kind: ResponseKind) -> Self {
        Self {
            symbol: symbol.into(),
            kind,
        }
    }
}

/// What the caller of `register` must do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Send a new frame.
    Send,
    /// Joined the identical in-flight request.
    Joined,
    /// Waiting behind an in-flight request for another variant.
    Queued,
}

/// Result of delivering a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Nothing was pending for the key; the response was dropped.
    Unmatched,
    /// Waiters answered. `next` is the queued variant whose frame must be
    /// sent now, if any.
    Delivered {
        /// Variant promoted to in-flight.
        next: Option<String>,
    },
}

/// Callers waiting on one variant of a key.
#[derive(Debug)]
struct Waiters {
    /// Request parameter not echoed by the response (candle interval).
    variant: String,
    replies: Vec<Reply>,
}

/// The request on the wire for a key, plus those queued behind it.
#[derive(Debug)]
struct PendingRequest {
    /// When the outbound frame was sent.
    requested_at: Instant,
    in_flight: Waiters,
    queued: VecDeque<Waiters>,
}

/// Table of pending requests.
#[derive(Debug)]
pub struct RequestCorrelator {
    pending: HashMap<RequestKey, PendingRequest>,
    timeout: Duration,
}

impl RequestCorrelator {
    /// Create a correlator with the given wait bound.
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
        }
    }

    /// Register a caller for `variant` of `key`.
    pub fn register(
        &mut self,
        key: RequestKey,
        variant: &str,
        reply: Reply,
        now: Instant,
    ) -> Registration {
        let Some(pending) = self.pending.get_mut(&key) else {
            self.pending.insert(
                key,
                PendingRequest {
                    requested_at: now,
                    in_flight: Waiters {
                        variant: variant.to_string(),
                        replies: vec![reply],
                    },
                    queued: VecDeque::new(),
                },
            );
            return Registration::Send;
        };

        if pending.in_flight.variant == variant {
            pending.in_flight.replies.push(reply);
            debug!(symbol = %key.symbol, kind = %key.kind, variant, "Joined in-flight request");
            return Registration::Joined;
        }
        match pending.queued.iter_mut().find(|w| w.variant == variant) {
            Some(waiters) => waiters.replies.push(reply),
            None => pending.queued.push_back(Waiters {
                variant: variant.to_string(),
                replies: vec![reply],
            }),
        }
        debug!(symbol = %key.symbol, kind = %key.kind, variant, "Queued behind in-flight request");
        Registration::Queued
    }

    /// Deliver a response to the in-flight request for `key`.
    pub fn resolve(&mut self, key: &RequestKey, payload: &Payload, now: Instant) -> Delivery {
        let Some(pending) = self.pending.remove(key) else {
            warn!(symbol = %key.symbol, kind = %key.kind, "Unmatched response dropped");
            return Delivery::Unmatched;
        };
        for waiter in pending.in_flight.replies {
            let _ = waiter.send(Ok(payload.clone()));
        }
        Delivery::Delivered {
            next: self.promote(key, pending.queued, now),
        }
    }

    /// Fail every in-flight request older than the wait bound.
    ///
    /// Returns the expired keys, each with the queued variant whose frame
    /// must be sent next, if any.
    pub fn expire(&mut self, now: Instant) -> Vec<(RequestKey, Option<String>)> {
        let timeout = self.timeout;
        let expired: Vec<RequestKey> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.requested_at) >= timeout)
            .map(|(key, _)| key.clone())
            .collect();

        let mut settled = Vec::with_capacity(expired.len());
        for key in expired {
            if let Some(pending) = self.pending.remove(&key) {
                warn!(
                    symbol = %key.symbol,
                    kind = %key.kind,
                    variant = %pending.in_flight.variant,
                    "Request timed out"
                );
                for waiter in pending.in_flight.replies {
                    let _ = waiter.send(Err(StreamError::RequestTimeout {
                        symbol: key.symbol.clone(),
                        kind: key.kind,
                    }));
                }
                let next = self.promote(&key, pending.queued, now);
                settled.push((key, next));
            }
        }
        settled
    }

    /// Fail every pending and queued request with `error` and clear the
    /// table.
    pub fn fail_all(&mut self, error: &StreamError) -> usize {
        let count = self.pending.len();
        for (_, pending) in self.pending.drain() {
            let queued = pending.queued.into_iter().flat_map(|w| w.replies);
            for waiter in pending.in_flight.replies.into_iter().chain(queued) {
                let _ = waiter.send(Err(error.clone()));
            }
        }
        count
    }

    /// Number of distinct pending keys.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Put the next queued variant on the wire for `key`.
    fn promote(
        &mut self,
        key: &RequestKey,
        mut queued: VecDeque<Waiters>,
        now: Instant,
    ) -> Option<String> {
        let next = queued.pop_front()?;
        let variant = next.variant.clone();
        self.pending.insert(
            key.clone(),
            PendingRequest {
                requested_at: now,
                in_flight: next,
                queued,
            },
        );
        Some(variant)
    }
}
