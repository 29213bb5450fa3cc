//! Rate-limit window tracking for the GitHub API
//!
//! The limiter is the sole state shared between the background fetch task and
//! interactive status readers. A single mutex guards the whole snapshot so a
//! reader never observes `remaining` without its matching `reset_epoch`.
//!
//! Exhaustion pauses rather than fails: the fetch loop asks `check_budget()`
//! before every request and sleeps until the reported reset epoch, so a
//! session stays Running across a window boundary with no lost requests.

use std::sync::{Arc, Mutex};

use chrono::Utc;

/// Snapshot of the tracked API quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Total requests allowed in the current window.
    pub limit_total: u32,
    /// Requests left in the current window (clamped, never negative).
    pub remaining: u32,
    /// Unix epoch seconds at which the window resets.
    pub reset_epoch: u64,
}

/// Decision returned before each outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Quota available (or unknown) - send the request.
    Proceed,
    /// Quota exhausted - wait until the given epoch before retrying.
    WaitUntil(u64),
}

/// Shared, cloneable rate-limit tracker.
///
/// Cheap to clone; all clones observe the same window.
#[derive(Clone, Default)]
pub struct RateLimiter {
    inner: Arc<Mutex<Option<RateLimitStatus>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the authoritative header values from an API response.
    ///
    /// A later `reset_epoch` starts a new window and replaces the snapshot.
    /// Within the same window `remaining` only moves down, so an out-of-order
    /// response can never regress the budget. Stale windows are ignored.
    pub fn update(&self, limit_total: u32, remaining: u32, reset_epoch: u64) {
        let mut guard = self.inner.lock().expect("rate limit lock poisoned");

        match guard.as_mut() {
            Some(current) if reset_epoch < current.reset_epoch => {
                // Response from an already-expired window.
            }
            Some(current) if reset_epoch == current.reset_epoch => {
                current.limit_total = limit_total;
                current.remaining = current.remaining.min(remaining);
            }
            _ => {
                *guard = Some(RateLimitStatus {
                    limit_total,
                    remaining,
                    reset_epoch,
                });
            }
        }
    }

    /// Mark the window exhausted, as reported by a 403 rate-limit response.
    pub fn exhaust(&self, reset_epoch: u64) {
        let mut guard = self.inner.lock().expect("rate limit lock poisoned");
        let limit_total = guard.map(|s| s.limit_total).unwrap_or(0);
        *guard = Some(RateLimitStatus {
            limit_total,
            remaining: 0,
            reset_epoch,
        });
    }

    /// Gate an outgoing request against the current wall clock.
    pub fn check_budget(&self) -> Budget {
        self.check_budget_at(Utc::now().timestamp().max(0) as u64)
    }

    /// Core budget decision against a caller-supplied clock.
    ///
    /// Once the reset epoch has passed, the window is consumed optimistically:
    /// the snapshot refills to `limit_total` and the next response's headers
    /// re-establish the true remaining count.
    pub fn check_budget_at(&self, now_epoch: u64) -> Budget {
        let mut guard = self.inner.lock().expect("rate limit lock poisoned");

        match guard.as_mut() {
            Some(status) if status.remaining == 0 => {
                if status.reset_epoch > now_epoch {
                    Budget::WaitUntil(status.reset_epoch)
                } else {
                    status.remaining = status.limit_total.max(1);
                    Budget::Proceed
                }
            }
            _ => Budget::Proceed,
        }
    }

    /// Current snapshot for status display; `None` before the first response.
    pub fn status(&self) -> Option<RateLimitStatus> {
        *self.inner.lock().expect("rate limit lock poisoned")
    }
}
