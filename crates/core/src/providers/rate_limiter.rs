//! Sliding-window rate limiter for a single upstream provider.
//!
//! Keeps the instants of the last `max_calls` calls. A call is admitted once
//! fewer than `max_calls` of them fall inside the trailing window; otherwise
//! the caller waits until the oldest one ages out. Callers are never rejected.

use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Width of the rolling window.
pub const WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    name: String,
    max_calls: usize,
    window: Duration,
    history: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Allow at most `max_calls_per_minute` calls in any 60-second window.
    /// A limit of zero is treated as one.
    pub fn new(name: impl Into<String>, max_calls_per_minute: usize) -> Self {
        Self::with_window(name, max_calls_per_minute, WINDOW)
    }

    pub fn with_window(name: impl Into<String>, max_calls: usize, window: Duration) -> Self {
        let max_calls = max_calls.max(1);
        Self {
            name: name.into(),
            max_calls,
            window,
            history: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    /// Wait until another call fits in the window, then record it.
    ///
    /// The history lock is released while sleeping; after waking the check
    /// is repeated, since a concurrent caller may have taken the freed slot.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut history = self.lock_history();
                let now = Instant::now();
                self.prune(&mut history, now);

                if history.len() < self.max_calls {
                    history.push_back(now);
                    return;
                }

                // At the limit: the oldest entry decides when a slot frees up.
                match history.front() {
                    Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            debug!(
                "Rate limit reached for {}, waiting {:.1}s",
                self.name,
                wait.as_secs_f64()
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Record a call if one fits right now. Returns `false` instead of waiting.
    pub fn try_acquire(&self) -> bool {
        let mut history = self.lock_history();
        let now = Instant::now();
        self.prune(&mut history, now);
        if history.len() < self.max_calls {
            history.push_back(now);
            true
        } else {
            false
        }
    }

    /// Number of calls recorded inside the current window.
    pub fn in_flight_window(&self) -> usize {
        let mut history = self.lock_history();
        self.prune(&mut history, Instant::now());
        history.len()
    }

    fn prune(&self, history: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = history.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                history.pop_front();
            } else {
                break;
            }
        }
    }

    // A poisoned history is still a usable list of call instants.
    fn lock_history(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.history.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter history for {} was poisoned, recovering", self.name);
            poisoned.into_inner()
        })
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("max_calls", &self.max_calls)
            .field("window", &self.window)
            .finish()
    }
}
