//! Attempt guard: bounds failed payment attempts per session.
//!
//! Counters live behind the [`CounterStore`] port and every change goes
//! through its compare-and-swap, so concurrent failures for one session
//! never lose updates. The window is fixed-length: the first failure opens
//! it, and once it elapses the next failure starts a fresh count.

use crate::domain::ports::{AttemptCounter, CounterStore, CounterStoreRef};
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::warn;

/// Result of recording one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub locked: bool,
    /// Attempts left before the session locks.
    pub remaining: u32,
    /// True only on the failure that crossed the limit; the caller audits
    /// the lockout exactly once, on this signal.
    pub just_locked: bool,
}

pub struct AttemptGuard {
    store: CounterStoreRef,
    limit: u32,
    window: Duration,
}

impl AttemptGuard {
    pub fn new(store: CounterStoreRef, limit: u32, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Counts one failed attempt for the session.
    pub async fn record_failure(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AttemptOutcome> {
        loop {
            let current = self.store.get(session_id).await?;
            let next = match &current {
                Some(counter) if self.in_window(counter, now) => {
                    if counter.failures >= self.limit {
                        // Already locked; nothing left to decrement.
                        return Ok(AttemptOutcome {
                            locked: true,
                            remaining: 0,
                            just_locked: false,
                        });
                    }
                    AttemptCounter {
                        failures: counter.failures + 1,
                        window_start: counter.window_start,
                    }
                }
                _ => AttemptCounter {
                    failures: 1,
                    window_start: now,
                },
            };
            if self
                .store
                .compare_and_swap(session_id, current.as_ref(), next.clone())
                .await?
            {
                let locked = next.failures >= self.limit;
                if locked {
                    warn!(session_id, failures = next.failures, "session locked");
                }
                return Ok(AttemptOutcome {
                    locked,
                    remaining: self.limit.saturating_sub(next.failures),
                    just_locked: locked,
                });
            }
            // Lost the swap to a concurrent failure; re-read and retry.
        }
    }

    /// A successful payment clears the session's counter.
    pub async fn record_success(&self, session_id: &str) -> Result<()> {
        self.store.clear(session_id).await
    }

    pub async fn is_locked(&self, session_id: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.locked_for(session_id, now).await?.is_some())
    }

    /// Seconds until the lockout window reopens, if the session is locked.
    pub async fn locked_for(&self, session_id: &str, now: DateTime<Utc>) -> Result<Option<i64>> {
        match self.store.get(session_id).await? {
            Some(counter) if counter.failures >= self.limit && self.in_window(&counter, now) => {
                let reopens = counter.window_start + self.window - now;
                Ok(Some(reopens.num_seconds().max(0)))
            }
            _ => Ok(None),
        }
    }

    fn in_window(&self, counter: &AttemptCounter, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(counter.window_start) < self.window
    }
}
