//! Global Limiter
//!
//! One shared budget gating every request regardless of bucket, using the
//! same semaphore-plus-reset-window model as a bucket. A global 429 pauses
//! this single instance, which blocks admission across all buckets at once.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{trace, warn};

pub(crate) struct GlobalLimiter {
    state: Mutex<GlobalState>,
    limit: u32,
    window: Duration,
}

struct GlobalState {
    remaining: u32,
    reset_at: Instant,
    pause_until: Option<Instant>,
}

impl GlobalLimiter {
    pub(crate) fn new(limit: u32, window: Duration) -> Self {
        let limit = limit.max(1);
        Self {
            state: Mutex::new(GlobalState {
                remaining: limit,
                reset_at: Instant::now() + window,
                pause_until: None,
            }),
            limit,
            window,
        }
    }

    /// Take one global slot, waiting out pauses and exhausted windows.
    pub(crate) async fn acquire(&self) {
        loop {
            match self.try_take() {
                None => return,
                Some(wait) => {
                    trace!(?wait, "global budget exhausted");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// `None` when a slot was taken; otherwise the wait before retrying.
    fn try_take(&self) -> Option<Duration> {
        let mut state = self.state.lock();
        let now = Instant::now();

        if let Some(until) = state.pause_until {
            if now < until {
                return Some(until - now);
            }
            state.pause_until = None;
        }

        if now >= state.reset_at {
            state.remaining = self.limit;
            state.reset_at = now + self.window;
        }

        if state.remaining > 0 {
            state.remaining -= 1;
            None
        } else {
            Some(state.reset_at - now)
        }
    }

    /// Halt all admission for `delay`. Never shortens an active pause.
    pub(crate) fn pause(&self, delay: Duration) {
        let mut state = self.state.lock();
        let until = Instant::now() + delay;
        if state.pause_until.map_or(true, |current| current < until) {
            state.pause_until = Some(until);
            warn!(?delay, "global rate limit hit, pausing all buckets");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn budget_spends_then_waits_for_the_window() {
        let limiter = GlobalLimiter::new(2, Duration::from_secs(1));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(Instant::now() - start, Duration::ZERO);

        limiter.acquire().await;
        assert!(Instant::now() - start >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_blocks_admission() {
        let limiter = GlobalLimiter::new(10, Duration::from_secs(1));
        limiter.pause(Duration::from_millis(250));

        let start = Instant::now();
        limiter.acquire().await;
        assert!(Instant::now() - start >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_never_shortens() {
        let limiter = GlobalLimiter::new(10, Duration::from_secs(1));
        limiter.pause(Duration::from_millis(500));
        limiter.pause(Duration::from_millis(100));

        let start = Instant::now();
        limiter.acquire().await;
        assert!(Instant::now() - start >= Duration::from_millis(500));
    }
}
