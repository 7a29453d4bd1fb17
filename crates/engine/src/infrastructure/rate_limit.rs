//! Sliding-window rate limiter for generation providers.
//!
//! Keeps a bounded window of recent call timestamps; a caller awaits until
//! the oldest timestamp has left the window before its own call is
//! recorded. Tasks run on tokio's multi-threaded runtime, so the window is
//! guarded by an async mutex.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// Wait until a call slot is free, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut times = self.timestamps.lock().await;
                let now = Instant::now();
                while times
                    .front()
                    .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
                {
                    times.pop_front();
                }
                if times.len() < self.max_requests {
                    times.push_back(now);
                    return;
                }
                let Some(oldest) = times.front().copied() else {
                    continue;
                };
                (oldest + self.window).saturating_duration_since(now)
            };
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn calls_under_the_limit_pass_immediately() {
        let limiter = RateLimiter::new(3, Duration::from_secs(10));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn extra_call_waits_until_the_oldest_timestamp_expires() {
        let limiter = RateLimiter::new(2, Duration::from_secs(10));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        // The first slot opened 10s after the first call, i.e. 9s from here.
        assert!(start.elapsed() >= Duration::from_secs(9));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn slots_free_up_as_the_window_slides() {
        let limiter = RateLimiter::new(1, Duration::from_secs(5));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(5)).await;

        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
