//! Sliding-window call budget shared by all requester callers.
//!
//! The window records the issue time of every recent call and blocks new
//! callers while the trailing window already holds the configured maximum.
//! Waiting parks the task on a tokio sleep computed from the oldest recorded
//! timestamp; there is no busy-spinning.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Sliding-window rate limiter state.
///
/// Shared mutable state is a timestamp queue behind a single async mutex; the
/// lock is never held across a sleep, so an unbounded number of callers can
/// wait concurrently. The limiter bounds throughput only - it makes no
/// fairness or FIFO ordering guarantee between waiters.
#[derive(Debug)]
pub struct RateWindow {
    /// Maximum calls allowed inside one trailing window.
    max_calls: usize,
    /// Window length.
    window: Duration,
    /// Issue timestamps of calls inside the current window, oldest first.
    recent: Mutex<VecDeque<Instant>>,
}

impl RateWindow {
    /// Creates a window allowing `max_calls` per trailing `window`.
    #[must_use]
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            recent: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    /// Blocks until the trailing window has capacity, then records the call.
    ///
    /// The recorded timestamp is taken after any wait, immediately before the
    /// caller dispatches its request.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut recent = self.recent.lock().await;
                let now = Instant::now();
                while recent
                    .front()
                    .is_some_and(|&oldest| now.duration_since(oldest) >= self.window)
                {
                    recent.pop_front();
                }
                if recent.len() < self.max_calls {
                    recent.push_back(now);
                    return;
                }
                // Window full: wake when the oldest call ages out.
                match recent.front() {
                    Some(&oldest) => self.window.saturating_sub(now.duration_since(oldest)),
                    None => Duration::ZERO,
                }
            };
            debug!(wait_ms = wait.as_millis(), "rate window full, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of calls recorded inside the current trailing window.
    pub async fn current_count(&self) -> usize {
        let mut recent = self.recent.lock().await;
        let now = Instant::now();
        while recent
            .front()
            .is_some_and(|&oldest| now.duration_since(oldest) >= self.window)
        {
            recent.pop_front();
        }
        recent.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_under_capacity_is_immediate() {
        tokio::time::pause();

        let window = RateWindow::new(3, Duration::from_secs(10));
        let start = Instant::now();

        window.acquire().await;
        window.acquire().await;
        window.acquire().await;

        assert!(start.elapsed() < Duration::from_millis(10));
        assert_eq!(window.current_count().await, 3);
    }

    #[tokio::test]
    async fn test_acquire_waits_when_window_full() {
        tokio::time::pause();

        let window = RateWindow::new(2, Duration::from_secs(10));
        let start = Instant::now();

        window.acquire().await;
        window.acquire().await;
        // Third call must wait for the first to age out of the window.
        window.acquire().await;

        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_old_calls_age_out() {
        tokio::time::pause();

        let window = RateWindow::new(5, Duration::from_secs(10));
        window.acquire().await;
        window.acquire().await;
        assert_eq!(window.current_count().await, 2);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(window.current_count().await, 0);
    }

    #[tokio::test]
    async fn test_many_concurrent_waiters_never_exceed_budget() {
        tokio::time::pause();

        let window = std::sync::Arc::new(RateWindow::new(3, Duration::from_secs(5)));
        let mut handles = Vec::new();
        for _ in 0..9 {
            let window = std::sync::Arc::clone(&window);
            handles.push(tokio::spawn(async move {
                window.acquire().await;
                Instant::now()
            }));
        }

        let mut timestamps = Vec::new();
        for handle in handles {
            timestamps.push(handle.await.unwrap());
        }
        timestamps.sort();

        // No trailing 5s slice may contain more than 3 acquisitions.
        for (i, &t) in timestamps.iter().enumerate() {
            let in_window = timestamps[..=i]
                .iter()
                .filter(|&&earlier| t.duration_since(earlier) < Duration::from_secs(5))
                .count();
            assert!(in_window <= 3, "window held {in_window} calls");
        }
    }
}
