use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Padding added to a computed wait so the oldest timestamp has definitely
/// aged out when the task wakes.
const WAIT_MARGIN: Duration = Duration::from_millis(100);

/// Sliding-window rate limiter. At most `capacity` acquisitions complete in
/// any `window`; excess callers suspend until the oldest timestamp ages out.
/// Waiters are served in task FIFO order via the mutex queue.
pub struct SlidingWindowLimiter {
    window: Duration,
    capacity: usize,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Block until a slot is free, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait_until = {
                let mut stamps = self.timestamps.lock().await;
                let now = Instant::now();
                while let Some(front) = stamps.front() {
                    if now.duration_since(*front) >= self.window {
                        stamps.pop_front();
                    } else {
                        break;
                    }
                }
                if stamps.len() < self.capacity {
                    stamps.push_back(now);
                    return;
                }
                // Window full: wait for the oldest entry to expire.
                *stamps.front().expect("non-empty at capacity") + self.window + WAIT_MARGIN
            };
            debug!("Rate limit window full, suspending");
            tokio::time::sleep_until(wait_until).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn capacity_is_respected_within_window() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(30), 5);
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire().await;
        }
        // Five slots taken instantly
        assert_eq!(start.elapsed(), Duration::ZERO);

        // The sixth must wait for the window plus the safety margin
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn eleven_calls_complete_without_failure() {
        let limiter = Arc::new(SlidingWindowLimiter::new(Duration::from_secs(30), 5));
        let start = Instant::now();

        let handles: Vec<_> = (0..11)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        // 11 calls at capacity 5: third window opens after two full waits
        assert!(start.elapsed() >= Duration::from_secs(60));
    }
}
