use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::ValidationError;

/// Process-wide sliding-window limiter for outbound requests.
///
/// Keeps the start times of the most recent requests. A caller is admitted
/// once fewer than `limit` starts fall inside the trailing window; otherwise
/// it sleeps until the oldest start leaves the window. The lock is held while
/// sleeping, so concurrent callers are admitted strictly one after another and
/// the bound holds across every worker sharing the limiter.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// At most `max_per_second` request starts in any rolling second.
    pub fn new(max_per_second: u32) -> Result<Self, ValidationError> {
        Self::with_window(max_per_second, Duration::from_secs(1))
    }

    pub fn with_window(limit: u32, window: Duration) -> Result<Self, ValidationError> {
        if limit == 0 || window.is_zero() {
            return Err(ValidationError::ZeroRateLimit);
        }

        Ok(Self {
            limit: limit as usize,
            window,
            starts: Mutex::new(VecDeque::with_capacity(limit as usize)),
        })
    }

    pub const fn limit(&self) -> usize {
        self.limit
    }

    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Waits until one more request may start and records its start time.
    pub async fn acquire(&self) {
        let mut starts = self.starts.lock().await;
        loop {
            let now = Instant::now();
            while starts
                .front()
                .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
            {
                starts.pop_front();
            }

            if starts.len() < self.limit {
                starts.push_back(now);
                return;
            }

            if let Some(oldest) = starts.front().copied() {
                let resume_at = oldest + self.window;
                trace!(
                    wait_ms = resume_at.saturating_duration_since(now).as_millis() as u64,
                    "rate window full"
                );
                tokio::time::sleep_until(resume_at).await;
            }
        }
    }

    /// Number of starts currently inside the window.
    pub async fn in_window(&self) -> usize {
        let starts = self.starts.lock().await;
        let now = Instant::now();
        starts
            .iter()
            .filter(|start| now.duration_since(**start) < self.window)
            .count()
    }
}
