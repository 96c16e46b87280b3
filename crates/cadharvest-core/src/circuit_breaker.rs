use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

/// State of the [`BlockGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGuardConfig {
    /// Consecutive 403 responses that open the guard.
    pub forbidden_threshold: u32,
    /// How long the guard stays open before one probe is let through.
    pub cool_down: Duration,
}

impl Default for BlockGuardConfig {
    fn default() -> Self {
        Self {
            forbidden_threshold: 3,
            cool_down: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct GuardInner {
    state: GuardState,
    consecutive_forbidden: u32,
    opened_at: Option<Instant>,
    /// Start of the half-open probe still awaiting a verdict.
    probe_started: Option<Instant>,
}

impl Default for GuardInner {
    fn default() -> Self {
        Self {
            state: GuardState::Closed,
            consecutive_forbidden: 0,
            opened_at: None,
            probe_started: None,
        }
    }
}

/// Circuit breaker tripped by repeated 403 responses.
///
/// A run of 403s usually means the service has blocked the caller's address.
/// While open, requests fail as `Forbidden` without reaching the network.
/// After the cool-down a single probe is admitted; everyone else keeps
/// failing fast until that probe answers, or until it has gone a whole
/// cool-down without a verdict.
#[derive(Debug)]
pub struct BlockGuard {
    config: BlockGuardConfig,
    inner: Mutex<GuardInner>,
}

impl Default for BlockGuard {
    fn default() -> Self {
        Self::new(BlockGuardConfig::default())
    }
}

impl BlockGuard {
    pub fn new(config: BlockGuardConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(GuardInner::default()),
        }
    }

    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().expect("block guard lock is not poisoned");
        match inner.state {
            GuardState::Closed => true,
            GuardState::HalfOpen => {
                let probe_pending = inner
                    .probe_started
                    .is_some_and(|started| started.elapsed() < self.config.cool_down);
                if probe_pending {
                    false
                } else {
                    inner.probe_started = Some(Instant::now());
                    true
                }
            }
            GuardState::Open => {
                let can_probe = inner
                    .opened_at
                    .map(|opened_at| opened_at.elapsed() >= self.config.cool_down)
                    .unwrap_or(false);

                if can_probe {
                    inner.state = GuardState::HalfOpen;
                    inner.opened_at = None;
                    inner.probe_started = Some(Instant::now());
                    true
                } else {
                    false
                }
            }
        }
    }

    /// The admitted request ended without an HTTP status (transport error or
    /// cancellation), so the next caller may probe instead.
    pub fn abandon_probe(&self) {
        let mut inner = self.inner.lock().expect("block guard lock is not poisoned");
        if inner.state == GuardState::HalfOpen {
            inner.probe_started = None;
        }
    }

    /// Any response other than 403 proves the caller is not blocked.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("block guard lock is not poisoned");
        inner.state = GuardState::Closed;
        inner.consecutive_forbidden = 0;
        inner.opened_at = None;
        inner.probe_started = None;
    }

    pub fn record_forbidden(&self) {
        let mut inner = self.inner.lock().expect("block guard lock is not poisoned");
        inner.consecutive_forbidden = inner.consecutive_forbidden.saturating_add(1);
        inner.probe_started = None;

        if inner.state != GuardState::Open
            && (inner.state == GuardState::HalfOpen
                || inner.consecutive_forbidden >= self.config.forbidden_threshold)
        {
            warn!(
                consecutive = inner.consecutive_forbidden,
                cool_down_s = self.config.cool_down.as_secs(),
                "repeated 403 responses, the service may be blocking this address"
            );
            inner.state = GuardState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> GuardState {
        self.inner
            .lock()
            .expect("block guard lock is not poisoned")
            .state
    }

    pub fn consecutive_forbidden(&self) -> u32 {
        self.inner
            .lock()
            .expect("block guard lock is not poisoned")
            .consecutive_forbidden
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_forbidden_responses() {
        let guard = BlockGuard::new(BlockGuardConfig {
            forbidden_threshold: 2,
            cool_down: Duration::from_secs(10),
        });

        assert_eq!(guard.state(), GuardState::Closed);
        guard.record_forbidden();
        assert_eq!(guard.state(), GuardState::Closed);
        guard.record_forbidden();
        assert_eq!(guard.state(), GuardState::Open);
        assert!(!guard.allow_request());
    }

    #[tokio::test(start_paused = true)]
    async fn probes_after_cool_down_then_closes_on_success() {
        let guard = BlockGuard::new(BlockGuardConfig {
            forbidden_threshold: 1,
            cool_down: Duration::from_secs(5),
        });

        guard.record_forbidden();
        assert_eq!(guard.state(), GuardState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(guard.allow_request());
        assert_eq!(guard.state(), GuardState::HalfOpen);

        guard.record_success();
        assert_eq!(guard.state(), GuardState::Closed);
        assert_eq!(guard.consecutive_forbidden(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn forbidden_probe_reopens() {
        let guard = BlockGuard::new(BlockGuardConfig {
            forbidden_threshold: 3,
            cool_down: Duration::from_secs(1),
        });
        for _ in 0..3 {
            guard.record_forbidden();
        }

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(guard.allow_request());
        guard.record_forbidden();
        assert_eq!(guard.state(), GuardState::Open);
        assert!(!guard.allow_request());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_a_single_caller() {
        let guard = BlockGuard::new(BlockGuardConfig {
            forbidden_threshold: 1,
            cool_down: Duration::from_secs(1),
        });
        guard.record_forbidden();
        tokio::time::advance(Duration::from_secs(1)).await;

        let admitted = (0..5).filter(|_| guard.allow_request()).count();

        assert_eq!(admitted, 1);
        assert_eq!(guard.state(), GuardState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_probe_lets_the_next_caller_through() {
        let guard = BlockGuard::new(BlockGuardConfig {
            forbidden_threshold: 1,
            cool_down: Duration::from_secs(1),
        });
        guard.record_forbidden();
        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(guard.allow_request());
        assert!(!guard.allow_request());
        guard.abandon_probe();
        assert!(guard.allow_request());
        assert!(!guard.allow_request());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_probe_expires_after_a_cool_down() {
        let guard = BlockGuard::new(BlockGuardConfig {
            forbidden_threshold: 1,
            cool_down: Duration::from_secs(2),
        });
        guard.record_forbidden();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(guard.allow_request());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!guard.allow_request());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(guard.allow_request());
    }

    #[test]
    fn abandoning_while_closed_changes_nothing() {
        let guard = BlockGuard::default();
        guard.abandon_probe();
        assert_eq!(guard.state(), GuardState::Closed);
        assert!(guard.allow_request());
        assert!(guard.allow_request());
    }
}
