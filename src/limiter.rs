//! Sliding-window rate limiting for extraction-provider calls.
//!
//! Both limiters count calls over the last [`WINDOW`] and, once `rpm` calls
//! are on record, wait until the oldest one leaves the window. An `rpm` of
//! zero or less turns limiting off entirely.
//!
//! - [`RateLimiter`] owns its history; use it from a single execution unit.
//! - [`SharedRateLimiter`] is a cheap handle to one history behind a mutex.
//!   Every clone draws from the same budget, so `N` workers together stay
//!   under `rpm` instead of each getting `rpm` of their own.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Length of the rate window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Something that must be awaited before each provider call.
pub trait Limiter: Send {
    /// Wait for a free slot and claim it. Returns the time spent waiting.
    fn acquire(&mut self) -> impl Future<Output = Duration> + Send;
}

#[derive(Debug, Clone)]
struct CallWindow {
    rpm: usize,
    calls: VecDeque<Instant>,
}

impl CallWindow {
    fn new(rpm: i64) -> Option<Self> {
        (rpm > 0).then(|| Self {
            rpm: rpm as usize,
            calls: VecDeque::new(),
        })
    }

    /// Drop timestamps that have left the window.
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.calls.front() {
            if now.saturating_duration_since(oldest) >= WINDOW {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until a slot frees up, if the budget is exhausted.
    fn wait_time(&self, now: Instant) -> Option<Duration> {
        if self.calls.len() < self.rpm {
            return None;
        }
        let oldest = *self.calls.front()?;
        let wait = (oldest + WINDOW).saturating_duration_since(now);
        (!wait.is_zero()).then_some(wait)
    }

    async fn acquire(&mut self) -> Duration {
        let mut now = Instant::now();
        self.prune(now);

        let mut waited = Duration::ZERO;
        if let Some(wait) = self.wait_time(now) {
            tracing::debug!("Rate limit reached. Waiting {:.2} seconds", wait.as_secs_f64());
            tokio::time::sleep(wait).await;
            waited = wait;
            now = Instant::now();
            self.prune(now);
        }

        self.calls.push_back(now);
        waited
    }
}

/// Rate limiter private to one execution unit.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Option<CallWindow>,
}

impl RateLimiter {
    pub fn new(rpm: i64) -> Self {
        Self {
            window: CallWindow::new(rpm),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.window.is_some()
    }

    /// Number of calls currently counted against the budget.
    pub fn recorded(&self) -> usize {
        self.window.as_ref().map_or(0, |w| w.calls.len())
    }

    pub async fn acquire(&mut self) -> Duration {
        match &mut self.window {
            Some(window) => window.acquire().await,
            None => Duration::ZERO,
        }
    }
}

impl Limiter for RateLimiter {
    fn acquire(&mut self) -> impl Future<Output = Duration> + Send {
        RateLimiter::acquire(self)
    }
}

/// Rate limiter whose history is shared by every clone.
///
/// The prune, check, wait and record steps run under one lock, so callers
/// queue behind a waiting caller instead of racing past it.
#[derive(Debug, Clone)]
pub struct SharedRateLimiter {
    window: Option<Arc<Mutex<CallWindow>>>,
}

impl SharedRateLimiter {
    pub fn new(rpm: i64) -> Self {
        Self {
            window: CallWindow::new(rpm).map(|w| Arc::new(Mutex::new(w))),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.window.is_some()
    }

    /// Number of calls currently counted against the shared budget.
    pub async fn recorded(&self) -> usize {
        match &self.window {
            Some(window) => window.lock().await.calls.len(),
            None => 0,
        }
    }

    pub async fn acquire(&self) -> Duration {
        match &self.window {
            Some(window) => window.lock().await.acquire().await,
            None => Duration::ZERO,
        }
    }
}

impl Limiter for SharedRateLimiter {
    fn acquire(&mut self) -> impl Future<Output = Duration> + Send {
        SharedRateLimiter::acquire(self)
    }
}
