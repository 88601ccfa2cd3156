use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

/// Blocking waits and the clock they are measured against.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
    fn now(&self) -> Instant;
}

impl<S: Sleeper + ?Sized> Sleeper for &S {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }

    fn now(&self) -> Instant {
        (**self).now()
    }
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Fixed-window request counter. Once `limit` requests have been made in the
/// current window, `acquire` blocks until the window is over.
#[derive(Debug)]
pub struct RequestBudget {
    limit: u32,
    window: Duration,
    used: u32,
    window_start: Option<Instant>,
}

impl RequestBudget {
    /// A `limit` of zero disables the budget.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            used: 0,
            window_start: None,
        }
    }

    pub fn per_hour(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60 * 60))
    }

    pub fn acquire(&mut self, sleeper: &dyn Sleeper) {
        if self.limit == 0 {
            return;
        }
        let now = sleeper.now();
        let start = *self.window_start.get_or_insert(now);
        let elapsed = now.saturating_duration_since(start);
        if elapsed >= self.window {
            self.reset(now);
        } else if self.used >= self.limit {
            let wait = self.window - elapsed;
            info!(
                "request budget of {} spent, pausing {}s",
                self.limit,
                wait.as_secs()
            );
            sleeper.sleep(wait);
            self.reset(sleeper.now());
        }
        self.used += 1;
    }

    /// Starts a fresh window, e.g. after waiting out a server-side limit.
    pub fn reset(&mut self, now: Instant) {
        self.window_start = Some(now);
        self.used = 0;
    }
}
