use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::defaults::{DEFAULT_RATELIMIT_BURST, DEFAULT_RATELIMIT_INTERVAL};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A burst/interval limiter for repeated warnings.
///
/// At most `burst` messages pass per `interval`. Messages dropped inside a window are counted and
/// reported when the next window opens.
#[derive(Debug)]
pub struct RateLimit {
    name: &'static str,
    interval: Duration,
    burst: u32,
    state: Mutex<RateLimitState>,
}

#[derive(Debug)]
struct RateLimitState {
    begin: Option<Instant>,
    printed: u32,
    missed: u32,
    total_printed: u64,
    total_missed: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RateLimit {
    /// Creates a limiter. An `interval` of zero disables limiting.
    pub fn new(name: &'static str, interval: Duration, burst: u32) -> Self {
        Self {
            name,
            interval,
            burst,
            state: Mutex::new(RateLimitState {
                begin: None,
                printed: 0,
                missed: 0,
                total_printed: 0,
                total_missed: 0,
            }),
        }
    }

    /// Returns true if the caller may emit its message now.
    pub fn check(&self) -> bool {
        let mut state = self.state.lock();

        if self.interval.is_zero() {
            state.total_printed += 1;
            return true;
        }

        let now = Instant::now();
        let expired = state
            .begin
            .map_or(true, |begin| now.duration_since(begin) >= self.interval);

        if expired {
            if state.missed > 0 {
                tracing::warn!("{}: {} messages suppressed", self.name, state.missed);
            }
            state.begin = Some(now);
            state.printed = 0;
            state.missed = 0;
        }

        if state.printed < self.burst {
            state.printed += 1;
            state.total_printed += 1;
            true
        } else {
            state.missed += 1;
            state.total_missed += 1;
            false
        }
    }

    /// Number of messages let through since creation.
    pub fn emitted(&self) -> u64 {
        self.state.lock().total_printed
    }

    /// Number of messages suppressed since creation.
    pub fn suppressed(&self) -> u64 {
        self.state.lock().total_missed
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new(
            "overlay",
            DEFAULT_RATELIMIT_INTERVAL,
            DEFAULT_RATELIMIT_BURST,
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
