// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Rate-limited variants of the [`tracing`] event macros.
//!
//! Use these for events a misconfigured host or a bad file can trigger over
//! and over (a missing encryption key, an oversized NVRAM file), so they do
//! not crowd everything else out of the log.
//!
//! Each call site gets its own limiter. By default a call site may log
//! [`EVENTS_PER_PERIOD`] events every [`PERIOD_MS`] milliseconds; pass
//! `limit: <n>` as the first argument to change the per-period budget.

#![forbid(unsafe_code)]

use parking_lot::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;
#[doc(hidden)]
pub use tracing;

/// Length of one rate-limiting window.
pub const PERIOD_MS: u64 = 5000;
/// Events allowed per window unless overridden.
pub const EVENTS_PER_PERIOD: u32 = 10;

static DISABLE_RATE_LIMITING: AtomicBool = AtomicBool::new(false);

/// Disables or reenables rate limiting globally.
///
/// Handy in tests that assert on log output.
pub fn disable_rate_limiting(disabled: bool) {
    DISABLE_RATE_LIMITING.store(disabled, Ordering::Relaxed);
}

#[doc(hidden)]
pub struct RateLimiter {
    state: Mutex<Window>,
}

struct Window {
    start: Option<Instant>,
    events: u32,
    missed: u64,
}

#[doc(hidden)]
#[derive(Debug)]
pub struct RateLimited;

impl RateLimiter {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(Window {
                start: None,
                events: 0,
                missed: 0,
            }),
        }
    }

    /// Returns `Ok(missed)` if the event should be logged, where `missed` is
    /// the number of events dropped since the last logged one (`Some` only
    /// when that is nonzero or this is the last event of the window).
    pub fn event(&self, limit: u32) -> Result<Option<u64>, RateLimited> {
        self.event_at(Instant::now(), limit)
    }

    fn event_at(&self, now: Instant, limit: u32) -> Result<Option<u64>, RateLimited> {
        if DISABLE_RATE_LIMITING.load(Ordering::Relaxed) {
            return Ok(None);
        }

        let mut state = self.state.try_lock().ok_or(RateLimited)?;
        let start = *state.start.get_or_insert(now);
        if now.duration_since(start) > Duration::from_millis(PERIOD_MS) {
            state.start = Some(now);
            state.events = 0;
        }
        if state.events >= limit {
            state.missed += 1;
            return Err(RateLimited);
        }
        state.events += 1;
        let missed = std::mem::take(&mut state.missed);
        Ok((missed != 0 || state.events == limit).then_some(missed))
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __ratelimited {
    ($level:ident, limit: $limit:expr, $($rest:tt)*) => {{
        static RATE_LIMITER: $crate::RateLimiter = $crate::RateLimiter::new();
        if let Ok(missed_events) = RATE_LIMITER.event($limit) {
            $crate::tracing::$level!(dropped_ratelimited = missed_events, $($rest)*);
        }
    }};
    ($level:ident, $($rest:tt)*) => {
        $crate::__ratelimited!($level, limit: $crate::EVENTS_PER_PERIOD, $($rest)*)
    };
}

/// As [`tracing::error!`], but rate limited.
///
/// ```
/// tracelimit::error_ratelimited!(key_id = "vm-key", "failed to retain key");
/// tracelimit::error_ratelimited!(limit: 3, "noisy failure");
/// ```
#[macro_export]
macro_rules! error_ratelimited {
    ($($rest:tt)*) => {
        $crate::__ratelimited!(error, $($rest)*)
    };
}

/// As [`tracing::warn!`], but rate limited.
#[macro_export]
macro_rules! warn_ratelimited {
    ($($rest:tt)*) => {
        $crate::__ratelimited!(warn, $($rest)*)
    };
}

/// As [`tracing::info!`], but rate limited.
#[macro_export]
macro_rules! info_ratelimited {
    ($($rest:tt)*) => {
        $crate::__ratelimited!(info, $($rest)*)
    };
}

#[cfg(test)]
mod tests {
    use super::RateLimiter;
    use std::time::Duration;
    use std::time::Instant;

    #[test]
    fn limits_within_window() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        assert_eq!(limiter.event_at(now, 2).unwrap(), None);
        // Last event before limiting reports the (empty) missed count.
        assert_eq!(limiter.event_at(now, 2).unwrap(), Some(0));
        assert!(limiter.event_at(now, 2).is_err());
        assert!(limiter.event_at(now, 2).is_err());
    }

    #[test]
    fn reports_missed_after_window() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        limiter.event_at(now, 1).unwrap();
        assert!(limiter.event_at(now, 1).is_err());
        let later = now + Duration::from_millis(super::PERIOD_MS + 1);
        assert_eq!(limiter.event_at(later, 1).unwrap(), Some(1));
    }

    #[test]
    fn macros_expand() {
        error_ratelimited!("plain");
        warn_ratelimited!(limit: 1, value = 5, "with fields");
        info_ratelimited!(path = "x", "info");
    }
}
