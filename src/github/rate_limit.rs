//! Live rate-limit state observed from `X-RateLimit-*` response headers.

use reqwest::header::HeaderMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// What the most recent GitHub response said about our budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub remaining: u64,
    pub limit: u64,
    pub reset_epoch: u64,
}

/// Derived health tier; never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitTier {
    /// No response observed yet.
    Unknown,
    /// More than 100 calls remaining.
    Connected,
    /// 11..=100 remaining.
    Degraded,
    /// 10 or fewer remaining.
    Critical,
}

/// Dispatch throttles below this many remaining calls.
const THROTTLE_FLOOR: u64 = 10;
/// Longest single pre-dispatch wait, even when the reset is further out.
const MAX_THROTTLE: Duration = Duration::from_secs(60);

/// One per process, shared by every client through the transport.
///
/// Every response updates it; every dispatch consults it first.
#[derive(Debug)]
pub struct RateLimitState {
    snapshot: Mutex<Option<RateLimitSnapshot>>,
}

impl RateLimitState {
    pub fn new() -> Self {
        RateLimitState {
            snapshot: Mutex::new(None),
        }
    }

    /// Record the `X-RateLimit-*` headers of a response, if present.
    pub fn observe(&self, headers: &HeaderMap) {
        let parse = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
        };
        let (Some(remaining), Some(limit), Some(reset_epoch)) = (
            parse("x-ratelimit-remaining"),
            parse("x-ratelimit-limit"),
            parse("x-ratelimit-reset"),
        ) else {
            return;
        };
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = Some(RateLimitSnapshot {
            remaining,
            limit,
            reset_epoch,
        });
    }

    pub fn snapshot(&self) -> Option<RateLimitSnapshot> {
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn tier(&self) -> LimitTier {
        match self.snapshot() {
            None => LimitTier::Unknown,
            Some(s) if s.remaining > 100 => LimitTier::Connected,
            Some(s) if s.remaining > THROTTLE_FLOOR => LimitTier::Degraded,
            Some(_) => LimitTier::Critical,
        }
    }

    /// How long the caller must sleep before dispatching, if at all.
    ///
    /// Kicks in when fewer than [`THROTTLE_FLOOR`] calls remain and the
    /// reset is still ahead; capped at [`MAX_THROTTLE`] per dispatch.
    pub fn throttle_delay(&self) -> Option<Duration> {
        let snapshot = self.snapshot()?;
        if snapshot.remaining >= THROTTLE_FLOOR {
            return None;
        }
        let now = SystemTime::UNIX_EPOCH.elapsed().ok()?.as_secs();
        if snapshot.reset_epoch <= now {
            return None;
        }
        Some(Duration::from_secs(snapshot.reset_epoch - now).min(MAX_THROTTLE))
    }
}
