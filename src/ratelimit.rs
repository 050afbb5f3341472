//! Per-caller request quotas.
//!
//! Fixed one-minute windows keyed by API key (authenticated callers) or
//! client IP. Authenticated callers get a larger pool; the heavy routes
//! (`/stats/full`, `/compare/*`, `/history/snapshot`) draw from their own
//! stricter pool. An outer `tower_governor` layer handles burst floods;
//! this limiter enforces the advertised quotas.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Default,
    Heavy,
}

struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    default_rpm: u32,
    auth_rpm: u32,
    heavy_rpm: u32,
    windows: Mutex<HashMap<(RouteClass, String), Window>>,
}

impl RateLimiter {
    pub fn new(default_rpm: u32, auth_rpm: u32, heavy_rpm: u32) -> Self {
        RateLimiter {
            default_rpm,
            auth_rpm,
            heavy_rpm,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn quota(&self, class: RouteClass, authenticated: bool) -> u32 {
        match class {
            RouteClass::Heavy => self.heavy_rpm,
            RouteClass::Default if authenticated => self.auth_rpm,
            RouteClass::Default => self.default_rpm,
        }
    }

    /// Admits or rejects one request. On rejection returns the seconds
    /// until the caller's window resets, for the `Retry-After` header.
    pub fn check(&self, key: &str, authenticated: bool, class: RouteClass) -> Result<(), u64> {
        let quota = self.quota(class, authenticated);
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        // Cheap periodic cleanup so the map stays proportional to the
        // set of recently active callers.
        if windows.len() > 1024 {
            windows.retain(|_, w| now.duration_since(w.started) < WINDOW);
        }

        let window = windows
            .entry((class, key.to_string()))
            .or_insert_with(|| Window {
                started: now,
                count: 0,
            });
        if now.duration_since(window.started) >= WINDOW {
            window.started = now;
            window.count = 0;
        }
        if window.count >= quota {
            let elapsed = now.duration_since(window.started);
            let retry_after = WINDOW.saturating_sub(elapsed).as_secs().max(1);
            return Err(retry_after);
        }
        window.count += 1;
        Ok(())
    }
}
