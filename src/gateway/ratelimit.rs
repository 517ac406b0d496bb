// Bastion — Fixed-Window Rate Limiter
//
// Counts requests per client key within discrete, non-overlapping windows.
// The check-and-increment is a single critical section, so concurrent
// requests from the same client cannot slip past the ceiling.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Window {
    count: u32,
    reset_at: Instant,
}

/// Per-client fixed-window counters.
pub struct FixedWindowLimiter {
    windows: Mutex<HashMap<String, Window>>,
    max_requests: u32,
    window: Duration,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    /// Count one request for `client_key`. Returns `Err(retry_after_secs)`
    /// once the window's ceiling is exceeded.
    pub fn try_acquire(&self, client_key: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("rate limit lock poisoned");

        let window = windows.entry(client_key.to_string()).or_insert(Window {
            count: 0,
            reset_at: now + self.window,
        });

        if now >= window.reset_at {
            window.count = 0;
            window.reset_at = now + self.window;
        }

        window.count += 1;
        if window.count > self.max_requests {
            let remaining = window.reset_at.saturating_duration_since(now);
            // Round up so "retry after" never undershoots the reset.
            let retry_after_secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            return Err(retry_after_secs.max(1));
        }

        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
