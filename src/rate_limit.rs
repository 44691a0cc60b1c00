// In-memory sliding-window rate limiter.
//
// Keyed by (limit kind, caller identity). The clock is injected so tests can
// advance time deterministically instead of sleeping. Expired entries are
// evicted lazily on a throttled housekeeping pass; there is no background
// timer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::metrics;

/// Different rate limit kinds with their constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    /// Authenticated fighter API calls: high throughput, short window.
    ApiCall,
    /// Fighter registration: low throughput, long window, keyed by IP.
    Registration,
}

impl LimitKind {
    /// Maximum number of requests allowed in the window.
    pub fn max_count(&self) -> u32 {
        match self {
            LimitKind::ApiCall => 60,
            LimitKind::Registration => 5,
        }
    }

    /// Time window for the rate limit.
    pub fn window(&self) -> Duration {
        match self {
            LimitKind::ApiCall => Duration::from_secs(60),
            LimitKind::Registration => Duration::from_secs(3600),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            LimitKind::ApiCall => "api_call",
            LimitKind::Registration => "registration",
        }
    }
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitKind::ApiCall => write!(f, "requests per minute"),
            LimitKind::Registration => write!(f, "registrations per hour"),
        }
    }
}

/// Error returned when a rate limit is exceeded.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Rate limit exceeded: max {max} {kind}")]
pub struct RateLimitError {
    pub kind: LimitKind,
    pub max: u32,
}

/// Time source for the limiter. Production uses [`SystemClock`]; tests inject
/// a manual clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    count: u32,
    reset_at: Instant,
}

struct Inner {
    entries: HashMap<(LimitKind, String), Entry>,
    last_cleanup: Instant,
}

/// Housekeeping passes run at most this often.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Thread-safe sliding-window rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                last_cleanup: now,
            })),
            clock,
        }
    }

    /// Check whether `caller` is within the limit for `kind`. Within limits,
    /// the request is recorded and `Ok(())` returned; otherwise the caller
    /// gets a [`RateLimitError`] and nothing is recorded.
    pub fn check(&self, kind: LimitKind, caller: &str) -> Result<(), RateLimitError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();

        if now.duration_since(inner.last_cleanup) >= CLEANUP_INTERVAL {
            inner.last_cleanup = now;
            inner.entries.retain(|_, e| e.reset_at > now);
        }

        let key = (kind, caller.to_string());
        let max = kind.max_count();

        let entry = inner.entries.entry(key).or_insert_with(|| Entry {
            count: 0,
            reset_at: now + kind.window(),
        });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + kind.window();
        }

        if entry.count >= max {
            metrics::RATE_LIMIT_DENIALS_TOTAL
                .with_label_values(&[kind.label()])
                .inc();
            return Err(RateLimitError { kind, max });
        }

        entry.count += 1;
        Ok(())
    }

    /// Current recorded count for a key (for diagnostics and tests).
    pub fn current_count(&self, kind: LimitKind, caller: &str) -> u32 {
        let now = self.clock.now();
        let inner = self.inner.lock().unwrap();
        match inner.entries.get(&(kind, caller.to_string())) {
            Some(e) if e.reset_at > now => e.count,
            _ => 0,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
