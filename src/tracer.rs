use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

// ─── Request context ─────────────────────────────────────────────

/// Timing state of one in-flight request.
///
/// `request_time` is wall-clock (epoch seconds) so it can be compared with
/// the timestamps the function reports about itself; `started` is the
/// monotonic anchor every duration is measured from.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub request_time: f64,
    pub started: Instant,
}

/// Start/finish stamps of a completed request, in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub request_time: f64,
    pub response_time: f64,
    /// `response_time - request_time`, measured on the monotonic clock.
    pub latency: f64,
}

impl RequestContext {
    pub fn new(request_id: Uuid, request_time: f64, started: Instant) -> Self {
        Self {
            request_id,
            request_time,
            started,
        }
    }

    /// Stamp the completion of this request now.
    pub fn finish(&self) -> Timing {
        self.finish_at(Instant::now())
    }

    /// Stamp the completion at a given monotonic instant.
    ///
    /// The response time is derived from the start time plus the monotonic
    /// elapsed duration, so a wall-clock step between the two hooks cannot
    /// produce a latency that disagrees with the two timestamps.
    pub fn finish_at(&self, at: Instant) -> Timing {
        let latency = at.saturating_duration_since(self.started).as_secs_f64();
        Timing {
            request_time: self.request_time,
            response_time: self.request_time + latency,
            latency,
        }
    }

    /// Monotonic age of the context.
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }
}

// ─── Tracer ──────────────────────────────────────────────────────

/// Creates request contexts. Holds no state: the caller threads the
/// returned context through to the completion hook.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestTracer;

impl RequestTracer {
    pub fn new() -> Self {
        Self
    }

    /// Fresh identifier + start stamp with microsecond resolution.
    pub fn on_request_start(&self) -> RequestContext {
        let started = Instant::now();
        RequestContext::new(Uuid::new_v4(), epoch_seconds(), started)
    }
}

/// Current wall-clock time as fractional epoch seconds.
pub fn epoch_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

// ─── Pending index ───────────────────────────────────────────────

/// Index of started-but-not-completed requests, for hosts that cannot carry
/// the context between hooks themselves (the HTTP hook surface).
///
/// Entries leave on completion; the reaper evicts anything older than the
/// TTL so abandoned requests cannot grow the map without bound.
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<Uuid, RequestContext>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ctx: RequestContext) {
        self.inner.lock().insert(ctx.request_id, ctx);
    }

    /// Remove and return the context for `request_id`, if it is still known.
    pub fn take(&self, request_id: &Uuid) -> Option<RequestContext> {
        self.inner.lock().remove(request_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Drop every entry older than `ttl`. Returns how many were dropped.
    pub fn evict_older_than(&self, ttl: Duration) -> usize {
        let mut map = self.inner.lock();
        let before = map.len();
        map.retain(|_, ctx| ctx.age() < ttl);
        before - map.len()
    }

    /// Periodically evict stale entries until the task is aborted.
    pub fn spawn_reaper(self: Arc<Self>, ttl: Duration) -> tokio::task::JoinHandle<()> {
        let period = (ttl / 4).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let evicted = self.evict_older_than(ttl);
                if evicted > 0 {
                    tracing::warn!(
                        evicted,
                        ttl_secs = ttl.as_secs(),
                        "dropped requests that never completed"
                    );
                }
            }
        })
    }
}
