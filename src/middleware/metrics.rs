use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use super::Middleware;
use crate::error::Error;
use crate::server::{Request, Response};

/// Request counters kept with relaxed atomics.
///
/// Register for both directions: `before` counts arrivals, `after` records latency,
/// status class and coroutine stack size. Short-circuited and error responses are
/// counted too, since `after` runs for every response.
#[derive(Default)]
pub struct MetricsMiddleware {
    request_count: AtomicUsize,
    completed: AtomicUsize,
    total_latency_ns: AtomicU64,
    status_classes: [AtomicUsize; 5],
    stack_size: AtomicUsize,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: usize,
    pub completed: usize,
    pub average_latency_us: u64,
    pub responses_1xx: usize,
    pub responses_2xx: usize,
    pub responses_3xx: usize,
    pub responses_4xx: usize,
    pub responses_5xx: usize,
    pub stack_size: usize,
}

impl MetricsMiddleware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that entered the pipeline.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Mean time from pipeline entry to the start of the after-response hooks.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        let count = self.completed.load(Ordering::Relaxed) as u64;
        if count == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }

    /// Responses seen with a status in `class * 100 .. class * 100 + 100`.
    #[must_use]
    pub fn status_class_count(&self, class: u16) -> usize {
        match class {
            1..=5 => self.status_classes[usize::from(class - 1)].load(Ordering::Relaxed),
            _ => 0,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.request_count(),
            completed: self.completed.load(Ordering::Relaxed),
            average_latency_us: self.average_latency().as_micros() as u64,
            responses_1xx: self.status_class_count(1),
            responses_2xx: self.status_class_count(2),
            responses_3xx: self.status_class_count(3),
            responses_4xx: self.status_class_count(4),
            responses_5xx: self.status_class_count(5),
            stack_size: self.stack_size.load(Ordering::Relaxed),
        }
    }
}

impl Middleware for MetricsMiddleware {
    fn before(&self, _req: &mut Request) -> Result<Option<Response>, Error> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    fn after(&self, _req: &Request, res: &mut Response, latency: Duration) -> Result<(), Error> {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        let class = res.status() / 100;
        if (1..=5).contains(&class) {
            self.status_classes[usize::from(class - 1)].fetch_add(1, Ordering::Relaxed);
        }
        let size = if may::coroutine::is_coroutine() {
            may::coroutine::current().stack_size()
        } else {
            may::config().get_stack_size()
        };
        self.stack_size.store(size, Ordering::Relaxed);
        Ok(())
    }
}
