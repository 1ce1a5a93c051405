//! Per-origin politeness
//!
//! One pure wait calculation ([`compute_wait`]) backs two thin callers: a
//! blocking wait that parks the calling thread and a cooperative wait that
//! yields to the tokio scheduler. Origins never wait on each other.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::trace;

/// Origin used for URLs that cannot be parsed
pub const UNKNOWN_ORIGIN: &str = "unknown";

/// Politeness key for a URL: its lowercased host (plus non-default port)
pub fn origin_of(url: &str) -> String {
    match url::Url::parse(url.trim()) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) if !host.is_empty() => {
                let host = host.to_lowercase();
                match parsed.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host,
                }
            }
            _ => UNKNOWN_ORIGIN.to_string(),
        },
        Err(_) => UNKNOWN_ORIGIN.to_string(),
    }
}

/// Time still to wait given the last request to an origin.
/// `last` may lie in the future when a slot was already reserved.
pub fn compute_wait(last: Option<Instant>, now: Instant, min_delay: Duration) -> Duration {
    match last {
        Some(last) => (last + min_delay).saturating_duration_since(now),
        None => Duration::ZERO,
    }
}

/// Tracks the last request time per origin
#[derive(Debug)]
pub struct PolitenessTracker {
    min_delay: Duration,
    last_request: DashMap<String, Instant>,
}

impl PolitenessTracker {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_request: DashMap::new(),
        }
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Wait needed before the next request to `origin`, if any
    pub fn should_wait(&self, origin: &str) -> Option<Duration> {
        self.should_wait_at(origin, Instant::now())
    }

    pub fn should_wait_at(&self, origin: &str, now: Instant) -> Option<Duration> {
        let last = self.last_request.get(origin).map(|t| *t);
        let wait = compute_wait(last, now, self.min_delay);
        (!wait.is_zero()).then_some(wait)
    }

    /// Timestamp a request to `origin`
    pub fn record_request(&self, origin: &str) {
        self.record_request_at(origin, Instant::now());
    }

    pub fn record_request_at(&self, origin: &str, now: Instant) {
        self.last_request.insert(origin.to_string(), now);
    }

    /// Atomically compute the wait for `origin` and claim the resulting slot.
    ///
    /// The entry guard locks only this origin's shard, so two concurrent
    /// callers for one origin get consecutive slots while other origins
    /// proceed untouched.
    pub fn reserve_at(&self, origin: &str, now: Instant) -> Duration {
        match self.last_request.entry(origin.to_string()) {
            Entry::Occupied(mut slot) => {
                let wait = compute_wait(Some(*slot.get()), now, self.min_delay);
                *slot.get_mut() = now + wait;
                wait
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                Duration::ZERO
            }
        }
    }

    /// Park the calling thread until `origin` is clear, then record the request
    pub fn wait_blocking(&self, origin: &str) -> Duration {
        let wait = self.reserve_at(origin, Instant::now());
        if !wait.is_zero() {
            trace!(origin, wait_ms = wait.as_millis() as u64, "politeness wait (blocking)");
            std::thread::sleep(wait);
        }
        wait
    }

    /// Suspend the current task until `origin` is clear, then record the request
    pub async fn await_clearance(&self, origin: &str) -> Duration {
        let wait = self.reserve_at(origin, Instant::now());
        if !wait.is_zero() {
            trace!(origin, wait_ms = wait.as_millis() as u64, "politeness wait");
            tokio::time::sleep(wait).await;
        }
        wait
    }
}
