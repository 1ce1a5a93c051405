//! Token-bucket admission control for the extraction service
//!
//! Refill is lazy: the level is recomputed from elapsed time on every call,
//! so no background timer is needed. The gate never blocks; callers poll
//! `try_consume` and sleep for `time_until` when denied.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Bucket {
    level: f64,
    last_refill: Instant,
}

/// Shared request budget, safe to consult from concurrent callers
#[derive(Debug)]
pub struct RateGate {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateGate {
    /// Create a full bucket. A non-positive refill rate is treated as "never refills".
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        let capacity = capacity.max(0.0);
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(0.0),
            bucket: Mutex::new(Bucket {
                level: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }

    /// Withdraw `n` units if available
    pub fn try_consume(&self, n: f64) -> bool {
        self.try_consume_at(n, Instant::now())
    }

    /// Withdraw `n` units as of `now`. Negative or non-finite demands are refused.
    pub fn try_consume_at(&self, n: f64, now: Instant) -> bool {
        if !valid_demand(n) {
            return false;
        }

        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, now);

        if bucket.level >= n {
            bucket.level -= n;
            true
        } else {
            false
        }
    }

    /// How long until `n` units would be available
    pub fn time_until(&self, n: f64) -> Duration {
        self.time_until_at(n, Instant::now())
    }

    pub fn time_until_at(&self, n: f64, now: Instant) -> Duration {
        if !valid_demand(n) {
            return Duration::MAX;
        }

        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, now);

        if bucket.level >= n {
            return Duration::ZERO;
        }
        if self.refill_per_sec <= 0.0 || n > self.capacity {
            return Duration::MAX;
        }
        Duration::try_from_secs_f64((n - bucket.level) / self.refill_per_sec).unwrap_or(Duration::MAX)
    }

    /// Current level after refill accounting
    pub fn level(&self) -> f64 {
        self.level_at(Instant::now())
    }

    pub fn level_at(&self, now: Instant) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, now);
        bucket.level
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        // Instants older than the last refill add nothing
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.level = (bucket.level + self.refill_per_sec * elapsed).min(self.capacity);
        if now > bucket.last_refill {
            bucket.last_refill = now;
        }
    }
}

fn valid_demand(n: f64) -> bool {
    n.is_finite() && n >= 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_then_deny_then_refill() {
        let gate = RateGate::new(5.0, 0.1);
        let t0 = Instant::now();

        for _ in 0..5 {
            assert!(gate.try_consume_at(1.0, t0));
        }
        assert!(!gate.try_consume_at(1.0, t0));

        let wait = gate.time_until_at(1.0, t0);
        assert!((wait.as_secs_f64() - 10.0).abs() < 0.01);

        assert!(gate.try_consume_at(1.0, t0 + Duration::from_secs(10)));
        assert!(!gate.try_consume_at(1.0, t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_level_stays_within_bounds() {
        let gate = RateGate::new(3.0, 2.0);
        let t0 = Instant::now();
        let mut now = t0;

        // Mixed demands and time steps, including oversized requests
        let demands = [1.0, 2.5, 0.5, 4.0, 1.0, 3.0, 0.25, 2.0, 5.0, 1.0];
        for (i, n) in demands.iter().enumerate() {
            now += Duration::from_millis(137 * i as u64);
            let _ = gate.try_consume_at(*n, now);
            let level = gate.level_at(now);
            assert!(level >= 0.0, "level went negative: {}", level);
            assert!(level <= 3.0, "level exceeded capacity: {}", level);
        }

        // Long idle never overfills
        assert_eq!(gate.level_at(now + Duration::from_secs(3600)), 3.0);
    }

    #[test]
    fn test_denied_consume_leaves_level_unchanged() {
        let gate = RateGate::new(2.0, 0.5);
        let t0 = Instant::now();
        assert!(gate.try_consume_at(1.5, t0));
        assert!(!gate.try_consume_at(1.0, t0));
        assert!((gate.level_at(t0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_demands_are_refused() {
        let gate = RateGate::new(2.0, 1.0);
        let t0 = Instant::now();
        assert!(gate.try_consume_at(1.0, t0));

        assert!(!gate.try_consume_at(-5.0, t0));
        assert!(!gate.try_consume_at(f64::NAN, t0));
        assert!(!gate.try_consume_at(f64::INFINITY, t0));
        assert!((gate.level_at(t0) - 1.0).abs() < 1e-9);

        assert_eq!(gate.time_until_at(f64::NAN, t0), Duration::MAX);
        assert_eq!(gate.time_until_at(-1.0, t0), Duration::MAX);
    }

    #[test]
    fn test_time_until_zero_when_available() {
        let gate = RateGate::new(2.0, 1.0);
        assert_eq!(gate.time_until(1.0), Duration::ZERO);
        assert_eq!(gate.time_until(3.0), Duration::MAX);
    }
}
