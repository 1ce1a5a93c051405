//! Stage health accounting
//!
//! Counters accumulate per stage until `snapshot` closes the window. The next
//! window starts exactly where the previous one ended, so samples for a stage
//! are time-ordered and never overlap.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::{HealthStatus, QualitySample, QualityThresholds, Stage};

#[derive(Debug, Clone, Copy)]
struct Window {
    start: DateTime<Utc>,
    attempts: u64,
    successes: u64,
}

impl Window {
    fn open(start: DateTime<Utc>) -> Self {
        Self {
            start,
            attempts: 0,
            successes: 0,
        }
    }
}

/// Classify a success rate against configured thresholds
pub fn classify(rate: f64, thresholds: &QualityThresholds) -> HealthStatus {
    if rate < thresholds.error {
        HealthStatus::Error
    } else if rate < thresholds.warning {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

/// Aggregates attempt/success counts into [`QualitySample`]s
#[derive(Debug)]
pub struct QualityRecorder {
    thresholds: QualityThresholds,
    windows: Mutex<BTreeMap<Stage, Window>>,
}

impl QualityRecorder {
    pub fn new(thresholds: QualityThresholds) -> Self {
        let now = Utc::now();
        let windows = Stage::ALL.iter().map(|s| (*s, Window::open(now))).collect();
        Self {
            thresholds,
            windows: Mutex::new(windows),
        }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    /// Add counts to the stage's open window
    pub fn record(&self, stage: Stage, attempted: u64, succeeded: u64) {
        let succeeded = if succeeded > attempted {
            warn!(%stage, attempted, succeeded, "More successes than attempts; clamping");
            attempted
        } else {
            succeeded
        };

        let mut windows = self.windows.lock();
        let window = windows.entry(stage).or_insert_with(|| Window::open(Utc::now()));
        window.attempts += attempted;
        window.successes += succeeded;
    }

    /// Counts in the stage's open window
    pub fn pending(&self, stage: Stage) -> (u64, u64) {
        self.windows
            .lock()
            .get(&stage)
            .map(|w| (w.attempts, w.successes))
            .unwrap_or((0, 0))
    }

    /// Close the stage's window into a sample and open a fresh one
    pub fn snapshot(&self, stage: Stage) -> QualitySample {
        self.snapshot_at(stage, Utc::now())
    }

    pub fn snapshot_at(&self, stage: Stage, now: DateTime<Utc>) -> QualitySample {
        let mut windows = self.windows.lock();
        let window = windows.entry(stage).or_insert_with(|| Window::open(now));
        let end = now.max(window.start);

        // An empty window has nothing failing in it
        let success_rate = if window.attempts == 0 {
            1.0
        } else {
            window.successes as f64 / window.attempts as f64
        };

        let sample = QualitySample {
            window_start: window.start,
            window_end: end,
            stage,
            attempts: window.attempts,
            successes: window.successes,
            success_rate,
            status: classify(success_rate, &self.thresholds),
        };

        *window = Window::open(end);
        drop(windows);

        info!(
            stage = %sample.stage,
            attempts = sample.attempts,
            successes = sample.successes,
            rate = sample.success_rate,
            status = %sample.status,
            "quality window closed"
        );
        sample
    }

    /// Snapshot every stage that recorded at least one attempt
    pub fn snapshot_all(&self) -> Vec<QualitySample> {
        let now = Utc::now();
        let active: Vec<Stage> = self
            .windows
            .lock()
            .iter()
            .filter(|(_, w)| w.attempts > 0)
            .map(|(s, _)| *s)
            .collect();

        active.into_iter().map(|s| self.snapshot_at(s, now)).collect()
    }
}

impl Default for QualityRecorder {
    fn default() -> Self {
        Self::new(QualityThresholds::default())
    }
}
