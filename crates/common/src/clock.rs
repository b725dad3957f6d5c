//! Clock and timing utilities for media synchronization.
//!
//! Every media handle and the export loop read time through a
//! [`PlaybackClock`] so the same code runs against the wall clock during
//! preview and against a manually stepped clock in headless export and tests.
//! This module provides:
//! - The clock abstraction and its two implementations
//! - Drift measurement between two media positions
//! - A rate controller for fixed-interval ticking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A monotonic source of seconds.
pub trait PlaybackClock: Send + Sync {
    /// Seconds elapsed since the clock's epoch.
    fn now_secs(&self) -> f64;
}

/// Wall clock anchored to the moment it was started.
#[derive(Debug, Clone)]
pub struct SystemClock {
    /// The instant the clock started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl SystemClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Wall-clock time at clock start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    /// The underlying epoch instant.
    pub fn epoch(&self) -> Instant {
        self.epoch
    }
}

impl PlaybackClock for SystemClock {
    fn now_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so a driver can hold one handle
/// and advance it while media handles read through another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock at `0.0` seconds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to an absolute time.
    pub fn set(&self, secs: f64) {
        self.bits.store(secs.to_bits(), Ordering::SeqCst);
    }

    /// Move forward by `delta_secs` and return the new time.
    pub fn advance(&self, delta_secs: f64) -> f64 {
        let next = self.now_secs() + delta_secs;
        self.set(next);
        next
    }
}

impl PlaybackClock for ManualClock {
    fn now_secs(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Drift measurement between two media positions.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Position the measured track should be at (seconds).
    pub expected_secs: f64,
    /// Position the measured track is actually at (seconds).
    pub measured_secs: f64,
}

impl DriftMeasurement {
    /// Drift in seconds (positive = measured is ahead).
    pub fn drift_secs(&self) -> f64 {
        self.measured_secs - self.expected_secs
    }

    /// Drift in milliseconds.
    pub fn drift_ms(&self) -> f64 {
        self.drift_secs() * 1000.0
    }

    /// Whether drift strictly exceeds the threshold.
    pub fn exceeds_threshold_secs(&self, threshold_secs: f64) -> bool {
        self.drift_secs().abs() > threshold_secs
    }
}

/// Fixed-interval tick gate.
#[derive(Debug)]
pub struct RateController {
    target_interval_secs: f64,
    last_tick_secs: Option<f64>,
}

impl RateController {
    /// Create a controller targeting the given Hz rate.
    pub fn new(target_hz: u32) -> Self {
        Self {
            target_interval_secs: 1.0 / target_hz.max(1) as f64,
            last_tick_secs: None,
        }
    }

    /// Check if enough time has passed for the next tick.
    /// Returns true and updates internal state if ready.
    /// The first call always returns true.
    pub fn should_tick(&mut self, current_secs: f64) -> bool {
        match self.last_tick_secs {
            None => {
                self.last_tick_secs = Some(current_secs);
                true
            }
            Some(last) if current_secs >= last + self.target_interval_secs => {
                self.last_tick_secs = Some(current_secs);
                true
            }
            _ => false,
        }
    }

    /// Target interval in seconds.
    pub fn interval_secs(&self) -> f64 {
        self.target_interval_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_elapsed() {
        let clock = SystemClock::start();
        assert!(clock.now_secs() < 1.0);
        assert!(!clock.epoch_wall().is_empty());
    }

    #[test]
    fn test_manual_clock_is_shared_between_clones() {
        let driver = ManualClock::new();
        let reader = driver.clone();
        driver.advance(0.5);
        driver.advance(0.25);
        assert!((reader.now_secs() - 0.75).abs() < 1e-12);

        reader.set(10.0);
        assert_eq!(driver.now_secs(), 10.0);
    }

    #[test]
    fn test_drift_measurement() {
        let drift = DriftMeasurement {
            expected_secs: 10.0,
            measured_secs: 10.6,
        };
        assert!((drift.drift_secs() - 0.6).abs() < 1e-9);
        assert!((drift.drift_ms() - 600.0).abs() < 1e-6);
        assert!(drift.exceeds_threshold_secs(0.5));
        assert!(!drift.exceeds_threshold_secs(1.0));

        let behind = DriftMeasurement {
            expected_secs: 10.0,
            measured_secs: 9.7,
        };
        assert!(!behind.exceeds_threshold_secs(0.5));
    }

    #[test]
    fn test_rate_controller() {
        let mut ctrl = RateController::new(30);
        assert!(ctrl.should_tick(0.0));
        assert!(!ctrl.should_tick(0.01));
        assert!(ctrl.should_tick(0.034));
    }
}
