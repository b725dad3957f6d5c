//! Narration sync controller.
//!
//! The primary track is the visual source; the secondary track is the
//! synthesized narration, usually of a different length. On play the
//! narration's rate is stretched so both tracks end together; on seek the
//! narration is moved to the proportional position when it has drifted
//! more than a threshold. This is a ratio-based approximation, not a shared
//! sample clock.

use dubline_common::clock::DriftMeasurement;
use dubline_common::config::SyncDefaults;
use serde::Serialize;

use crate::media::MediaHandle;

/// Default drift tolerated before a hard resync.
pub const DEFAULT_DRIFT_THRESHOLD_SECS: f64 = 0.5;

/// Snapshot of both media clocks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SyncState {
    pub primary_time: f64,
    pub primary_duration: f64,
    pub secondary_time: f64,
    pub secondary_duration: f64,
    /// Rate applied to the secondary on the last play.
    pub rate: f64,
}

/// Narration rate for a pair of durations, and whether it had to fall back
/// to `1.0` because a duration was unusable.
pub fn narration_rate(primary_duration: f64, secondary_duration: f64) -> (f64, bool) {
    let usable = |d: f64| d.is_finite() && d > 0.0;
    if usable(primary_duration) && usable(secondary_duration) {
        let rate = secondary_duration / primary_duration;
        if rate.is_finite() && rate > 0.0 {
            return (rate, false);
        }
    }
    (1.0, true)
}

/// Where the secondary should be for a given primary position, if both
/// durations allow a proportional mapping.
pub fn expected_secondary_time(
    primary_time: f64,
    primary_duration: f64,
    secondary_duration: f64,
) -> Option<f64> {
    let usable = |d: f64| d.is_finite() && d > 0.0;
    if !primary_time.is_finite() || !usable(primary_duration) || !usable(secondary_duration) {
        return None;
    }
    Some(primary_time / primary_duration * secondary_duration)
}

/// Outcome of a seek check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriftCorrection {
    /// Drift within tolerance; nothing was changed.
    InSync { drift_secs: f64 },
    /// The secondary was moved to the expected position.
    Resynced { from_secs: f64, to_secs: f64 },
    /// Durations are unusable, so no expected position exists.
    Unavailable,
}

/// Keeps a secondary media track aligned with a primary one.
#[derive(Debug)]
pub struct SyncController<P, S> {
    primary: P,
    secondary: S,
    drift_threshold_secs: f64,
    rate: f64,
    degraded: bool,
}

impl<P: MediaHandle, S: MediaHandle> SyncController<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self {
            primary,
            secondary,
            drift_threshold_secs: DEFAULT_DRIFT_THRESHOLD_SECS,
            rate: 1.0,
            degraded: false,
        }
    }

    pub fn with_defaults(primary: P, secondary: S, defaults: &SyncDefaults) -> Self {
        Self::new(primary, secondary).with_drift_threshold(defaults.drift_threshold_secs)
    }

    pub fn with_drift_threshold(mut self, threshold_secs: f64) -> Self {
        if threshold_secs.is_finite() && threshold_secs >= 0.0 {
            self.drift_threshold_secs = threshold_secs;
        }
        self
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn secondary(&self) -> &S {
        &self.secondary
    }

    pub fn primary_mut(&mut self) -> &mut P {
        &mut self.primary
    }

    pub fn secondary_mut(&mut self) -> &mut S {
        &mut self.secondary
    }

    pub fn into_parts(self) -> (P, S) {
        (self.primary, self.secondary)
    }

    /// Rate applied on the last play transition.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Whether the last rate computation fell back to `1.0`.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn drift_threshold_secs(&self) -> f64 {
        self.drift_threshold_secs
    }

    pub fn state(&self) -> SyncState {
        SyncState {
            primary_time: self.primary.current_time(),
            primary_duration: self.primary.duration(),
            secondary_time: self.secondary.current_time(),
            secondary_duration: self.secondary.duration(),
            rate: self.rate,
        }
    }

    /// Start the primary and run the play hook.
    pub fn play(&mut self) -> dubline_common::error::DublineResult<()> {
        self.primary.play()?;
        self.on_primary_play();
        Ok(())
    }

    /// Pause the primary and run the pause hook.
    pub fn pause(&mut self) {
        self.primary.pause();
        self.on_primary_pause();
    }

    /// Seek the primary and run the seek hook.
    pub fn seek(&mut self, secs: f64) -> DriftCorrection {
        self.primary.seek(secs);
        self.on_primary_seeked()
    }

    /// Primary started playing: stretch the narration to the primary's
    /// length, start it, and silence the primary's own audio.
    pub fn on_primary_play(&mut self) {
        let primary_duration = self.primary.duration();
        let secondary_duration = self.secondary.duration();
        let (rate, degraded) = narration_rate(primary_duration, secondary_duration);

        if degraded {
            tracing::warn!(
                primary_duration,
                secondary_duration,
                "Drift correction degraded: durations unusable, narration plays at 1.0x"
            );
        } else {
            tracing::debug!(rate, primary_duration, secondary_duration, "Narration rate");
        }

        self.rate = rate;
        self.degraded = degraded;
        self.secondary.set_playback_rate(rate);

        match self.secondary.play() {
            Ok(()) => self.primary.set_muted(true),
            Err(e) => {
                tracing::warn!(
                    media = self.secondary.label(),
                    error = %e,
                    "Narration failed to start; keeping source audio"
                );
            }
        }
    }

    /// Primary paused: pause the narration and give the primary its audio
    /// back.
    pub fn on_primary_pause(&mut self) {
        self.secondary.pause();
        self.primary.set_muted(false);
    }

    /// Primary position jumped: hard-resync the narration if it drifted
    /// past the threshold.
    pub fn on_primary_seeked(&mut self) -> DriftCorrection {
        let Some(expected) = expected_secondary_time(
            self.primary.current_time(),
            self.primary.duration(),
            self.secondary.duration(),
        ) else {
            return DriftCorrection::Unavailable;
        };

        let drift = DriftMeasurement {
            expected_secs: expected,
            measured_secs: self.secondary.current_time(),
        };

        if drift.exceeds_threshold_secs(self.drift_threshold_secs) {
            tracing::debug!(
                drift_ms = drift.drift_ms(),
                to_secs = expected,
                "Resyncing narration"
            );
            self.secondary.seek(expected);
            DriftCorrection::Resynced {
                from_secs: drift.measured_secs,
                to_secs: expected,
            }
        } else {
            DriftCorrection::InSync {
                drift_secs: drift.drift_secs(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dubline_common::error::DublineResult;

    /// Media double that counts seeks.
    #[derive(Debug, Default)]
    struct FakeMedia {
        duration: f64,
        time: f64,
        rate: f64,
        playing: bool,
        muted: bool,
        seeks: usize,
        refuse_play: bool,
    }

    impl FakeMedia {
        fn with_duration(duration: f64) -> Self {
            Self {
                duration,
                rate: 1.0,
                ..Self::default()
            }
        }
    }

    impl MediaHandle for FakeMedia {
        fn metadata_loaded(&self) -> bool {
            true
        }
        fn duration(&self) -> f64 {
            self.duration
        }
        fn current_time(&self) -> f64 {
            self.time
        }
        fn seek(&mut self, secs: f64) {
            self.seeks += 1;
            self.time = secs;
        }
        fn playback_rate(&self) -> f64 {
            self.rate
        }
        fn set_playback_rate(&mut self, rate: f64) {
            self.rate = rate;
        }
        fn play(&mut self) -> DublineResult<()> {
            if self.refuse_play {
                return Err(dubline_common::error::DublineError::media("blocked"));
            }
            self.playing = true;
            Ok(())
        }
        fn pause(&mut self) {
            self.playing = false;
        }
        fn is_paused(&self) -> bool {
            !self.playing
        }
        fn is_ended(&self) -> bool {
            false
        }
        fn set_muted(&mut self, muted: bool) {
            self.muted = muted;
        }
        fn is_muted(&self) -> bool {
            self.muted
        }
    }

    #[test]
    fn test_rate_matches_duration_ratio() {
        let (rate, degraded) = narration_rate(120.0, 150.0);
        assert!((rate - 1.25).abs() < 1e-9);
        assert!(!degraded);
    }

    #[test]
    fn test_rate_falls_back_on_unusable_durations() {
        assert_eq!(narration_rate(120.0, 0.0), (1.0, true));
        assert_eq!(narration_rate(0.0, 150.0), (1.0, true));
        assert_eq!(narration_rate(f64::NAN, 150.0), (1.0, true));
        assert_eq!(narration_rate(120.0, f64::INFINITY), (1.0, true));
        assert_eq!(narration_rate(1e-320, 1e300), (1.0, true));
    }

    #[test]
    fn test_play_applies_rate_starts_narration_and_mutes_source() {
        let mut sync = SyncController::new(
            FakeMedia::with_duration(120.0),
            FakeMedia::with_duration(150.0),
        );
        sync.play().unwrap();

        assert!((sync.secondary().rate - 1.25).abs() < 1e-9);
        assert!(sync.secondary().playing);
        assert!(sync.primary().muted);
        assert!(!sync.is_degraded());
        assert!((sync.state().rate - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_play_with_zero_length_narration_degrades() {
        let mut sync =
            SyncController::new(FakeMedia::with_duration(120.0), FakeMedia::with_duration(0.0));
        sync.on_primary_play();
        assert_eq!(sync.rate(), 1.0);
        assert_eq!(sync.secondary().rate, 1.0);
        assert!(sync.is_degraded());
    }

    #[test]
    fn test_refused_narration_keeps_source_audio() {
        let mut secondary = FakeMedia::with_duration(150.0);
        secondary.refuse_play = true;
        let mut sync = SyncController::new(FakeMedia::with_duration(120.0), secondary);
        sync.on_primary_play();
        assert!(!sync.primary().muted);
    }

    #[test]
    fn test_pause_pauses_narration_and_unmutes() {
        let mut sync = SyncController::new(
            FakeMedia::with_duration(120.0),
            FakeMedia::with_duration(150.0),
        );
        sync.play().unwrap();
        sync.pause();
        assert!(!sync.secondary().playing);
        assert!(!sync.primary().muted);
    }

    #[test]
    fn test_small_drift_is_left_alone() {
        let mut sync = SyncController::new(
            FakeMedia::with_duration(100.0),
            FakeMedia::with_duration(100.0),
        );
        sync.secondary_mut().time = 50.3;
        let correction = sync.seek(50.0);

        assert!(matches!(correction, DriftCorrection::InSync { .. }));
        assert_eq!(sync.secondary().seeks, 0);
    }

    #[test]
    fn test_large_drift_resyncs_once() {
        let mut sync = SyncController::new(
            FakeMedia::with_duration(100.0),
            FakeMedia::with_duration(100.0),
        );
        sync.secondary_mut().time = 50.6;
        let correction = sync.seek(50.0);

        assert_eq!(
            correction,
            DriftCorrection::Resynced {
                from_secs: 50.6,
                to_secs: 50.0
            }
        );
        assert_eq!(sync.secondary().seeks, 1);
        assert_eq!(sync.secondary().time, 50.0);
    }

    #[test]
    fn test_seek_maps_proportionally() {
        let mut sync = SyncController::new(
            FakeMedia::with_duration(120.0),
            FakeMedia::with_duration(150.0),
        );
        sync.seek(60.0);
        assert!((sync.secondary().time - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_seek_without_durations_is_unavailable() {
        let mut sync = SyncController::new(
            FakeMedia::with_duration(f64::NAN),
            FakeMedia::with_duration(150.0),
        );
        assert_eq!(sync.seek(10.0), DriftCorrection::Unavailable);
        assert_eq!(sync.secondary().seeks, 0);
    }
}
