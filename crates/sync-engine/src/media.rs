//! Playable media handles.
//!
//! [`MediaHandle`] is the narrow surface the sync controller and the export
//! loop need from a media element: position, duration, rate, play state and
//! mute. [`VirtualMedia`] implements it on top of a [`PlaybackClock`], so a
//! handle advances exactly as fast as the clock it reads.

use std::sync::Arc;

use dubline_common::clock::PlaybackClock;
use dubline_common::error::{DublineError, DublineResult};

/// A playable media track.
pub trait MediaHandle {
    /// Short name used in logs.
    fn label(&self) -> &str {
        "media"
    }

    /// Whether duration and dimensions are known.
    fn metadata_loaded(&self) -> bool;

    /// Duration in seconds; `NaN` until metadata has loaded.
    fn duration(&self) -> f64;

    /// Current position in seconds.
    fn current_time(&self) -> f64;

    /// Jump to a position.
    fn seek(&mut self, secs: f64);

    fn playback_rate(&self) -> f64;

    fn set_playback_rate(&mut self, rate: f64);

    /// Start or resume playback.
    fn play(&mut self) -> DublineResult<()>;

    fn pause(&mut self);

    /// True when not playing, including after reaching the end.
    fn is_paused(&self) -> bool;

    fn is_ended(&self) -> bool;

    fn set_muted(&mut self, muted: bool);

    fn is_muted(&self) -> bool;
}

/// A media handle whose position is derived from a clock.
///
/// Position is `anchor + (now - anchor_clock) * rate`, clamped to
/// `[0, duration]`. Every state change re-anchors, so rate changes and seeks
/// never move the position retroactively.
pub struct VirtualMedia {
    label: String,
    clock: Arc<dyn PlaybackClock>,
    duration_secs: f64,
    metadata_ready_at: Option<f64>,
    anchor_position: f64,
    anchor_clock: f64,
    rate: f64,
    playing: bool,
    muted: bool,
}

impl VirtualMedia {
    /// A handle of the given duration whose metadata is available
    /// immediately.
    pub fn new(label: impl Into<String>, duration_secs: f64, clock: Arc<dyn PlaybackClock>) -> Self {
        let now = clock.now_secs();
        Self {
            label: label.into(),
            clock,
            duration_secs,
            metadata_ready_at: Some(now),
            anchor_position: 0.0,
            anchor_clock: now,
            rate: 1.0,
            playing: false,
            muted: false,
        }
    }

    /// Metadata becomes available once the clock reaches `ready_at`;
    /// `None` means it never loads.
    pub fn with_metadata_ready_at(mut self, ready_at: Option<f64>) -> Self {
        self.metadata_ready_at = ready_at;
        self
    }

    fn now(&self) -> f64 {
        self.clock.now_secs()
    }

    fn clamp_position(&self, secs: f64) -> f64 {
        let secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
        if self.duration_secs.is_finite() {
            secs.min(self.duration_secs.max(0.0))
        } else {
            secs
        }
    }

    fn reanchor(&mut self) {
        self.anchor_position = self.current_time();
        self.anchor_clock = self.now();
    }
}

impl MediaHandle for VirtualMedia {
    fn label(&self) -> &str {
        &self.label
    }

    fn metadata_loaded(&self) -> bool {
        self.metadata_ready_at
            .is_some_and(|ready_at| self.now() >= ready_at)
    }

    fn duration(&self) -> f64 {
        if self.metadata_loaded() {
            self.duration_secs
        } else {
            f64::NAN
        }
    }

    fn current_time(&self) -> f64 {
        if !self.playing {
            return self.anchor_position;
        }
        let elapsed = (self.now() - self.anchor_clock).max(0.0);
        self.clamp_position(self.anchor_position + elapsed * self.rate)
    }

    fn seek(&mut self, secs: f64) {
        self.anchor_position = self.clamp_position(secs);
        self.anchor_clock = self.now();
    }

    fn playback_rate(&self) -> f64 {
        self.rate
    }

    fn set_playback_rate(&mut self, rate: f64) {
        if !(rate.is_finite() && rate > 0.0) {
            tracing::warn!(media = %self.label, rate, "Ignoring invalid playback rate");
            return;
        }
        self.reanchor();
        self.rate = rate;
    }

    fn play(&mut self) -> DublineResult<()> {
        if !self.metadata_loaded() {
            return Err(DublineError::media(format!(
                "{} cannot play before its metadata has loaded",
                self.label
            )));
        }
        if !self.playing {
            self.anchor_clock = self.now();
            self.playing = true;
        }
        Ok(())
    }

    fn pause(&mut self) {
        if self.playing {
            self.reanchor();
            self.playing = false;
        }
    }

    fn is_paused(&self) -> bool {
        !self.playing || self.is_ended()
    }

    fn is_ended(&self) -> bool {
        self.duration_secs.is_finite() && self.current_time() >= self.duration_secs
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn is_muted(&self) -> bool {
        self.muted
    }
}

impl std::fmt::Debug for VirtualMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualMedia")
            .field("label", &self.label)
            .field("duration_secs", &self.duration_secs)
            .field("position", &self.current_time())
            .field("rate", &self.rate)
            .field("playing", &self.playing)
            .field("muted", &self.muted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dubline_common::clock::ManualClock;

    fn media(duration: f64) -> (ManualClock, VirtualMedia) {
        let clock = ManualClock::new();
        let media = VirtualMedia::new("test", duration, Arc::new(clock.clone()));
        (clock, media)
    }

    #[test]
    fn test_position_follows_clock_and_rate() {
        let (clock, mut media) = media(100.0);
        media.play().unwrap();
        clock.advance(2.0);
        assert!((media.current_time() - 2.0).abs() < 1e-9);

        media.set_playback_rate(1.5);
        clock.advance(2.0);
        assert!((media.current_time() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_pause_freezes_and_seek_moves() {
        let (clock, mut media) = media(100.0);
        media.play().unwrap();
        clock.advance(3.0);
        media.pause();
        clock.advance(10.0);
        assert!((media.current_time() - 3.0).abs() < 1e-9);
        assert!(media.is_paused());

        media.seek(50.0);
        assert_eq!(media.current_time(), 50.0);
        media.seek(500.0);
        assert_eq!(media.current_time(), 100.0);
    }

    #[test]
    fn test_reaching_end_reports_ended_and_paused() {
        let (clock, mut media) = media(4.0);
        media.play().unwrap();
        clock.advance(5.0);
        assert_eq!(media.current_time(), 4.0);
        assert!(media.is_ended());
        assert!(media.is_paused());
    }

    #[test]
    fn test_metadata_gate() {
        let clock = ManualClock::new();
        let mut media = VirtualMedia::new("late", 10.0, Arc::new(clock.clone()))
            .with_metadata_ready_at(Some(1.0));
        assert!(!media.metadata_loaded());
        assert!(media.duration().is_nan());
        assert!(media.play().is_err());

        clock.set(1.0);
        assert!(media.metadata_loaded());
        assert_eq!(media.duration(), 10.0);
        assert!(media.play().is_ok());
    }

    #[test]
    fn test_invalid_rate_is_ignored() {
        let (_clock, mut media) = media(10.0);
        media.set_playback_rate(f64::NAN);
        media.set_playback_rate(0.0);
        assert_eq!(media.playback_rate(), 1.0);
    }
}
