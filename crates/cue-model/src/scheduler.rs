//! Active-cue resolution.
//!
//! Cues carry only a start time, so each one stays on screen for a fixed
//! display window. A cue is active on the half-open interval
//! `[start, start + window)` unless a later cue has already started.

use crate::cue::{Cue, CueTimeline};

/// Default on-screen duration of a cue.
pub const DEFAULT_DISPLAY_WINDOW_SECS: f64 = 5.0;

/// Resolves which cue is showing at a given time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CueScheduler {
    window_secs: f64,
}

impl Default for CueScheduler {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_DISPLAY_WINDOW_SECS,
        }
    }
}

impl CueScheduler {
    /// Create a scheduler with a custom display window.
    ///
    /// Non-finite or non-positive windows fall back to the default.
    pub fn with_window(window_secs: f64) -> Self {
        if window_secs.is_finite() && window_secs > 0.0 {
            Self { window_secs }
        } else {
            tracing::warn!(window_secs, "Invalid display window, using default");
            Self::default()
        }
    }

    pub fn window_secs(&self) -> f64 {
        self.window_secs
    }

    /// The cue with the greatest start time `<= t`, if `t` is still inside
    /// its display window. Among cues sharing that start time the first one
    /// parsed wins.
    pub fn active_cue_at<'a>(&self, timeline: &'a CueTimeline, t: f64) -> Option<&'a Cue> {
        self.active_index_at(timeline, t)
            .map(|index| &timeline.cues()[index])
    }

    /// Index form of [`CueScheduler::active_cue_at`].
    pub fn active_index_at(&self, timeline: &CueTimeline, t: f64) -> Option<usize> {
        if !t.is_finite() {
            return None;
        }

        let cues = timeline.cues();
        let after = cues.partition_point(|cue| cue.start_secs <= t);
        let latest_start = cues.get(after.checked_sub(1)?)?.start_secs;

        if t >= latest_start + self.window_secs {
            return None;
        }

        Some(cues.partition_point(|cue| cue.start_secs < latest_start))
    }

    /// Time at which the cue at `index` stops showing: the end of its window,
    /// or the next later start, whichever comes first.
    pub fn end_secs(&self, timeline: &CueTimeline, index: usize) -> Option<f64> {
        let cues = timeline.cues();
        let cue = cues.get(index)?;
        let window_end = cue.start_secs + self.window_secs;
        let next_start = cues[index + 1..]
            .iter()
            .map(|next| next.start_secs)
            .find(|start| *start > cue.start_secs);

        Some(next_start.map_or(window_end, |next| next.min(window_end)))
    }
}
