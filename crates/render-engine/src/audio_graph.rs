//! Routes the narration into the recording.
//!
//! Each pull renders the stretch of narration the secondary track played
//! since the previous pull, resampled to the wall-clock time that elapsed.
//! That makes the recorded audio follow the secondary's playback rate the
//! same way a speaker would hear it.

use std::sync::Arc;

use dubline_sync_engine::media::MediaHandle;
use dubline_sync_engine::pcm::PcmBuffer;

use crate::error::ExportError;
use crate::recorder::AudioFormat;

/// Jumps wider than this many seconds of media per second of clock are
/// treated as seeks rather than playback.
const MAX_PLAUSIBLE_RATE: f64 = 8.0;

/// Audio source feeding the recorder.
#[derive(Debug, Clone)]
pub struct AudioGraph {
    narration: Arc<PcmBuffer>,
    last_clock: Option<f64>,
    last_position: Option<f64>,
    carry: f64,
    frames_routed: u64,
}

impl AudioGraph {
    /// Connect the narration. Audio output may only be opened from an
    /// explicit user action, and only for audio that can actually play.
    pub fn connect(narration: Arc<PcmBuffer>, user_initiated: bool) -> Result<Self, ExportError> {
        if !user_initiated {
            return Err(ExportError::AudioGraphCreation {
                message: "audio output must be started by a user action".to_string(),
            });
        }
        if !narration.is_playable() {
            return Err(ExportError::NarrationUnplayable {
                message: format!(
                    "narration is not playable ({} Hz, {} channels, {} samples)",
                    narration.sample_rate,
                    narration.channels,
                    narration.samples.len()
                ),
            });
        }

        tracing::debug!(
            sample_rate = narration.sample_rate,
            channels = narration.channels,
            duration_secs = narration.duration_secs(),
            "Audio graph connected"
        );
        Ok(Self {
            narration,
            last_clock: None,
            last_position: None,
            carry: 0.0,
            frames_routed: 0,
        })
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.narration.sample_rate,
            channels: self.narration.channels,
        }
    }

    /// Frames emitted so far.
    pub fn frames_routed(&self) -> u64 {
        self.frames_routed
    }

    /// Forget the previous pull; the next pull only sets the anchor.
    pub fn reset(&mut self) {
        self.last_clock = None;
        self.last_position = None;
        self.carry = 0.0;
    }

    /// Interleaved samples for the clock time elapsed since the last pull.
    pub fn pull<S: MediaHandle>(&mut self, now: f64, secondary: &S) -> Vec<f32> {
        let position = secondary.current_time();
        let previous = self.last_clock.zip(self.last_position);
        self.last_clock = Some(now);
        self.last_position = Some(position);

        let Some((last_clock, last_position)) = previous else {
            return Vec::new();
        };
        let elapsed = now - last_clock;
        if !(elapsed > 0.0) {
            return Vec::new();
        }

        let exact = elapsed * self.narration.sample_rate as f64 + self.carry;
        let frames = exact.floor();
        self.carry = exact - frames;
        let frames = frames as usize;
        self.frames_routed += frames as u64;

        if secondary.is_paused() && !secondary.is_ended() {
            return vec![0.0; frames * self.narration.channels as usize];
        }

        let span = position - last_position;
        let (start, end) = if span < 0.0 || span > elapsed * MAX_PLAUSIBLE_RATE {
            let rate = secondary.playback_rate();
            tracing::debug!(from = last_position, to = position, "Narration jumped; re-anchoring audio");
            ((position - elapsed * rate).max(0.0), position)
        } else {
            (last_position, position)
        };

        self.narration.render_span(start, end, frames)
    }
}
