//! Export configuration and job management.
//!
//! [`ExportRecorder`] is a state machine stepped by `tick(now)`:
//!
//! ```text
//! Idle ──start──▶ Priming ──metadata + audio + canvas + recorder──▶ Recording
//!                    │                                                 │
//!                    └──timeout / setup error──▶ Failed ◀──recorder error┤
//!                                                                      ▼
//!                                   Complete ◀──stop recorder── Finalizing
//! ```
//!
//! The recorder owns the sync controller, audio graph and capture stream
//! for its whole lifetime, so nothing else can drive playback while an
//! export is running.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dubline_common::config::AppConfig;
use dubline_common::error::{DublineError, DublineResult};
use dubline_cue_model::cue::CueTimeline;
use dubline_cue_model::geometry::{AspectPreset, ExportGeometry};
use dubline_cue_model::scheduler::CueScheduler;
use dubline_cue_model::style::{CaptionOptions, CaptionStyle, Color, StyleLibrary};
use dubline_sync_engine::controller::{DriftCorrection, SyncController};
use dubline_sync_engine::media::MediaHandle;
use dubline_sync_engine::pcm::PcmBuffer;
use image::RgbaImage;
use serde::Serialize;

use crate::audio_graph::AudioGraph;
use crate::canvas::{Canvas, CanvasFactory};
use crate::compositor::{FrameComposition, FrameCompositor, RenderedFrame};
use crate::error::ExportError;
use crate::recorder::{container_extension, select_mime_type, CaptureConfig, MediaRecorder};
use crate::source::FrameSource;

/// Stages of the export process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportState {
    Idle,
    Priming,
    Recording,
    Finalizing,
    Complete,
    Failed,
}

impl ExportState {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportState::Idle => "idle",
            ExportState::Priming => "priming",
            ExportState::Recording => "recording",
            ExportState::Finalizing => "finalizing",
            ExportState::Complete => "complete",
            ExportState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExportState::Complete | ExportState::Failed)
    }
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable job status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExportJob {
    pub state: ExportState,

    /// Percent complete, `0..=100`, never decreasing.
    pub progress: f64,
}

/// How the export was asked for. Audio output can only be opened from a
/// user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportTrigger {
    UserAction,
    Automatic,
}

impl ExportTrigger {
    pub fn is_user_initiated(self) -> bool {
        matches!(self, ExportTrigger::UserAction)
    }
}

/// Export configuration.
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub aspect: AspectPreset,
    pub fps: u32,

    /// Recording types to try, most preferred first.
    pub mime_preferences: Vec<String>,

    /// Clock seconds to wait for both tracks' metadata.
    pub metadata_timeout_secs: f64,

    /// Recording stops this close to the primary's end.
    pub end_epsilon_secs: f64,

    pub background: Color,
    pub style: CaptionStyle,
    pub options: CaptionOptions,

    /// How long a cue stays on screen at most.
    pub display_window_secs: f64,

    /// Download name without extension.
    pub file_stem: String,

    /// Extension used unless `match_container` is set.
    pub file_extension: String,
    pub match_container: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        let config = AppConfig::default();
        Self::with_style(&config, CaptionStyle::classic())
    }
}

impl ExportSettings {
    /// Settings from the app config, with the caption style looked up by
    /// name in `styles`.
    pub fn from_config(config: &AppConfig, styles: &StyleLibrary) -> DublineResult<Self> {
        let mut settings = Self::with_style(config, CaptionStyle::classic());
        settings.aspect = config.export.aspect.parse()?;
        settings.background = config.export.background_color.parse()?;
        settings.style = match styles.get(&config.captions.style) {
            Some(style) => style.clone(),
            None => {
                tracing::warn!(
                    style = %config.captions.style,
                    "Unknown caption style, using Classic"
                );
                CaptionStyle::classic()
            }
        };
        Ok(settings)
    }

    fn with_style(config: &AppConfig, style: CaptionStyle) -> Self {
        Self {
            aspect: AspectPreset::default(),
            fps: config.export.fps.max(1),
            mime_preferences: config.export.mime_preferences.clone(),
            metadata_timeout_secs: config.export.metadata_timeout_secs,
            end_epsilon_secs: config.export.end_epsilon_secs,
            background: Color::BLACK,
            style,
            options: CaptionOptions::from_defaults(&config.captions),
            display_window_secs: config.captions.display_window_secs,
            file_stem: "dubline-export".to_string(),
            file_extension: config.export.file_extension.clone(),
            match_container: config.export.match_container,
        }
    }

    /// Download name for a recording of `mime_type`.
    pub fn file_name_for(&self, mime_type: &str) -> String {
        let container = container_extension(mime_type);
        let extension = if self.match_container {
            container
        } else {
            self.file_extension.trim_start_matches('.')
        };
        if extension != container {
            tracing::warn!(
                extension,
                container,
                mime_type,
                "Download extension does not match the recorded container"
            );
        }
        format!("{}.{}", self.file_stem, extension)
    }
}

/// The finished recording.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    /// All recorder chunks, concatenated.
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
    pub geometry: ExportGeometry,

    /// Primary time covered.
    pub duration_secs: f64,
    pub frames_captured: u64,
    pub frames_skipped: u64,

    /// Set when recording stopped before the primary reached its end.
    pub truncated: bool,
}

impl ExportArtifact {
    /// Write the artifact into `dir` under its file name.
    pub fn write_to(&self, dir: &Path) -> DublineResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.file_name);
        std::fs::write(&path, &self.bytes)?;
        tracing::info!(
            path = %path.display(),
            bytes = self.bytes.len(),
            truncated = self.truncated,
            "Wrote export"
        );
        Ok(path)
    }
}

/// What the driver should do after a tick.
#[derive(Debug, Clone)]
pub enum RenderCommand {
    /// Nothing captured yet; tick again.
    Wait,
    /// A frame was composited and recorded.
    Frame(FrameComposition),
    /// Compositing failed for this frame; it was left out.
    Skipped { time_secs: f64 },
    /// The export reached a terminal state.
    Stop,
}

/// Media and captions an export is made from.
pub struct ExportInputs<P, S> {
    pub sync: SyncController<P, S>,
    pub frames: Box<dyn FrameSource>,
    pub narration: Arc<PcmBuffer>,
    pub timeline: CueTimeline,
}

/// Drives compositing, narration routing and capture for one export.
pub struct ExportRecorder<P, S, R> {
    sync: SyncController<P, S>,
    frames: Box<dyn FrameSource>,
    narration: Arc<PcmBuffer>,
    timeline: CueTimeline,
    scheduler: CueScheduler,
    compositor: FrameCompositor,
    recorder: R,
    make_canvas: CanvasFactory,
    settings: ExportSettings,
    job: ExportJob,

    trigger: ExportTrigger,
    priming_started: f64,
    recording_started: f64,
    canvas: Option<Box<dyn Canvas>>,
    audio: Option<AudioGraph>,
    capture: Option<CaptureConfig>,
    recorder_started: bool,
    playback_started: bool,
    frame_index: u64,
    frames_captured: u64,
    frames_skipped: u64,
    last_error: Option<ExportError>,
    outcome: Option<Result<ExportArtifact, ExportError>>,
}

impl<P, S, R> ExportRecorder<P, S, R>
where
    P: MediaHandle,
    S: MediaHandle,
    R: MediaRecorder,
{
    pub fn new(
        inputs: ExportInputs<P, S>,
        recorder: R,
        make_canvas: CanvasFactory,
        settings: ExportSettings,
    ) -> Self {
        Self {
            sync: inputs.sync,
            frames: inputs.frames,
            narration: inputs.narration,
            timeline: inputs.timeline,
            scheduler: CueScheduler::with_window(settings.display_window_secs),
            compositor: FrameCompositor::new(settings.background),
            recorder,
            make_canvas,
            settings,
            job: ExportJob {
                state: ExportState::Idle,
                progress: 0.0,
            },
            trigger: ExportTrigger::Automatic,
            priming_started: 0.0,
            recording_started: 0.0,
            canvas: None,
            audio: None,
            capture: None,
            recorder_started: false,
            playback_started: false,
            frame_index: 0,
            frames_captured: 0,
            frames_skipped: 0,
            last_error: None,
            outcome: None,
        }
    }

    pub fn job(&self) -> ExportJob {
        self.job
    }

    pub fn state(&self) -> ExportState {
        self.job.state
    }

    pub fn progress(&self) -> f64 {
        self.job.progress
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    /// Read-only view of playback.
    pub fn sync(&self) -> &SyncController<P, S> {
        &self.sync
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }

    /// Negotiated capture parameters, once recording has started.
    pub fn capture_config(&self) -> Option<&CaptureConfig> {
        self.capture.as_ref()
    }

    pub fn last_error(&self) -> Option<&ExportError> {
        self.last_error.as_ref()
    }

    /// The result, once the job is terminal. Taken at most once.
    pub fn take_outcome(&mut self) -> Option<Result<ExportArtifact, ExportError>> {
        self.outcome.take()
    }

    /// Release the owned media and recorder.
    pub fn into_parts(self) -> (SyncController<P, S>, R) {
        (self.sync, self.recorder)
    }

    /// Begin priming. Only valid from `Idle`.
    pub fn start(&mut self, now: f64, trigger: ExportTrigger) -> Result<(), ExportError> {
        if self.job.state != ExportState::Idle {
            return Err(ExportError::InvalidState {
                state: self.job.state,
                action: "start",
            });
        }

        self.trigger = trigger;
        self.priming_started = now;
        self.job = ExportJob {
            state: ExportState::Priming,
            progress: 0.0,
        };
        tracing::info!(
            aspect = %self.settings.aspect,
            fps = self.settings.fps,
            cues = self.timeline.len(),
            user_initiated = trigger.is_user_initiated(),
            "Export priming"
        );
        Ok(())
    }

    /// Return a failed job to `Idle` so it can be started again. Only
    /// recoverable failures can be retried.
    pub fn retry(&mut self) -> Result<(), ExportError> {
        let recoverable = self
            .last_error
            .as_ref()
            .is_some_and(ExportError::is_recoverable);
        if self.job.state != ExportState::Failed || !recoverable {
            return Err(ExportError::InvalidState {
                state: self.job.state,
                action: "retry",
            });
        }

        self.job = ExportJob {
            state: ExportState::Idle,
            progress: 0.0,
        };
        self.canvas = None;
        self.audio = None;
        self.capture = None;
        self.frame_index = 0;
        self.frames_captured = 0;
        self.frames_skipped = 0;
        self.last_error = None;
        self.outcome = None;
        tracing::info!("Export reset for retry");
        Ok(())
    }

    /// Seek the primary mid-export; the narration follows per the drift
    /// threshold.
    pub fn seek(&mut self, secs: f64) -> DriftCorrection {
        self.sync.seek(secs)
    }

    /// Stop the export. While recording, whatever was captured is
    /// finalized into a truncated artifact; before that the job fails.
    pub fn cancel(&mut self, now: f64) {
        match self.job.state {
            ExportState::Recording => {
                tracing::info!(frames = self.frames_captured, "Export cancelled; finalizing");
                self.finish(now, false);
            }
            ExportState::Idle | ExportState::Priming => self.fail(ExportError::Cancelled),
            _ => {}
        }
    }

    /// Advance the export to clock time `now`.
    pub fn tick(&mut self, now: f64) -> RenderCommand {
        match self.job.state {
            ExportState::Priming => self.tick_priming(now),
            ExportState::Recording => self.tick_recording(now),
            ExportState::Idle
            | ExportState::Finalizing
            | ExportState::Complete
            | ExportState::Failed => RenderCommand::Stop,
        }
    }

    fn tick_priming(&mut self, now: f64) -> RenderCommand {
        let primary_ready = self.sync.primary().metadata_loaded();
        let secondary_ready = self.sync.secondary().metadata_loaded();

        if !(primary_ready && secondary_ready) {
            let waited_secs = now - self.priming_started;
            if waited_secs >= self.settings.metadata_timeout_secs {
                self.fail(ExportError::MetadataLoadTimeout {
                    waited_secs,
                    primary_ready,
                    secondary_ready,
                });
                return RenderCommand::Stop;
            }
            return RenderCommand::Wait;
        }

        match self.begin_recording(now) {
            Ok(()) => self.tick_recording(now),
            Err(e) => {
                self.fail(e);
                RenderCommand::Stop
            }
        }
    }

    fn begin_recording(&mut self, now: f64) -> Result<(), ExportError> {
        let mut audio = AudioGraph::connect(self.narration.clone(), self.trigger.is_user_initiated())?;

        let (source_width, source_height) = self.frames.dimensions();
        let geometry = self.settings.aspect.geometry(source_width, source_height);
        let canvas = (self.make_canvas)(geometry).map_err(|e| ExportError::Canvas {
            message: e.to_string(),
        })?;

        let mime_type = select_mime_type(&self.recorder, &self.settings.mime_preferences)
            .ok_or_else(|| ExportError::UnsupportedRecordingFormat {
                tried: self.settings.mime_preferences.clone(),
            })?;

        let capture = CaptureConfig {
            mime_type,
            geometry,
            fps: self.settings.fps,
            audio: audio.format(),
        };
        self.recorder.start(&capture)?;
        self.recorder_started = true;

        self.sync.primary_mut().seek(0.0);
        self.sync.secondary_mut().seek(0.0);
        self.sync.play().map_err(|e| ExportError::Playback {
            message: e.to_string(),
        })?;
        self.playback_started = true;

        audio.reset();
        audio.pull(now, self.sync.secondary());

        tracing::info!(
            recorder = self.recorder.name(),
            mime_type = %capture.mime_type,
            width = geometry.width,
            height = geometry.height,
            rate = self.sync.rate(),
            degraded = self.sync.is_degraded(),
            "Export recording"
        );

        self.recording_started = now;
        self.canvas = Some(canvas);
        self.audio = Some(audio);
        self.capture = Some(capture);
        self.job.state = ExportState::Recording;
        Ok(())
    }

    fn tick_recording(&mut self, now: f64) -> RenderCommand {
        let primary = self.sync.primary();
        let t = primary.current_time();
        let duration = primary.duration();

        let reached_end = primary.is_ended()
            || (duration.is_finite() && t >= duration - self.settings.end_epsilon_secs);
        if reached_end || primary.is_paused() {
            if !reached_end {
                tracing::warn!(time_secs = t, "Primary paused before its end; finalizing");
            }
            self.finish(now, reached_end);
            return RenderCommand::Stop;
        }

        let cue_index = self.scheduler.active_index_at(&self.timeline, t);
        let composed = self.compose(t, cue_index);

        let rendered = match composed {
            Ok((rendered, snapshot)) => {
                let capture_secs = now - self.recording_started;
                if let Err(e) = self.recorder.push_video_frame(&snapshot, capture_secs) {
                    self.fail(e.into());
                    return RenderCommand::Stop;
                }
                self.frames_captured += 1;
                Some(rendered)
            }
            Err(e) => {
                tracing::warn!(
                    frame = self.frame_index,
                    time_secs = t,
                    error = %e,
                    "Skipping frame: compositing failed"
                );
                self.frames_skipped += 1;
                None
            }
        };

        if let Some(audio) = self.audio.as_mut() {
            let samples = audio.pull(now, self.sync.secondary());
            if let Err(e) = self.recorder.push_audio(&samples) {
                self.fail(e.into());
                return RenderCommand::Stop;
            }
        }

        if duration.is_finite() && duration > 0.0 {
            let progress = (t / duration * 100.0).clamp(0.0, 100.0);
            self.job.progress = self.job.progress.max(progress);
        }

        let frame_index = self.frame_index;
        self.frame_index += 1;

        match rendered {
            Some(rendered) => RenderCommand::Frame(FrameComposition {
                frame_index,
                time_secs: t,
                crop: rendered.crop,
                cue_index,
                caption: rendered.caption,
                progress: self.job.progress,
            }),
            None => RenderCommand::Skipped { time_secs: t },
        }
    }

    fn compose(&mut self, t: f64, cue_index: Option<usize>) -> DublineResult<(RenderedFrame, RgbaImage)> {
        let canvas = self
            .canvas
            .as_mut()
            .ok_or_else(|| DublineError::render("Export canvas is missing"))?;
        let cue = cue_index.and_then(|i| self.timeline.cues().get(i));
        let source = self.frames.frame_at(t)?;
        let rendered = self.compositor.render_frame(
            canvas.as_mut(),
            source,
            cue,
            &self.settings.style,
            &self.settings.options,
        )?;
        Ok((rendered, canvas.snapshot()))
    }

    /// Stop capture and turn what was recorded into the artifact.
    fn finish(&mut self, now: f64, reached_end: bool) {
        self.job.state = ExportState::Finalizing;

        if let Some(audio) = self.audio.as_mut() {
            let samples = audio.pull(now, self.sync.secondary());
            if let Err(e) = self.recorder.push_audio(&samples) {
                tracing::warn!(error = %e, "Dropping final audio");
            }
        }

        self.sync.pause();
        self.playback_started = false;
        let duration_secs = self.sync.primary().current_time();

        self.recorder_started = false;
        let chunks = match self.recorder.stop() {
            Ok(chunks) => chunks,
            Err(e) => {
                self.fail(e.into());
                return;
            }
        };

        let mime_type = self
            .capture
            .as_ref()
            .map(|c| c.mime_type.clone())
            .unwrap_or_default();
        let geometry = self
            .capture
            .as_ref()
            .map(|c| c.geometry)
            .unwrap_or_else(|| ExportGeometry::new(1, 1));

        if reached_end {
            self.job.progress = 100.0;
        }

        let artifact = ExportArtifact {
            bytes: chunks.concat(),
            file_name: self.settings.file_name_for(&mime_type),
            mime_type,
            geometry,
            duration_secs,
            frames_captured: self.frames_captured,
            frames_skipped: self.frames_skipped,
            truncated: !reached_end,
        };

        tracing::info!(
            file_name = %artifact.file_name,
            bytes = artifact.bytes.len(),
            frames = artifact.frames_captured,
            skipped = artifact.frames_skipped,
            truncated = artifact.truncated,
            "Export complete"
        );

        self.canvas = None;
        self.audio = None;
        self.job.state = ExportState::Complete;
        self.outcome = Some(Ok(artifact));
    }

    fn fail(&mut self, error: ExportError) {
        if self.recorder_started {
            self.recorder.abort();
            self.recorder_started = false;
        }
        if self.playback_started {
            self.sync.pause();
            self.playback_started = false;
        }

        tracing::error!(
            error = %error,
            recoverable = error.is_recoverable(),
            "Export failed"
        );

        self.canvas = None;
        self.audio = None;
        self.job.state = ExportState::Failed;
        self.last_error = Some(error.clone());
        self.outcome = Some(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_policy() {
        let mut settings = ExportSettings::default();
        assert_eq!(settings.file_name_for("video/webm;codecs=vp9,opus"), "dubline-export.mp4");

        settings.match_container = true;
        assert_eq!(settings.file_name_for("video/webm;codecs=vp9,opus"), "dubline-export.webm");
        assert_eq!(settings.file_name_for("video/mp4"), "dubline-export.mp4");
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = AppConfig::default();
        config.export.aspect = "square".to_string();
        config.export.background_color = "#112233".to_string();
        config.captions.style = "black box".to_string();

        let settings = ExportSettings::from_config(&config, &StyleLibrary::default()).unwrap();
        assert_eq!(settings.aspect, AspectPreset::Square);
        assert_eq!(settings.background, Color::rgb(0x11, 0x22, 0x33));
        assert_eq!(settings.style.name, "Black Box");

        config.export.aspect = "4:3".to_string();
        assert!(ExportSettings::from_config(&config, &StyleLibrary::default()).is_err());
    }

    #[test]
    fn test_unknown_style_falls_back_to_classic() {
        let mut config = AppConfig::default();
        config.captions.style = "Comic Sans Fiesta".to_string();
        let settings = ExportSettings::from_config(&config, &StyleLibrary::default()).unwrap();
        assert_eq!(settings.style.name, "Classic");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ExportState::Recording.to_string(), "recording");
        assert!(ExportState::Failed.is_terminal());
        assert!(!ExportState::Priming.is_terminal());
    }
}
