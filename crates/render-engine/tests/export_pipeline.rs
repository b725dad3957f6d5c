use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dubline_common::clock::{ManualClock, PlaybackClock};
use dubline_common::error::DublineResult;
use dubline_cue_model::cue::CueTimeline;
use dubline_cue_model::geometry::{AspectPreset, CropRect, ExportGeometry};
use dubline_cue_model::style::Color;
use dubline_render_engine::{
    run_offline, run_realtime, CaptureConfig, Canvas, CanvasFactory, ExportError, ExportInputs,
    ExportProgress, ExportRecorder, ExportSettings, ExportState, ExportTrigger, FontBook, FontSpec,
    MediaRecorder, MemoryRecorder, RasterCanvas, Rect, RecorderError, RenderCommand, Shadow,
    StillImageSource, TextAnchor,
};
use dubline_sync_engine::controller::SyncController;
use dubline_sync_engine::media::{MediaHandle, VirtualMedia};
use dubline_sync_engine::pcm::PcmBuffer;
use image::{Rgba, RgbaImage};

/// Canvas that keeps pixels flat and remembers every caption it filled.
struct StubCanvas {
    image: RgbaImage,
    texts: Rc<RefCell<Vec<String>>>,
}

impl Canvas for StubCanvas {
    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn fill(&mut self, color: Color) {
        for pixel in self.image.pixels_mut() {
            *pixel = Rgba(color.to_array());
        }
    }

    fn draw_image(&mut self, _frame: &RgbaImage, _crop: CropRect) {}

    fn set_shadow(&mut self, _shadow: Option<Shadow>) {}

    fn measure_text(&mut self, text: &str, _font: &FontSpec) -> DublineResult<f32> {
        Ok(text.chars().count() as f32 * 10.0)
    }

    fn fill_rounded_rect(&mut self, _rect: Rect, _radius: f32, _color: Color) {}

    fn stroke_text(
        &mut self,
        _text: &str,
        _anchor: TextAnchor,
        _font: &FontSpec,
        _color: Color,
        _width: f32,
    ) -> DublineResult<()> {
        Ok(())
    }

    fn fill_text(
        &mut self,
        text: &str,
        _anchor: TextAnchor,
        _font: &FontSpec,
        _color: Color,
    ) -> DublineResult<()> {
        self.texts.borrow_mut().push(text.to_string());
        Ok(())
    }

    fn snapshot(&self) -> RgbaImage {
        self.image.clone()
    }
}

/// Memory recorder that breaks at a chosen point.
struct FailingRecorder {
    inner: MemoryRecorder,
    fail_after_frames: Option<u64>,
    fail_on_stop: bool,
    frames: u64,
}

impl FailingRecorder {
    fn after_frames(frames: u64) -> Self {
        Self {
            inner: MemoryRecorder::default(),
            fail_after_frames: Some(frames),
            fail_on_stop: false,
            frames: 0,
        }
    }

    fn on_stop() -> Self {
        Self {
            inner: MemoryRecorder::default(),
            fail_after_frames: None,
            fail_on_stop: true,
            frames: 0,
        }
    }
}

impl MediaRecorder for FailingRecorder {
    fn name(&self) -> &str {
        "failing"
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.inner.is_type_supported(mime_type)
    }

    fn start(&mut self, config: &CaptureConfig) -> Result<(), RecorderError> {
        self.inner.start(config)
    }

    fn push_video_frame(&mut self, frame: &RgbaImage, capture_secs: f64) -> Result<(), RecorderError> {
        if self.fail_after_frames.is_some_and(|limit| self.frames >= limit) {
            return Err(RecorderError::new("failing", "disk full"));
        }
        self.frames += 1;
        self.inner.push_video_frame(frame, capture_secs)
    }

    fn push_audio(&mut self, samples: &[f32]) -> Result<(), RecorderError> {
        self.inner.push_audio(samples)
    }

    fn stop(&mut self) -> Result<Vec<Vec<u8>>, RecorderError> {
        if self.fail_on_stop {
            return Err(RecorderError::new("failing", "could not finalize"));
        }
        self.inner.stop()
    }

    fn abort(&mut self) {
        self.inner.abort();
    }
}

fn stub_factory(texts: Rc<RefCell<Vec<String>>>) -> CanvasFactory {
    Box::new(move |geometry: ExportGeometry| {
        Ok(Box::new(StubCanvas {
            image: RgbaImage::new(geometry.width, geometry.height),
            texts: texts.clone(),
        }) as Box<dyn Canvas>)
    })
}

fn settings() -> ExportSettings {
    ExportSettings {
        aspect: AspectPreset::Original,
        fps: 4,
        metadata_timeout_secs: 1.0,
        ..ExportSettings::default()
    }
}

/// 100 Hz mono narration of constant level.
fn narration(secs: f64) -> Arc<PcmBuffer> {
    Arc::new(PcmBuffer::new(100, 1, vec![0.25; (secs * 100.0) as usize]))
}

struct Setup {
    video_secs: f64,
    narration_secs: f64,
    video_ready: Option<f64>,
    silent_narration: bool,
    captions: &'static str,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            video_secs: 2.0,
            narration_secs: 4.0,
            video_ready: Some(0.0),
            silent_narration: false,
            captions: "[0:00] Hello\n[0:01] World",
        }
    }
}

impl Setup {
    fn build<R: MediaRecorder>(
        self,
        clock: &ManualClock,
        recorder: R,
        make_canvas: CanvasFactory,
        settings: ExportSettings,
    ) -> ExportRecorder<VirtualMedia, VirtualMedia, R> {
        let video = VirtualMedia::new("video", self.video_secs, Arc::new(clock.clone()))
            .with_metadata_ready_at(self.video_ready);
        let voice = VirtualMedia::new("narration", self.narration_secs, Arc::new(clock.clone()));
        let inputs = ExportInputs {
            sync: SyncController::new(video, voice),
            frames: Box::new(StillImageSource::new(RgbaImage::from_pixel(
                16,
                8,
                Rgba([200, 10, 10, 255]),
            ))),
            narration: if self.silent_narration {
                Arc::new(PcmBuffer::default())
            } else {
                narration(self.narration_secs)
            },
            timeline: CueTimeline::parse(self.captions),
        };
        ExportRecorder::new(inputs, recorder, make_canvas, settings)
    }
}

fn collect_progress() -> (Arc<Mutex<Vec<ExportProgress>>>, Option<Box<dyn FnMut(ExportProgress) + Send>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: Box<dyn FnMut(ExportProgress) + Send> = Box::new(move |p| {
        sink.lock().unwrap().push(p);
    });
    (seen, Some(callback))
}

#[test]
fn offline_export_records_every_frame_with_rate_matched_narration() {
    let clock = ManualClock::new();
    let texts = Rc::new(RefCell::new(Vec::new()));
    let mut export = Setup::default().build(
        &clock,
        MemoryRecorder::default(),
        stub_factory(texts.clone()),
        settings(),
    );
    let (seen, progress) = collect_progress();

    let artifact = run_offline(&mut export, &clock, ExportTrigger::UserAction, progress).unwrap();

    assert_eq!(export.state(), ExportState::Complete);
    assert_eq!(export.progress(), 100.0);
    assert!(!artifact.truncated);
    assert_eq!(artifact.frames_captured, 8);
    assert_eq!(artifact.frames_skipped, 0);
    assert_eq!(artifact.mime_type, "video/webm;codecs=vp9,opus");
    assert_eq!(artifact.file_name, "dubline-export.mp4");
    assert_eq!(artifact.geometry, ExportGeometry::new(16, 8));

    // Narration twice as long as the video plays at 2x.
    assert_eq!(export.sync().rate(), 2.0);
    assert_eq!(export.recorder().audio_samples(), 200);

    let timestamps = export.recorder().frame_timestamps();
    assert_eq!(timestamps, &[0.0, 0.25, 0.5, 0.75, 1.0, 1.25, 1.5, 1.75]);

    let texts = texts.borrow();
    assert_eq!(texts.iter().filter(|t| *t == "Hello").count(), 4);
    assert_eq!(texts.iter().filter(|t| *t == "World").count(), 4);

    let seen = seen.lock().unwrap();
    assert!(seen.windows(2).all(|w| w[0].progress <= w[1].progress));
    assert_eq!(seen.last().map(|p| p.progress), Some(100.0));

    // Playback is released with the source audible again.
    assert!(export.sync().primary().is_paused());
    assert!(!export.sync().primary().is_muted());
    assert!(export.sync().secondary().is_paused());
}

#[test]
fn artifact_bytes_are_the_recorded_chunks() {
    let clock = ManualClock::new();
    let mut export = Setup {
        captions: "",
        ..Setup::default()
    }
    .build(
        &clock,
        MemoryRecorder::default(),
        stub_factory(Rc::default()),
        settings(),
    );

    let artifact = run_offline(&mut export, &clock, ExportTrigger::UserAction, None).unwrap();

    let frame_bytes = 16 * 8 * 4 * 8;
    let audio_bytes = 200 * 4;
    assert_eq!(artifact.bytes.len(), frame_bytes + audio_bytes);
}

#[test]
fn no_supported_format_fails_without_retry() {
    let clock = ManualClock::new();
    let prefs = settings().mime_preferences;
    let mut export = Setup::default().build(
        &clock,
        MemoryRecorder::new(["video/quicktime"]),
        stub_factory(Rc::default()),
        settings(),
    );

    let err = run_offline(&mut export, &clock, ExportTrigger::UserAction, None).unwrap_err();

    assert_eq!(err, ExportError::UnsupportedRecordingFormat { tried: prefs });
    assert_eq!(export.state(), ExportState::Failed);
    assert!(!err.is_recoverable());
    assert!(export.retry().is_err());
    assert!(!export.sync().primary().is_muted());
}

#[test]
fn missing_metadata_times_out_and_can_be_retried() {
    let clock = ManualClock::new();
    let mut export = Setup {
        video_ready: None,
        ..Setup::default()
    }
    .build(
        &clock,
        MemoryRecorder::default(),
        stub_factory(Rc::default()),
        settings(),
    );

    let err = run_offline(&mut export, &clock, ExportTrigger::UserAction, None).unwrap_err();

    match err {
        ExportError::MetadataLoadTimeout {
            waited_secs,
            primary_ready,
            secondary_ready,
        } => {
            assert!(waited_secs >= 1.0);
            assert!(!primary_ready);
            assert!(secondary_ready);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(export.recorder().config().is_none());
    assert!(export.retry().is_ok());
    assert_eq!(export.state(), ExportState::Idle);
}

#[test]
fn automatic_trigger_cannot_open_audio_until_user_retries() {
    let clock = ManualClock::new();
    let mut export = Setup::default().build(
        &clock,
        MemoryRecorder::default(),
        stub_factory(Rc::default()),
        settings(),
    );

    let err = run_offline(&mut export, &clock, ExportTrigger::Automatic, None).unwrap_err();
    assert!(matches!(err, ExportError::AudioGraphCreation { .. }));
    assert!(err.is_recoverable());
    assert!(export.recorder().config().is_none());

    export.retry().unwrap();
    let artifact = run_offline(&mut export, &clock, ExportTrigger::UserAction, None).unwrap();
    assert!(!artifact.truncated);
    assert_eq!(export.progress(), 100.0);
}

#[test]
fn unplayable_narration_fails_without_retry() {
    let clock = ManualClock::new();
    let mut export = Setup {
        silent_narration: true,
        ..Setup::default()
    }
    .build(
        &clock,
        MemoryRecorder::default(),
        stub_factory(Rc::default()),
        settings(),
    );

    let err = run_offline(&mut export, &clock, ExportTrigger::UserAction, None).unwrap_err();

    assert!(matches!(err, ExportError::NarrationUnplayable { .. }));
    assert!(!err.is_recoverable());
    assert!(err.user_message().contains("narration"));
    assert!(export.retry().is_err());
    assert!(export.recorder().config().is_none());
    assert!(!export.sync().primary().is_muted());
}

#[test]
fn recorder_failure_while_recording_releases_playback() {
    let clock = ManualClock::new();
    let mut export = Setup::default().build(
        &clock,
        FailingRecorder::after_frames(2),
        stub_factory(Rc::default()),
        settings(),
    );

    let err = run_offline(&mut export, &clock, ExportTrigger::UserAction, None).unwrap_err();

    assert_eq!(err, ExportError::Recorder(RecorderError::new("failing", "disk full")));
    assert!(!err.is_recoverable());
    assert_eq!(export.state(), ExportState::Failed);
    assert_eq!(export.last_error(), Some(&err));
    assert_eq!(export.frames_captured(), 2);
    assert!(export.sync().primary().is_paused());
    assert!(!export.sync().primary().is_muted());
    assert!(export.sync().secondary().is_paused());
    assert!(matches!(export.tick(clock.now_secs()), RenderCommand::Stop));
}

#[test]
fn recorder_failure_while_finalizing_releases_playback() {
    let clock = ManualClock::new();
    let mut export = Setup::default().build(
        &clock,
        FailingRecorder::on_stop(),
        stub_factory(Rc::default()),
        settings(),
    );

    let err = run_offline(&mut export, &clock, ExportTrigger::UserAction, None).unwrap_err();

    assert!(matches!(err, ExportError::Recorder(_)));
    assert_eq!(export.state(), ExportState::Failed);
    assert_eq!(export.frames_captured(), 8);
    assert!(export.sync().primary().is_paused());
    assert!(!export.sync().primary().is_muted());
    assert!(export.sync().secondary().is_paused());
}

#[test]
fn frames_with_undrawable_captions_are_skipped() {
    let clock = ManualClock::new();
    let mut export = Setup {
        captions: "[0:01] Too late for fonts",
        ..Setup::default()
    }
    .build(
        &clock,
        MemoryRecorder::default(),
        RasterCanvas::factory(Arc::new(FontBook::empty())),
        settings(),
    );

    let artifact = run_offline(&mut export, &clock, ExportTrigger::UserAction, None).unwrap();

    assert_eq!(artifact.frames_captured, 4);
    assert_eq!(artifact.frames_skipped, 4);
    assert_eq!(export.recorder().frame_timestamps(), &[0.0, 0.25, 0.5, 0.75]);
    // Audio keeps flowing through skipped frames.
    assert_eq!(export.recorder().audio_samples(), 200);
    assert_eq!(export.progress(), 100.0);
}

#[test]
fn cancel_while_recording_keeps_what_was_captured() {
    let clock = ManualClock::new();
    let mut export = Setup::default().build(
        &clock,
        MemoryRecorder::default(),
        stub_factory(Rc::default()),
        settings(),
    );

    export.start(0.0, ExportTrigger::UserAction).unwrap();
    for _ in 0..3 {
        assert!(matches!(export.tick(clock.now_secs()), RenderCommand::Frame(_)));
        clock.advance(0.25);
    }
    export.cancel(clock.now_secs());

    assert_eq!(export.state(), ExportState::Complete);
    let artifact = export.take_outcome().unwrap().unwrap();
    assert!(artifact.truncated);
    assert_eq!(artifact.frames_captured, 3);
    assert_eq!(artifact.duration_secs, 0.75);
    assert_eq!(export.progress(), 25.0);
    assert!(matches!(export.tick(clock.now_secs()), RenderCommand::Stop));
}

#[test]
fn cancel_while_priming_fails_the_job() {
    let clock = ManualClock::new();
    let mut export = Setup {
        video_ready: Some(5.0),
        ..Setup::default()
    }
    .build(
        &clock,
        MemoryRecorder::default(),
        stub_factory(Rc::default()),
        settings(),
    );

    export.start(0.0, ExportTrigger::UserAction).unwrap();
    assert!(matches!(export.tick(0.0), RenderCommand::Wait));
    export.cancel(0.0);

    assert_eq!(export.state(), ExportState::Failed);
    assert_eq!(export.take_outcome(), Some(Err(ExportError::Cancelled)));
    assert!(export.take_outcome().is_none());
}

#[test]
fn only_one_start_per_job() {
    let clock = ManualClock::new();
    let mut export = Setup::default().build(
        &clock,
        MemoryRecorder::default(),
        stub_factory(Rc::default()),
        settings(),
    );

    export.start(0.0, ExportTrigger::UserAction).unwrap();
    assert_eq!(
        export.start(0.0, ExportTrigger::UserAction),
        Err(ExportError::InvalidState {
            state: ExportState::Priming,
            action: "start",
        })
    );
}

#[test]
fn progress_never_moves_backwards_across_seeks() {
    let clock = ManualClock::new();
    let mut export = Setup::default().build(
        &clock,
        MemoryRecorder::default(),
        stub_factory(Rc::default()),
        settings(),
    );

    export.start(0.0, ExportTrigger::UserAction).unwrap();
    export.tick(0.0);
    clock.set(0.5);

    export.seek(1.5);
    export.tick(0.5);
    assert_eq!(export.progress(), 75.0);

    export.seek(0.5);
    match export.tick(0.5) {
        RenderCommand::Frame(frame) => {
            assert_eq!(frame.time_secs, 0.5);
            assert_eq!(frame.cue_index, Some(0));
            assert_eq!(frame.progress, 75.0);
        }
        other => panic!("expected a frame, got {other:?}"),
    }
    // The narration followed the seek proportionally.
    assert_eq!(export.sync().secondary().current_time(), 1.0);
}

#[test]
fn seek_shows_on_the_very_next_frame() {
    let clock = ManualClock::new();
    let texts = Rc::new(RefCell::new(Vec::new()));
    let mut export = Setup::default().build(
        &clock,
        MemoryRecorder::default(),
        stub_factory(texts.clone()),
        settings(),
    );

    export.start(0.0, ExportTrigger::UserAction).unwrap();
    match export.tick(0.0) {
        RenderCommand::Frame(frame) => assert_eq!(frame.cue_index, Some(0)),
        other => panic!("expected a frame, got {other:?}"),
    }
    assert_eq!(texts.borrow().last().map(String::as_str), Some("Hello"));

    // Forward into the second cue.
    clock.advance(0.25);
    export.seek(1.5);
    match export.tick(clock.now_secs()) {
        RenderCommand::Frame(frame) => {
            assert_eq!(frame.time_secs, 1.5);
            assert_eq!(frame.cue_index, Some(1));
        }
        other => panic!("expected a frame, got {other:?}"),
    }
    assert_eq!(texts.borrow().last().map(String::as_str), Some("World"));

    // Back into the first.
    clock.advance(0.25);
    export.seek(0.25);
    match export.tick(clock.now_secs()) {
        RenderCommand::Frame(frame) => {
            assert_eq!(frame.time_secs, 0.25);
            assert_eq!(frame.cue_index, Some(0));
        }
        other => panic!("expected a frame, got {other:?}"),
    }
    assert_eq!(texts.borrow().last().map(String::as_str), Some("Hello"));

    // The recorder sees one frame per tick on the capture clock.
    assert_eq!(export.recorder().frame_timestamps(), &[0.0, 0.25, 0.5]);
}

#[tokio::test]
async fn realtime_driver_runs_to_completion() {
    let clock = ManualClock::new();
    let mut export = Setup {
        video_secs: 0.5,
        narration_secs: 0.5,
        ..Setup::default()
    }
    .build(
        &clock,
        MemoryRecorder::default(),
        stub_factory(Rc::default()),
        ExportSettings {
            fps: 20,
            ..settings()
        },
    );

    let ticking = clock.clone();
    let advance = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(25)).await;
            ticking.advance(0.05);
        }
    });

    let result = run_realtime(&mut export, &clock, ExportTrigger::UserAction, None).await;
    advance.abort();

    let artifact = result.unwrap();
    assert!(!artifact.truncated);
    assert!(artifact.frames_captured > 0);
    assert_eq!(export.state(), ExportState::Complete);
}
