//! Export a captioned video with the narration as its soundtrack.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use dubline_common::clock::{ManualClock, PlaybackClock, SystemClock};
use dubline_common::config::AppConfig;
use dubline_cue_model::cue::CueTimeline;
use dubline_cue_model::style::StyleLibrary;
use dubline_render_engine::{
    run_offline, run_realtime, ExportArtifact, ExportInputs, ExportProgress,
    ExportRecorder, ExportSettings, ExportTrigger, FfmpegRecorder, FontBook, FrameSource,
    ImageSequenceSource, MediaRecorder, MemoryRecorder, ProgressCallback, RasterCanvas,
    StillImageSource,
};
use dubline_sync_engine::controller::SyncController;
use dubline_sync_engine::media::VirtualMedia;
use dubline_sync_engine::pcm::PcmBuffer;

use super::cues::load_timeline;

/// Where output frames come from.
pub enum Source {
    Image(PathBuf),
    Frames(PathBuf),
    Video(PathBuf),
}

pub struct ExportArgs {
    pub source: Source,
    pub narration: PathBuf,
    pub captions: Option<PathBuf>,
    pub duration: Option<f64>,
    pub aspect: Option<String>,
    pub style: Option<String>,
    pub fps: Option<u32>,
    pub font_scale: Option<f64>,
    pub position: Option<f64>,
    pub uppercase: bool,
    pub no_captions: bool,
    pub output: Option<PathBuf>,
    pub raw: bool,
    pub realtime: bool,
}

type CliRecorder = ExportRecorder<VirtualMedia, VirtualMedia, Box<dyn MediaRecorder>>;

fn settings_for(config: &AppConfig, args: &ExportArgs) -> anyhow::Result<ExportSettings> {
    let styles = StyleLibrary::from_defaults(&config.captions);
    let mut settings = ExportSettings::from_config(config, &styles)?;

    if let Some(aspect) = &args.aspect {
        settings.aspect = aspect.parse()?;
    }
    if let Some(name) = &args.style {
        settings.style = styles
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Unknown style: {name}. See `dubline styles`"))?;
    }
    if let Some(fps) = args.fps {
        settings.fps = fps.max(1);
    }
    if let Some(scale) = args.font_scale {
        settings.options.font_scale = scale;
    }
    if let Some(position) = args.position {
        settings.options.vertical_position = position;
    }
    settings.options.uppercase |= args.uppercase;
    if args.no_captions {
        settings.options.enabled = false;
    }
    settings.options = settings.options.clamped();

    Ok(settings)
}

fn open_source(source: &Source, fps: u32) -> anyhow::Result<Box<dyn FrameSource>> {
    let frames: Box<dyn FrameSource> = match source {
        Source::Image(path) => Box::new(StillImageSource::open(path)?),
        Source::Frames(dir) => Box::new(ImageSequenceSource::from_dir(dir, fps as f64)?),
        Source::Video(path) => {
            println!("  Extracting frames from {}...", path.display());
            Box::new(ImageSequenceSource::extract_with_ffmpeg(path, fps as f64)?)
        }
    };
    Ok(frames)
}

fn progress_printer() -> ProgressCallback {
    Box::new(|p: ExportProgress| {
        print!(
            "\r  Progress: {:5.1}% ({} frames, {} skipped, t={:.2}s)  ",
            p.progress, p.frames_captured, p.frames_skipped, p.time_secs
        );
        std::io::stdout().flush().ok();
    })
}

pub async fn run(config: &AppConfig, args: ExportArgs) -> anyhow::Result<()> {
    let settings = settings_for(config, &args)?;

    let narration = Arc::new(
        PcmBuffer::decode_file(&args.narration)
            .map_err(|e| anyhow::anyhow!("Failed to load narration: {e}"))?,
    );
    let frames = open_source(&args.source, settings.fps)?;
    let video_secs = args
        .duration
        .or_else(|| frames.duration_secs())
        .unwrap_or_else(|| narration.duration_secs());
    let timeline = match &args.captions {
        Some(path) => load_timeline(path)?,
        None => CueTimeline::default(),
    };

    let fonts = Arc::new(FontBook::from_config(&config.fonts)?);
    if !fonts.has_default() && settings.options.enabled && !timeline.is_empty() {
        println!("  Warning: no caption font found; captioned frames will be skipped");
    }

    let recorder: Box<dyn MediaRecorder> = if args.raw {
        Box::new(MemoryRecorder::default())
    } else {
        Box::new(FfmpegRecorder::new()?)
    };

    println!("Exporting narrated video");
    println!("  Narration: {} ({:.1}s)", args.narration.display(), narration.duration_secs());
    println!("  Video length: {video_secs:.1}s");
    println!("  Captions: {} cues, style {}", timeline.len(), settings.style.name);
    println!("  Aspect: {} @ {}fps", settings.aspect, settings.fps);

    let build = |clock: Arc<dyn PlaybackClock>,
                 frames: Box<dyn FrameSource>,
                 recorder: Box<dyn MediaRecorder>,
                 settings: ExportSettings|
     -> CliRecorder {
        let video = VirtualMedia::new("video", video_secs, clock.clone());
        let voice = VirtualMedia::new("narration", narration.duration_secs(), clock);
        let inputs = ExportInputs {
            sync: SyncController::with_defaults(video, voice, &config.sync),
            frames,
            narration: narration.clone(),
            timeline: timeline.clone(),
        };
        ExportRecorder::new(
            inputs,
            recorder,
            RasterCanvas::factory(fonts.clone()),
            settings,
        )
    };

    // The CLI invocation is the user action that unlocks audio output.
    let trigger = ExportTrigger::UserAction;
    let result = if args.realtime {
        let clock = SystemClock::start();
        let mut export = build(Arc::new(clock.clone()), frames, recorder, settings);
        run_realtime(&mut export, &clock, trigger, Some(progress_printer())).await
    } else {
        let clock = ManualClock::new();
        let mut export = build(Arc::new(clock.clone()), frames, recorder, settings);
        run_offline(&mut export, &clock, trigger, Some(progress_printer()))
    };
    println!();

    match result {
        Ok(artifact) => {
            let path = write_artifact(config, &artifact, args.output)?;
            println!("Export complete: {}", path.display());
            if artifact.truncated {
                println!("  Note: the export stopped before the end of the video.");
            }
            if artifact.frames_skipped > 0 {
                println!("  Note: {} frame(s) could not be composited.", artifact.frames_skipped);
            }
            Ok(())
        }
        Err(e) => {
            println!("Export failed: {}", e.user_message());
            if e.is_recoverable() {
                println!("  Run the command again to retry.");
            }
            Err(e.into())
        }
    }
}

fn write_artifact(
    config: &AppConfig,
    artifact: &ExportArtifact,
    output: Option<PathBuf>,
) -> anyhow::Result<PathBuf> {
    match output {
        Some(path) if path.is_dir() => Ok(artifact.write_to(&path)?),
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &artifact.bytes)?;
            Ok(path)
        }
        None => Ok(artifact.write_to(&config.export.output_dir)?),
    }
}
