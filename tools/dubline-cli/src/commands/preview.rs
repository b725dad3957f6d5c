//! Real-time terminal preview of narration sync and captions.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dubline_common::clock::{DriftMeasurement, PlaybackClock, RateController, SystemClock};
use dubline_common::config::AppConfig;
use dubline_cue_model::cue::CueTimeline;
use dubline_sync_engine::controller::{expected_secondary_time, SyncController};
use dubline_sync_engine::media::{MediaHandle, VirtualMedia};
use dubline_sync_engine::pcm::PcmBuffer;

use super::cues::{load_timeline, scheduler};

pub async fn run(
    config: &AppConfig,
    narration: PathBuf,
    video_secs: f64,
    captions: Option<PathBuf>,
    hz: u32,
    seek: Option<f64>,
) -> anyhow::Result<()> {
    let audio = PcmBuffer::decode_file(&narration)
        .map_err(|e| anyhow::anyhow!("Failed to load narration: {e}"))?;
    let timeline = match &captions {
        Some(path) => load_timeline(path)?,
        None => CueTimeline::default(),
    };
    let scheduler = scheduler(config, None);

    let clock: Arc<dyn PlaybackClock> = Arc::new(SystemClock::start());
    let video = VirtualMedia::new("video", video_secs, clock.clone());
    let voice = VirtualMedia::new("narration", audio.duration_secs(), clock.clone());
    let mut sync = SyncController::with_defaults(video, voice, &config.sync);

    sync.play()?;
    println!(
        "Previewing {:.1}s of video with {:.1}s of narration at {:.3}x{}",
        video_secs,
        audio.duration_secs(),
        sync.rate(),
        if sync.is_degraded() { " (degraded)" } else { "" }
    );
    println!("Press Ctrl+C to stop...");

    let mut gate = RateController::new(hz);
    let mut pending_seek = seek;
    let poll = Duration::from_secs_f64(gate.interval_secs() / 4.0);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            _ = tokio::time::sleep(poll) => {}
        }

        if let Some(to) = pending_seek.take() {
            let correction = sync.seek(to);
            println!("\nSeek to {to:.2}s: {correction:?}");
        }

        let now = clock.now_secs();
        if !gate.should_tick(now) {
            continue;
        }

        let state = sync.state();
        let drift_ms = expected_secondary_time(
            state.primary_time,
            state.primary_duration,
            state.secondary_duration,
        )
        .map(|expected| {
            DriftMeasurement {
                expected_secs: expected,
                measured_secs: state.secondary_time,
            }
            .drift_ms()
        })
        .unwrap_or(0.0);
        let caption = scheduler
            .active_cue_at(&timeline, state.primary_time)
            .map(|cue| cue.text.as_str())
            .unwrap_or("");

        print!(
            "\r  video {:>7.2}s  narration {:>7.2}s  drift {:>+6.0}ms  | {:<48}",
            state.primary_time, state.secondary_time, drift_ms, caption
        );
        std::io::stdout().flush().ok();

        if sync.primary().is_ended() {
            println!();
            break;
        }
    }

    sync.pause();
    println!("Preview stopped.");
    Ok(())
}
