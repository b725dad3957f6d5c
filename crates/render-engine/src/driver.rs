//! Export drivers.
//!
//! The recorder itself never sleeps or reads a clock; a driver decides how
//! time moves. [`run_offline`] steps a [`ManualClock`] by one frame interval
//! per tick, so an export runs as fast as frames can be composited.
//! [`run_realtime`] ticks on a tokio interval against a wall clock, which is
//! what live capture of real media needs.

use std::time::Duration;

use dubline_common::clock::{ManualClock, PlaybackClock};
use dubline_sync_engine::media::MediaHandle;
use serde::Serialize;
use tokio::time::MissedTickBehavior;

use crate::error::ExportError;
use crate::export::{ExportArtifact, ExportRecorder, ExportState, ExportTrigger, RenderCommand};
use crate::recorder::MediaRecorder;

/// Progress report sent after every tick that produced or skipped a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExportProgress {
    pub state: ExportState,
    pub progress: f64,
    pub frames_captured: u64,
    pub frames_skipped: u64,
    pub time_secs: f64,
}

pub type ProgressCallback = Box<dyn FnMut(ExportProgress) + Send>;

fn report<P, S, R>(
    recorder: &ExportRecorder<P, S, R>,
    time_secs: f64,
    progress: &mut Option<ProgressCallback>,
) where
    P: MediaHandle,
    S: MediaHandle,
    R: MediaRecorder,
{
    if let Some(callback) = progress.as_mut() {
        callback(ExportProgress {
            state: recorder.state(),
            progress: recorder.progress(),
            frames_captured: recorder.frames_captured(),
            frames_skipped: recorder.frames_skipped(),
            time_secs,
        });
    }
}

fn outcome<P, S, R>(recorder: &mut ExportRecorder<P, S, R>) -> Result<ExportArtifact, ExportError>
where
    P: MediaHandle,
    S: MediaHandle,
    R: MediaRecorder,
{
    recorder.take_outcome().unwrap_or_else(|| {
        Err(ExportError::InvalidState {
            state: recorder.state(),
            action: "finish",
        })
    })
}

/// Run an export to completion on a stepped clock.
///
/// The media handles inside `recorder` must read time from `clock`.
pub fn run_offline<P, S, R>(
    recorder: &mut ExportRecorder<P, S, R>,
    clock: &ManualClock,
    trigger: ExportTrigger,
    mut progress: Option<ProgressCallback>,
) -> Result<ExportArtifact, ExportError>
where
    P: MediaHandle,
    S: MediaHandle,
    R: MediaRecorder,
{
    let interval = 1.0 / recorder.settings().fps.max(1) as f64;
    recorder.start(clock.now_secs(), trigger)?;

    loop {
        let now = clock.now_secs();
        match recorder.tick(now) {
            RenderCommand::Stop => break,
            RenderCommand::Wait => {}
            RenderCommand::Frame(frame) => report(recorder, frame.time_secs, &mut progress),
            RenderCommand::Skipped { time_secs } => report(recorder, time_secs, &mut progress),
        }
        clock.advance(interval);
    }

    report(recorder, recorder.sync().primary().current_time(), &mut progress);
    tracing::debug!(clock_secs = clock.now_secs(), "Offline export finished");
    outcome(recorder)
}

/// Run an export against a live clock, ticking once per frame interval.
/// Late ticks are dropped rather than bunched up.
pub async fn run_realtime<P, S, R>(
    recorder: &mut ExportRecorder<P, S, R>,
    clock: &dyn PlaybackClock,
    trigger: ExportTrigger,
    mut progress: Option<ProgressCallback>,
) -> Result<ExportArtifact, ExportError>
where
    P: MediaHandle,
    S: MediaHandle,
    R: MediaRecorder,
{
    let fps = recorder.settings().fps.max(1);
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps as f64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    recorder.start(clock.now_secs(), trigger)?;

    loop {
        ticker.tick().await;
        let now = clock.now_secs();
        match recorder.tick(now) {
            RenderCommand::Stop => break,
            RenderCommand::Wait => {}
            RenderCommand::Frame(frame) => report(recorder, frame.time_secs, &mut progress),
            RenderCommand::Skipped { time_secs } => report(recorder, time_secs, &mut progress),
        }
    }

    report(recorder, recorder.sync().primary().current_time(), &mut progress);
    outcome(recorder)
}
