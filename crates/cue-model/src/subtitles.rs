//! SRT and VTT output for a cue timeline.
//!
//! End times follow the scheduler: a cue ends when its display window runs
//! out or the next cue starts, whichever is first.

use std::path::Path;

use dubline_common::error::DublineResult;

use crate::cue::CueTimeline;
use crate::scheduler::CueScheduler;

/// Generate SRT subtitle content.
pub fn generate_srt(timeline: &CueTimeline, scheduler: &CueScheduler) -> String {
    let mut output = String::new();

    for (i, (start, end, text)) in timed_entries(timeline, scheduler).enumerate() {
        output.push_str(&format!("{}\n", i + 1));
        output.push_str(&format!(
            "{} --> {}\n",
            format_srt_time(start),
            format_srt_time(end),
        ));
        output.push_str(text);
        output.push_str("\n\n");
    }

    output
}

/// Generate WebVTT subtitle content.
pub fn generate_vtt(timeline: &CueTimeline, scheduler: &CueScheduler) -> String {
    let mut output = String::from("WEBVTT\n\n");

    for (start, end, text) in timed_entries(timeline, scheduler) {
        output.push_str(&format!(
            "{} --> {}\n",
            format_vtt_time(start),
            format_vtt_time(end),
        ));
        output.push_str(text);
        output.push_str("\n\n");
    }

    output
}

impl CueTimeline {
    pub fn to_srt(&self, scheduler: &CueScheduler) -> String {
        generate_srt(self, scheduler)
    }

    pub fn to_vtt(&self, scheduler: &CueScheduler) -> String {
        generate_vtt(self, scheduler)
    }
}

/// Cues that are visible for a non-zero span, with their end times.
fn timed_entries<'a>(
    timeline: &'a CueTimeline,
    scheduler: &'a CueScheduler,
) -> impl Iterator<Item = (f64, f64, &'a str)> + 'a {
    timeline
        .iter()
        .enumerate()
        .filter(move |(index, cue)| {
            scheduler.active_index_at(timeline, cue.start_secs) == Some(*index)
        })
        .filter_map(move |(index, cue)| {
            let end = scheduler.end_secs(timeline, index)?;
            (end > cue.start_secs).then_some((cue.start_secs, end, cue.text.as_str()))
        })
}

/// Format seconds as SRT timestamp: HH:MM:SS,mmm
fn format_srt_time(secs: f64) -> String {
    let (hours, minutes, seconds, millis) = split_time(secs);
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

/// Format seconds as VTT timestamp: HH:MM:SS.mmm
fn format_vtt_time(secs: f64) -> String {
    let (hours, minutes, seconds, millis) = split_time(secs);
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

fn split_time(secs: f64) -> (u64, u64, u64, u64) {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    (
        total_ms / 3_600_000,
        (total_ms % 3_600_000) / 60_000,
        (total_ms % 60_000) / 1000,
        total_ms % 1000,
    )
}

/// Save subtitles to a file, choosing VTT or SRT by extension.
pub fn save_subtitles(
    timeline: &CueTimeline,
    scheduler: &CueScheduler,
    path: &Path,
) -> DublineResult<()> {
    let content = match path.extension().and_then(|e| e.to_str()) {
        Some("vtt") => generate_vtt(timeline, scheduler),
        _ => generate_srt(timeline, scheduler),
    };
    std::fs::write(path, content)?;
    Ok(())
}
