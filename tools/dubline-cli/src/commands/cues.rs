//! Parse a caption file and print its timeline.

use std::path::{Path, PathBuf};

use dubline_common::config::AppConfig;
use dubline_cue_model::cue::CueTimeline;
use dubline_cue_model::scheduler::CueScheduler;
use dubline_cue_model::subtitles::save_subtitles;
use serde::Serialize;

#[derive(Serialize)]
struct CueRow<'a> {
    index: usize,
    start_secs: f64,
    end_secs: Option<f64>,
    text: &'a str,
}

pub fn load_timeline(path: &Path) -> anyhow::Result<CueTimeline> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read captions at {}: {e}", path.display()))?;
    let timeline = CueTimeline::parse(&text);
    if timeline.is_empty() {
        tracing::warn!(path = %path.display(), "No timestamped lines found");
    }
    Ok(timeline)
}

pub fn scheduler(config: &AppConfig, window: Option<f64>) -> CueScheduler {
    CueScheduler::with_window(window.unwrap_or(config.captions.display_window_secs))
}

pub fn run(
    config: &AppConfig,
    path: PathBuf,
    format: String,
    window: Option<f64>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let timeline = load_timeline(&path)?;
    let scheduler = scheduler(config, window);

    if let Some(output) = output {
        save_subtitles(&timeline, &scheduler, &output)?;
        println!("Wrote {} cues to {}", timeline.len(), output.display());
        return Ok(());
    }

    match format.as_str() {
        "json" => {
            let rows: Vec<CueRow<'_>> = timeline
                .iter()
                .enumerate()
                .map(|(index, cue)| CueRow {
                    index,
                    start_secs: cue.start_secs,
                    end_secs: scheduler.end_secs(&timeline, index),
                    text: &cue.text,
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        "srt" => print!("{}", timeline.to_srt(&scheduler)),
        "vtt" => print!("{}", timeline.to_vtt(&scheduler)),
        _ => anyhow::bail!("Unknown format: {format}. Use: json, srt, vtt"),
    }

    Ok(())
}
