//! Show the cue on screen at a given time.

use std::path::PathBuf;

use dubline_common::config::AppConfig;

use super::cues::{load_timeline, scheduler};

/// `12.5`, `0:12` or `1:02:03` to seconds.
fn parse_time(text: &str) -> anyhow::Result<f64> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<f64>() {
        return Ok(secs);
    }

    let parts = text
        .split(':')
        .map(|p| p.parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| anyhow::anyhow!("Invalid time: {text}. Use seconds or m:ss"))?;
    match parts.as_slice() {
        [m, s] => Ok(m * 60.0 + s),
        [h, m, s] => Ok(h * 3600.0 + m * 60.0 + s),
        _ => anyhow::bail!("Invalid time: {text}. Use seconds or m:ss"),
    }
}

pub fn run(
    config: &AppConfig,
    path: PathBuf,
    time: String,
    window: Option<f64>,
) -> anyhow::Result<()> {
    let timeline = load_timeline(&path)?;
    let scheduler = scheduler(config, window);
    let t = parse_time(&time)?;

    match scheduler.active_index_at(&timeline, t) {
        Some(index) => {
            let cue = &timeline.cues()[index];
            println!("[{index}] {:.2}s  {}", cue.start_secs, cue.text);
        }
        None => println!("No cue at {t:.2}s"),
    }

    Ok(())
}
