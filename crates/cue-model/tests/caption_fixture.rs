use std::path::PathBuf;

use dubline_cue_model::cue::CueTimeline;
use dubline_cue_model::scheduler::CueScheduler;
use dubline_cue_model::subtitles::generate_srt;

fn load_fixture_timeline() -> CueTimeline {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("fixtures")
        .join("sample-captions.txt");

    let content = std::fs::read_to_string(path).expect("fixture captions should be readable");
    CueTimeline::parse(&content)
}

#[test]
fn sample_script_keeps_only_timed_lines() {
    let timeline = load_fixture_timeline();

    let starts: Vec<f64> = timeline.iter().map(|cue| cue.start_secs).collect();
    assert_eq!(starts, vec![0.0, 4.0, 9.0, 9.0, 21.0, 3725.0]);
    assert_eq!(timeline.cues()[1].text, "The lighthouse was built in 1871");
}

#[test]
fn sample_script_schedules_like_playback() {
    let timeline = load_fixture_timeline();
    let scheduler = CueScheduler::default();

    let text_at = |t: f64| {
        scheduler
            .active_cue_at(&timeline, t)
            .map(|cue| cue.text.as_str())
    };

    assert_eq!(text_at(0.0), Some("Welcome to the harbor tour"));
    assert_eq!(text_at(8.99), Some("The lighthouse was built in 1871"));
    // Both 0:09 cues share a start; the first one written wins.
    assert_eq!(text_at(9.5), Some("Fishing boats leave before dawn"));
    // Past the display window and before the next cue.
    assert_eq!(text_at(16.0), None);
    assert_eq!(text_at(21.0), Some("The market opens at six"));
    assert_eq!(text_at(3730.0), None);
}

#[test]
fn sample_script_exports_srt_in_order() {
    let timeline = load_fixture_timeline();
    let srt = generate_srt(&timeline, &CueScheduler::default());

    // The second 0:09 cue never shows, so it gets no entry.
    assert!(!srt.contains("Gulls"));
    assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:04,000\nWelcome to the harbor tour"));
    assert!(srt.contains("5\n01:02:05,000 --> 01:02:10,000\nThanks for watching"));
}
