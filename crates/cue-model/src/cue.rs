//! Cue timeline parsed from loosely timestamped caption text.
//!
//! Each line is parsed on its own. A line contributes a cue only when it
//! starts with a timestamp (`[0:05]`, `0:12`, `1:05:00`, brackets optional)
//! followed by non-empty text:
//!
//! ```text
//! [0:05] Hello          -> 5s     "Hello"
//! 0:12 - World          -> 12s    "World"
//! garbage               -> dropped
//! 1:05:00 Final         -> 3900s  "Final"
//! ```

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A single timestamped caption entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    /// Start time in seconds on the primary track.
    pub start_secs: f64,
    /// Caption text, never empty.
    pub text: String,
}

impl Cue {
    pub fn new(start_secs: f64, text: impl Into<String>) -> Self {
        Self {
            start_secs,
            text: text.into(),
        }
    }
}

/// An ordered, immutable list of cues.
///
/// Cheap to clone. A new caption text produces a new timeline; timelines are
/// never patched in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CueTimeline {
    cues: Arc<[Cue]>,
}

fn timestamp_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*\[?(\d{1,2}):(\d{1,2})(?::(\d{2}))?\]?[\s\-:)]*(.*)$")
            .expect("timestamp pattern is valid")
    })
}

impl CueTimeline {
    /// Parse caption text into a timeline.
    ///
    /// Lines without a leading timestamp, or with nothing left after it, are
    /// dropped. The result is sorted by start time; cues sharing a start time
    /// keep their order of appearance.
    pub fn parse(text: &str) -> Self {
        let mut cues: Vec<Cue> = text.lines().filter_map(parse_line).collect();
        cues.sort_by(|a, b| a.start_secs.total_cmp(&b.start_secs));

        tracing::debug!(
            lines = text.lines().count(),
            cues = cues.len(),
            "Parsed caption timeline"
        );

        Self { cues: cues.into() }
    }

    /// Build a timeline from already-timed cues, enforcing the same
    /// invariants as [`CueTimeline::parse`].
    pub fn from_cues(cues: impl IntoIterator<Item = Cue>) -> Self {
        let mut cues: Vec<Cue> = cues
            .into_iter()
            .filter(|cue| {
                cue.start_secs.is_finite() && cue.start_secs >= 0.0 && !cue.text.trim().is_empty()
            })
            .collect();
        cues.sort_by(|a, b| a.start_secs.total_cmp(&b.start_secs));
        Self { cues: cues.into() }
    }

    pub fn cues(&self) -> &[Cue] {
        &self.cues
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Cue> {
        self.cues.iter()
    }

    /// Start of the last cue, or `None` for an empty timeline.
    pub fn last_start_secs(&self) -> Option<f64> {
        self.cues.last().map(|cue| cue.start_secs)
    }
}

impl<'a> IntoIterator for &'a CueTimeline {
    type Item = &'a Cue;
    type IntoIter = std::slice::Iter<'a, Cue>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn parse_line(line: &str) -> Option<Cue> {
    let caps = timestamp_line().captures(line)?;

    let first: u32 = caps.get(1)?.as_str().parse().ok()?;
    let second: u32 = caps.get(2)?.as_str().parse().ok()?;
    let start_secs = match caps.get(3) {
        Some(third) => {
            let third: u32 = third.as_str().parse().ok()?;
            first * 3600 + second * 60 + third
        }
        None => first * 60 + second,
    };

    let text = caps.get(4).map(|m| m.as_str().trim()).unwrap_or_default();
    if text.is_empty() {
        return None;
    }

    Some(Cue::new(start_secs as f64, text))
}
