//! Dubline Cue Model
//!
//! Defines the caption-side data contracts:
//! - **Cues:** Timestamped caption lines parsed from loosely formatted text
//! - **Scheduler:** Which cue is on screen at a given instant
//! - **Styles:** Named caption presets and the independent caption knobs
//! - **Geometry:** Export aspect presets and crop-to-fill framing
//!
//! Times are seconds as `f64` on the primary (visual) track's clock.

pub mod cue;
pub mod geometry;
pub mod scheduler;
pub mod style;
pub mod subtitles;

pub use cue::*;
pub use geometry::*;
pub use scheduler::*;
pub use style::*;
