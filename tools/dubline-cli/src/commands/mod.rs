pub mod active;
pub mod check;
pub mod cues;
pub mod export;
pub mod preview;
pub mod styles;
