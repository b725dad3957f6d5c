//! Dubline Sync Engine
//!
//! Keeps a synthesized narration track aligned with a visual track of a
//! different length:
//! - **Media:** The playable-handle contract and a clock-driven implementation
//! - **Controller:** Rate matching on play, drift correction on seek
//! - **PCM:** Decoded narration audio handed over by the generation service

pub mod controller;
pub mod media;
pub mod pcm;

pub use controller::*;
pub use media::*;
pub use pcm::*;
