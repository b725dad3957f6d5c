//! Dubline Common Utilities
//!
//! Shared infrastructure for all Dubline crates:
//! - Error types and result aliases
//! - Playback clocks and drift measurement
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
