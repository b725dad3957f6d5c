//! Dubline Render Engine
//!
//! Composites source frames with styled captions and records the result,
//! together with the rate-matched narration, into a downloadable artifact.
//!
//! # Pipeline Architecture
//!
//! ```text
//! frames (image/video) ──┐
//!                        ├── Crop-to-fill (export geometry)
//! cue timeline ──────────┘         │
//!                                  ├── Caption (style + knobs)
//!                                  │         │
//! narration.wav ── SyncController ─┼── Audio graph (rate-matched PCM)
//!                                  │         │
//!                                  ▼         ▼
//!                               MediaRecorder (webm/mp4)
//!                                        │
//!                                        ▼
//!                                  ExportArtifact
//! ```
//!
//! Everything runs on a single cooperative loop: [`export::ExportRecorder`]
//! exposes a pure `tick(now)` step and [`driver`] runs it either offline
//! against a manual clock or in real time on a tokio interval.

pub mod audio_graph;
pub mod canvas;
pub mod compositor;
pub mod driver;
pub mod error;
pub mod export;
pub mod ffmpeg;
pub mod raster;
pub mod recorder;
pub mod source;

pub use audio_graph::AudioGraph;
pub use canvas::{Canvas, CanvasFactory, FontSpec, Rect, Shadow, TextAnchor};
pub use compositor::{CaptionLayout, FrameComposition, FrameCompositor, RenderedFrame};
pub use driver::{run_offline, run_realtime, ExportProgress, ProgressCallback};
pub use error::{ExportError, RecorderError};
pub use export::*;
pub use ffmpeg::{FfmpegCapabilities, FfmpegRecorder};
pub use raster::{FontBook, RasterCanvas};
pub use recorder::{select_mime_type, AudioFormat, CaptureConfig, MediaRecorder, MemoryRecorder};
pub use source::{FrameSource, ImageSequenceSource, StillImageSource};
