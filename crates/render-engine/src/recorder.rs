//! Capture backends.
//!
//! A [`MediaRecorder`] receives composited frames and routed audio while
//! the export runs and hands back the encoded stream as data chunks when
//! stopped. Which container/codec pair is used is negotiated up front from
//! a mime preference list.

use dubline_cue_model::geometry::ExportGeometry;
use image::RgbaImage;

use crate::error::RecorderError;

/// PCM layout of the routed audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Everything a recorder needs to start capturing.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub mime_type: String,
    pub geometry: ExportGeometry,
    pub fps: u32,
    pub audio: AudioFormat,
}

/// A sink for the composited stream.
pub trait MediaRecorder {
    /// Backend name.
    fn name(&self) -> &str;

    /// Whether this backend can produce `mime_type`.
    fn is_type_supported(&self, mime_type: &str) -> bool;

    fn start(&mut self, config: &CaptureConfig) -> Result<(), RecorderError>;

    /// One composited frame, stamped with capture time: seconds on the
    /// export clock since recording started. Seeks in the primary never
    /// move this stamp backwards.
    fn push_video_frame(&mut self, frame: &RgbaImage, capture_secs: f64) -> Result<(), RecorderError>;

    /// Interleaved samples in the format given at start.
    fn push_audio(&mut self, samples: &[f32]) -> Result<(), RecorderError>;

    /// Finish the stream and return its data chunks in order.
    fn stop(&mut self) -> Result<Vec<Vec<u8>>, RecorderError>;

    /// Drop whatever was captured without finalizing.
    fn abort(&mut self) {}
}

impl<R: MediaRecorder + ?Sized> MediaRecorder for Box<R> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        (**self).is_type_supported(mime_type)
    }

    fn start(&mut self, config: &CaptureConfig) -> Result<(), RecorderError> {
        (**self).start(config)
    }

    fn push_video_frame(&mut self, frame: &RgbaImage, capture_secs: f64) -> Result<(), RecorderError> {
        (**self).push_video_frame(frame, capture_secs)
    }

    fn push_audio(&mut self, samples: &[f32]) -> Result<(), RecorderError> {
        (**self).push_audio(samples)
    }

    fn stop(&mut self) -> Result<Vec<Vec<u8>>, RecorderError> {
        (**self).stop()
    }

    fn abort(&mut self) {
        (**self).abort()
    }
}

/// First entry of `preferences` the recorder supports.
pub fn select_mime_type<R: MediaRecorder + ?Sized>(
    recorder: &R,
    preferences: &[String],
) -> Option<String> {
    preferences
        .iter()
        .find(|mime| recorder.is_type_supported(mime))
        .cloned()
}

/// `video/webm;codecs=vp9,opus` -> (`video/webm`, [`vp9`, `opus`]).
pub fn parse_mime(mime_type: &str) -> (String, Vec<String>) {
    let mut parts = mime_type.split(';');
    let essence = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let codecs = parts
        .filter_map(|param| {
            let (key, value) = param.split_once('=')?;
            (key.trim().eq_ignore_ascii_case("codecs")).then_some(value)
        })
        .flat_map(|value| {
            value
                .trim()
                .trim_matches('"')
                .split(',')
                .map(|c| c.trim().to_ascii_lowercase())
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>()
        })
        .collect();
    (essence, codecs)
}

/// File extension matching a mime type's container.
pub fn container_extension(mime_type: &str) -> &'static str {
    match parse_mime(mime_type).0.as_str() {
        "video/webm" | "audio/webm" => "webm",
        "video/mp4" | "audio/mp4" => "mp4",
        "video/x-matroska" => "mkv",
        "video/quicktime" => "mov",
        _ => "bin",
    }
}

/// Keeps the captured stream in memory as raw chunks: one RGBA chunk per
/// frame and one little-endian `f32` chunk per audio push.
#[derive(Debug, Clone)]
pub struct MemoryRecorder {
    supported: Vec<String>,
    config: Option<CaptureConfig>,
    chunks: Vec<Vec<u8>>,
    frame_timestamps: Vec<f64>,
    audio_samples: usize,
}

impl Default for MemoryRecorder {
    fn default() -> Self {
        Self::new(["video/webm", "video/mp4"])
    }
}

impl MemoryRecorder {
    /// A recorder accepting the given container types. Codec parameters
    /// are ignored when matching.
    pub fn new<I, S>(supported: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            supported: supported
                .into_iter()
                .map(|s| parse_mime(&s.into()).0)
                .collect(),
            config: None,
            chunks: Vec::new(),
            frame_timestamps: Vec::new(),
            audio_samples: 0,
        }
    }

    pub fn config(&self) -> Option<&CaptureConfig> {
        self.config.as_ref()
    }

    /// Capture timestamps of every frame received so far.
    pub fn frame_timestamps(&self) -> &[f64] {
        &self.frame_timestamps
    }

    /// Interleaved samples received so far.
    pub fn audio_samples(&self) -> usize {
        self.audio_samples
    }

    fn ensure_started(&self) -> Result<(), RecorderError> {
        match self.config {
            Some(_) => Ok(()),
            None => Err(RecorderError::new("memory", "not started")),
        }
    }
}

impl MediaRecorder for MemoryRecorder {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        let (essence, _) = parse_mime(mime_type);
        self.supported.iter().any(|s| *s == essence)
    }

    fn start(&mut self, config: &CaptureConfig) -> Result<(), RecorderError> {
        if !self.is_type_supported(&config.mime_type) {
            return Err(RecorderError::new(
                "memory",
                format!("unsupported type {}", config.mime_type),
            ));
        }
        self.config = Some(config.clone());
        self.chunks.clear();
        self.frame_timestamps.clear();
        self.audio_samples = 0;
        Ok(())
    }

    fn push_video_frame(&mut self, frame: &RgbaImage, capture_secs: f64) -> Result<(), RecorderError> {
        self.ensure_started()?;
        self.chunks.push(frame.as_raw().clone());
        self.frame_timestamps.push(capture_secs);
        Ok(())
    }

    fn push_audio(&mut self, samples: &[f32]) -> Result<(), RecorderError> {
        self.ensure_started()?;
        if samples.is_empty() {
            return Ok(());
        }
        self.chunks
            .push(samples.iter().flat_map(|s| s.to_le_bytes()).collect());
        self.audio_samples += samples.len();
        Ok(())
    }

    fn stop(&mut self) -> Result<Vec<Vec<u8>>, RecorderError> {
        self.ensure_started()?;
        self.config = None;
        Ok(std::mem::take(&mut self.chunks))
    }

    fn abort(&mut self) {
        self.config = None;
        self.chunks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mime: &str) -> CaptureConfig {
        CaptureConfig {
            mime_type: mime.to_string(),
            geometry: ExportGeometry::new(2, 2),
            fps: 30,
            audio: AudioFormat {
                sample_rate: 48_000,
                channels: 2,
            },
        }
    }

    #[test]
    fn test_parse_mime() {
        let (essence, codecs) = parse_mime("video/webm;codecs=vp9,opus");
        assert_eq!(essence, "video/webm");
        assert_eq!(codecs, vec!["vp9", "opus"]);

        let (essence, codecs) = parse_mime("Video/MP4");
        assert_eq!(essence, "video/mp4");
        assert!(codecs.is_empty());
    }

    #[test]
    fn test_select_first_supported() {
        let recorder = MemoryRecorder::new(["video/mp4"]);
        let prefs = vec![
            "video/webm;codecs=vp9,opus".to_string(),
            "video/webm".to_string(),
            "video/mp4".to_string(),
        ];
        assert_eq!(select_mime_type(&recorder, &prefs), Some("video/mp4".to_string()));

        let none = MemoryRecorder::new(Vec::<String>::new());
        assert_eq!(select_mime_type(&none, &prefs), None);
    }

    #[test]
    fn test_container_extension() {
        assert_eq!(container_extension("video/webm;codecs=vp8,opus"), "webm");
        assert_eq!(container_extension("video/mp4"), "mp4");
        assert_eq!(container_extension("video/x-matroska"), "mkv");
    }

    #[test]
    fn test_memory_recorder_collects_chunks_in_order() {
        let mut recorder = MemoryRecorder::default();
        assert!(recorder.push_audio(&[0.0]).is_err());

        recorder.start(&config("video/webm;codecs=vp9,opus")).unwrap();
        recorder
            .push_video_frame(&RgbaImage::new(2, 2), 0.0)
            .unwrap();
        recorder.push_audio(&[0.5, -0.5]).unwrap();
        recorder.push_audio(&[]).unwrap();

        assert_eq!(recorder.frame_timestamps(), &[0.0]);
        assert_eq!(recorder.audio_samples(), 2);

        let chunks = recorder.stop().unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 16);
        assert_eq!(chunks[1].len(), 8);
        assert!(recorder.stop().is_err());
    }

    #[test]
    fn test_memory_recorder_rejects_unsupported_start() {
        let mut recorder = MemoryRecorder::new(["video/mp4"]);
        assert!(recorder.start(&config("video/webm")).is_err());
    }
}
