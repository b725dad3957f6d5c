//! Frame sources for the visual track.
//!
//! The export loop asks for the frame at a primary-track time; sources only
//! decode what they are asked for and keep the last frame around, since
//! consecutive ticks usually land on the same image.

use std::path::{Path, PathBuf};
use std::process::Command;

use dubline_common::error::{DublineError, DublineResult};
use image::RgbaImage;
use tempfile::TempDir;

/// Something that can produce the visual frame for a point in time.
pub trait FrameSource {
    /// Frame dimensions in pixels.
    fn dimensions(&self) -> (u32, u32);

    /// Natural duration, if the source has one.
    fn duration_secs(&self) -> Option<f64> {
        None
    }

    /// Frame shown at `secs`.
    fn frame_at(&mut self, secs: f64) -> DublineResult<&RgbaImage>;
}

/// One image for the whole export.
#[derive(Debug, Clone)]
pub struct StillImageSource {
    image: RgbaImage,
}

impl StillImageSource {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn open(path: &Path) -> DublineResult<Self> {
        if !path.exists() {
            return Err(DublineError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let image = image::open(path)
            .map_err(|e| DublineError::media(format!("Failed to open {}: {e}", path.display())))?
            .to_rgba8();
        Ok(Self::new(image))
    }
}

impl FrameSource for StillImageSource {
    fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn frame_at(&mut self, _secs: f64) -> DublineResult<&RgbaImage> {
        Ok(&self.image)
    }
}

/// Numbered image files played back at a fixed rate.
pub struct ImageSequenceSource {
    frames: Vec<PathBuf>,
    fps: f64,
    dimensions: (u32, u32),
    cached: Option<(usize, RgbaImage)>,
    /// Keeps extracted frames alive for the lifetime of the source.
    _workdir: Option<TempDir>,
}

impl ImageSequenceSource {
    /// Load every png/jpg/webp in `dir`, ordered by file name.
    pub fn from_dir(dir: &Path, fps: f64) -> DublineResult<Self> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(DublineError::config(format!("Invalid sequence frame rate: {fps}")));
        }

        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image_file(path))
            .collect();
        frames.sort();

        let first = frames.first().ok_or_else(|| {
            DublineError::media(format!("No image frames found in {}", dir.display()))
        })?;
        let dimensions = image::image_dimensions(first).map_err(|e| {
            DublineError::media(format!("Failed to read {}: {e}", first.display()))
        })?;

        tracing::debug!(
            dir = %dir.display(),
            frames = frames.len(),
            fps,
            "Loaded image sequence"
        );

        Ok(Self {
            frames,
            fps,
            dimensions,
            cached: None,
            _workdir: None,
        })
    }

    /// Extract `video` to frames at `fps` with ffmpeg, into a temporary
    /// directory owned by the source.
    pub fn extract_with_ffmpeg(video: &Path, fps: f64) -> DublineResult<Self> {
        if !video.exists() {
            return Err(DublineError::FileNotFound {
                path: video.to_path_buf(),
            });
        }

        let workdir = tempfile::Builder::new().prefix("dubline-frames").tempdir()?;
        let pattern = workdir.path().join("frame_%06d.png");

        tracing::info!(video = %video.display(), fps, "Extracting video frames");
        let output = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(video)
            .args(["-vf", &format!("fps={fps}")])
            .arg(&pattern)
            .output()
            .map_err(|e| DublineError::media(format!("Failed to start ffmpeg: {e}")))?;

        if !output.status.success() {
            return Err(DublineError::media(format!(
                "Frame extraction failed (status {}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut source = Self::from_dir(workdir.path(), fps)?;
        source._workdir = Some(workdir);
        Ok(source)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn index_at(&self, secs: f64) -> usize {
        let secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
        ((secs * self.fps).floor() as usize).min(self.frames.len().saturating_sub(1))
    }
}

impl FrameSource for ImageSequenceSource {
    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn duration_secs(&self) -> Option<f64> {
        Some(self.frames.len() as f64 / self.fps)
    }

    fn frame_at(&mut self, secs: f64) -> DublineResult<&RgbaImage> {
        let index = self.index_at(secs);
        let stale = !matches!(&self.cached, Some((cached, _)) if *cached == index);
        if stale {
            let path = &self.frames[index];
            let mut frame = image::open(path)
                .map_err(|e| DublineError::media(format!("Failed to open {}: {e}", path.display())))?
                .to_rgba8();
            if frame.dimensions() != self.dimensions {
                frame = image::imageops::resize(
                    &frame,
                    self.dimensions.0,
                    self.dimensions.1,
                    image::imageops::FilterType::Triangle,
                );
            }
            self.cached = Some((index, frame));
        }

        match &self.cached {
            Some((_, frame)) => Ok(frame),
            None => Err(DublineError::media("Frame cache is empty")),
        }
    }
}

fn is_image_file(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("png" | "jpg" | "jpeg" | "webp")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn write_frame(dir: &Path, name: &str, shade: u8) {
        RgbaImage::from_pixel(4, 2, Rgba([shade, shade, shade, 255]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_still_image_is_constant() {
        let mut source = StillImageSource::new(RgbaImage::new(3, 5));
        assert_eq!(source.dimensions(), (3, 5));
        assert_eq!(source.frame_at(100.0).unwrap().dimensions(), (3, 5));
        assert!(source.duration_secs().is_none());
    }

    #[test]
    fn test_sequence_orders_and_indexes_frames() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "frame_000002.png", 20);
        write_frame(dir.path(), "frame_000001.png", 10);
        write_frame(dir.path(), "frame_000003.png", 30);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageSequenceSource::from_dir(dir.path(), 2.0).unwrap();
        assert_eq!(source.len(), 3);
        assert_eq!(source.dimensions(), (4, 2));
        assert_eq!(source.duration_secs(), Some(1.5));

        assert_eq!(source.frame_at(0.0).unwrap().get_pixel(0, 0).0[0], 10);
        assert_eq!(source.frame_at(0.6).unwrap().get_pixel(0, 0).0[0], 20);
        // Past the end holds the last frame.
        assert_eq!(source.frame_at(99.0).unwrap().get_pixel(0, 0).0[0], 30);
    }

    #[test]
    fn test_empty_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageSequenceSource::from_dir(dir.path(), 30.0).is_err());
        assert!(ImageSequenceSource::from_dir(dir.path(), 0.0).is_err());
    }
}
