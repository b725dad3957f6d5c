//! Export geometry and crop-to-fill framing.
//!
//! Source frames are scaled to cover the whole output canvas while keeping
//! their aspect ratio; whatever overflows is cropped evenly from both sides.

use std::fmt;
use std::str::FromStr;

use dubline_common::error::DublineError;
use serde::{Deserialize, Serialize};

/// Output aspect preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectPreset {
    /// 16:9 at 1280x720.
    #[default]
    Landscape,
    /// 9:16 at 720x1280.
    Portrait,
    /// 1:1 at 1080x1080.
    Square,
    /// Source dimensions.
    Original,
}

impl AspectPreset {
    pub const ALL: [AspectPreset; 4] = [
        AspectPreset::Landscape,
        AspectPreset::Portrait,
        AspectPreset::Square,
        AspectPreset::Original,
    ];

    /// Output canvas size for a source of the given dimensions.
    pub fn geometry(self, source_width: u32, source_height: u32) -> ExportGeometry {
        match self {
            AspectPreset::Landscape => ExportGeometry::new(1280, 720),
            AspectPreset::Portrait => ExportGeometry::new(720, 1280),
            AspectPreset::Square => ExportGeometry::new(1080, 1080),
            // Encoders want even dimensions.
            AspectPreset::Original => {
                ExportGeometry::new((source_width & !1).max(2), (source_height & !1).max(2))
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AspectPreset::Landscape => "landscape",
            AspectPreset::Portrait => "portrait",
            AspectPreset::Square => "square",
            AspectPreset::Original => "original",
        }
    }
}

impl FromStr for AspectPreset {
    type Err = DublineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "landscape" | "16:9" => Ok(AspectPreset::Landscape),
            "portrait" | "9:16" => Ok(AspectPreset::Portrait),
            "square" | "1:1" => Ok(AspectPreset::Square),
            "original" | "source" => Ok(AspectPreset::Original),
            other => Err(DublineError::config(format!(
                "Unknown aspect preset: {other}. Use: landscape, portrait, square, original"
            ))),
        }
    }
}

impl fmt::Display for AspectPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output canvas dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportGeometry {
    pub width: u32,
    pub height: u32,
}

impl ExportGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    /// Region of a `source_width x source_height` frame that, scaled
    /// uniformly, exactly covers this canvas.
    pub fn crop_to_fill(&self, source_width: u32, source_height: u32) -> CropRect {
        if source_width == 0 || source_height == 0 {
            return CropRect::default();
        }

        let scale = (self.width as f64 / source_width as f64)
            .max(self.height as f64 / source_height as f64);

        let width = ((self.width as f64 / scale).round() as u32).clamp(1, source_width);
        let height = ((self.height as f64 / scale).round() as u32).clamp(1, source_height);

        CropRect {
            x: (source_width - width) / 2,
            y: (source_height - height) / 2,
            width,
            height,
        }
    }
}

/// A pixel rectangle within a source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}
