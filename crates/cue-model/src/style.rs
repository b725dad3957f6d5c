//! Caption style presets and caption knobs.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use dubline_common::config::CaptionDefaults;
use dubline_common::error::{DublineError, DublineResult};
use serde::{Deserialize, Serialize};

/// An RGBA color, written as `#RRGGBB` or `#RRGGBBAA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl FromStr for Color {
    type Err = DublineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        let channel = |range: std::ops::Range<usize>| {
            hex.get(range)
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .ok_or_else(|| DublineError::config(format!("Invalid hex color: {s}")))
        };

        match hex.len() {
            6 => Ok(Color::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?)),
            8 => Ok(Color::rgba(
                channel(0..2)?,
                channel(2..4)?,
                channel(4..6)?,
                channel(6..8)?,
            )),
            _ => Err(DublineError::config(format!("Invalid hex color: {s}"))),
        }
    }
}

impl TryFrom<String> for Color {
    type Error = DublineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 255 {
            write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        } else {
            write!(f, "#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
        }
    }
}

/// Caption font weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontWeight {
    #[default]
    Normal,
    Bold,
    Black,
}

impl FontWeight {
    pub fn is_bold(self) -> bool {
        !matches!(self, FontWeight::Normal)
    }
}

/// A named caption look.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionStyle {
    pub name: String,
    pub text_color: Color,
    pub font_family: String,
    #[serde(default)]
    pub font_weight: FontWeight,
    #[serde(default)]
    pub stroke_color: Option<Color>,
    #[serde(default)]
    pub stroke_width: Option<f32>,
    #[serde(default)]
    pub background_color: Option<Color>,
    #[serde(default)]
    pub background_padding: Option<f32>,
    #[serde(default)]
    pub border_radius: Option<f32>,
    #[serde(default)]
    pub shadow_color: Option<Color>,
    #[serde(default)]
    pub shadow_blur: Option<f32>,
    #[serde(default)]
    pub shadow_offset_x: Option<f32>,
    #[serde(default)]
    pub shadow_offset_y: Option<f32>,
    #[serde(default)]
    pub is_neon: bool,
}

impl CaptionStyle {
    fn base(name: &str, text_color: Color) -> Self {
        Self {
            name: name.to_string(),
            text_color,
            font_family: "sans-serif".to_string(),
            font_weight: FontWeight::Bold,
            stroke_color: None,
            stroke_width: None,
            background_color: None,
            background_padding: None,
            border_radius: None,
            shadow_color: None,
            shadow_blur: None,
            shadow_offset_x: None,
            shadow_offset_y: None,
            is_neon: false,
        }
    }

    /// White text with a dark outline.
    pub fn classic() -> Self {
        Self {
            stroke_color: Some(Color::BLACK),
            stroke_width: Some(4.0),
            shadow_color: Some(Color::rgba(0, 0, 0, 160)),
            shadow_blur: Some(4.0),
            shadow_offset_x: Some(2.0),
            shadow_offset_y: Some(2.0),
            ..Self::base("Classic", Color::WHITE)
        }
    }

    /// White text on a solid dark box.
    pub fn black_box() -> Self {
        Self {
            background_color: Some(Color::rgba(0, 0, 0, 217)),
            background_padding: Some(12.0),
            border_radius: Some(8.0),
            ..Self::base("Black Box", Color::WHITE)
        }
    }

    /// Glowing text.
    pub fn neon() -> Self {
        Self {
            shadow_color: Some(Color::rgb(0, 255, 255)),
            shadow_blur: Some(18.0),
            is_neon: true,
            ..Self::base("Neon", Color::rgb(224, 255, 255))
        }
    }

    /// Heavy yellow text with a thick outline.
    pub fn yellow_pop() -> Self {
        Self {
            font_weight: FontWeight::Black,
            stroke_color: Some(Color::BLACK),
            stroke_width: Some(6.0),
            ..Self::base("Yellow Pop", Color::rgb(255, 221, 0))
        }
    }

    /// Plain text with a soft shadow.
    pub fn minimal() -> Self {
        Self {
            font_weight: FontWeight::Normal,
            shadow_color: Some(Color::rgba(0, 0, 0, 128)),
            shadow_blur: Some(6.0),
            shadow_offset_y: Some(1.0),
            ..Self::base("Minimal", Color::WHITE)
        }
    }

    /// Whether any shadow parameter is set.
    pub fn has_shadow(&self) -> bool {
        self.shadow_color.is_some() || self.is_neon
    }
}

/// Built-in presets, in display order.
pub fn builtin_styles() -> Vec<CaptionStyle> {
    vec![
        CaptionStyle::classic(),
        CaptionStyle::black_box(),
        CaptionStyle::neon(),
        CaptionStyle::yellow_pop(),
        CaptionStyle::minimal(),
    ]
}

/// Preset lookup over built-ins plus user-supplied styles.
#[derive(Debug, Clone)]
pub struct StyleLibrary {
    styles: Vec<CaptionStyle>,
}

impl Default for StyleLibrary {
    fn default() -> Self {
        Self {
            styles: builtin_styles(),
        }
    }
}

impl StyleLibrary {
    /// Built-ins plus styles from a JSON array file. A user style with the
    /// same name as a built-in replaces it.
    pub fn with_file(path: &Path) -> DublineResult<Self> {
        if !path.exists() {
            return Err(DublineError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let extra: Vec<CaptionStyle> = serde_json::from_str(&content)?;
        let mut library = Self::default();
        for style in extra {
            library.insert(style);
        }
        Ok(library)
    }

    /// Library for the configured caption defaults. A broken style file is
    /// logged and ignored.
    pub fn from_defaults(defaults: &CaptionDefaults) -> Self {
        match &defaults.style_file {
            Some(path) => Self::with_file(path).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring style file");
                Self::default()
            }),
            None => Self::default(),
        }
    }

    pub fn insert(&mut self, style: CaptionStyle) {
        match self.styles.iter_mut().find(|s| s.name == style.name) {
            Some(existing) => *existing = style,
            None => self.styles.push(style),
        }
    }

    /// Case-insensitive lookup by name.
    pub fn get(&self, name: &str) -> Option<&CaptionStyle> {
        self.styles
            .iter()
            .find(|style| style.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn styles(&self) -> &[CaptionStyle] {
        &self.styles
    }
}

/// Caption knobs independent of the style preset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionOptions {
    pub enabled: bool,
    pub font_scale: f64,
    /// Bottom edge of the caption, percent of canvas height from the bottom.
    pub vertical_position: f64,
    pub uppercase: bool,
}

impl Default for CaptionOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            font_scale: 1.0,
            vertical_position: 10.0,
            uppercase: false,
        }
    }
}

impl CaptionOptions {
    pub fn from_defaults(defaults: &CaptionDefaults) -> Self {
        Self {
            enabled: defaults.enabled,
            font_scale: defaults.font_scale,
            vertical_position: defaults.vertical_position,
            uppercase: defaults.uppercase,
        }
        .clamped()
    }

    /// Pull knobs into range: position `0..=100`, scale positive.
    pub fn clamped(self) -> Self {
        let font_scale = if self.font_scale.is_finite() && self.font_scale > 0.0 {
            self.font_scale
        } else {
            1.0
        };
        let vertical_position = if self.vertical_position.is_finite() {
            self.vertical_position.clamp(0.0, 100.0)
        } else {
            10.0
        };
        Self {
            font_scale,
            vertical_position,
            ..self
        }
    }
}
