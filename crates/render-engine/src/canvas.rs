//! The 2D drawing surface the compositor paints on.
//!
//! The surface is stateful in the same places an HTML canvas is: a shadow
//! set with [`Canvas::set_shadow`] applies to every subsequent draw until it
//! is cleared.

use dubline_common::error::DublineResult;
use dubline_cue_model::geometry::CropRect;
use dubline_cue_model::style::{Color, FontWeight};
use image::RgbaImage;

/// An axis-aligned rectangle in canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// Font selection for a text draw.
#[derive(Debug, Clone, PartialEq)]
pub struct FontSpec {
    pub family: String,
    pub size_px: f32,
    pub weight: FontWeight,
}

/// Where a line of text sits: horizontally centered on `center_x`, with
/// the bottom of its line box on `bottom_y`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextAnchor {
    pub center_x: f32,
    pub bottom_y: f32,
}

/// Drop shadow or glow applied to subsequent draws.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shadow {
    pub color: Color,
    pub blur: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl Shadow {
    /// A centered glow.
    pub fn glow(color: Color, blur: f32) -> Self {
        Self {
            color,
            blur,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }
}

/// A drawing surface.
pub trait Canvas {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Fill the whole surface, ignoring any shadow.
    fn fill(&mut self, color: Color);

    /// Scale the `crop` region of `frame` over the whole surface.
    fn draw_image(&mut self, frame: &RgbaImage, crop: CropRect);

    /// Set or clear the shadow used by later draws.
    fn set_shadow(&mut self, shadow: Option<Shadow>);

    /// Advance width of `text` in pixels.
    fn measure_text(&mut self, text: &str, font: &FontSpec) -> DublineResult<f32>;

    fn fill_rounded_rect(&mut self, rect: Rect, radius: f32, color: Color);

    /// Outline the glyphs of `text` with a pen `width` pixels wide.
    fn stroke_text(
        &mut self,
        text: &str,
        anchor: TextAnchor,
        font: &FontSpec,
        color: Color,
        width: f32,
    ) -> DublineResult<()>;

    fn fill_text(
        &mut self,
        text: &str,
        anchor: TextAnchor,
        font: &FontSpec,
        color: Color,
    ) -> DublineResult<()>;

    /// Copy of the current pixels.
    fn snapshot(&self) -> RgbaImage;
}

/// Builds the export canvas once the output geometry is known.
pub type CanvasFactory =
    Box<dyn FnMut(dubline_cue_model::geometry::ExportGeometry) -> DublineResult<Box<dyn Canvas>>>;
