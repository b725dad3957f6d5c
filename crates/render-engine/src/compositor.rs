//! Frame compositor: combines the source frame with the active caption.
//!
//! Each frame is painted in a fixed order: background fill, crop-to-fill
//! source image, then (when a cue is active) the caption box, shadow,
//! stroke and fill passes.

use dubline_common::error::DublineResult;
use dubline_cue_model::cue::Cue;
use dubline_cue_model::geometry::{CropRect, ExportGeometry};
use dubline_cue_model::style::{CaptionOptions, CaptionStyle, Color};
use image::RgbaImage;

use crate::canvas::{Canvas, FontSpec, Rect, Shadow, TextAnchor};

/// Smallest caption font before scaling, in pixels.
pub const MIN_FONT_PX: f32 = 20.0;

/// Caption font size as a fraction of canvas height.
pub const FONT_HEIGHT_RATIO: f32 = 0.05;

/// Blur used for neon glows without an explicit shadow blur.
const DEFAULT_GLOW_BLUR: f32 = 20.0;

const DEFAULT_STROKE_WIDTH: f32 = 2.0;

/// A single frame's composition, as recorded by the export loop.
#[derive(Debug, Clone)]
pub struct FrameComposition {
    /// Frame number.
    pub frame_index: u64,

    /// Primary time the frame was composed for.
    pub time_secs: f64,

    /// Source region drawn over the canvas.
    pub crop: CropRect,

    /// Index of the active cue in the timeline.
    pub cue_index: Option<usize>,

    /// Caption placement, when one was drawn.
    pub caption: Option<CaptionLayout>,

    /// Export progress after this frame, `0..=100`.
    pub progress: f64,
}

/// Where and how a caption was laid out.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionLayout {
    /// Text as drawn (after uppercasing).
    pub text: String,
    pub font: FontSpec,
    pub anchor: TextAnchor,
    /// Background box, when the style has one.
    pub background: Option<Rect>,
}

/// What [`FrameCompositor::render_frame`] drew.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFrame {
    pub crop: CropRect,
    pub caption: Option<CaptionLayout>,
}

/// Font size for a canvas of the given height.
pub fn caption_font_px(canvas_height: u32, font_scale: f64) -> f32 {
    (canvas_height as f32 * FONT_HEIGHT_RATIO).max(MIN_FONT_PX) * font_scale as f32
}

/// Paints output frames.
#[derive(Debug, Clone)]
pub struct FrameCompositor {
    background: Color,
}

impl Default for FrameCompositor {
    fn default() -> Self {
        Self::new(Color::BLACK)
    }
}

impl FrameCompositor {
    pub fn new(background: Color) -> Self {
        Self { background }
    }

    pub fn background(&self) -> Color {
        self.background
    }

    /// Paint one frame: `source` scaled to cover the canvas, plus the
    /// caption for `cue` if there is one and captions are enabled.
    pub fn render_frame(
        &self,
        canvas: &mut dyn Canvas,
        source: &RgbaImage,
        cue: Option<&Cue>,
        style: &CaptionStyle,
        options: &CaptionOptions,
    ) -> DublineResult<RenderedFrame> {
        canvas.set_shadow(None);
        canvas.fill(self.background);

        let geometry = ExportGeometry::new(canvas.width(), canvas.height());
        let crop = geometry.crop_to_fill(source.width(), source.height());
        if !crop.is_empty() {
            canvas.draw_image(source, crop);
        }

        let caption = match cue {
            Some(cue) if options.enabled => Some(self.draw_caption(canvas, cue, style, options)?),
            _ => None,
        };

        Ok(RenderedFrame { crop, caption })
    }

    fn draw_caption(
        &self,
        canvas: &mut dyn Canvas,
        cue: &Cue,
        style: &CaptionStyle,
        options: &CaptionOptions,
    ) -> DublineResult<CaptionLayout> {
        let width = canvas.width() as f32;
        let height = canvas.height() as f32;
        let options = options.clamped();

        let font = FontSpec {
            family: style.font_family.clone(),
            size_px: caption_font_px(canvas.height(), options.font_scale),
            weight: style.font_weight,
        };
        let text = if options.uppercase {
            cue.text.to_uppercase()
        } else {
            cue.text.clone()
        };

        let bottom = height - height * options.vertical_position as f32 / 100.0;
        let mut anchor = TextAnchor {
            center_x: width / 2.0,
            bottom_y: bottom,
        };

        let mut background = None;
        if let Some(box_color) = style.background_color {
            let padding = style.background_padding.unwrap_or(0.0).max(0.0);
            let text_width = canvas.measure_text(&text, &font)?;
            let rect_width = text_width + 2.0 * padding;
            let rect_height = font.size_px + 2.0 * padding;
            let rect = Rect::new(
                (width - rect_width) / 2.0,
                bottom - rect_height,
                rect_width,
                rect_height,
            );
            canvas.set_shadow(None);
            canvas.fill_rounded_rect(rect, style.border_radius.unwrap_or(0.0), box_color);
            anchor.bottom_y = bottom - padding;
            background = Some(rect);
        }

        canvas.set_shadow(text_shadow(style));

        if let Some(stroke) = style.stroke_color {
            let stroke_width = style.stroke_width.unwrap_or(DEFAULT_STROKE_WIDTH);
            canvas.stroke_text(&text, anchor, &font, stroke, stroke_width)?;
        }
        canvas.fill_text(&text, anchor, &font, style.text_color)?;

        if style.is_neon {
            // Second glow pass brightens the halo.
            canvas.fill_text(&text, anchor, &font, style.text_color)?;
        }

        canvas.set_shadow(None);

        Ok(CaptionLayout {
            text,
            font,
            anchor,
            background,
        })
    }
}

fn text_shadow(style: &CaptionStyle) -> Option<Shadow> {
    if style.is_neon {
        let color = style.shadow_color.unwrap_or(style.text_color);
        return Some(Shadow::glow(
            color,
            style.shadow_blur.unwrap_or(DEFAULT_GLOW_BLUR),
        ));
    }

    style.shadow_color.map(|color| Shadow {
        color,
        blur: style.shadow_blur.unwrap_or(0.0),
        offset_x: style.shadow_offset_x.unwrap_or(0.0),
        offset_y: style.shadow_offset_y.unwrap_or(0.0),
    })
}
