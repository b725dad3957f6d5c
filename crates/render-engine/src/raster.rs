//! Software canvas over an RGBA pixel buffer.
//!
//! Glyphs come from `fontdue`; every text or shape draw is first rendered
//! into a coverage mask, which is then composited once for the shadow (if
//! any) and once for the paint itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dubline_common::config::FontConfig;
use dubline_common::error::{DublineError, DublineResult};
use dubline_cue_model::geometry::{CropRect, ExportGeometry};
use dubline_cue_model::style::{Color, FontWeight};
use fontdue::{Font, FontSettings};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgba, RgbaImage};

use crate::canvas::{Canvas, CanvasFactory, FontSpec, Rect, Shadow, TextAnchor};

/// Largest canvas side we agree to allocate.
const MAX_CANVAS_SIDE: u32 = 8192;

/// Well-known locations of a regular sans face, tried in order.
const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

const SYSTEM_BOLD_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Bold.ttf",
    "/usr/share/fonts/noto/NotoSans-Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "/Library/Fonts/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

/// Resolves CSS-style family lists to loaded fonts.
#[derive(Default)]
pub struct FontBook {
    default: Option<Arc<Font>>,
    default_bold: Option<Arc<Font>>,
    default_path: Option<PathBuf>,
    /// Lowercased family name, or `family:bold`.
    families: HashMap<String, Arc<Font>>,
}

impl FontBook {
    /// A book with no fonts; every text draw fails.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the configured fonts, falling back to well-known system faces
    /// for the default.
    pub fn from_config(config: &FontConfig) -> DublineResult<Self> {
        let mut book = Self::default();

        for (name, path) in &config.families {
            let font = load_font(path)?;
            book.families
                .insert(name.trim().to_ascii_lowercase(), Arc::new(font));
        }

        let default_path = match &config.default_font {
            Some(path) => Some(path.clone()),
            None => first_existing(SYSTEM_FONT_CANDIDATES),
        };
        if let Some(path) = default_path {
            book.default = Some(Arc::new(load_font(&path)?));
            book.default_path = Some(path);
        } else {
            tracing::warn!("No default font found; captions cannot be drawn");
        }

        if config.default_font.is_none() {
            if let Some(path) = first_existing(SYSTEM_BOLD_CANDIDATES) {
                match load_font(&path) {
                    Ok(font) => book.default_bold = Some(Arc::new(font)),
                    Err(e) => tracing::debug!(error = %e, "Skipping system bold face"),
                }
            }
        }

        tracing::debug!(
            families = book.families.len(),
            default = ?book.default_path,
            bold = book.default_bold.is_some(),
            "Font book loaded"
        );
        Ok(book)
    }

    /// A book whose default face is the given font data.
    pub fn from_bytes(data: &[u8]) -> DublineResult<Self> {
        let font = Font::from_bytes(data, FontSettings::default())
            .map_err(|e| DublineError::render(format!("Failed to parse font: {e}")))?;
        Ok(Self {
            default: Some(Arc::new(font)),
            ..Self::default()
        })
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn default_path(&self) -> Option<&Path> {
        self.default_path.as_deref()
    }

    /// Pick a face for a comma-separated family list. The flag is true
    /// when a bold weight was asked for but only a regular face exists.
    pub fn resolve(&self, family_list: &str, weight: FontWeight) -> Option<(&Font, bool)> {
        let bold = weight.is_bold();

        for family in family_list.split(',') {
            let family = family.trim().trim_matches(|c| c == '"' || c == '\'');
            let key = family.to_ascii_lowercase();
            if bold {
                if let Some(font) = self.families.get(&format!("{key}:bold")) {
                    return Some((font.as_ref(), false));
                }
            }
            if let Some(font) = self.families.get(&key) {
                return Some((font.as_ref(), bold));
            }
        }

        if bold {
            if let Some(font) = &self.default_bold {
                return Some((font.as_ref(), false));
            }
        }
        self.default.as_deref().map(|font| (font, bold))
    }
}

fn load_font(path: &Path) -> DublineResult<Font> {
    if !path.exists() {
        return Err(DublineError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let data = std::fs::read(path)?;
    Font::from_bytes(data.as_slice(), FontSettings::default()).map_err(|e| {
        DublineError::render(format!("Failed to load font '{}': {e}", path.display()))
    })
}

fn first_existing(candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

/// Coverage mask positioned on the canvas.
struct Mask {
    x0: i32,
    y0: i32,
    coverage: GrayImage,
}

/// Canvas backed by an [`RgbaImage`].
pub struct RasterCanvas {
    image: RgbaImage,
    fonts: Arc<FontBook>,
    shadow: Option<Shadow>,
}

impl RasterCanvas {
    pub fn new(geometry: ExportGeometry, fonts: Arc<FontBook>) -> DublineResult<Self> {
        if geometry.width > MAX_CANVAS_SIDE || geometry.height > MAX_CANVAS_SIDE {
            return Err(DublineError::render(format!(
                "Canvas {}x{} exceeds the {MAX_CANVAS_SIDE}px limit",
                geometry.width, geometry.height
            )));
        }
        Ok(Self {
            image: RgbaImage::from_pixel(geometry.width, geometry.height, Rgba([0, 0, 0, 255])),
            fonts,
            shadow: None,
        })
    }

    /// Factory for the export loop.
    pub fn factory(fonts: Arc<FontBook>) -> CanvasFactory {
        Box::new(move |geometry| {
            let canvas = RasterCanvas::new(geometry, fonts.clone())?;
            Ok(Box::new(canvas) as Box<dyn Canvas>)
        })
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    fn font_for(&self, spec: &FontSpec) -> DublineResult<(&Font, bool)> {
        self.fonts
            .resolve(&spec.family, spec.weight)
            .ok_or_else(|| DublineError::render(format!("No font available for '{}'", spec.family)))
    }

    /// Extra mask margin so the shadow blur has room to spread.
    fn shadow_margin(&self) -> u32 {
        self.shadow
            .map(|s| (s.blur.max(0.0) * 1.5).ceil() as u32)
            .unwrap_or(0)
    }

    fn text_mask(&self, text: &str, anchor: TextAnchor, spec: &FontSpec, extra: u32) -> DublineResult<Mask> {
        let (font, faux_bold) = self.font_for(spec)?;
        let size = spec.size_px.max(1.0);
        let embolden = if faux_bold {
            (size / 24.0).ceil().max(1.0) as u32
        } else {
            0
        };
        let margin = extra + embolden + self.shadow_margin() + 2;

        let (ascent, descent) = font
            .horizontal_line_metrics(size)
            .map(|m| (m.ascent, m.descent))
            .unwrap_or((size * 0.8, -size * 0.2));
        let width = advance_width(font, text, size);
        let left = anchor.center_x - width / 2.0;
        let baseline = anchor.bottom_y + descent;

        let x0 = left.floor() as i32 - margin as i32;
        let y0 = (baseline - ascent).floor() as i32 - margin as i32;
        let mask_w = width.ceil() as u32 + 2 * margin + 1;
        let mask_h = (ascent - descent).ceil() as u32 + 2 * margin + 1;
        let mut coverage = GrayImage::new(mask_w.max(1), mask_h.max(1));

        let mut pen = 0.0f32;
        let mut prev = None;
        for ch in text.chars() {
            if let Some(p) = prev {
                pen += font.horizontal_kern(p, ch, size).unwrap_or(0.0);
            }
            let (metrics, bitmap) = font.rasterize(ch, size);
            let gx = (left + pen).round() as i32 + metrics.xmin - x0;
            let gy = baseline.round() as i32 - metrics.ymin - metrics.height as i32 - y0;

            for (i, &alpha) in bitmap.iter().enumerate() {
                if alpha == 0 {
                    continue;
                }
                let px = gx + (i % metrics.width) as i32;
                let py = gy + (i / metrics.width) as i32;
                if px < 0 || py < 0 || px >= mask_w as i32 || py >= mask_h as i32 {
                    continue;
                }
                let cell = coverage.get_pixel_mut(px as u32, py as u32);
                cell.0[0] = cell.0[0].max(alpha);
            }

            pen += metrics.advance_width;
            prev = Some(ch);
        }

        if embolden > 0 {
            coverage = dilate(&coverage, embolden);
        }

        Ok(Mask { x0, y0, coverage })
    }

    fn rect_mask(&self, rect: Rect, radius: f32) -> Mask {
        let margin = self.shadow_margin() as i32 + 1;
        let x0 = rect.x.floor() as i32 - margin;
        let y0 = rect.y.floor() as i32 - margin;
        let mask_w = (rect.width.ceil() as i32 + 2 * margin + 1).max(1) as u32;
        let mask_h = (rect.height.ceil() as i32 + 2 * margin + 1).max(1) as u32;

        let half_w = rect.width / 2.0;
        let half_h = rect.height / 2.0;
        let r = radius.max(0.0).min(half_w).min(half_h);
        let cx = rect.x + half_w;
        let cy = rect.y + half_h;

        let coverage = GrayImage::from_fn(mask_w, mask_h, |mx, my| {
            let px = (x0 + mx as i32) as f32 + 0.5;
            let py = (y0 + my as i32) as f32 + 0.5;
            let qx = (px - cx).abs() - (half_w - r);
            let qy = (py - cy).abs() - (half_h - r);
            let outside = (qx.max(0.0).powi(2) + qy.max(0.0).powi(2)).sqrt() + qx.max(qy).min(0.0) - r;
            let value = (0.5 - outside).clamp(0.0, 1.0);
            Luma([(value * 255.0).round() as u8])
        });

        Mask { x0, y0, coverage }
    }

    /// Composite the current shadow (if any) and then `color` through the
    /// mask.
    fn paint(&mut self, mask: &Mask, color: Color) {
        if let Some(shadow) = self.shadow.filter(|s| s.color.a > 0) {
            let sigma = shadow.blur.max(0.0) / 2.0;
            let blurred;
            let shadow_mask = if sigma > 0.1 {
                blurred = imageops::blur(&mask.coverage, sigma);
                &blurred
            } else {
                &mask.coverage
            };
            self.composite(
                shadow_mask,
                mask.x0 + shadow.offset_x.round() as i32,
                mask.y0 + shadow.offset_y.round() as i32,
                shadow.color,
            );
        }
        self.composite(&mask.coverage, mask.x0, mask.y0, color);
    }

    fn composite(&mut self, coverage: &GrayImage, x0: i32, y0: i32, color: Color) {
        let (width, height) = self.image.dimensions();
        let color_alpha = color.a as f32 / 255.0;

        for (mx, my, value) in coverage.enumerate_pixels() {
            if value.0[0] == 0 {
                continue;
            }
            let x = x0 + mx as i32;
            let y = y0 + my as i32;
            if x < 0 || y < 0 || x >= width as i32 || y >= height as i32 {
                continue;
            }
            let alpha = value.0[0] as f32 / 255.0 * color_alpha;
            let pixel = self.image.get_pixel_mut(x as u32, y as u32);
            let paint = [color.r, color.g, color.b];
            for (channel, &value) in pixel.0.iter_mut().take(3).zip(paint.iter()) {
                *channel = ((1.0 - alpha) * *channel as f32 + alpha * value as f32).round() as u8;
            }
            let dst_alpha = pixel.0[3] as f32 / 255.0;
            pixel.0[3] = ((alpha + dst_alpha * (1.0 - alpha)) * 255.0).round() as u8;
        }
    }
}

impl Canvas for RasterCanvas {
    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn fill(&mut self, color: Color) {
        let pixel = Rgba(color.to_array());
        for p in self.image.pixels_mut() {
            *p = pixel;
        }
    }

    fn draw_image(&mut self, frame: &RgbaImage, crop: CropRect) {
        if crop.is_empty() {
            return;
        }
        let region = imageops::crop_imm(frame, crop.x, crop.y, crop.width, crop.height).to_image();
        let scaled = if region.dimensions() == self.image.dimensions() {
            region
        } else {
            imageops::resize(&region, self.image.width(), self.image.height(), FilterType::Triangle)
        };
        imageops::overlay(&mut self.image, &scaled, 0, 0);
    }

    fn set_shadow(&mut self, shadow: Option<Shadow>) {
        self.shadow = shadow;
    }

    fn measure_text(&mut self, text: &str, font: &FontSpec) -> DublineResult<f32> {
        let (face, faux_bold) = self.font_for(font)?;
        let width = advance_width(face, text, font.size_px.max(1.0));
        let embolden = if faux_bold {
            (font.size_px / 24.0).ceil().max(1.0) * 2.0
        } else {
            0.0
        };
        Ok(width + embolden)
    }

    fn fill_rounded_rect(&mut self, rect: Rect, radius: f32, color: Color) {
        if rect.width <= 0.0 || rect.height <= 0.0 {
            return;
        }
        let mask = self.rect_mask(rect, radius);
        self.paint(&mask, color);
    }

    fn stroke_text(
        &mut self,
        text: &str,
        anchor: TextAnchor,
        font: &FontSpec,
        color: Color,
        width: f32,
    ) -> DublineResult<()> {
        let radius = (width.max(0.0) / 2.0).ceil() as u32;
        let glyphs = self.text_mask(text, anchor, font, radius)?;
        let outline = Mask {
            coverage: dilate(&glyphs.coverage, radius),
            ..glyphs
        };
        self.paint(&outline, color);
        Ok(())
    }

    fn fill_text(
        &mut self,
        text: &str,
        anchor: TextAnchor,
        font: &FontSpec,
        color: Color,
    ) -> DublineResult<()> {
        let mask = self.text_mask(text, anchor, font, 0)?;
        self.paint(&mask, color);
        Ok(())
    }

    fn snapshot(&self) -> RgbaImage {
        self.image.clone()
    }
}

fn advance_width(font: &Font, text: &str, size: f32) -> f32 {
    let mut width = 0.0;
    let mut prev = None;
    for ch in text.chars() {
        if let Some(p) = prev {
            width += font.horizontal_kern(p, ch, size).unwrap_or(0.0);
        }
        width += font.metrics(ch, size).advance_width;
        prev = Some(ch);
    }
    width
}

/// Grow coverage outward by `radius` pixels (disk structuring element).
fn dilate(mask: &GrayImage, radius: u32) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    let r = radius as i32;
    let offsets: Vec<(i32, i32)> = (-r..=r)
        .flat_map(|dy| (-r..=r).map(move |dx| (dx, dy)))
        .filter(|(dx, dy)| dx * dx + dy * dy <= r * r)
        .collect();

    let (width, height) = mask.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let mut best = 0u8;
        for &(dx, dy) in &offsets {
            let sx = x as i32 + dx;
            let sy = y as i32 + dy;
            if sx < 0 || sy < 0 || sx >= width as i32 || sy >= height as i32 {
                continue;
            }
            best = best.max(mask.get_pixel(sx as u32, sy as u32).0[0]);
            if best == 255 {
                break;
            }
        }
        Luma([best])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas(width: u32, height: u32) -> RasterCanvas {
        RasterCanvas::new(ExportGeometry::new(width, height), Arc::new(FontBook::empty())).unwrap()
    }

    fn system_fonts() -> Option<Arc<FontBook>> {
        let book = FontBook::from_config(&FontConfig::default()).ok()?;
        book.has_default().then(|| Arc::new(book))
    }

    #[test]
    fn test_fill_and_snapshot() {
        let mut c = canvas(4, 3);
        c.fill(Color::rgb(10, 20, 30));
        let snap = c.snapshot();
        assert_eq!(snap.dimensions(), (4, 3));
        assert_eq!(snap.get_pixel(3, 2).0, [10, 20, 30, 255]);
    }

    #[test]
    fn test_draw_image_scales_crop_over_canvas() {
        let mut frame = RgbaImage::from_pixel(8, 4, Rgba([255, 0, 0, 255]));
        for y in 0..4 {
            for x in 0..2 {
                frame.put_pixel(x, y, Rgba([0, 0, 255, 255]));
            }
        }
        let mut c = canvas(4, 4);
        // Centered 4x4 crop skips the blue strip on the left.
        c.draw_image(&frame, CropRect { x: 2, y: 0, width: 4, height: 4 });
        assert_eq!(c.image().get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(c.image().get_pixel(3, 3).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_rounded_rect_covers_center_not_corners() {
        let mut c = canvas(40, 40);
        c.fill(Color::BLACK);
        c.fill_rounded_rect(Rect::new(0.0, 0.0, 40.0, 40.0), 12.0, Color::WHITE);
        assert_eq!(c.image().get_pixel(20, 20).0, [255, 255, 255, 255]);
        assert_eq!(c.image().get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn test_shadow_paints_offset() {
        let mut c = canvas(30, 30);
        c.fill(Color::WHITE);
        c.set_shadow(Some(Shadow {
            color: Color::BLACK,
            blur: 0.0,
            offset_x: 10.0,
            offset_y: 0.0,
        }));
        c.fill_rounded_rect(Rect::new(5.0, 5.0, 10.0, 10.0), 0.0, Color::rgb(255, 0, 0));
        // Shadow lands to the right of the red square.
        assert_eq!(c.image().get_pixel(22, 10).0, [0, 0, 0, 255]);
        assert_eq!(c.image().get_pixel(10, 10).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_dilate_grows_by_radius() {
        let mut mask = GrayImage::new(9, 9);
        mask.put_pixel(4, 4, Luma([255]));
        let grown = dilate(&mask, 2);
        assert_eq!(grown.get_pixel(6, 4).0[0], 255);
        assert_eq!(grown.get_pixel(4, 2).0[0], 255);
        assert_eq!(grown.get_pixel(6, 6).0[0], 0);
    }

    #[test]
    fn test_text_without_fonts_errors() {
        let mut c = canvas(10, 10);
        let spec = FontSpec {
            family: "Inter".to_string(),
            size_px: 20.0,
            weight: FontWeight::Normal,
        };
        assert!(c.measure_text("hi", &spec).is_err());
    }

    #[test]
    fn test_oversized_canvas_rejected() {
        let result = RasterCanvas::new(ExportGeometry::new(100_000, 10), Arc::new(FontBook::empty()));
        assert!(result.is_err());
    }

    #[test]
    fn test_fill_text_marks_pixels_when_fonts_exist() {
        let Some(fonts) = system_fonts() else {
            return;
        };
        let mut c = RasterCanvas::new(ExportGeometry::new(200, 60), fonts).unwrap();
        c.fill(Color::BLACK);
        let spec = FontSpec {
            family: "sans-serif".to_string(),
            size_px: 32.0,
            weight: FontWeight::Bold,
        };
        let width = c.measure_text("Hello", &spec).unwrap();
        assert!(width > 0.0);
        c.fill_text(
            "Hello",
            TextAnchor {
                center_x: 100.0,
                bottom_y: 50.0,
            },
            &spec,
            Color::WHITE,
        )
        .unwrap();
        assert!(c.image().pixels().any(|p| p.0[0] > 128));
    }
}
