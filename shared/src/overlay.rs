//! Drawing surface and the detection overlay painted on it.
//!
//! [`Surface`] mirrors the handful of 2D-context calls the overlay needs.
//! [`Canvas`] is the in-memory implementation: it rasterizes into an RGBA
//! buffer and keeps a log of the calls made since the last clear, which is
//! what native shells replay onto their own canvas.

use image::imageops;
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::image_processing::DecodedImage;
use crate::normalize::Detection;
use crate::to_fixed;

pub const OVERLAY_COLOR: &str = "#00fff0";
pub const OVERLAY_RGBA: Rgba<u8> = Rgba([0x00, 0xff, 0xf0, 0xff]);
pub const LINE_WIDTH: f64 = 3.0;
pub const SHADOW_BLUR: f64 = 10.0;
pub const LABEL_FONT: &str = "16px Poppins";
/// Gap between a box's top edge and its label baseline.
pub const LABEL_OFFSET_Y: f64 = 6.0;

const GLYPH_SCALE: i32 = 2;
const GLYPH_ADVANCE: i32 = 6;
const GLYPH_ROWS: i32 = 7;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrokeStyle {
    pub color: String,
    pub line_width: f64,
    pub shadow_color: String,
    pub shadow_blur: f64,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            color: OVERLAY_COLOR.into(),
            line_width: LINE_WIDTH,
            shadow_color: OVERLAY_COLOR.into(),
            shadow_blur: SHADOW_BLUR,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextStyle {
    pub color: String,
    pub font: String,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            color: OVERLAY_COLOR.into(),
            font: LABEL_FONT.into(),
        }
    }
}

pub trait Surface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Resizing discards the current contents.
    fn resize(&mut self, width: u32, height: u32);
    fn clear(&mut self);
    fn draw_image(&mut self, image: &DecodedImage, x: f64, y: f64);
    fn stroke_rect(&mut self, x: f64, y: f64, width: f64, height: f64, style: &StrokeStyle);
    /// `y` is the text baseline.
    fn fill_text(&mut self, text: &str, x: f64, y: f64, style: &TextStyle);
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawOp {
    Image {
        x: f64,
        y: f64,
        width: u32,
        height: u32,
    },
    StrokeRect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        style: StrokeStyle,
    },
    FillText {
        text: String,
        x: f64,
        y: f64,
        style: TextStyle,
    },
}

#[derive(Clone, PartialEq)]
pub struct Canvas {
    raster: RgbaImage,
    ops: Vec<DrawOp>,
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl Canvas {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            raster: RgbaImage::new(width, height),
            ops: Vec::new(),
        }
    }

    #[must_use]
    pub fn raster(&self) -> &RgbaImage {
        &self.raster
    }

    /// Calls made since the surface was last cleared, in paint order.
    #[must_use]
    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    #[must_use]
    pub fn rect_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, DrawOp::StrokeRect { .. }))
            .count()
    }

    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::FillText { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// True when nothing has been painted since the last clear.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.ops.is_empty() && self.raster.pixels().all(|p| p.0[3] == 0)
    }
}

impl std::fmt::Debug for Canvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canvas")
            .field("width", &self.raster.width())
            .field("height", &self.raster.height())
            .field("ops", &self.ops.len())
            .finish()
    }
}

impl Surface for Canvas {
    fn width(&self) -> u32 {
        self.raster.width()
    }

    fn height(&self) -> u32 {
        self.raster.height()
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.raster = RgbaImage::new(width, height);
        self.ops.clear();
    }

    fn clear(&mut self) {
        for pixel in self.raster.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
        self.ops.clear();
    }

    fn draw_image(&mut self, image: &DecodedImage, x: f64, y: f64) {
        imageops::replace(&mut self.raster, image.raster(), to_px(x).into(), to_px(y).into());
        self.ops.push(DrawOp::Image {
            x,
            y,
            width: image.width(),
            height: image.height(),
        });
    }

    fn stroke_rect(&mut self, x: f64, y: f64, width: f64, height: f64, style: &StrokeStyle) {
        let left = to_px(x);
        let top = to_px(y);
        let right = to_px(x + width);
        let bottom = to_px(y + height);
        let half = to_px(style.line_width / 2.0).max(0);
        for inset in -half..=half {
            draw_rectangle(
                &mut self.raster,
                left - inset,
                top - inset,
                right + inset,
                bottom + inset,
                OVERLAY_RGBA,
            );
        }
        self.ops.push(DrawOp::StrokeRect {
            x,
            y,
            width,
            height,
            style: style.clone(),
        });
    }

    fn fill_text(&mut self, text: &str, x: f64, y: f64, style: &TextStyle) {
        let top = to_px(y) - GLYPH_ROWS * GLYPH_SCALE;
        draw_label(&mut self.raster, to_px(x), top, text, OVERLAY_RGBA);
        self.ops.push(DrawOp::FillText {
            text: text.to_string(),
            x,
            y,
            style: style.clone(),
        });
    }
}

/// Label painted above a detection box.
#[must_use]
pub fn label(confidence: f64) -> String {
    format!("Helmet {}%", to_fixed(confidence * 100.0, 1))
}

/// Sizes the surface to the image's natural dimensions and paints it at the
/// origin.
pub fn paint_baseline<S: Surface + ?Sized>(surface: &mut S, base: &DecodedImage) {
    surface.resize(base.width(), base.height());
    surface.draw_image(base, 0.0, 0.0);
}

/// Repaints `base` and draws one box and label per detection, in the order
/// given. Later boxes paint over earlier ones.
pub fn render<S: Surface + ?Sized>(surface: &mut S, base: &DecodedImage, detections: &[Detection]) {
    let stroke = StrokeStyle::default();
    let text = TextStyle::default();

    surface.clear();
    surface.draw_image(base, 0.0, 0.0);

    for detection in detections {
        surface.stroke_rect(
            detection.x1,
            detection.y1,
            detection.width(),
            detection.height(),
            &stroke,
        );
        surface.fill_text(
            &label(detection.confidence),
            detection.x1,
            detection.y1 - LABEL_OFFSET_Y,
            &text,
        );
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_px(v: f64) -> i32 {
    if v.is_nan() {
        return 0;
    }
    v.round().clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn draw_rectangle(image: &mut RgbaImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgba<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 {
        return;
    }
    // Boxes entirely off the surface leave no trace.
    if right < 0 || bottom < 0 || left >= width || top >= height {
        return;
    }

    let x0 = left.clamp(0, width - 1);
    let x1 = right.clamp(0, width - 1);
    let y0 = top.clamp(0, height - 1);
    let y1 = bottom.clamp(0, height - 1);

    for x in x0..=x1 {
        if top >= 0 {
            image.put_pixel(x as u32, y0 as u32, color);
        }
        if bottom < height {
            image.put_pixel(x as u32, y1 as u32, color);
        }
    }
    for y in y0..=y1 {
        if left >= 0 {
            image.put_pixel(x0 as u32, y as u32, color);
        }
        if right < width {
            image.put_pixel(x1 as u32, y as u32, color);
        }
    }
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn draw_label(image: &mut RgbaImage, mut x: i32, top: i32, text: &str, color: Rgba<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;

    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in (0_i32..).zip(glyph.iter()) {
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 0 {
                        continue;
                    }
                    for dy in 0..GLYPH_SCALE {
                        for dx in 0..GLYPH_SCALE {
                            let px = x + col * GLYPH_SCALE + dx;
                            let py = top + row * GLYPH_SCALE + dy;
                            if (0..width).contains(&px) && (0..height).contains(&py) {
                                image.put_pixel(px as u32, py as u32, color);
                            }
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE * GLYPH_SCALE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'E' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'H' => Some([
            0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'L' => Some([
            0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'M' => Some([
            0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001,
        ]),
        'T' => Some([
            0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100,
        ]),
        '0' => Some([
            0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110,
        ]),
        '1' => Some([
            0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        '2' => Some([
            0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111,
        ]),
        '3' => Some([
            0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110,
        ]),
        '4' => Some([
            0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010,
        ]),
        '5' => Some([
            0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        '6' => Some([
            0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110,
        ]),
        '7' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000,
        ]),
        '8' => Some([
            0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110,
        ]),
        '9' => Some([
            0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100,
        ]),
        '%' => Some([
            0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000,
        ]),
        '.' => Some([0, 0, 0, 0, 0, 0b00110, 0b00110]),
        '-' => Some([0, 0, 0, 0b11111, 0, 0, 0]),
        ' ' => Some([0, 0, 0, 0, 0, 0, 0]),
        _ => None,
    }
}
