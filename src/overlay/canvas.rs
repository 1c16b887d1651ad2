use super::topology::Connection;
use crate::detection::Landmark;
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Parse `#RRGGBB` or `#RRGGBBAA`
pub fn parse_color(hex: &str) -> Option<Rgba<u8>> {
    let digits = hex.strip_prefix('#')?;
    if !matches!(digits.len(), 6 | 8) || !digits.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    let alpha = if digits.len() == 8 { channel(6)? } else { 255 };
    Some(Rgba([channel(0)?, channel(2)?, channel(4)?, alpha]))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawStyle {
    pub color: Rgba<u8>,
    pub line_width: f32,
}

impl DrawStyle {
    /// Style from a hex color; an unparsable color falls back to opaque white
    pub fn new(hex: &str, line_width: f32) -> Self {
        Self {
            color: parse_color(hex).unwrap_or(Rgba([255, 255, 255, 255])),
            line_width,
        }
    }
}

/// 2D drawing surface the overlay is rendered onto.
///
/// Landmark coordinates are normalized; the surface scales them to its own size.
pub trait Canvas {
    fn size(&self) -> (u32, u32);

    /// Match the source frame size. A no-op when the size is unchanged; an actual
    /// resize leaves the surface cleared.
    fn resize(&mut self, width: u32, height: u32);

    fn clear(&mut self);

    /// Draw a line for every connection whose endpoints both exist
    fn draw_connectors(
        &mut self,
        landmarks: &[Landmark],
        connections: &[Connection],
        style: &DrawStyle,
    );

    fn draw_landmarks(&mut self, landmarks: &[Landmark], style: &DrawStyle);

    /// Filled rectangle in pixel coordinates
    fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: Rgba<u8>);
}

/// Canvas backed by an RGBA image with a transparent background
pub struct ImageCanvas {
    image: RgbaImage,
}

impl ImageCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, TRANSPARENT),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn is_blank(&self) -> bool {
        self.image.pixels().all(|p| p[3] == 0)
    }

    fn to_pixels(&self, landmark: &Landmark) -> (f32, f32) {
        (
            landmark.x * self.image.width() as f32,
            landmark.y * self.image.height() as f32,
        )
    }

    fn thick_line(&mut self, start: (f32, f32), end: (f32, f32), style: &DrawStyle) {
        let (dx, dy) = (end.0 - start.0, end.1 - start.1);
        let length = (dx * dx + dy * dy).sqrt();
        if length == 0.0 || style.line_width <= 1.0 {
            draw_line_segment_mut(&mut self.image, start, end, style.color);
            return;
        }

        // Offset copies of the segment along its normal
        let (nx, ny) = (-dy / length, dx / length);
        let half = style.line_width / 2.0;
        let mut offset = -half;
        while offset <= half {
            let shift = (nx * offset, ny * offset);
            draw_line_segment_mut(
                &mut self.image,
                (start.0 + shift.0, start.1 + shift.1),
                (end.0 + shift.0, end.1 + shift.1),
                style.color,
            );
            offset += 0.5;
        }
    }
}

impl Canvas for ImageCanvas {
    fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn resize(&mut self, width: u32, height: u32) {
        if self.image.dimensions() != (width, height) {
            tracing::debug!("Resizing overlay to {}x{}", width, height);
            self.image = RgbaImage::from_pixel(width, height, TRANSPARENT);
        }
    }

    fn clear(&mut self) {
        self.image.pixels_mut().for_each(|p| *p = TRANSPARENT);
    }

    fn draw_connectors(
        &mut self,
        landmarks: &[Landmark],
        connections: &[Connection],
        style: &DrawStyle,
    ) {
        for &(a, b) in connections {
            let (Some(start), Some(end)) = (landmarks.get(a), landmarks.get(b)) else {
                continue;
            };
            let (start, end) = (self.to_pixels(start), self.to_pixels(end));
            self.thick_line(start, end, style);
        }
    }

    fn draw_landmarks(&mut self, landmarks: &[Landmark], style: &DrawStyle) {
        let radius = (style.line_width * 1.5).round().max(2.0) as i32;
        for landmark in landmarks {
            let (x, y) = self.to_pixels(landmark);
            draw_filled_circle_mut(&mut self.image, (x as i32, y as i32), radius, style.color);
        }
    }

    fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: Rgba<u8>) {
        let (w, h) = (width.round() as u32, height.round() as u32);
        if w == 0 || h == 0 {
            return;
        }
        draw_filled_rect_mut(
            &mut self.image,
            Rect::at(x.round() as i32, y.round() as i32).of_size(w, h),
            color,
        );
    }
}
