use image::{imageops, RgbImage};
use ndarray::Array4;

/// Preprocessor for converting camera frames to landmark model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    pub fn square(size: u32) -> Self {
        Self::new(size, size)
    }

    /// Preprocess an RGB image into a normalized NHWC tensor
    ///
    /// Steps:
    /// 1. Resize the whole frame to target dimensions (no cropping)
    /// 2. Convert to float and normalize to [0, 1]
    /// 3. Lay out as NHWC, which is what the MediaPipe landmark models take
    ///
    /// Returns: Array4<f32> with shape [1, height, width, 3]
    pub fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized;
        let source = if image.dimensions() != (self.target_width, self.target_height) {
            resized = imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            );
            &resized
        } else {
            image
        };

        Array4::from_shape_fn(
            (1, self.target_height as usize, self.target_width as usize, 3),
            |(_, y, x, c)| source.get_pixel(x as u32, y as u32)[c] as f32 / 255.0,
        )
    }

    /// Map raw model coordinates (pixels in model input space) to [0, 1]
    pub fn normalize_point(&self, x: f32, y: f32, z: f32) -> (f32, f32, f32) {
        (
            x / self.target_width as f32,
            y / self.target_height as f32,
            z / self.target_width as f32,
        )
    }
}
