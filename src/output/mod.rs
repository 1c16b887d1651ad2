mod loopback;

pub use loopback::V4L2Output;

use anyhow::{Context, Result};
use image::{imageops, DynamicImage, RgbImage, RgbaImage};
use std::path::Path;

/// Trait for output destinations
pub trait OutputSink {
    /// Write a composited frame to the output
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Get the expected output resolution
    fn resolution(&self) -> (u32, u32);
}

/// Alpha-blend the overlay over the camera frame, anchored at the top-left corner
pub fn composite(frame: &RgbImage, overlay: &RgbaImage) -> RgbImage {
    let mut base = DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
    imageops::overlay(&mut base, overlay, 0, 0);
    DynamicImage::ImageRgba8(base).to_rgb8()
}

pub fn save_snapshot<P: AsRef<Path>>(frame: &RgbImage, path: P) -> Result<()> {
    let path = path.as_ref();
    frame
        .save(path)
        .with_context(|| format!("Failed to save snapshot to {}", path.display()))?;
    tracing::info!("Snapshot saved to {}", path.display());
    Ok(())
}
