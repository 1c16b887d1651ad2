use super::OutputSink;
use anyhow::{Context, Result};
use image::RgbImage;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// Annotated frames out through a v4l2loopback device as YUYV
pub struct V4L2Output {
    // Holds the negotiated format while frames are written
    _device: Device,
    file: File,
    width: u32,
    height: u32,
    frames_written: u64,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2 device at {}", path.display()))?;
        let requested = Format::new(width, height, FourCC::new(b"YUYV"));
        let format = Output::set_format(&device, &requested)
            .context("Failed to set YUYV output format")?;
        if (format.width, format.height) != (width, height) {
            tracing::warn!(
                "Output device chose {}x{} instead of {}x{}",
                format.width,
                format.height,
                width,
                height
            );
        }

        // Frame data goes through plain write(2), which v4l2loopback accepts
        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        Ok(Self {
            _device: device,
            file,
            width: format.width,
            height: format.height,
            frames_written: 0,
        })
    }
}

/// Pack RGB into YUYV 4:2:2; odd trailing columns reuse the last pixel
fn rgb_to_yuyv(image: &RgbImage) -> Vec<u8> {
    let (width, height) = image.dimensions();
    let mut packed = Vec::with_capacity((width.div_ceil(2) * 4 * height) as usize);

    for row in image.rows() {
        let pixels: Vec<_> = row.collect();
        for pair in pixels.chunks(2) {
            let first = pair[0];
            let second = pair.get(1).copied().unwrap_or(first);
            let (y0, u0, v0) = rgb_to_yuv(first.0);
            let (y1, u1, v1) = rgb_to_yuv(second.0);
            packed.extend_from_slice(&[
                y0,
                ((u0 as u16 + u1 as u16) / 2) as u8,
                y1,
                ((v0 as u16 + v1 as u16) / 2) as u8,
            ]);
        }
    }

    packed
}

fn rgb_to_yuv([r, g, b]: [u8; 3]) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8;
    let u = (-0.147 * r - 0.289 * g + 0.436 * b + 128.0).round().clamp(0.0, 255.0) as u8;
    let v = (0.615 * r - 0.515 * g - 0.100 * b + 128.0).round().clamp(0.0, 255.0) as u8;
    (y, u, v)
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let packed = if frame.dimensions() != (self.width, self.height) {
            let scaled = image::imageops::resize(
                frame,
                self.width,
                self.height,
                image::imageops::FilterType::Triangle,
            );
            rgb_to_yuyv(&scaled)
        } else {
            rgb_to_yuyv(frame)
        };

        self.file
            .write_all(&packed)
            .context("Failed to write frame to v4l2loopback device")?;

        self.frames_written += 1;
        if self.frames_written == 1 {
            tracing::debug!("First frame written to output ({} bytes)", packed.len());
        }
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
