mod canvas;
mod renderer;
pub mod topology;

pub use canvas::{parse_color, Canvas, DrawStyle, ImageCanvas};
pub use renderer::{renderer_for, FaceOverlay, HandOverlay, OverlayRenderer};

#[cfg(test)]
pub(crate) use renderer::tests::RecordingCanvas;
